use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;

use deimos::prelude::*;

mod framework;

use framework::{CountingCmd, FailingCmd, RecordingCmd};

#[test]
pub fn signal_only_batch_advances_semaphore() -> Result<()> {
    let ctx = framework::make_context()?;
    let queue = framework::make_queue(&ctx, "signal-only");
    let sem = Arc::new(Semaphore::new(0));

    queue.submit([SubmissionBatch::new().signal(&sem, 1)])?;
    queue.wait_idle(None)?;
    assert_eq!(sem.value()?, 1);
    Ok(())
}

#[test]
pub fn zero_batches_is_a_noop() -> Result<()> {
    let ctx = framework::make_context()?;
    let queue = framework::make_queue(&ctx, "empty");
    queue.submit(Vec::new())?;
    queue.wait_idle(None)?;
    Ok(())
}

#[test]
pub fn chained_batches_on_one_queue() -> Result<()> {
    let ctx = framework::make_context()?;
    let queue = framework::make_queue(&ctx, "chain");
    let sem_a = Arc::new(Semaphore::new(0));
    let sem_b = Arc::new(Semaphore::new(0));

    queue.submit([
        SubmissionBatch::new().signal(&sem_a, 1),
        SubmissionBatch::new().wait(&sem_a, 1).signal(&sem_b, 1),
    ])?;
    queue.wait_idle(None)?;
    assert_eq!(sem_a.value()?, 1);
    assert_eq!(sem_b.value()?, 1);
    Ok(())
}

#[test]
pub fn commands_complete_before_signals_are_visible() -> Result<()> {
    let ctx = framework::make_context()?;
    let queue = framework::make_queue(&ctx, "counting");
    let sem = Arc::new(Semaphore::new(0));
    let counter = Arc::new(AtomicUsize::new(0));

    queue.submit([SubmissionBatch::new()
        .execute(Arc::new(CountingCmd {
            counter: counter.clone(),
            leaves: 8,
        }))
        .signal(&sem, 1)])?;

    // The signal only becomes visible once every leaf has completed, so a
    // host wait on the semaphore is enough to observe all of them.
    sem.wait(1, Some(Duration::from_secs(5)))?;
    assert_eq!(counter.load(Ordering::Acquire), 8);
    queue.wait_idle(None)?;
    Ok(())
}

#[test]
pub fn cross_queue_wait() -> Result<()> {
    let ctx = framework::make_context()?;
    let producer = framework::make_queue(&ctx, "producer");
    let consumer = framework::make_queue(&ctx, "consumer");
    let sem_x = Arc::new(Semaphore::new(0));
    let sem_y = Arc::new(Semaphore::new(0));

    // Submit the consumer first so its wait is registered before anything
    // signals, exercising the real cross-queue wait path.
    consumer.submit([SubmissionBatch::new().wait(&sem_x, 5).signal(&sem_y, 1)])?;
    producer.submit([SubmissionBatch::new().signal(&sem_x, 5)])?;

    consumer.wait_idle(None)?;
    producer.wait_idle(None)?;
    assert_eq!(sem_x.value()?, 5);
    assert_eq!(sem_y.value()?, 1);
    Ok(())
}

#[test]
pub fn wait_satisfied_before_submit_behaves_like_after() -> Result<()> {
    let ctx = framework::make_context()?;
    let queue = framework::make_queue(&ctx, "pre-signalled");
    let sem_x = Arc::new(Semaphore::new(0));
    let sem_y = Arc::new(Semaphore::new(0));

    // Signal first: the wait's timepoint short-circuits to ready and the
    // final state is identical to the signalled-after case.
    sem_x.signal(5)?;
    queue.submit([SubmissionBatch::new().wait(&sem_x, 5).signal(&sem_y, 1)])?;
    queue.wait_idle(None)?;
    assert_eq!(sem_y.value()?, 1);
    Ok(())
}

#[test]
pub fn fifo_issue_order_over_many_batches() -> Result<()> {
    const BATCHES: usize = 100;

    let ctx = framework::make_context()?;
    let queue = framework::make_queue(&ctx, "fifo");
    let log = Arc::new(Mutex::new(Vec::new()));

    let batches: Vec<SubmissionBatch> = (0..BATCHES)
        .map(|index| {
            SubmissionBatch::new().execute(Arc::new(RecordingCmd {
                log: log.clone(),
                index,
            }))
        })
        .collect();
    queue.submit(batches)?;
    queue.wait_idle(None)?;

    let log = log.lock().unwrap();
    assert_eq!(*log, (0..BATCHES).collect::<Vec<_>>());
    Ok(())
}

#[test]
pub fn submit_with_fence_resolves_on_completion() -> Result<()> {
    let ctx = framework::make_context()?;
    let queue = framework::make_queue(&ctx, "fenced");
    let sem = Arc::new(Semaphore::new(0));

    let fence = queue.submit_with_fence(SubmissionBatch::new().signal(&sem, 1))?;
    fence.wait(Some(Duration::from_secs(5)))?;
    // The fence marks the batch retired, so the signal is already visible.
    assert_eq!(sem.value()?, 1);
    queue.wait_idle(None)?;
    Ok(())
}

#[test]
pub fn submit_with_fence_reports_batch_failure() -> Result<()> {
    let ctx = framework::make_context()?;
    let queue = framework::make_queue(&ctx, "fenced-failure");

    let fence =
        queue.submit_with_fence(SubmissionBatch::new().execute(Arc::new(FailingCmd)))?;
    assert!(matches!(
        fence.wait(Some(Duration::from_secs(5))),
        Err(Error::CommandFailed(_))
    ));
    let _ = queue.wait_idle(None);
    Ok(())
}

#[test]
pub fn failing_command_fails_signal_semaphores() -> Result<()> {
    let ctx = framework::make_context()?;
    let queue = framework::make_queue(&ctx, "failing");
    let sem = Arc::new(Semaphore::new(0));

    queue.submit([SubmissionBatch::new()
        .execute(Arc::new(FailingCmd))
        .signal(&sem, 1)])?;
    assert!(matches!(
        queue.wait_idle(None),
        Err(Error::CommandFailed(_))
    ));
    assert!(matches!(sem.value(), Err(Error::CommandFailed(_))));
    Ok(())
}

#[test]
pub fn failure_cascades_through_dependent_batches() -> Result<()> {
    let ctx = framework::make_context()?;
    let producer = framework::make_queue(&ctx, "failing-producer");
    let consumer = framework::make_queue(&ctx, "failing-consumer");
    let sem_a = Arc::new(Semaphore::new(0));
    let sem_b = Arc::new(Semaphore::new(0));

    producer.submit([SubmissionBatch::new()
        .execute(Arc::new(FailingCmd))
        .signal(&sem_a, 1)])?;
    consumer.submit([SubmissionBatch::new().wait(&sem_a, 1).signal(&sem_b, 1)])?;

    assert!(producer.wait_idle(None).is_err());
    assert!(consumer.wait_idle(None).is_err());
    // Both semaphores end up failed, so any further consumer observes the
    // error instead of hanging.
    assert!(matches!(sem_a.value(), Err(Error::CommandFailed(_))));
    assert!(matches!(sem_b.value(), Err(Error::CommandFailed(_))));
    Ok(())
}

#[test]
pub fn submissions_after_a_failure_still_execute() -> Result<()> {
    let ctx = framework::make_context()?;
    let queue = framework::make_queue(&ctx, "failure-then-ok");
    let failed = Arc::new(Semaphore::new(0));
    let ok = Arc::new(Semaphore::new(0));

    queue.submit([SubmissionBatch::new()
        .execute(Arc::new(FailingCmd))
        .signal(&failed, 1)])?;
    // An independent batch submitted afterwards is ordered behind the failed
    // issue but does not inherit its failure.
    queue.submit([SubmissionBatch::new().signal(&ok, 1)])?;

    assert!(queue.wait_idle(None).is_err());
    assert!(failed.value().is_err());
    assert_eq!(ok.value()?, 1);
    Ok(())
}

#[test]
pub fn wait_idle_times_out_and_queue_stays_usable() -> Result<()> {
    let ctx = framework::make_context()?;
    let queue = framework::make_queue(&ctx, "timeout");
    let external = Arc::new(Semaphore::new(0));
    let first = Arc::new(Semaphore::new(0));
    let second = Arc::new(Semaphore::new(0));

    queue.submit([SubmissionBatch::new().wait(&external, 1).signal(&first, 1)])?;
    assert!(matches!(
        queue.wait_idle(Some(Duration::from_millis(10))),
        Err(Error::DeadlineExceeded)
    ));

    // The queue accepts further submissions while the wait is pending.
    queue.submit([SubmissionBatch::new().signal(&second, 1)])?;

    // Once the external semaphore resolves, everything drains.
    external.signal(1)?;
    queue.wait_idle(None)?;
    assert_eq!(first.value()?, 1);
    assert_eq!(second.value()?, 1);
    Ok(())
}

#[test]
pub fn abandoned_wait_semaphore_fails_the_batch() -> Result<()> {
    let ctx = framework::make_context()?;
    let queue = framework::make_queue(&ctx, "abandoned");
    let external = Arc::new(Semaphore::new(0));
    let sem = Arc::new(Semaphore::new(0));

    queue.submit([SubmissionBatch::new().wait(&external, 1).signal(&sem, 1)])?;
    // Dropping the last reference to the wait semaphore resolves its
    // timepoints as failed instead of leaving the batch stuck forever.
    drop(external);

    assert!(matches!(
        queue.wait_idle(None),
        Err(Error::SemaphoreAbandoned)
    ));
    assert!(matches!(sem.value(), Err(Error::SemaphoreAbandoned)));
    Ok(())
}

#[test]
pub fn staged_arena_data_flows_to_leaf_tasks() -> Result<()> {
    let ctx = framework::make_context()?;
    let queue = framework::make_queue(&ctx, "staging");
    let sum = Arc::new(AtomicUsize::new(0));

    let result = sum.clone();
    let command: Arc<dyn CommandBuffer> = Arc::new(move |ctx: &mut IssueContext| {
        // Stage parameters at issue time; the leaf reads them later on a
        // worker thread. The arena keeps them alive until the batch retires.
        let view = ctx.arena().stage(&[1, 2, 3, 4])?;
        let arena = ctx.arena().clone();
        let result = result.clone();
        ctx.spawn("sum", move || {
            let total =
                arena.with_slice(&view, |bytes| bytes.iter().map(|&b| usize::from(b)).sum())?;
            result.store(total, Ordering::Release);
            Ok(())
        });
        Ok(())
    });

    queue.submit([SubmissionBatch::new().execute(command)])?;
    queue.wait_idle(None)?;
    assert_eq!(sum.load(Ordering::Acquire), 10);
    // Every submission arena has been torn down and recycled.
    assert_eq!(ctx.pool.outstanding(), 0);
    Ok(())
}

#[test]
pub fn exhausted_block_pool_fails_submit_cleanly() -> Result<()> {
    let ctx = framework::make_context_with_block_limit(0)?;
    let queue = framework::make_queue(&ctx, "exhausted");
    let sem = Arc::new(Semaphore::new(0));

    let error = queue
        .submit([SubmissionBatch::new().signal(&sem, 1)])
        .unwrap_err();
    assert!(matches!(
        error.downcast_ref::<Error>(),
        Some(Error::ResourceExhausted(_))
    ));
    // Nothing was launched: the queue is idle and the semaphore untouched.
    queue.wait_idle(None)?;
    assert_eq!(sem.value()?, 0);
    assert_eq!(ctx.pool.outstanding(), 0);
    Ok(())
}

#[test]
pub fn arenas_are_recycled_after_wait_idle() -> Result<()> {
    let ctx = framework::make_context()?;
    let queue = framework::make_queue(&ctx, "recycling");
    let sem = Arc::new(Semaphore::new(0));

    for round in 1..=8u64 {
        queue.submit([SubmissionBatch::new().signal(&sem, round)])?;
    }
    queue.wait_idle(None)?;
    assert_eq!(sem.value()?, 8);
    assert_eq!(ctx.pool.outstanding(), 0);
    Ok(())
}

#[test]
pub fn queue_drops_cleanly_after_wait_idle() -> Result<()> {
    let ctx = framework::make_context()?;
    let queue = framework::make_queue(&ctx, "teardown");
    let sem = Arc::new(Semaphore::new(0));

    queue.submit([SubmissionBatch::new().signal(&sem, 1)])?;
    queue.wait_idle(None)?;
    drop(queue);
    assert_eq!(sem.value()?, 1);
    Ok(())
}
