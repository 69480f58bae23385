//! Exposes the queue object that turns submission batches into task graphs.
//!
//! Each submitted batch becomes a small graph of dependent tasks:
//!
//! - an optional *wait* task registering a timepoint per wait semaphore,
//! - an *issue* task asking every command buffer to enqueue its own
//!   sub-graph of leaf work,
//! - a *retire* task advancing the batch's signal semaphores once the issue
//!   task and all command leaves have completed, and
//! - a scope-bound fence as the graph's terminal completion.
//!
//! Successive submissions on one queue are stitched together so their issue
//! tasks run in FIFO order: the issue of batch N+1 is gated on completion of
//! the *issue* of batch N, not on N's commands, so commands of distinct
//! batches may still overlap freely. Failures anywhere in a batch propagate
//! to its retire task, which fails every signal semaphore so downstream
//! consumers on any queue observe the error instead of hanging.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use static_assertions::assert_impl_all;

use crate::allocator::arena::{Arena, SubmissionArena};
use crate::command_buffer::{CommandBuffer, IssueContext};
use crate::executor::scope::TaskScope;
use crate::executor::task::{Submission, Task, TaskContext};
use crate::executor::Executor;
use crate::pool::BlockPool;
use crate::sync::fence::Fence;
use crate::sync::submit_batch::SubmissionBatch;
use crate::Error;

/// Executor-facing per-queue state passed through to every command buffer
/// issue, e.g. to resolve queue-wide binding tables.
#[derive(Debug)]
pub struct QueueState {
    identifier: String,
}

impl QueueState {
    /// Identifier of the queue this state belongs to.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

#[derive(Debug)]
struct QueueShared {
    state: QueueState,
    /// Most recently submitted issue task that has not yet been chained onto;
    /// used purely for FIFO stitching of successive submissions. Cleared by
    /// the issue task's own cleanup so a later submission can never chain
    /// onto a retired task.
    tail_issue: Mutex<Option<Arc<Task>>>,
}

/// A logical submission queue executing command buffers on a task executor.
///
/// Queues accept [`SubmissionBatch`]es through [`Queue::submit`] and track
/// their progress in an owned [`TaskScope`]; [`Queue::wait_idle`] blocks
/// until every in-flight submission has retired. All queues of a device
/// typically share one [`Executor`] and one [`BlockPool`].
///
/// Dropping the queue waits for the scope to drain, so a queue must not be
/// dropped while a submission waits on a semaphore nothing will ever signal.
#[derive(Debug)]
pub struct Queue {
    executor: Executor,
    block_pool: BlockPool,
    scope: TaskScope,
    shared: Arc<QueueShared>,
}

assert_impl_all!(Queue: Send, Sync);

impl Queue {
    /// Create a new queue submitting to `executor` and drawing submission
    /// arenas from `block_pool`. The identifier names the queue's task scope
    /// in logs. There is no failure path.
    pub fn new(identifier: impl Into<String>, executor: Executor, block_pool: BlockPool) -> Self {
        let identifier = identifier.into();
        let scope = TaskScope::new(identifier.clone());
        debug!("Created queue `{identifier}`");
        Queue {
            executor,
            block_pool,
            scope,
            shared: Arc::new(QueueShared {
                state: QueueState { identifier },
                tail_issue: Mutex::new(None),
            }),
        }
    }

    /// Identifier this queue was created with.
    pub fn identifier(&self) -> &str {
        self.shared.state.identifier()
    }

    /// Submit a sequence of batches and flush the executor so the staged work
    /// becomes visible to the worker threads.
    ///
    /// Batches are issued in FIFO order relative to every other submission on
    /// this queue. Returns the first error; batches staged before a failing
    /// one keep executing and clean themselves up through their own retire
    /// tasks, no attempt is made to unwind them.
    pub fn submit(&self, batches: impl IntoIterator<Item = SubmissionBatch>) -> Result<()> {
        let result = batches
            .into_iter()
            .try_for_each(|batch| self.submit_batch(batch).map(|_fence| ()));
        self.executor.flush();
        result?;
        Ok(())
    }

    /// Submit a single batch and return a [`Fence`] that can be waited on
    /// for completion of exactly this batch, where [`Queue::wait_idle`]
    /// would wait for the whole queue. The fence resolves `Ok` once the
    /// batch has retired and its signal semaphores are advanced, or with the
    /// error that failed it.
    pub fn submit_with_fence(&self, batch: SubmissionBatch) -> Result<Fence> {
        let result = self.submit_batch(batch);
        self.executor.flush();
        Ok(result?)
    }

    /// Block until every in-flight submission on this queue has retired, or
    /// until the timeout expires. `None` waits forever.
    ///
    /// Once idle, reports the scope's permanent status: the first failure
    /// that occurred in any of this queue's submissions, or `Ok`.
    pub fn wait_idle(&self, timeout: Option<Duration>) -> Result<(), Error> {
        self.scope
            .wait_idle(timeout.map(|timeout| Instant::now() + timeout))
    }

    /// Turn one batch into its wait/issue/retire graph and hand it to the
    /// executor, returning the batch's fence. Anything that fails in here
    /// tears down by drop: no task has been launched yet, and dropping the
    /// arena handle recycles its blocks.
    fn submit_batch(&self, batch: SubmissionBatch) -> Result<Fence, Error> {
        let SubmissionBatch {
            waits,
            command_buffers,
            signals,
        } = batch;
        let command_count = command_buffers.len();

        // The retire command owns the arena the submission graph stages its
        // transient data in. The signal list is retained once and shared
        // between the retire body and its cleanup.
        let arena = SubmissionArena::new(Arena::new(&self.block_pool)?);
        let signals = Arc::new(signals);
        let retire = Task::new(
            "retire",
            &self.scope,
            Some(Box::new({
                let signals = Arc::clone(&signals);
                move |_ctx: &mut TaskContext<'_>| {
                    for (semaphore, value) in signals.iter() {
                        semaphore.signal(value)?;
                    }
                    Ok(())
                }
            })),
        );
        retire.set_cleanup(Box::new({
            let arena = arena.clone();
            let signals = Arc::clone(&signals);
            move |_task: &Task, status: &Result<(), Error>| {
                if let Err(error) = status {
                    for (semaphore, _) in signals.iter() {
                        semaphore.fail(error.clone());
                    }
                }
                // Signal references drop first; the arena handle drops last
                // and returns the submission's blocks to the pool.
                drop(signals);
                drop(arena);
            }
        }));

        // Scope-bound fence as the graph's terminal completion, so external
        // signalling hangs off the terminal node without coupling to the
        // retire command's internals.
        let fence = self.executor.acquire_fence(&self.scope);
        retire.add_successor(fence.task(), true);

        // The issue command walks the batch's command buffers and asks each
        // to enqueue its sub-graph, wired to complete into the retire task.
        let issue = Task::new(
            "issue",
            &self.scope,
            Some(Box::new({
                let shared = Arc::clone(&self.shared);
                let arena = arena.clone();
                let retire = Arc::clone(&retire);
                move |ctx: &mut TaskContext<'_>| {
                    let mut issue_ctx = IssueContext {
                        state: &shared.state,
                        completion: &retire,
                        arena: &arena,
                        ctx,
                    };
                    for command_buffer in &command_buffers {
                        command_buffer.issue(&mut issue_ctx)?;
                    }
                    Ok(())
                }
            })),
        );
        issue.set_cleanup(Box::new({
            let shared = Arc::downgrade(&self.shared);
            move |task: &Task, _status: &Result<(), Error>| {
                if let Some(shared) = shared.upgrade() {
                    let mut tail = shared.tail_issue.lock().unwrap();
                    if tail
                        .as_ref()
                        .map_or(false, |tail| std::ptr::eq(Arc::as_ptr(tail), task))
                    {
                        *tail = None;
                    }
                }
            }
        }));
        issue.add_successor(&retire, true);

        // With unsatisfied waits, a wait command precedes the issue: each
        // (semaphore, value) becomes a timepoint task feeding the issue, and
        // timepoints the payload already satisfies launch immediately. The
        // retained wait list is released when the body closure drops.
        let wait = if waits.is_empty() {
            None
        } else {
            let wait = Task::new(
                "wait",
                &self.scope,
                Some(Box::new({
                    let scope = self.scope.clone();
                    let issue = Arc::clone(&issue);
                    move |ctx: &mut TaskContext<'_>| {
                        for (semaphore, value) in waits.iter() {
                            let timepoint = Task::new("timepoint", &scope, None);
                            timepoint.add_successor(&issue, true);
                            if let Err(error) = semaphore.enqueue_timepoint(
                                ctx.core,
                                value,
                                Arc::clone(&timepoint),
                                ctx.pending,
                            ) {
                                // The rejected timepoint already counts as a
                                // dependency of the issue task; it must still
                                // drain for the graph to resolve.
                                timepoint.poison(&error);
                                ctx.pending.push(timepoint);
                                return Err(error);
                            }
                        }
                        Ok(())
                    }
                })),
            );
            wait.add_successor(&issue, true);
            Some(wait)
        };

        // FIFO stitching: gate this issue on the previous one. The stitch
        // edge orders issues without propagating the previous batch's status;
        // cross-batch failures travel through semaphores only. The mutex is
        // held for the two pointer updates and nothing else.
        {
            let mut tail = self.shared.tail_issue.lock()?;
            if let Some(previous) = tail.as_ref() {
                previous.add_successor(&issue, false);
            }
            *tail = Some(Arc::clone(&issue));
        }

        trace!(
            "queue `{}`: staged batch ({command_count} command buffers, waited: {}, {} signals)",
            self.identifier(),
            wait.is_some(),
            signals.len(),
        );

        let mut submission = Submission::new();
        if let Some(wait) = wait {
            submission.push(wait);
        }
        submission.push(issue);
        submission.push(retire);
        submission.push(fence.task().clone());
        self.executor.submit(submission);
        Ok(fence)
    }
}

impl Drop for Queue {
    /// Waits for the scope to drain, ignoring its status: this is the
    /// shutdown path. Requires that no submit runs concurrently.
    fn drop(&mut self) {
        let _ = self.scope.wait_idle(None);
        debug_assert!(
            self.shared
                .tail_issue
                .lock()
                .map(|tail| tail.is_none())
                .unwrap_or(true),
            "queue dropped with a live tail issue task"
        );
    }
}
