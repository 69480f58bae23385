#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;

use deimos::prelude::*;

/// Shared context for queue tests: one executor and one block pool, the way
/// all queues of a device would share them.
#[derive(Debug, Clone)]
pub struct Context {
    pub executor: Executor,
    pub pool: BlockPool,
}

/// Creates a deimos context ready for automated tests.
pub fn make_context() -> Result<Context> {
    let _ = pretty_env_logger::try_init();
    Ok(Context {
        executor: Executor::new(4),
        pool: BlockPool::new(4096),
    })
}

/// Create a context whose block pool refuses to hand out more than `limit`
/// blocks at once.
pub fn make_context_with_block_limit(limit: usize) -> Result<Context> {
    let _ = pretty_env_logger::try_init();
    Ok(Context {
        executor: Executor::new(4),
        pool: BlockPool::with_limit(4096, Some(limit)),
    })
}

pub fn make_queue(ctx: &Context, name: &str) -> Queue {
    Queue::new(name, ctx.executor.clone(), ctx.pool.clone())
}

/// Command buffer that records its index into a shared log at issue time.
/// Useful for asserting FIFO issue order across batches.
pub struct RecordingCmd {
    pub log: Arc<Mutex<Vec<usize>>>,
    pub index: usize,
}

impl CommandBuffer for RecordingCmd {
    fn issue(&self, _ctx: &mut IssueContext<'_, '_>) -> Result<(), Error> {
        self.log.lock().unwrap().push(self.index);
        Ok(())
    }
}

/// Command buffer that spawns `leaves` leaf tasks, each bumping a shared
/// counter on a worker thread.
pub struct CountingCmd {
    pub counter: Arc<AtomicUsize>,
    pub leaves: usize,
}

impl CommandBuffer for CountingCmd {
    fn issue(&self, ctx: &mut IssueContext<'_, '_>) -> Result<(), Error> {
        for _ in 0..self.leaves {
            let counter = self.counter.clone();
            ctx.spawn("count", move || {
                counter.fetch_add(1, Ordering::AcqRel);
                Ok(())
            });
        }
        Ok(())
    }
}

/// Command buffer whose issue always fails.
pub struct FailingCmd;

impl CommandBuffer for FailingCmd {
    fn issue(&self, _ctx: &mut IssueContext<'_, '_>) -> Result<(), Error> {
        Err(Error::CommandFailed(String::from("injected failure")))
    }
}
