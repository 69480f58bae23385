//! The command buffer issue interface.
//!
//! Command buffers are caller-owned, pre-recorded units of work; the queue
//! does not interpret their contents. During the issue phase of a submission
//! each command buffer is asked to enqueue its own sub-graph of leaf tasks
//! through an [`IssueContext`], with every leaf converging on the
//! submission's retire command. Command buffers must stay valid until their
//! batch has retired.

use std::sync::Arc;

use crate::allocator::arena::SubmissionArena;
use crate::executor::task::{Task, TaskContext};
use crate::queue::QueueState;
use crate::Error;

/// Implemented by anything that can be executed on a
/// [`Queue`](crate::Queue).
pub trait CommandBuffer: Send + Sync {
    /// Enqueue this command buffer's work into the pending submission.
    ///
    /// Leaf tasks spawned through the context run on executor workers once
    /// the submission is flushed; the issue call itself must not block. An
    /// error aborts the issue of the remaining command buffers in the batch
    /// and fails the batch's signal semaphores.
    fn issue(&self, ctx: &mut IssueContext<'_, '_>) -> Result<(), Error>;
}

/// Any plain closure over an [`IssueContext`] acts as a command buffer. This
/// keeps one-off commands lightweight:
/// ```
/// # use std::sync::Arc;
/// # use deimos::prelude::*;
/// let command: Arc<dyn CommandBuffer> = Arc::new(|ctx: &mut IssueContext| {
///     ctx.spawn("leaf", || Ok(()));
///     Ok(())
/// });
/// ```
impl<F> CommandBuffer for F
where
    F: Fn(&mut IssueContext<'_, '_>) -> Result<(), Error> + Send + Sync,
{
    fn issue(&self, ctx: &mut IssueContext<'_, '_>) -> Result<(), Error> {
        self(ctx)
    }
}

/// Context handed to [`CommandBuffer::issue`] while a queue issues a batch.
pub struct IssueContext<'a, 'b> {
    pub(crate) state: &'a QueueState,
    pub(crate) completion: &'a Arc<Task>,
    pub(crate) arena: &'a SubmissionArena,
    pub(crate) ctx: &'a mut TaskContext<'b>,
}

impl IssueContext<'_, '_> {
    /// Per-queue state of the queue this batch was submitted to.
    pub fn queue_state(&self) -> &QueueState {
        self.state
    }

    /// The submission's transient arena. Data staged here stays valid until
    /// the batch retires.
    pub fn arena(&self) -> &SubmissionArena {
        self.arena
    }

    /// Spawn a leaf task executing `f` on a worker thread. The leaf's
    /// completion — or failure — feeds the batch's retire command.
    pub fn spawn<F>(&mut self, name: &'static str, f: F)
    where
        F: FnOnce() -> Result<(), Error> + Send + 'static,
    {
        let task = Task::new(
            name,
            self.completion.scope(),
            Some(Box::new(move |_ctx: &mut TaskContext<'_>| f())),
        );
        task.add_successor(self.completion, true);
        self.ctx.pending.push(task);
    }
}
