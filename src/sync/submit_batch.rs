//! Provides the [`SubmissionBatch`] struct describing one unit of queue work.

use std::sync::Arc;

use crate::command_buffer::CommandBuffer;
use crate::sync::semaphore::{Semaphore, SemaphoreList};

/// A batch of work for [`Queue::submit`](crate::Queue::submit): semaphores
/// that must reach their payload values before any command buffer issues,
/// command buffers to execute, and semaphores to advance once every command
/// of the batch has fully completed.
///
/// An empty command buffer sequence is legal and useful: a batch carrying
/// only waits and signals is a pure synchronization point.
///
/// # Example
/// ```
/// # use std::sync::Arc;
/// # use deimos::prelude::*;
/// let upload_done = Arc::new(Semaphore::new(0));
/// let frame_done = Arc::new(Semaphore::new(0));
/// let batch = SubmissionBatch::new()
///     .wait(&upload_done, 1)
///     .signal(&frame_done, 1);
/// ```
#[derive(Derivative, Default)]
#[derivative(Debug)]
pub struct SubmissionBatch {
    /// Semaphores that gate the issue of this batch's commands.
    pub waits: SemaphoreList,
    /// Command buffers to execute, in submission order.
    #[derivative(Debug = "ignore")]
    pub command_buffers: Vec<Arc<dyn CommandBuffer>>,
    /// Semaphores advanced after all commands of this batch have completed.
    pub signals: SemaphoreList,
}

impl SubmissionBatch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for `semaphore` to reach `value` before issuing this batch.
    pub fn wait(mut self, semaphore: &Arc<Semaphore>, value: u64) -> Self {
        self.waits.push(semaphore.clone(), value);
        self
    }

    /// Append a command buffer to the batch.
    pub fn execute(mut self, command_buffer: Arc<dyn CommandBuffer>) -> Self {
        self.command_buffers.push(command_buffer);
        self
    }

    /// Advance `semaphore` to `value` once all commands of this batch have
    /// completed.
    pub fn signal(mut self, semaphore: &Arc<Semaphore>, value: u64) -> Self {
        self.signals.push(semaphore.clone(), value);
        self
    }
}
