//! Synchronization primitives for queue submissions.
//!
//! - The [`semaphore`] module provides timeline semaphores, used both for
//!   queue-to-queue synchronization and for host-side waits, along with the
//!   parallel semaphore/payload list type used in submission batches.
//! - [`submit_batch`] provides the [`SubmissionBatch`](submit_batch::SubmissionBatch)
//!   struct describing one unit of queue work.
//! - The [`fence`] module provides the completion marker the queue hangs off
//!   the terminal node of every submission graph, returned to callers by
//!   [`Queue::submit_with_fence`](crate::Queue::submit_with_fence).

pub mod fence;
pub mod semaphore;
pub mod submit_batch;
