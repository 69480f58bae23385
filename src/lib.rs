//! Task-based submission queue core for executing command buffers on CPU
//! backends.
//!
//! Deimos provides the queue layer of a hardware abstraction layer for
//! machine-learning runtimes that execute pre-compiled command buffers on
//! CPU-like devices. Callers hand a [`Queue`] submission batches — semaphores
//! to wait on, command buffers to execute, semaphores to signal — and the
//! queue turns each batch into a small graph of dependent tasks on a shared
//! work-stealing [`Executor`], preserving FIFO issue order per queue and
//! propagating failures through dependent semaphores rather than hanging
//! downstream consumers.
//!
//! # Example
//! ```
//! use std::sync::Arc;
//!
//! use deimos::prelude::*;
//!
//! # fn main() -> anyhow::Result<()> {
//! // One executor and block pool are typically shared by all queues.
//! let executor = Executor::default();
//! let pool = BlockPool::new(16 * 1024);
//! let queue = Queue::new("main", executor, pool);
//!
//! let done = Arc::new(Semaphore::new(0));
//! let batch = SubmissionBatch::new()
//!     .execute(Arc::new(|ctx: &mut IssueContext| {
//!         ctx.spawn("hello", || {
//!             println!("executing on a worker thread");
//!             Ok(())
//!         });
//!         Ok(())
//!     }))
//!     .signal(&done, 1);
//! queue.submit([batch])?;
//! queue.wait_idle(None)?;
//! assert_eq!(done.value()?, 1);
//! # Ok(())
//! # }
//! ```
//!
//! For further details, check out the following modules
//! - [`queue`] for the submission pipeline and its ordering guarantees.
//! - [`sync`] for timeline semaphores and submission batches.
//! - [`executor`] for the work-stealing task executor and task scopes.
//! - [`allocator`] for the block pool and per-submission arenas.
//! - [`command_buffer`] for the command buffer issue interface.

#[macro_use]
extern crate derivative;
#[macro_use] extern crate log;

pub mod prelude;
pub use crate::prelude::*;

pub mod allocator;
pub mod command_buffer;
pub mod core;
pub mod executor;
pub mod pool;
pub mod queue;
pub mod sync;
