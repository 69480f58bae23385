//! Re-exports most commonly used types in the library

pub use crate::allocator::arena::{Arena, ArenaView, SubmissionArena};
pub use crate::command_buffer::{CommandBuffer, IssueContext};
pub use crate::core::error::Error;
pub use crate::executor::scope::TaskScope;
pub use crate::executor::Executor;
pub use crate::pool::BlockPool;
pub use crate::queue::{Queue, QueueState};
pub use crate::sync::fence::Fence;
pub use crate::sync::semaphore::{Semaphore, SemaphoreList};
pub use crate::sync::submit_batch::SubmissionBatch;
