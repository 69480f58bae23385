//! Exposes the deimos error type

use std::sync::PoisonError;

use thiserror::Error;

/// Error type that deimos can return.
///
/// Task failure statuses fan out to every downstream consumer of a submission
/// graph (retire cleanup fails each signal semaphore with its own copy of the
/// status), which is why this type is [`Clone`].
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// The block pool could not provide backing memory for an allocation.
    #[error("Resource exhausted: `{0}`")]
    ResourceExhausted(&'static str),
    /// A semaphore list was built from parallel sequences of different lengths.
    #[error("Semaphore list length mismatch: {semaphores} semaphores, {values} payload values")]
    SemaphoreListMismatch {
        /// Length of the semaphore reference sequence.
        semaphores: usize,
        /// Length of the payload value sequence.
        values: usize,
    },
    /// A semaphore was asked to signal a payload lower than its current value.
    #[error("Semaphore payload cannot regress from {current} to {value}")]
    SemaphoreRegression {
        /// Payload value the semaphore currently holds.
        current: u64,
        /// Value the failed signal attempted to set.
        value: u64,
    },
    /// A semaphore was dropped while tasks were still waiting on it. The waits
    /// are resolved with this error so dependent submissions drain instead of
    /// hanging forever.
    #[error("Semaphore abandoned with pending waits")]
    SemaphoreAbandoned,
    /// A wait did not complete before its deadline. The waited-on work is not
    /// cancelled and the wait may be retried.
    #[error("Deadline exceeded")]
    DeadlineExceeded,
    /// Poisoned mutex
    #[error("Poisoned mutex")]
    PoisonError,
    /// A command buffer reported a failure while issuing or executing.
    #[error("Command buffer failed: `{0}`")]
    CommandFailed(String),
    /// Uncategorized error.
    #[error("Uncategorized error: `{0}`")]
    Uncategorized(&'static str),
}

impl<T> From<PoisonError<T>> for Error {
    fn from(_: PoisonError<T>) -> Self {
        Error::PoisonError
    }
}
