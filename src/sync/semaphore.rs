//! Timeline semaphores used for synchronization across queues and with the
//! host.
//!
//! A semaphore carries a monotonically advancing 64-bit payload and a failure
//! latch. Producers advance the payload with [`Semaphore::signal`]; consumers
//! either wait on the host with [`Semaphore::wait`] or let a queue wait by
//! listing the semaphore in a batch's wait list. Once failed, a semaphore
//! stays failed: every current and future wait observes the latched error, so
//! failures propagate across queues instead of deadlocking dependents.
//!
//! Semaphores are shared through [`Arc`]; every in-flight submission retains
//! each semaphore it references until the submission's retire command has run.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use static_assertions::assert_impl_all;

use crate::executor::task::{Submission, Task};
use crate::executor::ExecutorCore;
use crate::Error;

/// Registration of a task to become ready once the payload reaches a value.
#[derive(Derivative)]
#[derivative(Debug)]
struct Timepoint {
    value: u64,
    task: Arc<Task>,
    #[derivative(Debug = "ignore")]
    core: Arc<ExecutorCore>,
}

#[derive(Debug)]
struct SemaphoreState {
    value: u64,
    failure: Option<Error>,
    timepoints: Vec<Timepoint>,
}

/// A timeline semaphore: monotonic 64-bit payload with a failure latch.
#[derive(Debug)]
pub struct Semaphore {
    state: Mutex<SemaphoreState>,
    signaled: Condvar,
}

assert_impl_all!(Semaphore: Send, Sync);

impl Semaphore {
    /// Create a new semaphore with the given initial payload value.
    pub fn new(initial: u64) -> Self {
        Self {
            state: Mutex::new(SemaphoreState {
                value: initial,
                failure: None,
                timepoints: Vec::new(),
            }),
            signaled: Condvar::new(),
        }
    }

    /// Current payload value, or the latched error if the semaphore failed.
    pub fn value(&self) -> Result<u64, Error> {
        let state = self.state.lock()?;
        match &state.failure {
            Some(error) => Err(error.clone()),
            None => Ok(state.value),
        }
    }

    /// Advance the payload to `value` and resolve every registered timepoint
    /// the new value satisfies.
    /// # Errors
    /// * [`Error::SemaphoreRegression`] if `value` is lower than the current payload
    /// * The latched error if the semaphore already failed
    pub fn signal(&self, value: u64) -> Result<(), Error> {
        let fired = {
            let mut state = self.state.lock()?;
            if let Some(error) = &state.failure {
                return Err(error.clone());
            }
            if value < state.value {
                return Err(Error::SemaphoreRegression {
                    current: state.value,
                    value,
                });
            }
            state.value = value;
            let mut fired = Vec::new();
            let mut index = 0;
            while index < state.timepoints.len() {
                if state.timepoints[index].value <= value {
                    fired.push(state.timepoints.swap_remove(index));
                } else {
                    index += 1;
                }
            }
            fired
        };
        self.signaled.notify_all();
        for timepoint in fired {
            timepoint.core.launch(timepoint.task, true);
        }
        Ok(())
    }

    /// Latch a failure. All registered timepoints resolve as failed, and every
    /// later signal, wait, or timepoint registration observes the error. The
    /// first failure wins.
    pub fn fail(&self, error: Error) {
        let fired = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            if state.failure.is_some() {
                return;
            }
            warn!("semaphore failed at payload {}: {error}", state.value);
            state.failure = Some(error.clone());
            std::mem::take(&mut state.timepoints)
        };
        self.signaled.notify_all();
        for timepoint in fired {
            timepoint.task.poison(&error);
            timepoint.core.launch(timepoint.task, true);
        }
    }

    /// Block the calling thread until the payload reaches `value`, the
    /// semaphore fails, or the timeout expires. `None` waits forever.
    pub fn wait(&self, value: u64, timeout: Option<Duration>) -> Result<(), Error> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut state = self.state.lock()?;
        loop {
            if let Some(error) = &state.failure {
                return Err(error.clone());
            }
            if state.value >= value {
                return Ok(());
            }
            match deadline {
                None => state = self.signaled.wait(state)?,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::DeadlineExceeded);
                    }
                    let (guard, timeout) =
                        self.signaled.wait_timeout(state, deadline - now)?;
                    state = guard;
                    if timeout.timed_out()
                        && state.failure.is_none()
                        && state.value < value
                    {
                        return Err(Error::DeadlineExceeded);
                    }
                }
            }
        }
    }

    /// Register `task` to become ready once the payload reaches `value`.
    ///
    /// A registration the current payload already satisfies is pushed into
    /// `pending` instead, so it launches with the rest of the submission and
    /// no wait ever materializes.
    /// # Errors
    /// * The latched error if the semaphore already failed
    pub(crate) fn enqueue_timepoint(
        &self,
        core: &Arc<ExecutorCore>,
        value: u64,
        task: Arc<Task>,
        pending: &mut Submission,
    ) -> Result<(), Error> {
        let mut state = self.state.lock()?;
        if let Some(error) = &state.failure {
            return Err(error.clone());
        }
        if state.value >= value {
            pending.push(task);
        } else {
            state.timepoints.push(Timepoint {
                value,
                task,
                core: core.clone(),
            });
        }
        Ok(())
    }
}

impl Drop for Semaphore {
    /// Submissions waiting on a semaphore that disappears would hang forever;
    /// resolve their timepoints as failed instead.
    fn drop(&mut self) {
        let Ok(state) = self.state.get_mut() else {
            return;
        };
        if state.timepoints.is_empty() {
            return;
        }
        warn!(
            "semaphore dropped with {} pending waits",
            state.timepoints.len()
        );
        for timepoint in state.timepoints.drain(..) {
            timepoint.task.poison(&Error::SemaphoreAbandoned);
            timepoint.core.launch(timepoint.task, true);
        }
    }
}

/// Pair of parallel sequences: semaphore references and the payload values
/// associated with them. Indices correspond; the lengths are always equal.
/// Cloning a list retains every semaphore in it.
#[derive(Clone, Debug, Default)]
pub struct SemaphoreList {
    semaphores: Vec<Arc<Semaphore>>,
    values: Vec<u64>,
}

impl SemaphoreList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a list from parallel sequences.
    /// # Errors
    /// * [`Error::SemaphoreListMismatch`] if the lengths differ
    pub fn from_parts(semaphores: Vec<Arc<Semaphore>>, values: Vec<u64>) -> Result<Self, Error> {
        if semaphores.len() != values.len() {
            return Err(Error::SemaphoreListMismatch {
                semaphores: semaphores.len(),
                values: values.len(),
            });
        }
        Ok(Self { semaphores, values })
    }

    /// Append a (semaphore, payload value) pair.
    pub fn push(&mut self, semaphore: Arc<Semaphore>, value: u64) {
        self.semaphores.push(semaphore);
        self.values.push(value);
    }

    /// Number of entries in the list.
    pub fn len(&self) -> usize {
        self.semaphores.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.semaphores.is_empty()
    }

    /// Iterate over (semaphore, payload value) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&Arc<Semaphore>, u64)> {
        self.semaphores.iter().zip(self.values.iter().copied())
    }
}
