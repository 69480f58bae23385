//! Completion fences for the terminal node of a submission graph.
//!
//! A fence is an empty task bound to a scope. The retire command of every
//! submission completes into its batch's fence, which lets callers observe
//! the terminal node — and with it the batch's terminal status — without
//! coupling to the retire command's internals. Fences are handed out by
//! [`Queue::submit_with_fence`](crate::Queue::submit_with_fence).

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::executor::scope::TaskScope;
use crate::executor::task::Task;
use crate::Error;

#[derive(Debug, Default)]
struct FenceState {
    done: Mutex<Option<Result<(), Error>>>,
    signaled: Condvar,
}

/// Completion marker bound to a scope. Resolves with the terminal status of
/// the task graph wired to complete into it: `Ok` once the batch has retired
/// cleanly, or the error that failed it.
#[derive(Debug)]
pub struct Fence {
    task: Arc<Task>,
    state: Arc<FenceState>,
}

impl Fence {
    pub(crate) fn new(scope: &TaskScope) -> Self {
        let state = Arc::new(FenceState::default());
        let task = Task::new("fence", scope, None);
        let resolved = state.clone();
        task.set_cleanup(Box::new(move |_task: &Task, status: &Result<(), Error>| {
            *resolved.done.lock().unwrap() = Some(status.clone());
            resolved.signaled.notify_all();
        }));
        Fence { task, state }
    }

    /// The executor-visible task of this fence, for wiring completion edges.
    pub(crate) fn task(&self) -> &Arc<Task> {
        &self.task
    }

    /// Block until the fence resolves or the timeout expires, returning the
    /// terminal status of the graph that completed into it. `None` waits
    /// forever. Waiting again after resolution returns the same status.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<(), Error> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut done = self.state.done.lock()?;
        loop {
            if let Some(status) = done.as_ref() {
                return status.clone();
            }
            match deadline {
                None => done = self.state.signaled.wait(done)?,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::DeadlineExceeded);
                    }
                    let (guard, timeout) =
                        self.state.signaled.wait_timeout(done, deadline - now)?;
                    done = guard;
                    if timeout.timed_out() && done.is_none() {
                        return Err(Error::DeadlineExceeded);
                    }
                }
            }
        }
    }
}
