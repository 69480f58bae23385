//! Task scopes group the tasks of one logical queue and provide idle
//! tracking.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Instant;

use crate::Error;

#[derive(Debug)]
struct ScopeState {
    live: usize,
    failure: Option<Error>,
}

#[derive(Debug)]
struct ScopeInner {
    name: String,
    state: Mutex<ScopeState>,
    idle: Condvar,
}

/// A progress-tracking barrier over a group of tasks.
///
/// Every task created for a queue is registered in that queue's scope when it
/// is launched and unregistered when it has fully completed, so waiting for
/// idle blocks until no task of the queue is in flight anymore. The scope also
/// latches the first failure that occurs in any of its tasks; once idle, the
/// latched status is what [`TaskScope::wait_idle`] reports.
#[derive(Clone, Debug)]
pub struct TaskScope {
    inner: Arc<ScopeInner>,
}

impl TaskScope {
    /// Create a new scope. The name identifies the scope in logs.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                name: name.into(),
                state: Mutex::new(ScopeState {
                    live: 0,
                    failure: None,
                }),
                idle: Condvar::new(),
            }),
        }
    }

    /// Name this scope was created with.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Number of tasks currently in flight.
    pub fn live_tasks(&self) -> usize {
        self.inner.state.lock().unwrap().live
    }

    pub(crate) fn register(&self) {
        self.inner.state.lock().unwrap().live += 1;
    }

    pub(crate) fn finish(&self) {
        let mut state = self.inner.state.lock().unwrap();
        state.live -= 1;
        if state.live == 0 {
            drop(state);
            self.inner.idle.notify_all();
        }
    }

    /// Latch a task failure. The first failure wins; later ones are assumed to
    /// be downstream of it.
    pub(crate) fn fail(&self, error: &Error) {
        let mut state = self.inner.state.lock().unwrap();
        if state.failure.is_none() {
            warn!("scope `{}` failed: {error}", self.inner.name);
            state.failure = Some(error.clone());
        }
    }

    /// Block until every task in the scope has completed, or until the
    /// deadline passes. `None` waits forever.
    ///
    /// Once idle, returns the scope's permanent status: `Ok` if no task ever
    /// failed, otherwise the first latched failure.
    pub fn wait_idle(&self, deadline: Option<Instant>) -> Result<(), Error> {
        let mut state = self.inner.state.lock()?;
        while state.live > 0 {
            match deadline {
                None => state = self.inner.idle.wait(state)?,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::DeadlineExceeded);
                    }
                    let (guard, timeout) = self.inner.idle.wait_timeout(state, deadline - now)?;
                    state = guard;
                    if timeout.timed_out() && state.live > 0 {
                        return Err(Error::DeadlineExceeded);
                    }
                }
            }
        }
        match &state.failure {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn empty_scope_is_idle() {
        let scope = TaskScope::new("test");
        assert_eq!(scope.live_tasks(), 0);
        scope.wait_idle(None).unwrap();
    }

    #[test]
    fn wait_idle_times_out_while_tasks_are_live() {
        let scope = TaskScope::new("test");
        scope.register();
        let deadline = Instant::now() + Duration::from_millis(10);
        assert!(matches!(
            scope.wait_idle(Some(deadline)),
            Err(Error::DeadlineExceeded)
        ));
        scope.finish();
        scope.wait_idle(None).unwrap();
    }

    #[test]
    fn first_failure_is_latched() {
        let scope = TaskScope::new("test");
        scope.fail(&Error::Uncategorized("first"));
        scope.fail(&Error::Uncategorized("second"));
        assert!(matches!(
            scope.wait_idle(None),
            Err(Error::Uncategorized("first"))
        ));
    }

    #[test]
    fn idle_is_signalled_from_another_thread() {
        let scope = TaskScope::new("test");
        scope.register();
        let remote = scope.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(5));
            remote.finish();
        });
        scope.wait_idle(None).unwrap();
        handle.join().unwrap();
    }
}
