//! Executor-visible task objects and the pending-submission container.
//!
//! A task is one node of a submission graph. Tasks are created unlaunched:
//! their pending counter starts at one (the launch guard) and every
//! incoming dependency edge adds one more. Launching a task — through an
//! executor submission, a worker draining a pending submission, or a
//! semaphore resolving a timepoint — registers it with its scope and drops
//! the guard; the task is scheduled once the counter reaches zero.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use super::scope::TaskScope;
use super::ExecutorCore;
use crate::Error;

pub(crate) type TaskBody =
    Box<dyn FnOnce(&mut TaskContext<'_>) -> Result<(), Error> + Send>;
pub(crate) type TaskCleanup = Box<dyn FnOnce(&Task, &Result<(), Error>) + Send>;

/// Outgoing edge of a task. Completion edges (`propagate`) carry the failure
/// status downstream; order edges only gate readiness.
pub(crate) struct Successor {
    pub(crate) task: Arc<Task>,
    pub(crate) propagate: bool,
}

/// A single node in a submission's task graph.
///
/// The body runs on an executor worker once every dependency has completed.
/// The cleanup always runs, with the task's terminal status — `Ok` after a
/// successful body, the body's error after a failed one, or the status
/// propagated from a failed upstream task (in which case the body is
/// skipped). Successors fire in every case so the graph drains.
#[derive(Derivative)]
#[derivative(Debug)]
pub(crate) struct Task {
    name: &'static str,
    #[derivative(Debug = "ignore")]
    scope: TaskScope,
    /// Remaining dependencies plus the launch guard.
    pending: AtomicU32,
    #[derivative(Debug = "ignore")]
    body: Mutex<Option<TaskBody>>,
    #[derivative(Debug = "ignore")]
    cleanup: Mutex<Option<TaskCleanup>>,
    #[derivative(Debug = "ignore")]
    successors: Mutex<Vec<Successor>>,
    status: Mutex<Option<Error>>,
}

impl Task {
    pub fn new(name: &'static str, scope: &TaskScope, body: Option<TaskBody>) -> Arc<Task> {
        Arc::new(Task {
            name,
            scope: scope.clone(),
            pending: AtomicU32::new(1),
            body: Mutex::new(body),
            cleanup: Mutex::new(None),
            successors: Mutex::new(Vec::new()),
            status: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn scope(&self) -> &TaskScope {
        &self.scope
    }

    /// Set the cleanup to run with the terminal status. Must be called before
    /// the task is launched.
    pub fn set_cleanup(&self, cleanup: TaskCleanup) {
        *self.cleanup.lock().unwrap() = Some(cleanup);
    }

    /// Wire `next` to become ready after this task completes. Only valid
    /// while `next` has not been scheduled, which the submission pipeline
    /// guarantees: edges are added either before launch or, for the FIFO
    /// stitch, under the queue mutex that also guards the tail clear.
    pub fn add_successor(&self, next: &Arc<Task>, propagate: bool) {
        next.pending.fetch_add(1, Ordering::AcqRel);
        self.successors.lock().unwrap().push(Successor {
            task: next.clone(),
            propagate,
        });
    }

    /// Record an upstream failure. The first failure wins.
    pub fn poison(&self, error: &Error) {
        let mut status = self.status.lock().unwrap();
        if status.is_none() {
            *status = Some(error.clone());
        }
    }

    /// Status propagated from upstream, if any.
    pub fn status(&self) -> Option<Error> {
        self.status.lock().unwrap().clone()
    }

    /// Drop one pending dependency; returns true when the task became ready.
    pub fn unblock(&self) -> bool {
        self.pending.fetch_sub(1, Ordering::AcqRel) == 1
    }

    pub fn take_body(&self) -> Option<TaskBody> {
        self.body.lock().unwrap().take()
    }

    pub fn take_cleanup(&self) -> Option<TaskCleanup> {
        self.cleanup.lock().unwrap().take()
    }

    pub fn take_successors(&self) -> Vec<Successor> {
        std::mem::take(&mut *self.successors.lock().unwrap())
    }
}

/// Collection of tasks handed to the executor as one unit. Task bodies also
/// receive one as an output parameter: tasks pushed there are launched by the
/// worker as soon as the body returns.
#[derive(Debug, Default)]
pub(crate) struct Submission {
    tasks: Vec<Arc<Task>>,
}

impl Submission {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, task: Arc<Task>) {
        self.tasks.push(task);
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn into_tasks(self) -> Vec<Arc<Task>> {
        self.tasks
    }
}

/// Execution context handed to task bodies.
pub(crate) struct TaskContext<'a> {
    /// Scheduling fabric, used to register semaphore timepoints.
    pub(crate) core: &'a Arc<ExecutorCore>,
    /// Tasks to launch once the body returns.
    pub(crate) pending: &'a mut Submission,
}
