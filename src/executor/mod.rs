//! The work-stealing task executor that runs submission graphs.
//!
//! Each worker thread owns a local FIFO deque and falls back to stealing from
//! a central injector or from other workers when it runs dry. Queues stage
//! their submissions on the injector without waking anyone; an explicit
//! [`Executor::flush`] makes the staged work visible to parked workers, so a
//! multi-batch submit pays for one wakeup instead of one per batch. Work
//! produced while executing — command-buffer leaf tasks, resolved semaphore
//! timepoints — wakes workers immediately.
//!
//! The executor itself is policy-free: ordering between tasks comes entirely
//! from the dependency edges wired by the [`queue`](crate::queue) module.

pub mod scope;
pub(crate) mod task;

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, Builder, JoinHandle};
use std::{cmp, fmt, iter};

use crossbeam::deque::{Injector, Steal, Stealer, Worker};
use static_assertions::assert_impl_all;

use self::scope::TaskScope;
use self::task::{Submission, Task, TaskContext};
use crate::sync::fence::Fence;

/// Wakeup signal shared between the executor handle and its workers.
///
/// The epoch counter guards against wakeups lost between a worker's last
/// steal attempt and it parking on the condvar: notifications bump the epoch,
/// and a worker only parks if the epoch still matches the one it observed
/// before searching for work.
#[derive(Debug)]
struct Signal {
    state: Mutex<SignalState>,
    condvar: Condvar,
}

#[derive(Debug)]
struct SignalState {
    epoch: u64,
    terminate: bool,
}

impl Signal {
    fn new() -> Self {
        Self {
            state: Mutex::new(SignalState {
                epoch: 0,
                terminate: false,
            }),
            condvar: Condvar::new(),
        }
    }

    fn epoch(&self) -> u64 {
        self.state.lock().unwrap().epoch
    }

    fn notify(&self) {
        self.state.lock().unwrap().epoch += 1;
        self.condvar.notify_all();
    }

    fn terminate(&self) {
        self.state.lock().unwrap().terminate = true;
        self.condvar.notify_all();
    }

    /// Park until the epoch advances past `seen`. Returns true if the worker
    /// should exit instead of rescanning the queues.
    fn wait(&self, seen: u64) -> bool {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.terminate {
                return true;
            }
            if state.epoch != seen {
                return false;
            }
            state = self.condvar.wait(state).unwrap();
        }
    }
}

/// Scheduling fabric shared by the executor handle, its workers, and
/// registered semaphore timepoints. Holding it keeps scheduling alive but
/// does not keep worker threads running; that is tied to the [`Executor`]
/// handles themselves.
pub(crate) struct ExecutorCore {
    injector: Injector<Arc<Task>>,
    stealers: Box<[Stealer<Arc<Task>>]>,
    signal: Signal,
}

impl ExecutorCore {
    /// Launch a task: register it with its scope and drop the launch guard.
    /// Tasks that become ready are staged on the injector; `notify` controls
    /// whether parked workers wake immediately.
    pub(crate) fn launch(&self, task: Arc<Task>, notify: bool) {
        task.scope().register();
        if task.unblock() {
            self.injector.push(task);
            if notify {
                self.signal.notify();
            }
        }
    }
}

/// Run one task to completion: body (or the status poisoned into it by a
/// failed upstream task), cleanup, successor firing, launch of any pending
/// work the body produced, and finally the scope notification.
fn execute(core: &Arc<ExecutorCore>, local: &Worker<Arc<Task>>, task: Arc<Task>) {
    trace!("executing task `{}`", task.name());
    let mut pending = Submission::new();
    let result = match task.status() {
        Some(error) => Err(error),
        None => match task.take_body() {
            Some(body) => {
                let mut ctx = TaskContext {
                    core,
                    pending: &mut pending,
                };
                body(&mut ctx)
            }
            None => Ok(()),
        },
    };
    if let Err(error) = &result {
        task.scope().fail(error);
    }

    // The cleanup always runs, with the terminal status.
    if let Some(cleanup) = task.take_cleanup() {
        cleanup(&task, &result);
    }

    // Successors always fire so the graph drains even on failure.
    for successor in task.take_successors() {
        if successor.propagate {
            if let Err(error) = &result {
                successor.task.poison(error);
            }
        }
        if successor.task.unblock() {
            local.push(successor.task);
            core.signal.notify();
        }
    }

    // Work produced by the body lands on the local deque, where it is run by
    // this worker or stolen by an idle one.
    if !pending.is_empty() {
        for produced in pending.into_tasks() {
            produced.scope().register();
            if produced.unblock() {
                local.push(produced);
            }
        }
        core.signal.notify();
    }

    task.scope().finish();
}

fn worker_main(core: Arc<ExecutorCore>, worker: Worker<Arc<Task>>) {
    loop {
        let epoch = core.signal.epoch();
        match next_task(&worker, &core.injector, &core.stealers) {
            Some(task) => execute(&core, &worker, task),
            None => {
                if core.signal.wait(epoch) {
                    break;
                }
            }
        }
    }
}

/// Get the next task from the local deque, or steal from the injector or
/// another worker, retrying while any steal reports interference.
fn next_task(
    worker: &Worker<Arc<Task>>,
    injector: &Injector<Arc<Task>>,
    stealers: &[Stealer<Arc<Task>>],
) -> Option<Arc<Task>> {
    worker.pop().or_else(|| {
        iter::repeat_with(|| {
            injector
                .steal_batch_and_pop(worker)
                .or_else(|| stealers.iter().map(Stealer::steal).collect())
        })
        .find(|steal| !steal.is_retry())
        .and_then(Steal::success)
    })
}

struct WorkerPool {
    core: Arc<ExecutorCore>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for WorkerPool {
    /// Terminates and joins all worker threads. Workers finish the task they
    /// are currently executing; staged tasks are dropped.
    fn drop(&mut self) {
        self.core.signal.terminate();
        for handle in self.threads.lock().unwrap().drain(..) {
            let _ = handle.join();
        }
    }
}

/// Handle to a task executor. You should only ever have one instance of this
/// struct in your program; queues retain it by cloning the handle. Worker
/// threads shut down when the last handle is dropped.
#[derive(Clone)]
pub struct Executor {
    core: Arc<ExecutorCore>,
    workers: Arc<WorkerPool>,
}

assert_impl_all!(Executor: Send, Sync);

impl Executor {
    /// Create a new executor with `num_workers` worker threads.
    pub fn new(num_workers: usize) -> Self {
        let num_workers = cmp::max(num_workers, 1);
        let workers: Vec<Worker<Arc<Task>>> =
            (0..num_workers).map(|_| Worker::new_fifo()).collect();
        let stealers = workers
            .iter()
            .map(Worker::stealer)
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let core = Arc::new(ExecutorCore {
            injector: Injector::new(),
            stealers,
            signal: Signal::new(),
        });

        let threads = workers
            .into_iter()
            .enumerate()
            .map(|(index, worker)| {
                let core = Arc::clone(&core);
                // Spawning workers is a hard requirement of the executor.
                Builder::new()
                    .name(format!("deimos/worker/{index}"))
                    .spawn(move || worker_main(core, worker))
                    .unwrap()
            })
            .collect();

        info!("Created task executor with {num_workers} workers");
        Self {
            workers: Arc::new(WorkerPool {
                core: Arc::clone(&core),
                threads: Mutex::new(threads),
            }),
            core,
        }
    }

    /// Number of worker threads owned by this executor.
    pub fn num_workers(&self) -> usize {
        self.core.stealers.len()
    }

    /// Stage a submission's tasks. Staged work is guaranteed visible to the
    /// worker threads only after [`Executor::flush`].
    pub(crate) fn submit(&self, submission: Submission) {
        for task in submission.into_tasks() {
            self.core.launch(task, false);
        }
    }

    /// Wake the worker threads so all staged work gets picked up.
    pub fn flush(&self) {
        self.core.signal.notify();
    }

    /// Acquire a fence bound to `scope`. The fence resolves with the terminal
    /// status of the task graph wired to complete into it.
    pub(crate) fn acquire_fence(&self, scope: &TaskScope) -> Fence {
        Fence::new(scope)
    }
}

impl Default for Executor {
    /// Creates an executor using all CPUs minus one, reserving a core for the
    /// submitting thread, with a minimum of one worker.
    fn default() -> Self {
        Self::new(cmp::max(
            thread::available_parallelism()
                .map(|num| num.get().saturating_sub(1))
                .unwrap_or(1),
            1,
        ))
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Executor")
            .field("workers", &self.num_workers())
            .finish()
    }
}
