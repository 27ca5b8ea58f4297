//! Deadline-ordered cooperative executor for periodic and one-shot tasks.
//!
//! The scheduler owns a task map and dispatches from [`Scheduler::run`],
//! which blocks its calling thread: it picks the ready task with the
//! earliest deadline, runs its callback with the internal mutex released,
//! and otherwise sleeps on a condition variable until the next deadline or
//! until a task is added, cancelled, or the scheduler is stopped.
//!
//! Periodic tasks are rescheduled *before* their callback runs, so a
//! callback that overruns its period drifts by at most one period and is
//! picked up again on the next iteration. One-shot tasks leave the map
//! before their callback runs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::trace;
use parking_lot::{Condvar, Mutex, MutexGuard};

/// Identifies a scheduled task for [`Scheduler::cancel`].
pub type TaskId = u64;

type TaskFn = Arc<dyn Fn() + Send + Sync>;

/// A scheduled unit of work. Owned solely by the scheduler's task map.
struct Task {
    name: String,
    period: Duration,
    callback: TaskFn,
    repeat: bool,
    /// Absolute monotonic time of the next run. Starts at "now" so a fresh
    /// task fires on the first dispatch iteration.
    next_deadline: Instant,
}

impl Task {
    fn new(name: String, period: Duration, callback: TaskFn, repeat: bool) -> Self {
        Self {
            name,
            period,
            callback,
            repeat,
            next_deadline: Instant::now(),
        }
    }
}

#[derive(Default)]
struct SchedulerState {
    tasks: HashMap<TaskId, Task>,
    next_id: TaskId,
    stop: bool,
}

struct Inner {
    state: Mutex<SchedulerState>,
    ready: Condvar,
}

/// Cloning is cheap and clones share the same task map, so tasks can be
/// added from any thread while another drives [`Scheduler::run`].
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(SchedulerState::default()),
                ready: Condvar::new(),
            }),
        }
    }

    /// Register a task that first fires immediately and then every `period`.
    /// A zero period means "run every dispatch cycle".
    pub fn add_periodic(
        &self,
        name: impl Into<String>,
        period: Duration,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> TaskId {
        self.add_task(name.into(), period, Arc::new(callback), true)
    }

    /// Register a task that runs once at the next dispatch.
    pub fn add_one_shot(&self, name: impl Into<String>, callback: impl Fn() + Send + Sync + 'static) -> TaskId {
        self.add_task(name.into(), Duration::ZERO, Arc::new(callback), false)
    }

    fn add_task(&self, name: String, period: Duration, callback: TaskFn, repeat: bool) -> TaskId {
        let mut state = self.inner.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        trace!("scheduler: add task '{}' id={} period={:?} repeat={}", name, id, period, repeat);
        state.tasks.insert(id, Task::new(name, period, callback, repeat));
        self.inner.ready.notify_all();
        id
    }

    /// Remove a task if it is still scheduled. Cancelling an unknown or
    /// already-finished id is a no-op. A callback that is currently
    /// executing completes normally.
    pub fn cancel(&self, id: TaskId) {
        let mut state = self.inner.state.lock();
        if let Some(task) = state.tasks.remove(&id) {
            trace!("scheduler: cancelled task '{}' id={}", task.name, id);
        }
        self.inner.ready.notify_all();
    }

    /// Ask the dispatch loop to exit at its next wakeup. The task currently
    /// executing, if any, is not interrupted.
    pub fn stop(&self) {
        let mut state = self.inner.state.lock();
        state.stop = true;
        self.inner.ready.notify_all();
    }

    /// Dispatch tasks on the calling thread until [`Scheduler::stop`].
    pub fn run(&self) {
        let mut state = self.inner.state.lock();

        loop {
            if state.stop {
                break;
            }

            if state.tasks.is_empty() {
                self.inner.ready.wait(&mut state);
                continue;
            }

            let now = Instant::now();
            let due = state
                .tasks
                .iter()
                .filter(|(_, task)| task.next_deadline <= now)
                .min_by_key(|(id, task)| (task.next_deadline, **id))
                .map(|(id, _)| *id);

            let Some(id) = due else {
                // Nothing ready yet; sleep until the earliest deadline or a
                // notification, whichever comes first.
                if let Some(earliest) = state.tasks.values().map(|task| task.next_deadline).min() {
                    self.inner.ready.wait_until(&mut state, earliest);
                }
                continue;
            };

            let callback = match state.tasks.get_mut(&id) {
                Some(task) if task.repeat => {
                    // Reschedule before executing: an overrunning callback
                    // leaves its next deadline in the past and is picked
                    // right back up.
                    task.next_deadline = now + task.period;
                    task.callback.clone()
                }
                // One-shot tasks leave the map before their callback runs.
                _ => match state.tasks.remove(&id) {
                    Some(task) => task.callback,
                    None => continue,
                },
            };

            MutexGuard::unlocked(&mut state, || callback());
        }
    }
}
