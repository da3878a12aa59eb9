//! Progress tracking for a batch of units of work.
//!
//! A [`TaskList`] owns the state of every [`Task`] registered on it. Tasks are
//! lightweight handles holding a weak back-reference to their list, so a
//! list is never kept alive by its tasks. All mutations go through one lock
//! per list and every change is broadcast to the list observers as a
//! [`Progress`] snapshot.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TaskState {
    Pending { progress: f64 },
    Finished { failed: bool },
}

impl TaskState {
    pub fn progress(&self) -> f64 {
        match self {
            TaskState::Pending { progress } => *progress,
            TaskState::Finished { .. } => 1.0,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, TaskState::Finished { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TaskState::Finished { failed: true })
    }
}

/// Aggregate status of a list at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Progress {
    pub total: usize,
    pub partial: f64,
    pub failures: usize,
    pub progress: f64,
}

impl Progress {
    pub fn percent(&self) -> f64 {
        self.progress * 100.0
    }

    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.partial >= self.total as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Observer = Arc<dyn Fn(&Progress, &TaskList) + Send + Sync>;

#[derive(Default)]
struct ListState {
    tasks: Vec<TaskState>,
    observers: Vec<(ObserverId, Observer)>,
    next_observer: u64,
}

impl ListState {
    fn aggregate(&self) -> Progress {
        let mut status = Progress {
            total: self.tasks.len(),
            ..Progress::default()
        };
        for task in &self.tasks {
            status.partial += task.progress();
            if task.is_failed() {
                status.failures += 1;
            }
        }
        if status.total > 0 {
            status.progress = status.partial / status.total as f64;
        }
        status
    }

    fn pending_notification(&self) -> (Progress, Vec<Observer>) {
        let observers = self
            .observers
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();
        (self.aggregate(), observers)
    }
}

/// Shared handle to a list of tasks. Clones refer to the same list.
#[derive(Clone, Default)]
pub struct TaskList {
    shared: Arc<Mutex<ListState>>,
}

impl TaskList {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ListState> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a new pending task and notifies observers.
    pub fn register(&self) -> Task {
        let (task, notification) = {
            let mut state = self.lock();
            state.tasks.push(TaskState::Pending { progress: 0.0 });
            let task = Task {
                list: Arc::downgrade(&self.shared),
                index: state.tasks.len() - 1,
            };
            (task, state.pending_notification())
        };
        self.notify(notification);
        task
    }

    /// Registers a task for `work`; the task completes with the outcome of
    /// [`Attached::run`], or as failed if the work is dropped unrun.
    pub fn attach<F, T, E>(&self, work: F) -> Attached<F>
    where
        F: FnOnce() -> Result<T, E>,
    {
        Attached {
            guard: CompletionGuard {
                task: self.register(),
            },
            work,
        }
    }

    pub fn aggregate(&self) -> Progress {
        self.lock().aggregate()
    }

    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&Progress, &TaskList) + Send + Sync + 'static,
    {
        let mut state = self.lock();
        let id = ObserverId(state.next_observer);
        state.next_observer += 1;
        state.observers.push((id, Arc::new(observer)));
        id
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut state = self.lock();
        let before = state.observers.len();
        state.observers.retain(|(existing, _)| *existing != id);
        state.observers.len() != before
    }

    /// Runs observers outside the lock so they may query the list.
    fn notify(&self, (status, observers): (Progress, Vec<Observer>)) {
        for observer in observers {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| observer(&status, self)));
            if outcome.is_err() {
                tracing::warn!(
                    total = status.total,
                    "progress observer panicked; continuing with remaining observers"
                );
            }
        }
    }

    fn update<F>(&self, index: usize, change: F) -> bool
    where
        F: FnOnce(&mut TaskState) -> bool,
    {
        let notification = {
            let mut state = self.lock();
            let Some(task) = state.tasks.get_mut(index) else {
                return false;
            };
            if !change(task) {
                return false;
            }
            state.pending_notification()
        };
        self.notify(notification);
        true
    }
}

impl fmt::Debug for TaskList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("TaskList")
            .field("tasks", &state.tasks)
            .field("observers", &state.observers.len())
            .finish()
    }
}

/// Handle to one unit of work registered on a [`TaskList`].
#[derive(Debug, Clone)]
pub struct Task {
    list: Weak<Mutex<ListState>>,
    index: usize,
}

impl Task {
    fn list(&self) -> Option<TaskList> {
        self.list.upgrade().map(|shared| TaskList { shared })
    }

    pub fn state(&self) -> Option<TaskState> {
        let list = self.list()?;
        list.lock().tasks.get(self.index).copied()
    }

    pub fn progress(&self) -> f64 {
        self.state().map(|state| state.progress()).unwrap_or(0.0)
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_some_and(|state| state.is_finished())
    }

    pub fn is_failed(&self) -> bool {
        self.state().is_some_and(|state| state.is_failed())
    }

    /// Records partial progress in `[0.0, 1.0)`. Ignored once the task is
    /// finished, for out of range values, and when nothing changes.
    pub fn set_progress(&self, value: f64) -> bool {
        if !(0.0..1.0).contains(&value) {
            return false;
        }
        let Some(list) = self.list() else {
            return false;
        };
        list.update(self.index, |state| match state {
            TaskState::Pending { progress } if *progress != value => {
                *progress = value;
                true
            }
            _ => false,
        })
    }

    /// Moves the task to its terminal state. Only the first call counts.
    pub fn complete(&self, succeeded: bool) -> bool {
        let Some(list) = self.list() else {
            return false;
        };
        list.update(self.index, |state| match state {
            TaskState::Pending { .. } => {
                *state = TaskState::Finished { failed: !succeeded };
                true
            }
            TaskState::Finished { .. } => false,
        })
    }
}

struct CompletionGuard {
    task: Task,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.task.complete(false);
    }
}

/// Work bound to a task, see [`TaskList::attach`].
pub struct Attached<F> {
    guard: CompletionGuard,
    work: F,
}

impl<F, T, E> Attached<F>
where
    F: FnOnce() -> Result<T, E>,
{
    pub fn task(&self) -> &Task {
        &self.guard.task
    }

    pub fn run(self) -> Result<T, E> {
        let Attached { guard, work } = self;
        let outcome = work();
        guard.task.complete(outcome.is_ok());
        outcome
    }
}
