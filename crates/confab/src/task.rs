//! Deferred work lists.
//!
//! Every entry point into the core gathers the work it produces (zombie
//! kills, completion posts, channel teardown finalizers) into a [`TaskList`]
//! while holding locks, then drains the list after all locks are released.
//! Callbacks are free to re-enter the server without deadlocking, and the
//! order tasks run in is the order they were produced.

/// A unit of deferred work. Listener destruction and transport op
/// consumed-callbacks use the same shape.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
pub(crate) struct TaskList {
    tasks: Vec<Task>,
}

impl TaskList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, task: impl FnOnce() + Send + 'static) {
        self.tasks.push(Box::new(task));
    }

    /// Invoke every task in production order. Consumes the list; call with
    /// no locks held.
    pub fn run(self) {
        for task in self.tasks {
            task();
        }
    }
}
