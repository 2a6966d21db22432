use std::fmt;

use anyhow::anyhow;
use tracing::{debug, info};

use crate::ErrorDisplay;

type TaskFn = Box<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// A named unit of work.
pub struct Task {
    name: String,
    description: Option<String>,
    action: TaskFn,
}

impl Task {
    pub fn new<F>(name: impl Into<String>, action: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: None,
            action: Box::new(action),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

/// Runs registered tasks by name and hands the first failure to its display.
pub struct TaskRunner<D> {
    tasks: Vec<Task>,
    display: D,
}

impl<D: ErrorDisplay> TaskRunner<D> {
    pub fn new(display: D) -> Self {
        Self {
            tasks: Vec::new(),
            display,
        }
    }

    /// Registers a task, replacing any task with the same name.
    pub fn register(&mut self, task: Task) -> &mut Self {
        self.tasks.retain(|existing| existing.name != task.name);
        self.tasks.push(task);
        self
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    /// Runs `names` in order, stopping at the first error. That error is
    /// shown through the display with all invoked names and then returned.
    pub fn run<S: AsRef<str>>(&self, names: &[S]) -> anyhow::Result<()> {
        let invoked: Vec<String> = names.iter().map(|n| n.as_ref().to_string()).collect();

        match self.run_all(&invoked) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.display.display_error(&invoked, &e);
                Err(e)
            }
        }
    }

    fn run_all(&self, names: &[String]) -> anyhow::Result<()> {
        for name in names {
            let task = self
                .tasks
                .iter()
                .find(|task| &task.name == name)
                .ok_or_else(|| anyhow!("Don't know how to run task '{}'", name))?;

            debug!("Running task {}", name);
            (task.action)()?;
            info!("Task {} finished", name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ReportingErrorDisplay, TASKS_LOGGER};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use temps_reporter::test_utils::{basic_setup, TestHarness};
    use temps_reporter::Hub;

    #[derive(Default)]
    struct CountingDisplay {
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl ErrorDisplay for CountingDisplay {
        fn display_error(&self, tasks: &[String], _error: &anyhow::Error) {
            self.calls.lock().unwrap().push(tasks.to_vec());
        }
    }

    #[test]
    fn test_successful_run_shows_nothing() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut runner = TaskRunner::new(CountingDisplay::default());
        let c = counter.clone();
        runner.register(Task::new("count", move || {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        runner.run(&["count", "count"]).unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert!(runner.display().calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_first_failure_stops_the_run() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut runner = TaskRunner::new(CountingDisplay::default());
        let c = counter.clone();
        runner
            .register(Task::new("fail", || Err(anyhow!("task failed"))))
            .register(Task::new("after", move || {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }));

        let err = runner.run(&["fail", "after"]).unwrap_err();

        assert_eq!(err.to_string(), "task failed");
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        let calls = runner.display().calls.lock().unwrap();
        assert_eq!(*calls, vec![vec!["fail".to_string(), "after".to_string()]]);
    }

    #[test]
    fn test_unknown_task_is_an_error() {
        let runner = TaskRunner::new(CountingDisplay::default());

        let err = runner.run(&["missing"]).unwrap_err();

        assert!(err.to_string().contains("missing"));
        assert_eq!(runner.display().calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut runner = TaskRunner::new(CountingDisplay::default());
        runner
            .register(Task::new("build", || Err(anyhow!("old"))))
            .register(Task::new("build", || Ok(())).with_description("new"));

        assert_eq!(runner.tasks().count(), 1);
        assert_eq!(runner.tasks().next().unwrap().description(), Some("new"));
        runner.run(&["build"]).unwrap();
    }

    #[test]
    fn test_failure_is_reported_through_hub() {
        let hub = Hub::new();
        basic_setup(&hub, |_| {});
        let harness = TestHarness::setup(&hub, |_| {}).unwrap();

        let display = ReportingErrorDisplay::with_hub(&hub, CountingDisplay::default());
        let mut runner = TaskRunner::new(display);
        runner.register(Task::new("deploy", || Err(anyhow!("no target"))));

        assert!(runner.run(&["deploy"]).is_err());

        let event = harness.last_event().unwrap();
        assert_eq!(event.transaction.as_deref(), Some("deploy"));
        assert_eq!(event.logger.as_deref(), Some(TASKS_LOGGER));
        assert_eq!(runner.display().inner().calls.lock().unwrap().len(), 1);
    }
}
