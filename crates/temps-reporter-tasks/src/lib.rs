//! Error reporting for named task runs
//!
//! A task runner shows a failed run through an [`ErrorDisplay`]. Wrapping
//! that display in a [`ReportingErrorDisplay`] captures the failure on a hub
//! first, with the invoked task names as the transaction, and then lets the
//! wrapped display print exactly what it printed before.

mod runner;

pub use runner::{Task, TaskRunner};

use std::io::Write;

use temps_reporter::{CaptureContext, Hub};
use tracing::debug;

/// Logger name attached to events captured from task failures
pub const TASKS_LOGGER: &str = "tasks";

/// Tag holding the invoked task names
pub const TASK_TAG: &str = "task";

/// Shows a failed task run to the user.
pub trait ErrorDisplay {
    /// `tasks` are the names the run was invoked with, in order.
    fn display_error(&self, tasks: &[String], error: &anyhow::Error);
}

impl<D: ErrorDisplay + ?Sized> ErrorDisplay for &D {
    fn display_error(&self, tasks: &[String], error: &anyhow::Error) {
        (**self).display_error(tasks, error)
    }
}

impl<D: ErrorDisplay + ?Sized> ErrorDisplay for Box<D> {
    fn display_error(&self, tasks: &[String], error: &anyhow::Error) {
        (**self).display_error(tasks, error)
    }
}

/// Default display: an "aborted" line followed by the error and its causes on
/// stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrErrorDisplay;

impl ErrorDisplay for StderrErrorDisplay {
    fn display_error(&self, tasks: &[String], error: &anyhow::Error) {
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "{} aborted!", tasks.join(" "));
        let _ = writeln!(stderr, "{:?}", error);
    }
}

/// Captures the error on a hub, then delegates to the wrapped display.
pub struct ReportingErrorDisplay<'h, D> {
    hub: &'h Hub,
    inner: D,
}

impl<D: ErrorDisplay> ReportingErrorDisplay<'static, D> {
    /// Reports through the process-wide hub.
    pub fn new(inner: D) -> Self {
        Self {
            hub: Hub::main(),
            inner,
        }
    }
}

impl<'h, D: ErrorDisplay> ReportingErrorDisplay<'h, D> {
    pub fn with_hub(hub: &'h Hub, inner: D) -> Self {
        Self { hub, inner }
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    pub fn into_inner(self) -> D {
        self.inner
    }
}

impl<D: ErrorDisplay> ErrorDisplay for ReportingErrorDisplay<'_, D> {
    fn display_error(&self, tasks: &[String], error: &anyhow::Error) {
        let transaction = tasks.join(" ");
        let context = CaptureContext::new()
            .with_transaction(transaction.clone())
            .with_logger(TASKS_LOGGER)
            .with_tag(TASK_TAG, transaction);

        if self.hub.capture_anyhow(error, &context).is_none() {
            debug!("Task failure in '{}' was not reported", tasks.join(" "));
        }

        self.inner.display_error(tasks, error);
    }
}
