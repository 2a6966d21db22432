//! Turns errors into events
//!
//! The cause chain is walked through [`std::error::Error::source`], most
//! recent error first. Each visited error is remembered by address and type
//! so a chain that loops back on itself stops instead of spinning forever.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::collections::{HashMap, HashSet};
use std::error::Error;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::event::{Event, ExceptionRecord, Frame, Level};

/// Upper bound on recorded causes, independent of cycle detection.
pub const MAX_CHAIN_DEPTH: usize = 100;

static FRAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)^\s*\d+:\s+(?P<symbol>[^\r\n]+?)\s*(?:\r?\n\s+at\s+(?P<path>[^\r\n]+?)(?::(?P<lineno>\d+))?(?::(?P<colno>\d+))?)?\s*$",
    )
    .expect("frame regex is valid")
});

/// Extra data merged verbatim into a built event.
#[derive(Debug, Clone, Default)]
pub struct CaptureContext {
    pub transaction: Option<String>,
    pub logger: Option<String>,
    pub tags: HashMap<String, String>,
    pub level: Option<Level>,
    /// Rendered backtrace of the outermost error
    pub backtrace: Option<String>,
}

impl CaptureContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transaction(mut self, transaction: impl Into<String>) -> Self {
        self.transaction = Some(transaction.into());
        self
    }

    pub fn with_logger(mut self, logger: impl Into<String>) -> Self {
        self.logger = Some(logger.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = Some(level);
        self
    }

    /// Attaches a backtrace if one was actually captured.
    pub fn with_backtrace(mut self, backtrace: &Backtrace) -> Self {
        if backtrace.status() == BacktraceStatus::Captured {
            self.backtrace = Some(backtrace.to_string());
        }
        self
    }
}

#[derive(Debug, Clone)]
pub struct EventBuilder {
    max_depth: usize,
}

impl Default for EventBuilder {
    fn default() -> Self {
        Self {
            max_depth: MAX_CHAIN_DEPTH,
        }
    }
}

impl EventBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }

    pub fn build(&self, error: &(dyn Error + 'static), context: &CaptureContext) -> Event {
        let mut exceptions = self.exception_chain(error);
        if let (Some(top), Some(backtrace)) = (exceptions.first_mut(), &context.backtrace) {
            top.frames = parse_backtrace(backtrace);
        }

        let mut event = Event::new();
        event.exceptions = exceptions;
        apply_context(&mut event, context);
        event
    }

    pub fn build_anyhow(&self, error: &anyhow::Error, context: &CaptureContext) -> Event {
        let mut context = context.clone();
        if context.backtrace.is_none() {
            context = context.with_backtrace(error.backtrace());
        }
        let root: &(dyn Error + 'static) = error.as_ref();
        self.build(root, &context)
    }

    pub fn build_message(&self, message: &str, level: Level, context: &CaptureContext) -> Event {
        let mut event = Event::new();
        event.message = Some(message.to_string());
        event.level = level;
        apply_context(&mut event, context);
        event
    }

    /// Records for `error` and its causes, most recent first.
    pub fn exception_chain(&self, error: &(dyn Error + 'static)) -> Vec<ExceptionRecord> {
        let mut records: Vec<ExceptionRecord> = Vec::new();
        let mut visited: HashSet<(usize, String)> = HashSet::new();
        let mut current = Some(error);

        while let Some(err) = current {
            let ty = error_type_name(err);
            if !visited.insert((error_address(err), ty.clone())) {
                tracing::debug!("Cause chain loops back to {}, truncating", ty);
                break;
            }
            if records.len() >= self.max_depth {
                tracing::debug!("Cause chain exceeds {} errors, truncating", self.max_depth);
                break;
            }

            let next = records.len();
            if let Some(previous) = records.last_mut() {
                previous.caused_by = Some(next);
            }
            records.push(ExceptionRecord::new(ty, err.to_string()));
            current = err.source();
        }

        records
    }
}

/// Builds an event with the default builder.
pub fn build_event(error: &(dyn Error + 'static), context: &CaptureContext) -> Event {
    EventBuilder::default().build(error, context)
}

fn apply_context(event: &mut Event, context: &CaptureContext) {
    if let Some(level) = context.level {
        event.level = level;
    }
    event.transaction = context.transaction.clone();
    event.logger = context.logger.clone();
    event
        .tags
        .extend(context.tags.iter().map(|(k, v)| (k.clone(), v.clone())));
}

fn error_address(error: &(dyn Error + 'static)) -> usize {
    error as *const dyn Error as *const () as usize
}

/// Type name taken from the `Debug` output, e.g. `ParseIntError { kind: .. }`
/// yields `ParseIntError`. Falls back to `Error` when the output does not
/// start with an identifier.
pub fn error_type_name(error: &dyn Error) -> String {
    let debug = format!("{:?}", error);
    type_name_from_debug(&debug).to_string()
}

fn type_name_from_debug(debug: &str) -> &str {
    let name = debug
        .split(|c: char| c == '(' || c == '{' || c.is_whitespace())
        .next()
        .unwrap_or_default();
    let is_ident = name
        .chars()
        .next()
        .map(|c| c.is_alphabetic() || c == '_')
        .unwrap_or(false)
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == ':');
    if is_ident {
        name
    } else {
        "Error"
    }
}

/// Parses the text form of a `std::backtrace::Backtrace`.
pub fn parse_backtrace(backtrace: &str) -> Vec<Frame> {
    FRAME_RE
        .captures_iter(backtrace)
        .map(|caps| Frame {
            function: caps.name("symbol").map(|m| m.as_str().to_string()),
            filename: caps.name("path").map(|m| m.as_str().to_string()),
            lineno: caps.name("lineno").and_then(|m| m.as_str().parse().ok()),
            colno: caps.name("colno").and_then(|m| m.as_str().parse().ok()),
        })
        .collect()
}
