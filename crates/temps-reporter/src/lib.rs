//! Error reporting SDK for Temps services
//!
//! Errors are turned into events by an [`EventBuilder`], checked against the
//! client's environment and sampling settings, and handed to a [`Transport`]:
//! either the HTTP envelope sender or the in-memory [`CaptureTransport`] used
//! in tests.
//!
//! ```text
//! caller
//!     ↓
//! Hub (current client)
//!     ↓
//! Client (environment + sampling checks)
//!     ↓
//! EventBuilder (cause chain → exception records)
//!     ↓
//! Transport (capture buffers | envelope over HTTP)
//! ```

pub mod builder;
pub mod client;
pub mod dsn;
pub mod envelope;
pub mod error;
pub mod event;
pub mod hub;
pub mod options;
pub mod transport;
mod init;

// Export test utilities for use by other crates in their tests
pub mod test_utils;

pub use builder::{build_event, CaptureContext, EventBuilder};
pub use client::Client;
pub use dsn::Dsn;
pub use envelope::{Envelope, EnvelopeError, EnvelopeItem};
pub use error::{ConfigError, HarnessError, HubError, SendError};
pub use event::{Event, ExceptionRecord, Frame, Level};
pub use hub::Hub;
pub use init::{init, ClientInitGuard};
pub use options::{ReporterOptions, TransportKind};
pub use transport::{CaptureTransport, DiscardReason, HttpTransport, Transport};

use std::error::Error;

/// Captures an error on the main hub.
pub fn capture_error(error: &(dyn Error + 'static), context: &CaptureContext) -> Option<Event> {
    Hub::main().capture_error(error, context)
}

pub fn capture_anyhow(error: &anyhow::Error, context: &CaptureContext) -> Option<Event> {
    Hub::main().capture_anyhow(error, context)
}

pub fn capture_message(message: &str, level: Level) -> Option<Event> {
    Hub::main().capture_message(message, level)
}
