//! Holder of the current client
//!
//! Rebinding swaps a single pointer, so readers see either the old client or
//! the new one and never a half-updated state. The previous client is handed
//! back untouched.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use once_cell::sync::Lazy;
use tracing::debug;

use crate::builder::CaptureContext;
use crate::client::Client;
use crate::error::HubError;
use crate::event::{Event, Level};

static MAIN_HUB: Lazy<Hub> = Lazy::new(Hub::new);

#[derive(Default)]
pub struct Hub {
    client: ArcSwapOption<Client>,
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("client", &self.client.load_full())
            .finish()
    }
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: Arc<Client>) -> Self {
        Self {
            client: ArcSwapOption::from(Some(client)),
        }
    }

    /// The process-wide hub
    pub fn main() -> &'static Hub {
        &MAIN_HUB
    }

    /// Makes `client` current and returns the previously bound client.
    pub fn bind_client(&self, client: Arc<Client>) -> Option<Arc<Client>> {
        self.client.swap(Some(client))
    }

    pub fn unbind(&self) -> Option<Arc<Client>> {
        self.client.swap(None)
    }

    pub fn current_client(&self) -> Result<Arc<Client>, HubError> {
        self.client.load_full().ok_or(HubError::NotInitialized)
    }

    pub fn is_initialized(&self) -> bool {
        self.client.load().is_some()
    }

    pub fn capture_error(
        &self,
        error: &(dyn Error + 'static),
        context: &CaptureContext,
    ) -> Option<Event> {
        self.with_current(|client| client.capture_error(error, context))
    }

    pub fn capture_anyhow(&self, error: &anyhow::Error, context: &CaptureContext) -> Option<Event> {
        self.with_current(|client| client.capture_anyhow(error, context))
    }

    pub fn capture_message(&self, message: &str, level: Level) -> Option<Event> {
        self.with_current(|client| client.capture_message(message, level))
    }

    pub fn capture_event(&self, event: Event) -> Option<Event> {
        self.with_current(|client| client.capture_event(event))
    }

    pub fn flush(&self, timeout: Duration) -> bool {
        match self.client.load_full() {
            Some(client) => client.flush(timeout),
            None => true,
        }
    }

    fn with_current<F>(&self, f: F) -> Option<Event>
    where
        F: FnOnce(&Client) -> Option<Event>,
    {
        match self.client.load_full() {
            Some(client) => f(&client),
            None => {
                debug!("No client bound, skipping capture");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{ReporterOptions, TransportKind};

    fn capture_client() -> Arc<Client> {
        let mut options = ReporterOptions::default();
        options.transport = TransportKind::Capture;
        Arc::new(Client::new(options))
    }

    #[test]
    fn test_unbound_hub_reports_not_initialized() {
        let hub = Hub::new();

        assert!(!hub.is_initialized());
        assert_eq!(hub.current_client().unwrap_err(), HubError::NotInitialized);
        assert!(hub.capture_message("nowhere", Level::Info).is_none());
    }

    #[test]
    fn test_bind_returns_previous_client() {
        let hub = Hub::new();
        let first = capture_client();
        let second = capture_client();

        assert!(hub.bind_client(first.clone()).is_none());
        let previous = hub.bind_client(second.clone()).unwrap();

        assert!(Arc::ptr_eq(&previous, &first));
        assert!(Arc::ptr_eq(&hub.current_client().unwrap(), &second));
        assert!(Arc::ptr_eq(&hub.unbind().unwrap(), &second));
        assert!(!hub.is_initialized());
    }
}
