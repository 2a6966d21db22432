//! The reporting client

use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use rand::Rng;
use tracing::{debug, error, warn};

use crate::builder::{CaptureContext, EventBuilder};
use crate::dsn::Dsn;
use crate::error::ConfigError;
use crate::event::{Event, Level, SdkInfo, EVENT_TYPE};
use crate::options::{ReporterOptions, TransportKind};
use crate::transport::{CaptureTransport, DiscardReason, HttpTransport, Transport};

/// Builds events from errors and hands them to a transport.
///
/// A client owns a private copy of its options. Capturing never fails the
/// caller: events that are not sent are counted on the transport.
pub struct Client {
    options: ReporterOptions,
    dsn: Option<Dsn>,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    builder: EventBuilder,
    closed: AtomicBool,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("dsn", &self.dsn)
            .field("environment", &self.options.environment)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl Client {
    /// Builds a client. An invalid or missing DSN disables sending for the
    /// HTTP transport instead of failing.
    pub fn new(options: ReporterOptions) -> Self {
        let dsn = match options.parse_dsn() {
            Ok(dsn) => Some(dsn),
            Err(e) => {
                if options.dsn.is_some() {
                    warn!("{}; sending is disabled", e);
                } else if options.transport == TransportKind::Http {
                    debug!("No DSN configured; sending is disabled");
                }
                None
            }
        };

        let transport: Option<Arc<dyn Transport>> = match options.transport {
            TransportKind::Capture => Some(Arc::new(CaptureTransport::new())),
            TransportKind::Http => dsn.clone().and_then(|dsn| {
                HttpTransport::new(dsn, &options)
                    .map(|t| Arc::new(t) as Arc<dyn Transport>)
                    .map_err(|e| error!("Failed to create HTTP transport: {}", e))
                    .ok()
            }),
        };

        Self::build(options, dsn, transport)
    }

    /// Like [`Client::new`] but rejects an invalid DSN or option value.
    pub fn try_new(options: ReporterOptions) -> Result<Self, ConfigError> {
        options.validate()?;
        if options.dsn.is_some() || options.transport == TransportKind::Http {
            options.parse_dsn()?;
        }
        Ok(Self::new(options))
    }

    /// Client delivering through a caller supplied transport.
    pub fn with_transport(options: ReporterOptions, transport: Arc<dyn Transport>) -> Self {
        let dsn = options.parse_dsn().ok();
        Self::build(options, dsn, Some(transport))
    }

    fn build(
        options: ReporterOptions,
        dsn: Option<Dsn>,
        transport: Option<Arc<dyn Transport>>,
    ) -> Self {
        Self {
            options,
            dsn,
            transport: RwLock::new(transport),
            builder: EventBuilder::default(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn options(&self) -> &ReporterOptions {
        &self.options
    }

    pub fn dsn(&self) -> Option<&Dsn> {
        self.dsn.as_ref()
    }

    pub fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Swaps the transport. The previous one is returned, not shut down.
    pub fn set_transport(&self, transport: Arc<dyn Transport>) -> Option<Arc<dyn Transport>> {
        self.transport
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .replace(transport)
    }

    /// Whether captured events can currently reach a transport.
    pub fn is_enabled(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
            && self.transport().is_some()
            && self.options.enabled_in_current_env()
    }

    pub fn capture_error(
        &self,
        error: &(dyn Error + 'static),
        context: &CaptureContext,
    ) -> Option<Event> {
        let transport = self.admit(EVENT_TYPE)?;
        let event = self.builder.build(error, context);
        self.dispatch(transport, event)
    }

    pub fn capture_anyhow(&self, error: &anyhow::Error, context: &CaptureContext) -> Option<Event> {
        let transport = self.admit(EVENT_TYPE)?;
        let event = self.builder.build_anyhow(error, context);
        self.dispatch(transport, event)
    }

    pub fn capture_message(&self, message: &str, level: Level) -> Option<Event> {
        let transport = self.admit(EVENT_TYPE)?;
        let event = self
            .builder
            .build_message(message, level, &CaptureContext::new());
        self.dispatch(transport, event)
    }

    /// Sends an already built event.
    pub fn capture_event(&self, event: Event) -> Option<Event> {
        let transport = self.admit(event.ty())?;
        self.dispatch(transport, event)
    }

    pub fn flush(&self, timeout: Duration) -> bool {
        match self.transport() {
            Some(transport) => transport.flush(timeout),
            None => true,
        }
    }

    /// Drains the transport and stops sending. Later captures are no-ops.
    pub fn close(&self, timeout: Duration) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return true;
        }
        match self.transport() {
            Some(transport) => transport.shutdown(timeout),
            None => true,
        }
    }

    /// Environment and sampling checks, run before any event is built.
    fn admit(&self, ty: &str) -> Option<Arc<dyn Transport>> {
        if self.closed.load(Ordering::SeqCst) {
            debug!("Client is closed, skipping capture");
            return None;
        }
        let Some(transport) = self.transport() else {
            debug!("Sending is disabled, skipping capture");
            return None;
        };

        if !self.options.enabled_in_current_env() {
            debug!(
                "Environment '{}' is not enabled, discarding {}",
                self.options.environment, ty
            );
            transport.record_lost_event(DiscardReason::Environment, ty);
            return None;
        }

        if !self.sample() {
            debug!("Discarding {} due to sampling", ty);
            transport.record_lost_event(DiscardReason::Sampled, ty);
            return None;
        }

        Some(transport)
    }

    fn sample(&self) -> bool {
        let rate = self.options.sample_rate;
        if rate >= 1.0 {
            return true;
        }
        rand::thread_rng().gen::<f64>() < rate
    }

    fn dispatch(&self, transport: Arc<dyn Transport>, mut event: Event) -> Option<Event> {
        self.prepare(&mut event);

        let ty = event.ty();
        let event = match &self.options.before_send {
            Some(hook) => match hook(event) {
                Some(event) => event,
                None => {
                    debug!("Event dropped by before_send");
                    transport.record_lost_event(DiscardReason::BeforeSend, ty);
                    return None;
                }
            },
            None => event,
        };

        transport.send_event(event.clone());
        Some(event)
    }

    fn prepare(&self, event: &mut Event) {
        if event.environment.is_none() {
            event.environment = Some(self.options.environment.clone());
        }
        if event.release.is_none() {
            event.release = self.options.release.clone();
        }
        if event.server_name.is_none() {
            event.server_name = self.options.server_name.clone();
        }
        if event.logger.is_none() {
            event.logger = Some(self.options.logger.clone());
        }
        if event.sdk.is_none() {
            event.sdk = Some(SdkInfo::default());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{error_with_cause, DUMMY_DSN};

    fn capture_client(
        configure: impl FnOnce(&mut ReporterOptions),
    ) -> (Client, Arc<CaptureTransport>) {
        let mut options = ReporterOptions::new(DUMMY_DSN);
        options.background_worker_threads = 0;
        configure(&mut options);
        let transport = Arc::new(CaptureTransport::new());
        (Client::with_transport(options, transport.clone()), transport)
    }

    #[test]
    fn test_capture_is_synchronous() {
        let (client, transport) = capture_client(|_| {});
        let before = transport.event_count();

        let event = client
            .capture_error(&error_with_cause("exception a"), &CaptureContext::new())
            .expect("event should be captured");

        assert_eq!(transport.event_count(), before + 1);
        assert_eq!(transport.last_event().unwrap().event_id, event.event_id);
    }

    #[test]
    fn test_disabled_environment_is_counted() {
        let (client, transport) = capture_client(|options| {
            options.environment = "test".to_string();
            options.enable_environment("production");
        });

        assert!(client.capture_message("hello", Level::Info).is_none());
        assert_eq!(transport.event_count(), 0);
        assert_eq!(
            transport.discard_counter().get(DiscardReason::Environment, "event"),
            1
        );
    }

    #[test]
    fn test_sample_rate_bounds() {
        let (never, never_transport) = capture_client(|options| options.sample_rate = 0.0);
        let (always, always_transport) = capture_client(|options| options.sample_rate = 1.0);

        for _ in 0..1000 {
            never.capture_message("sampled", Level::Info);
            always.capture_message("sampled", Level::Info);
        }

        assert_eq!(never_transport.event_count(), 0);
        assert_eq!(
            never_transport.discard_counter().get(DiscardReason::Sampled, "event"),
            1000
        );
        assert_eq!(always_transport.event_count(), 1000);
    }

    #[test]
    fn test_options_are_copied_on_bind() {
        let mut options = ReporterOptions::new(DUMMY_DSN);
        options.transport = TransportKind::Capture;
        let client = Client::new(options.clone());

        options.environment = "production".to_string();
        options.enable_environment("production");

        assert_eq!(client.options().environment, "development");
        assert!(client.options().enabled_environments.is_empty());
        assert!(client.is_enabled());
    }

    #[test]
    fn test_event_is_stamped_with_options() {
        let (client, _) = capture_client(|options| {
            options.release = Some("1.2.3".to_string());
            options.server_name = Some("worker-1".to_string());
        });

        let event = client.capture_message("hello", Level::Info).unwrap();

        assert_eq!(event.release.as_deref(), Some("1.2.3"));
        assert_eq!(event.server_name.as_deref(), Some("worker-1"));
        assert_eq!(event.environment.as_deref(), Some("development"));
        assert_eq!(event.logger.as_deref(), Some("temps-reporter"));
        assert_eq!(event.sdk, Some(SdkInfo::default()));
    }

    #[test]
    fn test_before_send_can_edit_and_drop() {
        let (client, transport) = capture_client(|options| {
            options.set_before_send(|mut event| {
                if event.message.as_deref() == Some("drop me") {
                    return None;
                }
                event.tags.insert("scrubbed".to_string(), "yes".to_string());
                Some(event)
            });
        });

        assert!(client.capture_message("drop me", Level::Info).is_none());
        let kept = client.capture_message("keep me", Level::Info).unwrap();

        assert_eq!(kept.tags.get("scrubbed").map(String::as_str), Some("yes"));
        assert_eq!(transport.event_count(), 1);
        assert_eq!(
            transport.discard_counter().get(DiscardReason::BeforeSend, "event"),
            1
        );
    }

    #[test]
    fn test_invalid_dsn_disables_sending() {
        let client = Client::new(ReporterOptions::new("not a dsn"));

        assert!(!client.is_enabled());
        assert!(client.capture_message("lost", Level::Error).is_none());
        assert!(Client::try_new(ReporterOptions::new("not a dsn")).is_err());
    }

    #[test]
    fn test_try_new_rejects_invalid_sample_rate() {
        let mut options = ReporterOptions::new(DUMMY_DSN);
        options.transport = TransportKind::Capture;
        options.sample_rate = f64::NAN;

        assert!(matches!(
            Client::try_new(options),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "sample_rate"
        ));
    }

    #[test]
    fn test_closed_client_ignores_captures() {
        let (client, transport) = capture_client(|_| {});
        assert!(client.close(Duration::from_millis(10)));

        assert!(client.capture_message("late", Level::Info).is_none());
        assert_eq!(transport.event_count(), 0);
    }

    #[test]
    fn test_set_transport_returns_previous() {
        let (client, first) = capture_client(|_| {});
        let second = Arc::new(CaptureTransport::new());

        assert!(client.set_transport(second.clone()).is_some());
        client.capture_message("routed", Level::Info);

        assert_eq!(first.event_count(), 0);
        assert_eq!(second.event_count(), 1);
    }
}
