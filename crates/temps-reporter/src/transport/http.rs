use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use tracing::{debug, error, warn};

use crate::dsn::Dsn;
use crate::envelope::{Envelope, EnvelopeItem};
use crate::error::SendError;
use crate::event::{SDK_NAME, SDK_VERSION};
use crate::options::ReporterOptions;

use super::worker::{BackgroundWorker, DeliverFn};
use super::{DiscardCounter, DiscardReason, Transport};

const ENVELOPE_CONTENT_TYPE: &str = "application/x-sentry-envelope";

/// Bounded retry with exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn from_options(options: &ReporterOptions) -> Self {
        Self {
            max_attempts: options.send_retries.saturating_add(1),
            base_backoff: Duration::from_millis(options.retry_backoff_ms),
            ..Default::default()
        }
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

struct HttpSender {
    client: reqwest::Client,
    url: String,
    auth: String,
    retry: RetryPolicy,
    discards: Arc<DiscardCounter>,
}

impl HttpSender {
    /// Sends with retries. Failures end up in the discard counter.
    async fn deliver(&self, envelope: Envelope) {
        let category = envelope.category();
        let body = match envelope.to_vec() {
            Ok(body) => body,
            Err(e) => {
                error!("Failed to encode envelope: {}", e);
                self.discards.record(DiscardReason::SendError, category);
                return;
            }
        };

        for attempt in 1..=self.retry.max_attempts {
            match self.post(body.clone()).await {
                Ok(()) => {
                    debug!("Delivered {} to {} (attempt {})", category, self.url, attempt);
                    return;
                }
                Err(SendError::RateLimited) => {
                    warn!("Rate limited by {}, dropping {}", self.url, category);
                    self.discards
                        .record(DiscardReason::RateLimitBackoff, category);
                    return;
                }
                Err(e) if e.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        "Delivery attempt {} to {} failed: {}. Retrying in {:?}",
                        attempt, self.url, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(
                        "Giving up on {} after {} attempt(s): {}",
                        category, attempt, e
                    );
                    break;
                }
            }
        }
        self.discards.record(DiscardReason::SendError, category);
    }

    async fn post(&self, body: Vec<u8>) -> Result<(), SendError> {
        let response = self
            .client
            .post(&self.url)
            .header("X-Sentry-Auth", &self.auth)
            .header(CONTENT_TYPE, ENVELOPE_CONTENT_TYPE)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(SendError::RateLimited);
        }
        if !status.is_success() {
            return Err(SendError::Status {
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

enum Delivery {
    /// Delivery on the caller's thread
    Blocking(Option<tokio::runtime::Runtime>),
    Background(BackgroundWorker),
}

/// Sends envelopes to the DSN's envelope endpoint over HTTP.
pub struct HttpTransport {
    sender: Arc<HttpSender>,
    delivery: Delivery,
    discards: Arc<DiscardCounter>,
    dsn: Dsn,
    send_client_reports: bool,
}

impl HttpTransport {
    pub fn new(dsn: Dsn, options: &ReporterOptions) -> Result<Self, SendError> {
        let user_agent = format!("{}/{}", SDK_NAME, SDK_VERSION);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(user_agent.clone())
            .build()?;

        let discards = Arc::new(DiscardCounter::new());
        let sender = Arc::new(HttpSender {
            client,
            url: dsn.envelope_url(),
            auth: dsn.auth_header(&user_agent),
            retry: RetryPolicy::from_options(options),
            discards: discards.clone(),
        });

        let delivery = if options.background_worker_threads == 0 {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            Delivery::Blocking(Some(runtime))
        } else {
            let worker_sender = sender.clone();
            let deliver: DeliverFn = Arc::new(move |envelope| {
                let sender = worker_sender.clone();
                async move { sender.deliver(envelope).await }.boxed()
            });
            Delivery::Background(BackgroundWorker::spawn(
                options.background_worker_threads,
                options.max_queue_size,
                discards.clone(),
                deliver,
            ))
        };

        debug!("HTTP transport ready for {}", sender.url);

        Ok(Self {
            sender,
            delivery,
            discards,
            dsn,
            send_client_reports: options.send_client_reports,
        })
    }

    pub fn dsn(&self) -> &Dsn {
        &self.dsn
    }

    fn deliver_blocking(&self, runtime: &tokio::runtime::Runtime, envelope: Envelope) {
        let delivery = self.sender.deliver(envelope);
        if tokio::runtime::Handle::try_current().is_ok() {
            // block_on refuses to nest inside another runtime
            std::thread::scope(|scope| {
                scope.spawn(|| runtime.block_on(delivery));
            });
        } else {
            runtime.block_on(delivery);
        }
    }

    fn send_client_report(&self) {
        if !self.send_client_reports {
            return;
        }
        if let Some(report) = self.discards.report() {
            let mut envelope = Envelope::new().with_dsn(self.dsn.to_string());
            envelope.add_item(EnvelopeItem::ClientReport(report));
            self.send_envelope(envelope);
        }
    }
}

impl Transport for HttpTransport {
    fn send_envelope(&self, envelope: Envelope) {
        match &self.delivery {
            Delivery::Blocking(Some(runtime)) => self.deliver_blocking(runtime, envelope),
            Delivery::Blocking(None) => self
                .discards
                .record(DiscardReason::Shutdown, envelope.category()),
            Delivery::Background(worker) => {
                worker.enqueue(envelope);
            }
        }
    }

    fn flush(&self, timeout: Duration) -> bool {
        match &self.delivery {
            Delivery::Blocking(_) => true,
            Delivery::Background(worker) => worker.flush(timeout),
        }
    }

    /// Drains or discards pending envelopes first, so the final client
    /// report includes the `shutdown` discards.
    fn shutdown(&self, timeout: Duration) -> bool {
        match &self.delivery {
            Delivery::Blocking(_) => {
                self.send_client_report();
                true
            }
            Delivery::Background(worker) => {
                let deadline = Instant::now() + timeout;
                let drained = worker.flush(timeout);
                if !drained {
                    let discarded = worker.discard_pending();
                    warn!(
                        "Transport did not drain within {:?}, discarded {} queued envelopes",
                        timeout, discarded
                    );
                }
                self.send_client_report();
                let remaining = deadline.saturating_duration_since(Instant::now());
                worker.shutdown(remaining) && drained
            }
        }
    }

    fn discard_counter(&self) -> &DiscardCounter {
        &self.discards
    }
}

impl Drop for HttpTransport {
    fn drop(&mut self) {
        // dropping a runtime inside async code panics
        if let Delivery::Blocking(runtime) = &mut self.delivery {
            if let Some(runtime) = runtime.take() {
                runtime.shutdown_background();
            }
        }
    }
}
