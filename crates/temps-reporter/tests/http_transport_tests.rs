use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use temps_reporter::envelope::parse_envelope;
use temps_reporter::test_utils::error_with_cause;
use temps_reporter::{CaptureContext, Client, DiscardReason, Level, ReporterOptions};

#[derive(Clone)]
struct ServerState {
    status: StatusCode,
    delay: Duration,
    hits: Arc<AtomicUsize>,
    bodies: Arc<Mutex<Vec<Bytes>>>,
    auth: Arc<Mutex<Vec<String>>>,
}

async fn ingest(State(state): State<ServerState>, headers: HeaderMap, body: Bytes) -> StatusCode {
    state.hits.fetch_add(1, Ordering::SeqCst);
    if !state.delay.is_zero() {
        tokio::time::sleep(state.delay).await;
    }
    if let Some(auth) = headers.get("x-sentry-auth").and_then(|v| v.to_str().ok()) {
        state.auth.lock().unwrap().push(auth.to_string());
    }
    state.bodies.lock().unwrap().push(body);
    state.status
}

/// Envelope endpoint on an ephemeral port, served from its own runtime so the
/// tests can exercise both blocking and background delivery.
fn start_server(status: StatusCode) -> (SocketAddr, ServerState) {
    start_slow_server(status, Duration::ZERO)
}

fn start_slow_server(status: StatusCode, delay: Duration) -> (SocketAddr, ServerState) {
    let state = ServerState {
        status,
        delay,
        hits: Arc::new(AtomicUsize::new(0)),
        bodies: Arc::new(Mutex::new(Vec::new())),
        auth: Arc::new(Mutex::new(Vec::new())),
    };
    let app_state = state.clone();
    let (tx, rx) = std::sync::mpsc::channel();

    std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            tx.send(listener.local_addr().unwrap()).unwrap();
            let app = Router::new()
                .route("/api/{project_id}/envelope/", post(ingest))
                .with_state(app_state);
            axum::serve(listener, app).await.unwrap();
        });
    });

    (rx.recv().unwrap(), state)
}

fn options_for(addr: SocketAddr, workers: usize) -> ReporterOptions {
    let mut options = ReporterOptions::new(format!("http://public:secret@{}/7", addr));
    options.background_worker_threads = workers;
    options.retry_backoff_ms = 1;
    options
}

fn discarded(client: &Client, reason: DiscardReason, ty: &str) -> u64 {
    client
        .transport()
        .map(|t| t.discard_counter().get(reason, ty))
        .unwrap_or(0)
}

#[test]
fn test_blocking_delivery_posts_envelope() {
    let (addr, state) = start_server(StatusCode::OK);
    let client = Client::new(options_for(addr, 0));

    let event = client
        .capture_error(&error_with_cause("exception a"), &CaptureContext::new())
        .expect("event admitted");

    assert_eq!(state.hits.load(Ordering::SeqCst), 1);
    let bodies = state.bodies.lock().unwrap();
    let (headers, items) = parse_envelope(&bodies[0]).unwrap();
    assert_eq!(headers.event_id, Some(event.event_id));
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].header.ty.as_str(), "event");

    let values = items[0].payload["exception"]["values"].as_array().unwrap();
    assert_eq!(values[0]["value"], "exception a");
    assert_eq!(values[1]["value"], "exception b");

    let auth = state.auth.lock().unwrap();
    assert!(auth[0].contains("sentry_key=public"));
    assert!(auth[0].contains("sentry_secret=secret"));
}

#[test]
fn test_server_errors_are_retried_then_counted() {
    let (addr, state) = start_server(StatusCode::INTERNAL_SERVER_ERROR);
    let mut options = options_for(addr, 0);
    options.send_retries = 2;
    options.send_client_reports = false;
    let client = Client::new(options);

    client.capture_message("will fail", Level::Error);

    assert_eq!(state.hits.load(Ordering::SeqCst), 3);
    assert_eq!(discarded(&client, DiscardReason::SendError, "event"), 1);
}

#[test]
fn test_client_errors_are_not_retried() {
    let (addr, state) = start_server(StatusCode::BAD_REQUEST);
    let mut options = options_for(addr, 0);
    options.send_client_reports = false;
    let client = Client::new(options);

    client.capture_message("rejected", Level::Error);

    assert_eq!(state.hits.load(Ordering::SeqCst), 1);
    assert_eq!(discarded(&client, DiscardReason::SendError, "event"), 1);
}

#[test]
fn test_rate_limit_is_counted_separately() {
    let (addr, state) = start_server(StatusCode::TOO_MANY_REQUESTS);
    let mut options = options_for(addr, 0);
    options.send_client_reports = false;
    let client = Client::new(options);

    client.capture_message("slow down", Level::Error);

    assert_eq!(state.hits.load(Ordering::SeqCst), 1);
    assert_eq!(discarded(&client, DiscardReason::RateLimitBackoff, "event"), 1);
    assert_eq!(discarded(&client, DiscardReason::SendError, "event"), 0);
}

#[test]
fn test_unreachable_server_counts_send_error() {
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let mut options = options_for(addr, 0);
    options.send_retries = 0;
    let client = Client::new(options);

    client.capture_message("nobody home", Level::Error);

    assert_eq!(discarded(&client, DiscardReason::SendError, "event"), 1);
}

#[test]
fn test_background_delivery_and_flush() {
    let (addr, state) = start_server(StatusCode::OK);
    let client = Client::new(options_for(addr, 2));

    for i in 0..5 {
        assert!(client
            .capture_message(&format!("queued {}", i), Level::Info)
            .is_some());
    }

    assert!(client.flush(Duration::from_secs(5)));
    assert_eq!(state.hits.load(Ordering::SeqCst), 5);
    assert!(client.close(Duration::from_secs(5)));
}

#[test]
fn test_close_counts_undelivered_envelopes_before_returning() {
    let (addr, _state) = start_slow_server(StatusCode::OK, Duration::from_secs(2));
    let mut options = options_for(addr, 1);
    options.send_client_reports = false;
    let client = Client::new(options);

    for i in 0..4 {
        client.capture_message(&format!("slow {}", i), Level::Info);
    }
    std::thread::sleep(Duration::from_millis(200));

    assert!(!client.close(Duration::from_millis(100)));
    assert_eq!(discarded(&client, DiscardReason::Shutdown, "event"), 3);
}

#[test]
fn test_close_sends_client_report() {
    let (addr, state) = start_server(StatusCode::OK);
    let mut options = options_for(addr, 0);
    options.sample_rate = 0.0;
    let client = Client::new(options);

    client.capture_message("sampled out", Level::Info);
    client.capture_message("sampled out", Level::Info);
    assert_eq!(state.hits.load(Ordering::SeqCst), 0);

    client.close(Duration::from_secs(2));

    let bodies = state.bodies.lock().unwrap();
    assert_eq!(bodies.len(), 1);
    let (_, items) = parse_envelope(&bodies[0]).unwrap();
    assert_eq!(items[0].header.ty.as_str(), "client_report");
    let discarded = &items[0].payload["discarded_events"][0];
    assert_eq!(discarded["reason"], "sampled");
    assert_eq!(discarded["category"], "event");
    assert_eq!(discarded["quantity"], 2);
}

#[tokio::test]
async fn test_blocking_delivery_inside_runtime() {
    let (addr, state) = start_server(StatusCode::OK);
    let client = Client::new(options_for(addr, 0));

    client.capture_message("from async code", Level::Warning);

    assert_eq!(state.hits.load(Ordering::SeqCst), 1);
}
