use std::sync::Arc;

use tracing::debug;

use crate::client::Client;
use crate::error::ConfigError;
use crate::hub::Hub;
use crate::options::ReporterOptions;

/// Keeps the main hub's client alive. Dropping it drains pending events
/// (bounded by `shutdown_timeout_ms`) and unbinds the client.
#[must_use = "dropping the guard immediately shuts the client down"]
pub struct ClientInitGuard {
    client: Arc<Client>,
}

impl ClientInitGuard {
    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }

    pub fn is_enabled(&self) -> bool {
        self.client.is_enabled()
    }
}

impl Drop for ClientInitGuard {
    fn drop(&mut self) {
        let timeout = self.client.options().shutdown_timeout();
        if !self.client.close(timeout) {
            debug!("Client shut down with undelivered events");
        }
        let hub = Hub::main();
        if let Ok(current) = hub.current_client() {
            if Arc::ptr_eq(&current, &self.client) {
                hub.unbind();
            }
        }
    }
}

/// Builds a client and binds it to [`Hub::main`].
///
/// ```no_run
/// let _guard = temps_reporter::init("https://key@errors.example.com/42")?;
/// temps_reporter::capture_message("Hello", temps_reporter::Level::Info);
/// # Ok::<(), temps_reporter::ConfigError>(())
/// ```
pub fn init(options: impl Into<ReporterOptions>) -> Result<ClientInitGuard, ConfigError> {
    let client = Arc::new(Client::try_new(options.into())?);
    debug!(
        "Reporter initialized for environment '{}'",
        client.options().environment
    );
    Hub::main().bind_client(client.clone());
    Ok(ClientInitGuard { client })
}
