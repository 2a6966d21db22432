use std::time::Duration;

use anyhow::Context;
use clap::Args;
use colored::Colorize;
use temps_reporter::{Client, Level, ReporterOptions};
use tracing::{debug, info};

#[derive(Args)]
pub struct SendEventCommand {
    /// DSN of the project receiving the event
    #[arg(long, env = "SENTRY_DSN")]
    pub dsn: String,

    /// Message to send
    #[arg(long, short)]
    pub message: String,

    /// Event level (debug, info, warning, error, fatal)
    #[arg(long, default_value = "info")]
    pub level: String,

    /// Environment stamped on the event
    #[arg(long, env = "SENTRY_ENVIRONMENT")]
    pub environment: Option<String>,

    /// Release stamped on the event
    #[arg(long, env = "SENTRY_RELEASE")]
    pub release: Option<String>,

    /// Delivery attempts after the first failure
    #[arg(long, default_value_t = 2)]
    pub retries: u32,
}

impl SendEventCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let level: Level = self.level.parse()?;

        let mut options = ReporterOptions::new(self.dsn.clone());
        options.background_worker_threads = 0;
        options.send_retries = self.retries;
        options.send_client_reports = false;
        if let Some(environment) = self.environment {
            options.environment = environment;
        }
        options.release = self.release;
        debug!("Sending with {:?}", options);

        let client = Client::try_new(options).context("Invalid reporter configuration")?;
        let transport = client
            .transport()
            .ok_or_else(|| anyhow::anyhow!("Sending is disabled for this configuration"))?;

        let event = client
            .capture_message(&self.message, level)
            .ok_or_else(|| anyhow::anyhow!("Event was not admitted for sending"))?;
        client.close(Duration::from_secs(5));

        let dropped = transport.discard_counter().report();
        if let Some(report) = dropped {
            let reasons: Vec<String> = report
                .discarded_events
                .iter()
                .map(|d| format!("{} x{}", d.reason, d.quantity))
                .collect();
            anyhow::bail!("Event {} was dropped: {}", event.event_id, reasons.join(", "));
        }

        info!("Delivered event {}", event.event_id);
        println!(
            "{} {}",
            "Event sent:".bright_green(),
            event.event_id.simple()
        );
        Ok(())
    }
}
