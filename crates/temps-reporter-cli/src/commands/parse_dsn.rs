use clap::Args;
use colored::Colorize;
use temps_reporter::Dsn;

#[derive(Args)]
pub struct ParseDsnCommand {
    /// DSN to inspect, e.g. https://key@errors.example.com/42
    pub dsn: String,
}

impl ParseDsnCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let dsn: Dsn = self.dsn.parse()?;

        println!("{}", "DSN".bright_white().bold());
        println!("  {:<12} {}", "scheme:", dsn.scheme());
        println!("  {:<12} {}", "host:", dsn.host());
        if let Some(port) = dsn.port() {
            println!("  {:<12} {}", "port:", port);
        }
        println!("  {:<12} {}", "project:", dsn.project_id());
        println!("  {:<12} {}", "public key:", dsn.public_key());
        println!(
            "  {:<12} {}",
            "secret key:",
            if dsn.secret_key().is_some() {
                "set"
            } else {
                "not set"
            }
        );
        println!();
        println!("{} {}", "Envelope endpoint:".bright_green(), dsn.envelope_url());
        Ok(())
    }
}
