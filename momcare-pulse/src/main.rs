use anyhow::Result;
use clap::Parser;
use pulse::api;
use pulse::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "pulse.toml";

#[derive(Debug, Parser)]
#[command(name = "pulse-server", version)]
#[command(about = "Serves live heart-rate readings and high-BPM alerts over HTTP")]
struct Cli {
    /// TOML configuration file; a missing file means built-in defaults.
    #[arg(long, env = "PULSE_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    // 2. Load the layered configuration.
    let config_path = cli.config;
    let config = PulseConfig::load(Some(&config_path))?;
    info!(
        "{} v{} (config: {})",
        pulse::SERVICE_NAME,
        pulse::VERSION,
        config_path.display()
    );

    // 3. Wire the alert collaborators and create the hub.
    let directory = Arc::new(InMemoryDirectory::from_config(&config.recipients));
    if config.recipients.is_empty() {
        warn!("No alert recipients configured; high-BPM alerts will fail to dispatch.");
    }
    let mailer = Arc::new(DirectoryMailer::new(
        directory.clone(),
        config.alert.sender.clone(),
    ));
    let hub = PulseHub::new(config, mailer);

    // 4. Log hub activity.
    spawn_event_logger(&hub);

    // 5. Run until Ctrl+C.
    let app = api::router(AppState {
        hub: hub.clone(),
        directory,
    });
    hub.run(app).await?;

    Ok(())
}

fn spawn_event_logger(hub: &PulseHub) {
    let mut events = hub.subscribe_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => debug!("[PULSE] => {:?}", event),
                Err(RecvError::Lagged(skipped)) => debug!("[PULSE] => {} events skipped", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_flag_sets_the_path() {
        let cli = Cli::try_parse_from(["pulse-server", "--config", "/etc/momcare/pulse.toml"])
            .expect("parse");
        assert_eq!(cli.config, PathBuf::from("/etc/momcare/pulse.toml"));

        let cli = Cli::try_parse_from(["pulse-server", "--config=local.toml"]).expect("parse");
        assert_eq!(cli.config, PathBuf::from("local.toml"));
    }

    #[test]
    fn bad_arguments_are_rejected() {
        assert!(Cli::try_parse_from(["pulse-server", "--config"]).is_err());
        assert!(Cli::try_parse_from(["pulse-server", "--cofnig", "x.toml"]).is_err());
    }
}
