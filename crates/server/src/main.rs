mod bootstrap;

use anyhow::Result;
use keybot_core::config::{AppConfig, LoadOptions};
use tokio::sync::watch;

fn init_logging(config: &AppConfig) {
    use keybot_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Load config and initialize logging before any other operations
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let session = app.session;
    let slack_runner = app.slack_runner;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let listener = tokio::spawn(async move { slack_runner.run(shutdown_rx).await });

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bot_user_id = %app.identity.user_id,
        log_format = ?app.config.logging.format,
        "keybot started"
    );

    // The session drives the socket; a connection failure ends the process.
    let outcome = tokio::select! {
        result = session.run() => result.map_err(anyhow::Error::from),
        signal = wait_for_shutdown() => signal,
    };

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "keybot stopping"
    );
    let _ = shutdown_tx.send(true);
    match listener.await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => {
            tracing::warn!(error = %error, "socket mode listener ended with an error");
        }
        Err(error) => {
            tracing::warn!(error = %error, "socket mode listener task failed");
        }
    }

    outcome
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
