//! SMS gateway daemon - bridges queue-API work items onto a chat-network transport.

use anyhow::Context;
use chat_transport::BridgeTransport;
use clap::Parser;
use connection_supervisor::{ConnectionSupervisor, SessionState, SupervisorConfig};
use gateway_config_and_utils::{init_logging, Config};
use message_delivery_worker::{DeliveryWorker, DeliveryWorkerConfig};
use ops_notifier::{AlertCategory, Notifier, NotifierConfig};
use queue_api_client::QueueApiClient;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// SMS gateway command-line interface.
#[derive(Parser)]
#[command(name = "sms-gateway")]
#[command(about = "Delivers queue-API SMS work items over a chat-network transport")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Env file loaded before configuration is read. Defaults to ./.env
    #[arg(long)]
    env_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match &cli.env_file {
        Some(path) => {
            if let Err(e) = dotenvy::from_path(path) {
                eprintln!("failed to load env file {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        }
        None => {
            let _ = dotenvy::dotenv();
        }
    }

    init_logging(&cli.log_level);

    match run().await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Gateway terminated with an unrecoverable error");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<ExitCode> {
    let config = Config::from_env().context("loading configuration")?;
    config.api_base_url().context("validating API_BASE_URL")?;

    let notifier = Arc::new(Notifier::new(notifier_config(&config)));

    let api = Arc::new(QueueApiClient::new(
        &config.api_base_url,
        &config.api_email,
        &config.api_password,
        &config.api_device_name,
    ));
    if !api.login().await {
        notifier
            .alert(
                "No se pudo iniciar sesión en la API de colas",
                AlertCategory::Critical,
            )
            .await;
        anyhow::bail!("queue API login failed");
    }
    info!("Queue API login succeeded");

    let transport = Arc::new(BridgeTransport::new(&config.bridge_url));
    let supervisor = Arc::new(ConnectionSupervisor::new(
        transport,
        notifier.clone(),
        supervisor_config(&config),
    ));
    if let Err(e) = supervisor.initialize().await {
        notifier
            .alert(
                "No se pudo iniciar la sesión de chat",
                AlertCategory::Critical,
            )
            .await;
        supervisor.cleanup().await;
        return Err(e).context("establishing the chat session");
    }

    let worker = DeliveryWorker::new(
        DeliveryWorkerConfig {
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            ..DeliveryWorkerConfig::default()
        },
        api.clone(),
        supervisor.clone(),
        notifier.clone(),
    );
    worker.start();
    info!(
        poll_interval_ms = config.poll_interval_ms,
        "Delivery loop started"
    );

    let exit = wait_for_shutdown(&supervisor).await;

    worker.stop();
    supervisor.cleanup().await;

    Ok(exit)
}

fn notifier_config(config: &Config) -> NotifierConfig {
    NotifierConfig {
        enabled: config.telegram_enabled,
        bot_token: config.telegram_bot_token.clone(),
        chat_id: config.telegram_chat_id.clone(),
        device_name: config.api_device_name.clone(),
        ..NotifierConfig::default()
    }
}

fn supervisor_config(config: &Config) -> SupervisorConfig {
    SupervisorConfig {
        backoff_base: Duration::from_millis(config.backoff_base_ms),
        backoff_cap: Duration::from_millis(config.backoff_cap_ms),
        max_attempts: config.max_reconnect_attempts,
        ..SupervisorConfig::default()
    }
}

/// Block until either a shutdown signal arrives (exit 0) or the session
/// reaches its fatal state (exit 1).
async fn wait_for_shutdown(supervisor: &ConnectionSupervisor) -> ExitCode {
    let mut state_rx = supervisor.subscribe_state();

    tokio::select! {
        _ = wait_for_signal() => {
            info!("Shutdown signal received");
            ExitCode::SUCCESS
        }
        _ = wait_for_fatal(&mut state_rx) => {
            error!("Chat session is fatal, exiting");
            ExitCode::FAILURE
        }
    }
}

async fn wait_for_fatal(state_rx: &mut watch::Receiver<SessionState>) {
    loop {
        if *state_rx.borrow() == SessionState::Fatal {
            return;
        }
        if state_rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
        _ = sigterm.recv() => info!("Received SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config::from_lookup(|name| match name {
            "API_BASE_URL" => Some("https://queue.test".to_string()),
            "API_DEVICE_NAME" => Some("gateway-01".to_string()),
            "TELEGRAM_ENABLED" => Some("true".to_string()),
            "TELEGRAM_BOT_TOKEN" => Some("123:abc".to_string()),
            "TELEGRAM_CHAT_ID" => Some("-100999".to_string()),
            "MAX_RECONNECT_ATTEMPTS" => Some("5".to_string()),
            "RECONNECT_BACKOFF_BASE_MS" => Some("1000".to_string()),
            "RECONNECT_BACKOFF_CAP_MS" => Some("8000".to_string()),
            _ => None,
        })
        .unwrap()
    }

    #[test]
    fn notifier_config_maps_credentials() {
        let mapped = notifier_config(&base_config());

        assert!(mapped.enabled);
        assert_eq!(mapped.bot_token.as_deref(), Some("123:abc"));
        assert_eq!(mapped.chat_id.as_deref(), Some("-100999"));
        assert_eq!(mapped.device_name, "gateway-01");
    }

    #[test]
    fn supervisor_config_maps_backoff_shape() {
        let mapped = supervisor_config(&base_config());

        assert_eq!(mapped.backoff_base, Duration::from_millis(1_000));
        assert_eq!(mapped.backoff_cap, Duration::from_millis(8_000));
        assert_eq!(mapped.max_attempts, 5);
        assert_eq!(mapped.send_timeout, Duration::from_secs(30));
    }
}
