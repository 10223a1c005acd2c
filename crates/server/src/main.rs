//! Chat relay server
//!
//! Relays browser chats to Genesys Cloud Open Messaging.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use chatrelay::config::{Cli, Config, IntegrationSource};
use chatrelay::genesys::GenesysClient;
use chatrelay::integration::resolve_integration;
use chatrelay::logging::init_logging;
use chatrelay::registry::Registry;
use chatrelay::session::SessionConfig;
use chatrelay::signer::Signer;
use chatrelay::state::AppState;
use chatrelay::upstream::GenesysSender;

/// Extra time given to the registry beyond the drain bound before giving up.
const REGISTRY_JOIN_SLACK: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let logging = init_logging()?;
    let config = Config::from_cli(cli)?;

    info!(
        component = "server",
        event = "server.starting",
        run_id = %logging.run_id,
        region_api = %config.endpoints.api_base,
        "Starting chat relay"
    );

    let client = Arc::new(GenesysClient::new(
        config.endpoints.clone(),
        config.credentials.clone(),
        config.client_token.clone(),
    ));

    let integration_id = match &config.integration {
        IntegrationSource::Fixed(id) => id.clone(),
        IntegrationSource::Resolve { name, .. } => {
            let settings = config
                .integration_settings()
                .context("integration settings missing")?;
            resolve_integration(&client, &settings)
                .await
                .with_context(|| format!("resolving integration {name}"))?
                .id
        }
    };
    info!(
        component = "server",
        event = "server.integration",
        integration_id = %integration_id,
        "Using Open Messaging integration"
    );

    let shutdown = CancellationToken::new();
    let sender = Arc::new(GenesysSender::new(client, integration_id));
    let (registry, registry_task) = Registry::spawn(
        sender,
        SessionConfig::default(),
        shutdown.clone(),
        config.graceful_timeout,
    );

    let state = Arc::new(AppState::new(
        registry,
        Signer::new(config.webhook_token.as_bytes()),
    ));

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding to {}", config.listen_addr))?;

    tokio::spawn(cancel_on_signal(shutdown.clone()));
    chatrelay::serve(listener, state, shutdown)
        .await
        .context("server exited")?;

    match tokio::time::timeout(
        config.graceful_timeout + REGISTRY_JOIN_SLACK,
        registry_task,
    )
    .await
    {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(
            component = "server",
            event = "server.registry.panicked",
            error = %e,
            "Registry task failed"
        ),
        Err(_) => warn!(
            component = "server",
            event = "server.registry.timeout",
            "Registry did not stop in time"
        ),
    }

    info!(
        component = "server",
        event = "server.stopped",
        "Chat relay stopped"
    );
    Ok(())
}

/// Cancel `shutdown` on SIGINT or SIGTERM.
async fn cancel_on_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(
                component = "server",
                event = "server.signal.ctrl_c_failed",
                error = %e,
                "Failed to listen for Ctrl+C"
            );
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(
                    component = "server",
                    event = "server.signal.sigterm_failed",
                    error = %e,
                    "Failed to listen for SIGTERM"
                );
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!(
        component = "server",
        event = "server.shutdown.requested",
        "Shutdown signal received, draining chats"
    );
    shutdown.cancel();
}
