//! `concierge run`: Start the bot.

use crate::runtime::Runtime;
use concierge_agent::Dispatcher;
use concierge_channels::{CliChannel, TelegramChannel};
use concierge_core::channel::Channel;
use concierge_gateway::HealthState;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

pub async fn run(config_path: Option<&Path>, use_cli: bool, port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = super::load_config(config_path).map_err(|e| format!("Failed to load config: {e}"))?;
    if let Some(port) = port {
        config.health.port = port;
    }

    let missing: Vec<_> = config
        .missing_credentials()
        .into_iter()
        .filter(|name| !(use_cli && *name == "TELEGRAM_BOT_TOKEN"))
        .collect();
    if !missing.is_empty() {
        return Err(format!("Missing credentials: {}", missing.join(", ")).into());
    }

    let channel: Arc<dyn Channel> = if use_cli {
        Arc::new(CliChannel::new())
    } else {
        Arc::new(TelegramChannel::from_config(&config.telegram)?)
    };
    let runtime = Runtime::build(&config, Arc::clone(&channel))?;

    // Health server and background housekeeping
    let health = Arc::new(HealthState::new());
    let counter = concierge_gateway::spawn_event_counter(Arc::clone(&health), &runtime.events);
    let evictor = Arc::clone(&runtime.store).spawn_evictor(
        config.conversation.eviction_interval(),
        config.conversation.idle_timeout(),
    );
    let purger = {
        let directory = Arc::clone(&runtime.directory);
        let interval = config.directory.cache_ttl().max(std::time::Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let purged = directory.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, "Purged expired directory records");
                }
            }
        })
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = {
        let health = Arc::clone(&health);
        let health_config = config.health.clone();
        tokio::spawn(async move {
            let shutdown = async {
                let _ = shutdown_rx.await;
            };
            if let Err(e) = concierge_gateway::serve(&health_config, health, shutdown).await {
                error!(error = %e, "Health server failed");
            }
        })
    };

    let dispatcher = Dispatcher::new(Arc::clone(&runtime.pipeline));
    let mut inbound = channel.start().await?;
    health.set_ready(true);

    info!(
        channel = channel.name(),
        model = %config.model,
        directory = runtime.directory.backend(),
        health_port = config.health.port,
        "Concierge running"
    );
    if use_cli {
        println!("Concierge v{} — type a message, or 'exit' to quit.", env!("CARGO_PKG_VERSION"));
    }

    loop {
        tokio::select! {
            message = inbound.recv() => match message {
                Some(Ok(message)) => dispatcher.dispatch(message),
                Some(Err(e)) => warn!(error = %e, "Channel error"),
                None => {
                    info!("Channel closed");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    health.set_ready(false);
    if let Err(e) = channel.stop().await {
        warn!(error = %e, "Channel did not stop cleanly");
    }
    evictor.abort();
    purger.abort();
    counter.abort();
    let _ = shutdown_tx.send(());
    let _ = server.await;
    info!("Concierge stopped");

    Ok(())
}
