//! `concierge ask`: One message through the full pipeline.

use crate::runtime::Runtime;
use concierge_agent::PipelineState;
use concierge_channels::CliChannel;
use std::path::Path;
use std::sync::Arc;

pub async fn run(config_path: Option<&Path>, message: &str, user: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path).map_err(|e| format!("Failed to load config: {e}"))?;

    let channel = CliChannel::as_user(user);
    let runtime = Runtime::build(&config, Arc::new(channel.clone()))?;

    // The channel prints the reply.
    let outcome = runtime.pipeline.handle(channel.message(message)).await;
    tracing::debug!(state = %outcome.state, correlation_id = %outcome.correlation_id, "Ask finished");

    match outcome.state {
        PipelineState::Ignored => Err("Nothing to send: the message is empty".into()),
        _ => Ok(()),
    }
}
