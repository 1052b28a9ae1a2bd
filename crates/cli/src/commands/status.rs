//! `concierge status`: Show the effective configuration.

use concierge_config::DirectoryBackend;
use std::path::Path;

pub async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let path = super::config_path(config_path);
    let config = super::load_config(config_path).map_err(|e| format!("Failed to load config: {e}"))?;

    let backend = match config.directory.backend {
        DirectoryBackend::Notion => "notion",
        DirectoryBackend::Static => "static",
    };

    println!("Concierge Status");
    println!("================");
    println!("  Config file:    {}", path.display());
    println!("  Model:          {} via {}", config.model, config.api_url);
    println!("  Max tokens:     {}", config.max_tokens);
    println!("  Temperature:    {}", config.temperature);
    println!("  Directory:      {backend} (cache {}s, {:?} on failure)", config.directory.cache_ttl_secs, config.directory.on_lookup_failure);
    println!("  History window: {} turns", config.conversation.history_window);
    println!("  Input budget:   {} tokens", config.conversation.input_token_budget);
    println!("  Min interval:   {}ms", config.conversation.min_interval_ms);
    println!(
        "  Retries:        {} attempts, {}s timeout",
        config.completion.max_attempts, config.completion.request_timeout_secs
    );
    println!("  Health server:  {}:{}", config.health.host, config.health.port);
    println!(
        "  Persona:        {}",
        config
            .persona_file()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<built-in>".into())
    );

    let missing = config.missing_credentials();
    if missing.is_empty() {
        println!("\n  ✅ All credentials present");
    } else {
        println!("\n  ⚠️  Missing: {}", missing.join(", "));
    }

    Ok(())
}
