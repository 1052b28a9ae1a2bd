//! `concierge doctor`: Diagnose configuration and connectivity.

use concierge_channels::TelegramChannel;
use concierge_core::channel::Channel;
use std::path::Path;
use std::time::Duration;

const CHECK_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("Concierge Doctor — System Diagnostics");
    println!("=====================================\n");

    let mut issues = 0;

    let path = super::config_path(config_path);
    if path.exists() {
        println!("  ✅ Config file found at {}", path.display());
    } else {
        println!("  ⚠️  No config file at {} — using defaults and environment", path.display());
    }

    let config = match super::load_config(config_path) {
        Ok(config) => {
            println!("  ✅ Configuration valid");
            config
        }
        Err(e) => {
            println!("  ❌ Configuration invalid: {e}");
            println!("\n  1 issue found. Fix the configuration and run doctor again.");
            return Ok(());
        }
    };

    for name in config.missing_credentials() {
        println!("  ❌ {name} is not set");
        issues += 1;
    }

    match concierge_providers::build_from_config(&config) {
        Ok(client) => match tokio::time::timeout(CHECK_TIMEOUT, client.health_check()).await {
            Ok(Ok(true)) => println!("  ✅ Model provider reachable ({})", client.provider_name()),
            Ok(Ok(false)) => {
                println!("  ⚠️  Model provider answered with an error ({})", client.provider_name());
                issues += 1;
            }
            Ok(Err(e)) => {
                println!("  ❌ Model provider check failed: {e}");
                issues += 1;
            }
            Err(_) => {
                println!("  ❌ Model provider did not answer within {}s", CHECK_TIMEOUT.as_secs());
                issues += 1;
            }
        },
        Err(e) => println!("  ⏭️  Skipping model provider check: {e}"),
    }

    match concierge_directory::build_from_config(&config.directory) {
        Ok(directory) => match tokio::time::timeout(CHECK_TIMEOUT, directory.health_check()).await {
            Ok(Ok(true)) => println!("  ✅ Directory reachable ({})", directory.name()),
            Ok(Ok(false)) | Ok(Err(_)) | Err(_) => {
                println!("  ❌ Directory unreachable ({})", directory.name());
                issues += 1;
            }
        },
        Err(e) => println!("  ⏭️  Skipping directory check: {e}"),
    }

    match TelegramChannel::from_config(&config.telegram) {
        Ok(telegram) => match tokio::time::timeout(CHECK_TIMEOUT, telegram.health_check()).await {
            Ok(Ok(true)) => println!("  ✅ Telegram bot token accepted"),
            _ => {
                println!("  ❌ Telegram getMe failed — check TELEGRAM_BOT_TOKEN");
                issues += 1;
            }
        },
        Err(e) => println!("  ⏭️  Skipping Telegram check: {e}"),
    }

    // Summary
    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
