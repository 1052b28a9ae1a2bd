pub mod ask;
pub mod doctor;
pub mod run;
pub mod status;

use concierge_config::{AppConfig, ConfigError};
use std::path::{Path, PathBuf};

/// The config file a command reads.
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
}

/// Load the file (or defaults), then environment overrides, then validate.
pub fn load_config(explicit: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut config = AppConfig::load_from(&config_path(explicit))?;
    config.apply_env_overrides(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}
