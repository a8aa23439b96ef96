mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    // Try default locations
    let default_paths = [
        "./recast.toml",
        "./config.toml",
        "~/.config/recast/config.toml",
        "/etc/recast/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    // Return default config if no file found
    Ok(Config::default())
}

/// Validate configuration
fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    if config.jobs.max_workers == 0 {
        anyhow::bail!("jobs.max_workers must be at least 1");
    }

    if config.jobs.max_queue_depth == 0 {
        anyhow::bail!("jobs.max_queue_depth must be at least 1");
    }

    if config.jobs.max_input_bytes == 0 {
        anyhow::bail!("jobs.max_input_bytes must be non-zero");
    }

    if config.jobs.max_input_bytes > config.storage.max_staging_bytes {
        anyhow::bail!(
            "jobs.max_input_bytes ({}) exceeds storage.max_staging_bytes ({})",
            config.jobs.max_input_bytes,
            config.storage.max_staging_bytes
        );
    }

    if config.encoder.program.trim().is_empty() {
        anyhow::bail!("encoder.program cannot be empty");
    }

    Ok(())
}
