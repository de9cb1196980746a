//! TOML configuration loading for the command-line tools.
//!
//! The library crates read JSON through [`Config::from_json`]; operators
//! write TOML, which is parsed into the same [`Config`] here.

pub use bl_core::config::{BufferConfig, CodecSwitchingStrategy, Config, SimulationConfig};

use anyhow::{Context, Result};
use std::path::Path;

/// Locations searched when no config path is given.
const DEFAULT_PATHS: [&str; 3] = [
    "./bufferline.toml",
    "~/.config/bufferline/config.toml",
    "/etc/bufferline/config.toml",
];

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;
    parse_config(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
}

/// Parse a TOML document and log any validation warnings.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content)?;
    validate_config(&config)?;
    for warning in config.validate() {
        tracing::warn!("{warning}");
    }
    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    for path_str in DEFAULT_PATHS {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            tracing::debug!("Using config file {:?}", path);
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Reject settings the orchestrator cannot run with.
fn validate_config(config: &Config) -> Result<()> {
    let buffer = &config.buffer;
    if !buffer.offset_tolerance_secs.is_finite() {
        anyhow::bail!("buffer.offset_tolerance_secs must be finite");
    }
    if buffer.small_gap_limit_secs.is_nan() || buffer.small_gap_limit_secs < 0.0 {
        anyhow::bail!("buffer.small_gap_limit_secs cannot be negative");
    }
    if config.simulation.segment_duration_ms == 0 {
        anyhow::bail!("simulation.segment_duration_ms cannot be 0");
    }
    Ok(())
}
