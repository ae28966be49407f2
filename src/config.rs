// src/config.rs

//! Configuration loading utilities.

use std::path::Path;

use crate::error::Result;
use crate::models::Config;

/// Load and validate configuration from a TOML file.
///
/// A missing file falls back to defaults with a warning; a file that exists
/// but fails to parse or validate is an error, since running with silently
/// wrong settings is worse than not running.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        log::warn!(
            "Config file not found at {}. Using default configuration.",
            path.display()
        );
        return Ok(Config::default());
    }

    let config = Config::load(path)?;
    config.validate()?;
    Ok(config)
}
