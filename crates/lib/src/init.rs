//! Initialize the configuration directory: create ~/.murmur, default config and bundled personalities.
//!
//! Layout mirrors `crates/lib/config/`: `config/config.json` → `~/.murmur/config.json`,
//! `config/personalities/` → `~/.murmur/personalities/`.

use anyhow::{Context, Result};
use include_dir::{include_dir, Dir};
use std::path::{Path, PathBuf};

use crate::config;

static BUNDLED_PERSONALITIES: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/config/personalities");
static DEFAULT_CONFIG: &str = include_str!("../config/config.json");

/// Create the config directory and default files if they do not exist.
/// - Creates the config directory (parent of config file path).
/// - Writes the default `config.json` if missing.
/// - Extracts bundled personality prompts into `personalities` if that directory does not exist.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config::config_dir(config_path);
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        std::fs::write(config_path, DEFAULT_CONFIG)
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    }

    let personalities_dir = config_dir.join("personalities");
    if !personalities_dir.exists() {
        std::fs::create_dir_all(&personalities_dir).with_context(|| {
            format!("creating personalities directory {}", personalities_dir.display())
        })?;
        if let Err(e) = BUNDLED_PERSONALITIES.extract(&personalities_dir) {
            anyhow::bail!(
                "extracting bundled personalities to {}: {}",
                personalities_dir.display(),
                e
            );
        }
        log::info!("extracted bundled personalities to {}", personalities_dir.display());
    } else {
        log::debug!(
            "personalities directory already exists at {}, skipping",
            personalities_dir.display()
        );
    }

    Ok(config_dir.to_path_buf())
}
