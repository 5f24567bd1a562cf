use std::{
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::RelayConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "meshrelay.toml",
    "meshrelay.yaml",
    "meshrelay.yml",
    "meshrelay.json",
];

/// Override for the config directory, set via `set_config_dir()`.
static CONFIG_DIR_OVERRIDE: Mutex<Option<PathBuf>> = Mutex::new(None);

/// Restrict discovery to `path`. Project-local and user-global locations are
/// skipped while an override is set.
pub fn set_config_dir(path: PathBuf) {
    *CONFIG_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = Some(path);
}

/// Clear the config directory override, restoring default discovery.
pub fn clear_config_dir() {
    *CONFIG_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = None;
}

fn config_dir_override() -> Option<PathBuf> {
    CONFIG_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Load and validate config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<RelayConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    let config = parse_config(&raw, path)?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid config {}: {e}", path.display()))?;
    Ok(config)
}

/// Resolve the effective config.
///
/// An explicit path must load successfully. Otherwise the search order is:
/// 1. `./meshrelay.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/meshrelay/meshrelay.{toml,yaml,yml,json}` (user-global)
///
/// A discovered file that fails to parse is logged and replaced by
/// `RelayConfig::default()`.
pub fn discover_and_load(explicit: Option<&Path>) -> anyhow::Result<RelayConfig> {
    if let Some(path) = explicit {
        debug!(path = %path.display(), "loading config");
        return load_config(path);
    }

    let Some(path) = find_config_file() else {
        debug!("no config file found, using defaults");
        return Ok(RelayConfig::default());
    };

    debug!(path = %path.display(), "loading config");
    match load_config(&path) {
        Ok(cfg) => Ok(cfg),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            Ok(RelayConfig::default())
        },
    }
}

/// Path of the config file discovery would load, if any.
pub fn find_config_file() -> Option<PathBuf> {
    if let Some(dir) = config_dir_override() {
        return first_existing(&dir);
    }

    first_existing(Path::new(".")).or_else(|| config_dir().and_then(|dir| first_existing(&dir)))
}

fn first_existing(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the config directory: override, or `~/.config/meshrelay/`.
pub fn config_dir() -> Option<PathBuf> {
    if let Some(dir) = config_dir_override() {
        return Some(dir);
    }
    directories::BaseDirs::new().map(|d| d.home_dir().join(".config").join("meshrelay"))
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<RelayConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
