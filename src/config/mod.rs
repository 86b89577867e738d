//! Leveling Configuration Module
//!
//! Provides the leveling policy loaded from TOML, replacing the settings
//! store of a print server with an operator-editable file.
//!
//! ## Loading Order
//!
//! 1. `SMARTABL_CONFIG` environment variable (path to TOML file)
//! 2. `smart_abl.toml` in the current working directory
//! 3. Built-in defaults
//!
//! ## Usage
//!
//! Call `config::init()` once at startup, then `config::get()` anywhere:
//!
//! ```ignore
//! let (cfg, path) = AblConfig::load();
//! config::init(cfg, path);
//!
//! let timeout = config::get().query_timeout();
//! ```
//!
//! The engine reads policy through [`LivePolicy`], so a `reload()` (from the
//! file watcher) takes effect on the next decision without a restart.

mod abl_config;
pub mod defaults;
pub mod policy;
pub mod validation;
pub mod watcher;

pub use abl_config::*;
pub use policy::{Policy, PolicyKey, PolicySource, PolicyValue};

use arc_swap::ArcSwap;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

/// Global leveling configuration, swappable for hot reload.
static ABL_CONFIG: OnceLock<ArcSwap<AblConfig>> = OnceLock::new();

/// File the global configuration was loaded from, if any.
static CONFIG_SOURCE: OnceLock<Option<PathBuf>> = OnceLock::new();

/// Initialize the global configuration.
///
/// Must be called once before any calls to `get()`. Later calls are ignored.
pub fn init(config: AblConfig, source: Option<PathBuf>) {
    if ABL_CONFIG.set(ArcSwap::from_pointee(config)).is_err() {
        tracing::warn!("config::init() called more than once, ignoring");
        return;
    }
    let _ = CONFIG_SOURCE.set(source);
}

/// Get a snapshot of the global configuration.
///
/// Panics if `init()` has not been called. A missing config is a startup bug,
/// not a recoverable condition.
pub fn get() -> Arc<AblConfig> {
    ABL_CONFIG
        .get()
        .expect("config::get() called before config::init(), this is a startup bug")
        .load_full()
}

/// Check whether the config has been initialized.
pub fn is_initialized() -> bool {
    ABL_CONFIG.get().is_some()
}

/// Path the active config was read from.
pub fn source_path() -> Option<PathBuf> {
    CONFIG_SOURCE.get().cloned().flatten()
}

/// One key whose value differs after a reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigChange {
    pub key: String,
    pub old: String,
    pub new: String,
}

impl std::fmt::Display for ConfigChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} -> {}", self.key, self.old, self.new)
    }
}

/// Re-read the config file and swap it in if it validates.
///
/// On error the previous config stays active.
pub fn reload() -> Result<Vec<ConfigChange>, ConfigError> {
    let Some(path) = source_path() else {
        return Ok(Vec::new());
    };
    let Some(slot) = ABL_CONFIG.get() else {
        return Ok(Vec::new());
    };

    let fresh = AblConfig::load_from_file(&path)?;
    let changes = diff(&slot.load(), &fresh)?;
    slot.store(Arc::new(fresh));

    for change in &changes {
        tracing::info!(%change, "Config value changed");
    }
    Ok(changes)
}

/// Leaf-level differences between two configs.
pub fn diff(old: &AblConfig, new: &AblConfig) -> Result<Vec<ConfigChange>, ConfigError> {
    let flatten = |cfg: &AblConfig| -> Result<BTreeMap<String, String>, ConfigError> {
        let value = toml::Value::try_from(cfg).map_err(ConfigError::Serialize)?;
        Ok(validation::flatten_toml_leaves(&value, "").into_iter().collect())
    };
    let old = flatten(old)?;
    let new = flatten(new)?;

    Ok(new
        .iter()
        .filter_map(|(key, value)| {
            let before = old.get(key).cloned().unwrap_or_default();
            (before != *value).then(|| ConfigChange {
                key: key.clone(),
                old: before,
                new: value.clone(),
            })
        })
        .collect())
}

/// Policy source backed by the hot-reloadable global config.
#[derive(Debug, Clone, Copy, Default)]
pub struct LivePolicy;

impl PolicySource for LivePolicy {
    fn lookup(&self, key: PolicyKey) -> Option<PolicyValue> {
        ABL_CONFIG.get().and_then(|slot| slot.load().lookup(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diff_reports_changed_leaves() {
        let old = AblConfig::default();
        let mut new = AblConfig::default();
        new.thresholds.prints = 8;
        new.temperature.bed = true;

        let changes = diff(&old, &new).unwrap();
        assert_eq!(changes.len(), 2);
        assert!(changes
            .iter()
            .any(|c| c.key == "thresholds.prints" && c.old == "5" && c.new == "8"));
        assert!(changes.iter().any(|c| c.key == "temperature.bed"));
    }

    #[test]
    fn test_diff_identical_is_empty() {
        let cfg = AblConfig::default();
        assert!(diff(&cfg, &cfg).unwrap().is_empty());
    }
}
