//! Leveling Configuration - operator-tunable policy as TOML
//!
//! Each section implements `Default` with the values a fresh install ships
//! with, so a missing file or a partial file behaves exactly like the stock
//! settings.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::defaults;
use super::policy::{split_command_list, PolicyKey, PolicySource, PolicyValue};

/// Environment variable pointing at an explicit config file.
pub const CONFIG_ENV_VAR: &str = "SMARTABL_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "smart_abl.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration.
///
/// Load with `AblConfig::load()` which searches:
/// 1. `$SMARTABL_CONFIG` env var
/// 2. `./smart_abl.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AblConfig {
    /// Which job commands are intercepted
    #[serde(default)]
    pub trigger: TriggerConfig,

    /// Which commands run when a re-level is decided
    #[serde(default)]
    pub probe: ProbeConfig,

    /// Commands stripped from the job
    #[serde(default)]
    pub ignore: IgnoreConfig,

    /// Day / print-count re-level thresholds
    #[serde(default)]
    pub thresholds: ThresholdConfig,

    /// Temperature sensitivity
    #[serde(default)]
    pub temperature: TemperatureConfig,

    /// Decision engine timing
    #[serde(default)]
    pub engine: EngineConfig,

    /// Printer connection and state directory
    #[serde(default)]
    pub printer: PrinterConfig,
}

impl AblConfig {
    /// Load configuration using the standard search order:
    /// 1. `$SMARTABL_CONFIG` environment variable
    /// 2. `./smart_abl.toml` in the current working directory
    /// 3. Built-in defaults
    ///
    /// Returns the config together with the file it came from, if any.
    pub fn load() -> (Self, Option<PathBuf>) {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded leveling config from {}", CONFIG_ENV_VAR);
                        return (config, Some(p));
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {}, falling back", CONFIG_ENV_VAR);
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", CONFIG_ENV_VAR);
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded leveling config from ./{}", LOCAL_CONFIG_FILE);
                    return (config, Some(local));
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", LOCAL_CONFIG_FILE);
                }
            }
        }

        info!("No {} found, using built-in defaults", LOCAL_CONFIG_FILE);
        (Self::default(), None)
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, inner) => ConfigError::Parse(path.to_path_buf(), inner),
            other => other,
        })
    }

    /// Parse and validate a TOML document.
    ///
    /// Unknown keys are reported as warnings, never as errors.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let config: Self = toml::from_str(contents)
            .map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Save config to a file.
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = self.to_toml()?;
        std::fs::write(path, contents)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        info!(path = %path.display(), "Leveling config saved");
        Ok(())
    }

    /// Validate the policy for internal consistency.
    ///
    /// Rules:
    /// - Custom command lists must be non-empty while their toggle is on
    /// - Query timeout must be between 1 and `MAX_QUERY_TIMEOUT_SECS`
    /// - The detection window must allow at least one line
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        Self::check_list(self.trigger.custom, &self.trigger.gcode, "trigger.gcode", &mut errors);
        Self::check_list(self.probe.custom, &self.probe.gcode, "probe.gcode", &mut errors);
        Self::check_list(self.ignore.enabled, &self.ignore.gcode, "ignore.gcode", &mut errors);

        let timeout = self.engine.query_timeout_secs;
        if timeout == 0 || timeout > defaults::MAX_QUERY_TIMEOUT_SECS {
            errors.push(format!(
                "engine.query_timeout_secs = {timeout} must be between 1 and {}",
                defaults::MAX_QUERY_TIMEOUT_SECS
            ));
        }
        if self.engine.detection_window_lines == 0 {
            errors.push("engine.detection_window_lines must be > 0".to_string());
        }

        for w in super::validation::validate_policy_ranges(self) {
            warn!("{}", w);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    fn check_list(enabled: bool, raw: &str, name: &str, errors: &mut Vec<String>) {
        if enabled && split_command_list(raw).is_empty() {
            errors.push(format!("{name} must list at least one command while enabled"));
        }
    }

    /// Bounded wait applied to every mesh query.
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.engine.query_timeout_secs)
    }
}

impl PolicySource for AblConfig {
    fn lookup(&self, key: PolicyKey) -> Option<PolicyValue> {
        let value = match key {
            PolicyKey::TriggerCustom => PolicyValue::Bool(self.trigger.custom),
            PolicyKey::TriggerGcode => PolicyValue::Str(self.trigger.gcode.clone()),
            PolicyKey::AblCustom => PolicyValue::Bool(self.probe.custom),
            PolicyKey::AblGcode => PolicyValue::Str(self.probe.gcode.clone()),
            PolicyKey::CmdIgnore => PolicyValue::Bool(self.ignore.enabled),
            PolicyKey::IgnoreGcode => PolicyValue::Str(self.ignore.gcode.clone()),
            PolicyKey::ForceDays => PolicyValue::Bool(self.thresholds.force_days),
            PolicyKey::Days => PolicyValue::Int(i64::from(self.thresholds.days)),
            PolicyKey::ForcePrints => PolicyValue::Bool(self.thresholds.force_prints),
            PolicyKey::Prints => PolicyValue::Int(i64::from(self.thresholds.prints)),
            PolicyKey::Failed => PolicyValue::Bool(self.thresholds.count_failed),
            PolicyKey::BedTemp => PolicyValue::Bool(self.temperature.bed),
            PolicyKey::HeTemp => PolicyValue::Bool(self.temperature.hotend),
        };
        Some(value)
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Serialize(toml::ser::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            ConfigError::Serialize(e) => write!(f, "Config serialization error: {}", e),
            ConfigError::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Sections
// ============================================================================

/// Which job commands start a leveling decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Replace the firmware's probe/load commands with `gcode`
    #[serde(default)]
    pub custom: bool,

    /// Comma-separated trigger commands
    #[serde(default = "default_probe_gcode")]
    pub gcode: String,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            custom: false,
            gcode: default_probe_gcode(),
        }
    }
}

/// What runs when a re-level is decided.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Replace the firmware's probe command with `gcode`
    #[serde(default)]
    pub custom: bool,

    /// Comma-separated probe sequence
    #[serde(default = "default_probe_gcode")]
    pub gcode: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            custom: false,
            gcode: default_probe_gcode(),
        }
    }
}

fn default_probe_gcode() -> String {
    "G29".to_string()
}

/// Commands dropped from the job before they reach the printer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IgnoreConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Comma-separated commands (full text or G-code word)
    #[serde(default)]
    pub gcode: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// Re-level when `days` have passed since the last mesh
    #[serde(default = "default_true")]
    pub force_days: bool,

    #[serde(default = "default_days")]
    pub days: u32,

    /// Re-level when `prints` prints completed since the last mesh
    #[serde(default = "default_true")]
    pub force_prints: bool,

    #[serde(default = "default_prints")]
    pub prints: u32,

    /// Count failed prints too
    #[serde(default)]
    pub count_failed: bool,
}

fn default_true() -> bool {
    true
}
fn default_days() -> u32 {
    1
}
fn default_prints() -> u32 {
    5
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            force_days: true,
            days: default_days(),
            force_prints: true,
            prints: default_prints(),
            count_failed: false,
        }
    }
}

/// Re-level when a heater target changes between prints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemperatureConfig {
    #[serde(default)]
    pub bed: bool,

    #[serde(default)]
    pub hotend: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Bounded wait for a mesh query answer (seconds)
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,

    /// Received lines allowed before firmware detection gives up
    #[serde(default = "default_detection_window_lines")]
    pub detection_window_lines: usize,
}

fn default_query_timeout_secs() -> u64 {
    defaults::QUERY_TIMEOUT_SECS
}
fn default_detection_window_lines() -> usize {
    defaults::DETECTION_WINDOW_LINES
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            query_timeout_secs: default_query_timeout_secs(),
            detection_window_lines: default_detection_window_lines(),
        }
    }
}

/// Printer connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrinterConfig {
    /// Serial-over-TCP bridge address.
    ///
    /// Can be overridden by the `--printer` CLI flag.
    #[serde(default = "default_printer_addr")]
    pub addr: String,

    /// Directory holding `state.json` and the process lock
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

fn default_printer_addr() -> String {
    defaults::PRINTER_ADDR.to_string()
}
fn default_state_dir() -> PathBuf {
    PathBuf::from(defaults::STATE_DIR)
}

impl Default for PrinterConfig {
    fn default() -> Self {
        Self {
            addr: default_printer_addr(),
            state_dir: default_state_dir(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::policy::Policy;

    #[test]
    fn test_default_config_validates() {
        let config = AblConfig::default();
        assert!(config.validate().is_ok(), "Default config must always validate");
    }

    #[test]
    fn test_empty_toml_produces_defaults() {
        let config: AblConfig = toml::from_str("").expect("empty TOML should parse");
        assert_eq!(config, AblConfig::default());
        assert!(config.thresholds.force_days);
        assert_eq!(config.thresholds.prints, 5);
        assert_eq!(config.engine.query_timeout_secs, 5);
    }

    #[test]
    fn test_partial_toml_override() {
        let toml_str = r#"
[thresholds]
prints = 10
count_failed = true

[temperature]
bed = true
"#;
        let config = AblConfig::from_toml_str(toml_str).expect("partial TOML should parse");
        assert_eq!(config.thresholds.prints, 10);
        assert!(config.thresholds.count_failed);
        assert!(config.temperature.bed);
        // Non-overridden values retain defaults
        assert_eq!(config.thresholds.days, 1);
        assert!(!config.temperature.hotend);
    }

    #[test]
    fn test_validation_catches_empty_custom_list() {
        let mut config = AblConfig::default();
        config.probe.custom = true;
        config.probe.gcode = " , ".to_string();
        let result = config.validate();
        assert!(result.is_err(), "Empty custom probe list should fail");
        if let Err(ConfigError::Validation(errors)) = result {
            assert!(errors.iter().any(|e| e.contains("probe.gcode")));
        }
    }

    #[test]
    fn test_validation_catches_zero_timeout() {
        let mut config = AblConfig::default();
        config.engine.query_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_catches_zero_detection_window() {
        let mut config = AblConfig::default();
        config.engine.detection_window_lines = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_roundtrip_toml() {
        let mut original = AblConfig::default();
        original.ignore.enabled = true;
        original.ignore.gcode = "M420 S1, G29".to_string();
        let toml_str = original.to_toml().expect("serialization should work");
        let roundtripped: AblConfig = toml::from_str(&toml_str).expect("deserialization should work");
        assert_eq!(original, roundtripped);
    }

    #[test]
    fn test_policy_lookup_maps_sections() {
        let mut config = AblConfig::default();
        config.thresholds.days = 7;
        config.temperature.hotend = true;
        config.trigger.gcode = "G29, M420".to_string();
        let policy = Policy::new(&config);
        assert_eq!(policy.int(PolicyKey::Days), 7);
        assert!(policy.flag(PolicyKey::HeTemp));
        assert!(!policy.flag(PolicyKey::BedTemp));
        assert_eq!(
            policy.command_list(PolicyKey::TriggerGcode),
            vec!["G29".to_string(), "M420".to_string()]
        );
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("smart_abl.toml");
        let mut config = AblConfig::default();
        config.thresholds.prints = 3;
        config.save_to_file(&path).unwrap();
        let loaded = AblConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.thresholds.prints, 3);
    }
}
