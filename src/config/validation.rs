//! Config validation: unknown-key detection with Levenshtein suggestions
//! and policy range checks.
//!
//! Two-pass parse approach: first deserialize raw TOML into `toml::Value`,
//! walk the key tree, compare against known field names, and emit warnings
//! with "did you mean?" suggestions. Then proceed with normal serde
//! deserialization. Warnings never break existing configs.

use std::collections::HashSet;

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, ", did you mean '{s}'?")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Returns the complete set of valid dotted key paths for `AblConfig`.
///
/// Maintained by hand to match the struct hierarchy in abl_config.rs.
/// Any new field added to `AblConfig` must be added here too.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        // [trigger]
        "trigger",
        "trigger.custom",
        "trigger.gcode",
        // [probe]
        "probe",
        "probe.custom",
        "probe.gcode",
        // [ignore]
        "ignore",
        "ignore.enabled",
        "ignore.gcode",
        // [thresholds]
        "thresholds",
        "thresholds.force_days",
        "thresholds.days",
        "thresholds.force_prints",
        "thresholds.prints",
        "thresholds.count_failed",
        // [temperature]
        "temperature",
        "temperature.bed",
        "temperature.hotend",
        // [engine]
        "engine",
        "engine.query_timeout_secs",
        "engine.detection_window_lines",
        // [printer]
        "printer",
        "printer.addr",
        "printer.state_dir",
    ];
    keys.iter().copied().collect()
}

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Recursively walks a `toml::Value` tree and collects all dotted key paths.
///
/// For example, a table `{ a = { b = 1, c = 2 } }` yields:
/// `["a", "a.b", "a.c"]`
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let toml::Value::Table(table) = value {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            if v.is_table() {
                keys.extend(walk_toml_keys(v, &path));
            }
        }
    }
    keys
}

/// Flatten a TOML tree into `(dotted key, rendered leaf value)` pairs.
pub fn flatten_toml_leaves(value: &toml::Value, prefix: &str) -> Vec<(String, String)> {
    let mut leaves = Vec::new();
    if let toml::Value::Table(table) = value {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            if v.is_table() {
                leaves.extend(flatten_toml_leaves(v, &path));
            } else {
                leaves.push((path, v.to_string()));
            }
        }
    }
    leaves
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Suggest the closest known key for an unknown key, if within edit distance 3.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    known
        .iter()
        .map(|k| (*k, levenshtein(unknown, k)))
        .filter(|(_, dist)| *dist <= 3)
        .min_by(|(ka, da), (kb, db)| da.cmp(db).then_with(|| ka.cmp(kb)))
        .map(|(k, _)| k.to_string())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Parse a raw TOML string and return warnings for any unknown config keys.
///
/// This does NOT fail on unknown keys, it only warns.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let value: toml::Value = match raw_toml.parse() {
        Ok(v) => v,
        Err(_) => return Vec::new(), // parse errors are handled by serde later
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key.as_str()))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, &known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}

// ============================================================================
// Policy Range Validation
// ============================================================================

/// Flag policy values that are legal but probably not what the operator meant.
pub fn validate_policy_ranges(config: &super::AblConfig) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();
    let t = &config.thresholds;

    if t.force_prints && t.prints == 0 {
        warnings.push(ValidationWarning {
            field: "thresholds.prints".to_string(),
            message: "thresholds.prints = 0 re-levels before every print".to_string(),
            suggestion: None,
        });
    }
    if t.force_days && t.days == 0 {
        warnings.push(ValidationWarning {
            field: "thresholds.days".to_string(),
            message: "thresholds.days = 0 re-levels before every print".to_string(),
            suggestion: None,
        });
    }
    if config.trigger.custom && config.ignore.enabled {
        let triggers = super::policy::split_command_list(&config.trigger.gcode);
        let ignored = super::policy::split_command_list(&config.ignore.gcode);
        for cmd in triggers.iter().filter(|c| ignored.contains(c)) {
            warnings.push(ValidationWarning {
                field: "ignore.gcode".to_string(),
                message: format!("'{cmd}' is both a trigger and ignored; it will be dropped"),
                suggestion: None,
            });
        }
    }

    warnings
}

// ============================================================================
// Tests
// ============================================================================
