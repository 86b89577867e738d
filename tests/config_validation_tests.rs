//! Config Validation Tests
//!
//! Typo detection, validation rules, and the global hot-reload path as seen
//! by the engine through `LivePolicy`.

use std::io::Write;

use smart_abl::config::validation::{validate_policy_ranges, validate_unknown_keys};
use smart_abl::config::{self, AblConfig, ConfigError, LivePolicy, Policy, PolicyKey};

// ============================================================================
// Typo Detection
// ============================================================================

#[test]
fn test_typo_in_threshold_warns_with_suggestion() {
    let toml_str = r#"
[thresholds]
prnts = 8
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert_eq!(warnings.len(), 1, "Expected exactly 1 warning");
    assert!(warnings[0].field.contains("prnts"));
    assert_eq!(warnings[0].suggestion.as_deref(), Some("thresholds.prints"));
}

#[test]
fn test_full_config_produces_zero_warnings() {
    let toml_str = r#"
[trigger]
custom = true
gcode = "G29, M420"

[probe]
custom = true
gcode = "G28, G29"

[ignore]
enabled = true
gcode = "M84"

[thresholds]
force_days = true
days = 3
force_prints = true
prints = 10
count_failed = true

[temperature]
bed = true
hotend = false

[engine]
query_timeout_secs = 10
detection_window_lines = 50

[printer]
addr = "192.168.1.50:8888"
state_dir = "/var/lib/smart-abl"
"#;
    assert!(validate_unknown_keys(toml_str).is_empty());

    let cfg = AblConfig::from_toml_str(toml_str).unwrap();
    assert_eq!(cfg.thresholds.prints, 10);
    assert_eq!(cfg.query_timeout().as_secs(), 10);
    assert!(validate_policy_ranges(&cfg).is_empty());
}

#[test]
fn test_unknown_section_warns_but_loads() {
    let toml_str = r#"
[leveling]
mode = "smart"
"#;
    assert!(validate_unknown_keys(toml_str)
        .iter()
        .any(|w| w.field == "leveling"));
    assert_eq!(AblConfig::from_toml_str(toml_str).unwrap(), AblConfig::default());
}

// ============================================================================
// Validation Rules
// ============================================================================

#[test]
fn test_oversized_timeout_is_rejected() {
    let err = AblConfig::from_toml_str("[engine]\nquery_timeout_secs = 600\n").unwrap_err();
    match err {
        ConfigError::Validation(errors) => {
            assert!(errors.iter().any(|e| e.contains("query_timeout_secs")));
        }
        other => panic!("expected validation error, got {other}"),
    }
}

#[test]
fn test_custom_toggle_without_commands_is_rejected() {
    let toml_str = r#"
[ignore]
enabled = true
gcode = " , "
"#;
    assert!(matches!(
        AblConfig::from_toml_str(toml_str),
        Err(ConfigError::Validation(_))
    ));
}

#[test]
fn test_zero_day_threshold_only_warns() {
    let cfg = AblConfig::from_toml_str("[thresholds]\ndays = 0\n").unwrap();
    let warnings = validate_policy_ranges(&cfg);
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].field, "thresholds.days");
}

#[test]
fn test_malformed_file_reports_path() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[thresholds\nprints = 3").unwrap();

    let err = AblConfig::load_from_file(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse(ref path, _) if path == file.path()));
}

// ============================================================================
// Hot Reload
// ============================================================================

/// Owns the process-wide config for this test binary.
#[test]
fn test_reload_is_visible_through_live_policy() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[thresholds]\nprints = 5").unwrap();

    let initial = AblConfig::load_from_file(file.path()).unwrap();
    config::init(initial, Some(file.path().to_path_buf()));
    assert!(config::is_initialized());

    let live = LivePolicy;
    assert_eq!(Policy::new(&live).print_threshold(), 5);

    // An invalid edit keeps the previous config.
    std::fs::write(file.path(), "[engine]\nquery_timeout_secs = 0\n").unwrap();
    assert!(config::reload().is_err());
    assert_eq!(config::get().engine.query_timeout_secs, 5);

    std::fs::write(file.path(), "[thresholds]\nprints = 9\n\n[temperature]\nbed = true\n").unwrap();
    let changes = config::reload().unwrap();
    assert_eq!(changes.len(), 2);
    assert!(changes.iter().any(|c| c.key == "thresholds.prints" && c.new == "9"));

    let policy = Policy::new(&live);
    assert_eq!(policy.print_threshold(), 9);
    assert!(policy.flag(PolicyKey::BedTemp));
}
