//! Policy Store Adapter
//!
//! Read-only key/value view over the leveling policy. The decision engine only
//! ever sees a [`PolicySource`]; where the values come from (TOML file, hot
//! reloaded global, test fixture) is up to the caller.

use std::fmt;

/// Documented policy keys. Names match the settings keys operators already know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyKey {
    /// Use `TriggerGcode` instead of the profile's probe/load commands as triggers.
    TriggerCustom,
    /// Comma-separated trigger command list.
    TriggerGcode,
    /// Use `AblGcode` instead of the profile's probe command when re-leveling.
    AblCustom,
    /// Comma-separated probe command list.
    AblGcode,
    /// Drop commands listed in `IgnoreGcode` from the job.
    CmdIgnore,
    /// Comma-separated ignore list.
    IgnoreGcode,
    /// Re-level once `Days` days have passed since the last mesh.
    ForceDays,
    Days,
    /// Re-level once `Prints` prints have completed since the last mesh.
    ForcePrints,
    Prints,
    /// Count failed prints towards `Prints`.
    Failed,
    /// Re-level when the bed target temperature changes.
    BedTemp,
    /// Re-level when the hotend target temperature changes.
    HeTemp,
}

impl PolicyKey {
    pub const ALL: [PolicyKey; 13] = [
        PolicyKey::TriggerCustom,
        PolicyKey::TriggerGcode,
        PolicyKey::AblCustom,
        PolicyKey::AblGcode,
        PolicyKey::CmdIgnore,
        PolicyKey::IgnoreGcode,
        PolicyKey::ForceDays,
        PolicyKey::Days,
        PolicyKey::ForcePrints,
        PolicyKey::Prints,
        PolicyKey::Failed,
        PolicyKey::BedTemp,
        PolicyKey::HeTemp,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            PolicyKey::TriggerCustom => "trigger_custom",
            PolicyKey::TriggerGcode => "trigger_gcode",
            PolicyKey::AblCustom => "abl_custom",
            PolicyKey::AblGcode => "abl_gcode",
            PolicyKey::CmdIgnore => "cmd_ignore",
            PolicyKey::IgnoreGcode => "ignore_gcode",
            PolicyKey::ForceDays => "force_days",
            PolicyKey::Days => "days",
            PolicyKey::ForcePrints => "force_prints",
            PolicyKey::Prints => "prints",
            PolicyKey::Failed => "failed",
            PolicyKey::BedTemp => "bedtemp",
            PolicyKey::HeTemp => "hetemp",
        }
    }

    /// Value used when the source has no entry for this key.
    pub fn default_value(self) -> PolicyValue {
        match self {
            PolicyKey::TriggerCustom
            | PolicyKey::AblCustom
            | PolicyKey::CmdIgnore
            | PolicyKey::Failed
            | PolicyKey::BedTemp
            | PolicyKey::HeTemp => PolicyValue::Bool(false),
            PolicyKey::ForceDays | PolicyKey::ForcePrints => PolicyValue::Bool(true),
            PolicyKey::TriggerGcode | PolicyKey::AblGcode => PolicyValue::Str("G29".to_string()),
            PolicyKey::IgnoreGcode => PolicyValue::Str(String::new()),
            PolicyKey::Days => PolicyValue::Int(1),
            PolicyKey::Prints => PolicyValue::Int(5),
        }
    }
}

impl fmt::Display for PolicyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

/// Anything that can answer policy lookups.
pub trait PolicySource: Send + Sync {
    fn lookup(&self, key: PolicyKey) -> Option<PolicyValue>;
}

/// Typed accessors over a [`PolicySource`].
///
/// Missing or mistyped entries fall back to [`PolicyKey::default_value`].
pub struct Policy<'a> {
    source: &'a dyn PolicySource,
}

impl<'a> Policy<'a> {
    pub fn new(source: &'a dyn PolicySource) -> Self {
        Self { source }
    }

    fn value(&self, key: PolicyKey) -> PolicyValue {
        self.source
            .lookup(key)
            .unwrap_or_else(|| key.default_value())
    }

    pub fn flag(&self, key: PolicyKey) -> bool {
        match self.value(key) {
            PolicyValue::Bool(b) => b,
            _ => matches!(key.default_value(), PolicyValue::Bool(true)),
        }
    }

    pub fn int(&self, key: PolicyKey) -> i64 {
        match self.value(key) {
            PolicyValue::Int(i) => i,
            _ => match key.default_value() {
                PolicyValue::Int(i) => i,
                _ => 0,
            },
        }
    }

    pub fn text(&self, key: PolicyKey) -> String {
        match self.value(key) {
            PolicyValue::Str(s) => s,
            _ => match key.default_value() {
                PolicyValue::Str(s) => s,
                _ => String::new(),
            },
        }
    }

    /// Comma-separated command list, trimmed, empty entries dropped.
    pub fn command_list(&self, key: PolicyKey) -> Vec<String> {
        split_command_list(&self.text(key))
    }

    pub fn print_threshold(&self) -> i64 {
        self.int(PolicyKey::Prints)
    }
}

impl fmt::Display for Policy<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Settings(")?;
        for (i, key) in PolicyKey::ALL.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match self.value(*key) {
                PolicyValue::Bool(b) => write!(f, "{key}={b}")?,
                PolicyValue::Int(n) => write!(f, "{key}={n}")?,
                PolicyValue::Str(s) => write!(f, "{key}={s}")?,
            }
        }
        write!(f, ")")
    }
}

pub fn split_command_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
