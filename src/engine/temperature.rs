//! Temperature Watcher
//!
//! Looks at heater-target commands from the job as they go out. The first
//! command per heater class per print cycle is compared with the last
//! persisted target; a change forces a re-probe when that heater's
//! sensitivity is enabled. The persisted target is updated either way.

use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, info, warn};

use super::commands::gcode_word;
use super::session::SessionState;
use crate::config::policy::{Policy, PolicyKey};
use crate::storage::PersistedCounters;

/// Heater classes the watcher tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaterClass {
    Hotend,
    Bed,
}

impl HeaterClass {
    /// Wait-for-temperature command setting this heater's target.
    pub const fn word(self) -> &'static str {
        match self {
            HeaterClass::Hotend => "M109",
            HeaterClass::Bed => "M190",
        }
    }

    pub const fn policy_key(self) -> PolicyKey {
        match self {
            HeaterClass::Hotend => PolicyKey::HeTemp,
            HeaterClass::Bed => PolicyKey::BedTemp,
        }
    }

    pub fn from_command(command: &str) -> Option<Self> {
        let word = gcode_word(command);
        [HeaterClass::Hotend, HeaterClass::Bed]
            .into_iter()
            .find(|class| word.eq_ignore_ascii_case(class.word()))
    }

    fn last_target(self, counters: &PersistedCounters) -> i32 {
        match self {
            HeaterClass::Hotend => counters.last_hotend_temp,
            HeaterClass::Bed => counters.last_bed_temp,
        }
    }

    fn set_last_target(self, counters: &mut PersistedCounters, target: i32) {
        match self {
            HeaterClass::Hotend => counters.last_hotend_temp = target,
            HeaterClass::Bed => counters.last_bed_temp = target,
        }
    }
}

fn target_regex() -> &'static Regex {
    static TARGET: OnceLock<Regex> = OnceLock::new();
    TARGET.get_or_init(|| Regex::new(r"(?i)[SR](\d+(?:\.\d+)?)").expect("valid target regex"))
}

/// Target temperature from the `S` (or `R`) parameter, rounded to whole degrees.
pub fn parse_target(command: &str) -> Option<i32> {
    let word = gcode_word(command);
    let params = command.trim_start().get(word.len()..)?;
    let caps = target_regex().captures(params)?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    Some(value.round() as i32)
}

/// What one outgoing command did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemperatureObservation {
    /// Not a tracked heater command.
    NotTracked,
    /// Class already evaluated this cycle.
    Duplicate,
    /// No readable target in the command.
    ParseFailed,
    /// Target recorded; counters need persisting.
    Recorded {
        class: HeaterClass,
        target: i32,
        forced: bool,
    },
}

/// Evaluate one outgoing command.
pub fn observe(
    session: &mut SessionState,
    counters: &mut PersistedCounters,
    policy: &Policy<'_>,
    command: &str,
) -> TemperatureObservation {
    let Some(class) = HeaterClass::from_command(command) else {
        return TemperatureObservation::NotTracked;
    };

    if session.sent_this_cycle.contains(class.word()) {
        debug!(command, "Heater target already tracked this cycle");
        return TemperatureObservation::Duplicate;
    }

    let Some(target) = parse_target(command) else {
        warn!(command, "Could not parse heater target, ignoring");
        return TemperatureObservation::ParseFailed;
    };
    session.sent_this_cycle.insert(class.word().to_string());

    let previous = class.last_target(counters);
    let forced = policy.flag(class.policy_key()) && target != previous;
    if forced {
        info!(heater = class.word(), previous, target, "Heater target changed, re-probe forced");
        session.force_reprobe = true;
    }
    class.set_last_target(counters, target);

    TemperatureObservation::Recorded { class, target, forced }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::policy::{PolicySource, PolicyValue};
    use chrono::NaiveDate;

    struct Sensitive(bool);

    impl PolicySource for Sensitive {
        fn lookup(&self, key: PolicyKey) -> Option<PolicyValue> {
            matches!(key, PolicyKey::HeTemp | PolicyKey::BedTemp).then_some(PolicyValue::Bool(self.0))
        }
    }

    fn counters() -> PersistedCounters {
        PersistedCounters::fresh(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
    }

    #[test]
    fn test_parse_target() {
        assert_eq!(parse_target("M109 S210"), Some(210));
        assert_eq!(parse_target("M190 R60"), Some(60));
        assert_eq!(parse_target("M109 T0 S215.6"), Some(216));
        assert_eq!(parse_target("M109"), None);
    }

    #[test]
    fn test_heater_class() {
        assert_eq!(HeaterClass::from_command("M109 S200"), Some(HeaterClass::Hotend));
        assert_eq!(HeaterClass::from_command("m190 S60"), Some(HeaterClass::Bed));
        assert_eq!(HeaterClass::from_command("M104 S200"), None);
    }

    #[test]
    fn test_change_forces_reprobe_when_sensitive() {
        let src = Sensitive(true);
        let policy = Policy::new(&src);
        let mut session = SessionState::new(10);
        let mut c = counters();
        c.last_hotend_temp = 200;

        let obs = observe(&mut session, &mut c, &policy, "M109 S210");
        assert_eq!(
            obs,
            TemperatureObservation::Recorded { class: HeaterClass::Hotend, target: 210, forced: true }
        );
        assert!(session.force_reprobe);
        assert_eq!(c.last_hotend_temp, 210);
    }

    #[test]
    fn test_insensitive_still_records_target() {
        let src = Sensitive(false);
        let policy = Policy::new(&src);
        let mut session = SessionState::new(10);
        let mut c = counters();

        observe(&mut session, &mut c, &policy, "M190 S65");
        assert!(!session.force_reprobe);
        assert_eq!(c.last_bed_temp, 65);
    }

    #[test]
    fn test_second_command_of_class_is_deduplicated() {
        let src = Sensitive(true);
        let policy = Policy::new(&src);
        let mut session = SessionState::new(10);
        let mut c = counters();

        observe(&mut session, &mut c, &policy, "M190 S60");
        let second = observe(&mut session, &mut c, &policy, "M190 S70");
        assert_eq!(second, TemperatureObservation::Duplicate);
        assert_eq!(c.last_bed_temp, 60);

        session.reset_cycle();
        observe(&mut session, &mut c, &policy, "M190 S70");
        assert_eq!(c.last_bed_temp, 70);
    }

    #[test]
    fn test_parse_failure_changes_nothing() {
        let src = Sensitive(true);
        let policy = Policy::new(&src);
        let mut session = SessionState::new(10);
        let mut c = counters();
        c.last_hotend_temp = 200;

        assert_eq!(
            observe(&mut session, &mut c, &policy, "M109 T1"),
            TemperatureObservation::ParseFailed
        );
        assert!(!session.force_reprobe);
        assert_eq!(c.last_hotend_temp, 200);

        // The malformed command leaves the heater untracked for this cycle.
        assert_eq!(
            observe(&mut session, &mut c, &policy, "M109 S210"),
            TemperatureObservation::Recorded {
                class: HeaterClass::Hotend,
                target: 210,
                forced: true,
            }
        );
        assert!(session.force_reprobe);
        assert_eq!(c.last_hotend_temp, 210);
    }
}
