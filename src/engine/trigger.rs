//! Re-level predicate.
//!
//! One ordered list of sub-conditions; the decision re-probes if any fires.
//! Keeping the reasons (rather than a bare bool) lets the decision log say
//! why a probe happened.

use std::fmt;

/// Inputs to the predicate, captured at decision time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerInputs {
    pub always_relevel: bool,
    pub probe_required: bool,
    pub force_reprobe: bool,
    pub first_time: bool,
    pub mesh_valid: bool,
    pub force_days: bool,
    pub days_since_mesh: i64,
    pub day_threshold: i64,
    pub force_prints: bool,
    pub prints_since_mesh: u32,
    pub print_threshold: i64,
}

/// One sub-condition that fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
    AlwaysRelevel,
    ProbeRequired,
    TemperatureChanged,
    FirstRun,
    MeshNotValid,
    MeshAge { days: i64, threshold: i64 },
    PrintCount { prints: u32, threshold: i64 },
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerReason::AlwaysRelevel => f.write_str("always_relevel"),
            TriggerReason::ProbeRequired => f.write_str("probe_required"),
            TriggerReason::TemperatureChanged => f.write_str("temperature_changed"),
            TriggerReason::FirstRun => f.write_str("first_run"),
            TriggerReason::MeshNotValid => f.write_str("mesh_not_valid"),
            TriggerReason::MeshAge { days, threshold } => write!(f, "mesh_age({days}>={threshold})"),
            TriggerReason::PrintCount { prints, threshold } => {
                write!(f, "print_count({prints}>={threshold})")
            }
        }
    }
}

impl TriggerInputs {
    /// Every sub-condition that fires, in evaluation order. Empty means skip.
    pub fn reasons(&self) -> Vec<TriggerReason> {
        let mut reasons = Vec::new();
        if self.always_relevel {
            reasons.push(TriggerReason::AlwaysRelevel);
        }
        if self.probe_required {
            reasons.push(TriggerReason::ProbeRequired);
        }
        if self.force_reprobe {
            reasons.push(TriggerReason::TemperatureChanged);
        }
        if self.first_time {
            reasons.push(TriggerReason::FirstRun);
        }
        if !self.mesh_valid {
            reasons.push(TriggerReason::MeshNotValid);
        }
        if self.force_days && self.days_since_mesh >= self.day_threshold {
            reasons.push(TriggerReason::MeshAge {
                days: self.days_since_mesh,
                threshold: self.day_threshold,
            });
        }
        if self.force_prints && i64::from(self.prints_since_mesh) >= self.print_threshold {
            reasons.push(TriggerReason::PrintCount {
                prints: self.prints_since_mesh,
                threshold: self.print_threshold,
            });
        }
        reasons
    }

    pub fn should_trigger(&self) -> bool {
        !self.reasons().is_empty()
    }
}

/// Comma-joined reason list for log fields.
pub fn format_reasons(reasons: &[TriggerReason]) -> String {
    reasons
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settled() -> TriggerInputs {
        TriggerInputs {
            always_relevel: false,
            probe_required: false,
            force_reprobe: false,
            first_time: false,
            mesh_valid: true,
            force_days: true,
            days_since_mesh: 0,
            day_threshold: 1,
            force_prints: true,
            prints_since_mesh: 0,
            print_threshold: 5,
        }
    }

    #[test]
    fn test_settled_state_skips() {
        assert!(settled().reasons().is_empty());
        assert!(!settled().should_trigger());
    }

    #[test]
    fn test_each_flag_triggers() {
        let cases = [
            (TriggerInputs { always_relevel: true, ..settled() }, TriggerReason::AlwaysRelevel),
            (TriggerInputs { probe_required: true, ..settled() }, TriggerReason::ProbeRequired),
            (TriggerInputs { force_reprobe: true, ..settled() }, TriggerReason::TemperatureChanged),
            (TriggerInputs { first_time: true, ..settled() }, TriggerReason::FirstRun),
            (TriggerInputs { mesh_valid: false, ..settled() }, TriggerReason::MeshNotValid),
        ];
        for (inputs, expected) in cases {
            assert_eq!(inputs.reasons(), vec![expected]);
        }
    }

    #[test]
    fn test_print_threshold_is_inclusive() {
        let inputs = TriggerInputs { prints_since_mesh: 5, ..settled() };
        assert_eq!(
            inputs.reasons(),
            vec![TriggerReason::PrintCount { prints: 5, threshold: 5 }]
        );

        let disabled = TriggerInputs { force_prints: false, ..inputs };
        assert!(!disabled.should_trigger());
    }

    #[test]
    fn test_day_threshold() {
        let inputs = TriggerInputs { days_since_mesh: 1, ..settled() };
        assert!(inputs.should_trigger());

        let disabled = TriggerInputs { force_days: false, ..inputs };
        assert!(!disabled.should_trigger());
    }

    #[test]
    fn test_reasons_keep_order() {
        let inputs = TriggerInputs {
            first_time: true,
            always_relevel: true,
            mesh_valid: false,
            ..settled()
        };
        assert_eq!(
            format_reasons(&inputs.reasons()),
            "always_relevel,first_run,mesh_not_valid"
        );
    }
}
