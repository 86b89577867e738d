//! Per-connection session state.
//!
//! Created on connect and thrown away on disconnect, so a reconnect always
//! re-detects the firmware.

use std::collections::HashSet;
use std::fmt;

use crate::firmware::{Classification, DetectionStatus, FirmwareDetector, FirmwareProfile, MeshValidity};

/// Where the decision state machine is for the current intercepted command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Ready to intercept.
    Idle,
    /// Dispatch is held while the mesh query for `generation` is outstanding.
    AwaitingQuery { generation: u64 },
}

#[derive(Debug, Clone)]
pub struct SessionState {
    pub detector: FirmwareDetector,
    pub save_allowed: bool,
    pub probe_required: bool,
    pub mesh: MeshValidity,
    pub force_reprobe: bool,
    pub pending_query: bool,
    pub last_intercepted: Option<String>,
    /// Commands already handled this print cycle (save completion, heater classes).
    pub sent_this_cycle: HashSet<String>,
    /// A save was sent and its completion line has not been seen yet.
    pub save_expected: bool,
    pub phase: Phase,
    /// Bumped on every interception; stale timer expiries carry an older value.
    pub generation: u64,
    pub unsupported_notified: bool,
}

impl SessionState {
    pub fn new(detection_window_lines: usize) -> Self {
        Self {
            detector: FirmwareDetector::new(detection_window_lines),
            save_allowed: true,
            probe_required: false,
            mesh: MeshValidity::Unknown,
            force_reprobe: false,
            pending_query: false,
            last_intercepted: None,
            sent_this_cycle: HashSet::new(),
            save_expected: false,
            phase: Phase::Idle,
            generation: 0,
            unsupported_notified: false,
        }
    }

    pub fn firmware(&self) -> Option<Classification> {
        self.detector.classification()
    }

    pub fn profile(&self) -> Option<&'static FirmwareProfile> {
        self.firmware().map(|c| c.profile)
    }

    pub fn is_unsupported(&self) -> bool {
        self.detector.status() == DetectionStatus::Unsupported
    }

    /// Apply a fresh classification. Boards that cannot keep a mesh lose
    /// save capability and must probe every print.
    pub fn apply_detection(&mut self, classification: Classification) {
        if !classification.can_persist_mesh() {
            self.save_allowed = false;
            self.probe_required = true;
        }
    }

    /// Start a new print cycle (homing or print start).
    pub fn reset_cycle(&mut self) {
        self.sent_this_cycle.clear();
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let firmware = self.firmware().map_or("unknown", |c| c.name());
        write!(
            f,
            "Internal(firmware={}, save_allowed={}, probe_required={}, mesh={:?}, \
             force_temp={}, querying={}, cache={:?})",
            firmware,
            self.save_allowed,
            self.probe_required,
            self.mesh,
            self.force_reprobe,
            self.pending_query,
            self.sent_this_cycle,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firmware::{classify, FirmwareKind};

    #[test]
    fn test_new_session_defaults() {
        let s = SessionState::new(10);
        assert!(s.firmware().is_none());
        assert!(s.save_allowed);
        assert!(!s.probe_required);
        assert_eq!(s.mesh, MeshValidity::Unknown);
        assert_eq!(s.phase, Phase::Idle);
    }

    #[test]
    fn test_detection_of_non_saving_board() {
        let mut s = SessionState::new(10);
        s.apply_detection(classify(":Klipper").unwrap());
        assert!(!s.save_allowed);
        assert!(s.probe_required);
    }

    #[test]
    fn test_detection_of_marlin_keeps_save() {
        let mut s = SessionState::new(10);
        let c = classify(":Marlin 2.1").unwrap();
        assert_eq!(c.profile.kind, FirmwareKind::Marlin);
        s.apply_detection(c);
        assert!(s.save_allowed);
        assert!(!s.probe_required);
    }

    #[test]
    fn test_display_reports_unknown_firmware() {
        let s = SessionState::new(10);
        assert!(s.to_string().starts_with("Internal(firmware=unknown"));
    }
}
