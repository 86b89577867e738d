//! Decision Engine
//!
//! Command-interception state machine. The host calls one hook per event:
//!
//! - `on_command_queuing`: a command is about to be dispatched. File-sourced
//!   probe/load commands are swapped for `@SMARTABLQUERY` and dispatch is held.
//! - `on_host_command`: an `@` command reached the head of the queue.
//!   `@SMARTABLQUERY` sends the firmware's mesh query; `@SMARTABLDECIDE <n>`
//!   is the bounded-wait expiry for interception `n`.
//! - `on_line_received`: firmware detection, mesh validity, save completion.
//! - `on_command_sent`: temperature tracking.
//! - `on_event`: connection and print lifecycle.
//!
//! Nothing here returns an error. Anomalies degrade to re-probing and store
//! failures are logged; the in-memory counters stay authoritative.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::commands::{
    gcode_word, matches_any, parameter, query_marker, CommandTags, Interception, PrinterLink,
    DECIDE_MARKER, HOME_WORD, QUERY_MARKER,
};
use super::session::{Phase, SessionState};
use super::temperature::{self, TemperatureObservation};
use super::trigger::{format_reasons, TriggerInputs};
use super::wait::{self, WaitHandle};
use crate::config::defaults::{DETECTION_WINDOW_LINES, QUERY_TIMEOUT_SECS};
use crate::config::policy::{Policy, PolicyKey, PolicySource};
use crate::config::AblConfig;
use crate::firmware::{
    classify_mesh_line, is_save_done, storage_disabled, DetectionOutcome, DetectionStatus,
    FirmwareProfile,
};
use crate::notify::{Notifier, UiEvent};
use crate::storage::{load_or_init, Clock, CounterStore, PersistedCounters};

// ============================================================================
// Wiring
// ============================================================================

/// Connection and print lifecycle events from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    /// A UI client attached.
    ClientOpened,
    Connected,
    Disconnected,
    PrintStarted,
    PrintDone,
    PrintFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub query_timeout: Duration,
    pub detection_window_lines: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_secs(QUERY_TIMEOUT_SECS),
            detection_window_lines: DETECTION_WINDOW_LINES,
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &AblConfig) -> Self {
        Self {
            query_timeout: config.query_timeout(),
            detection_window_lines: config.engine.detection_window_lines,
        }
    }
}

/// Everything the engine talks to besides its own counters store.
#[derive(Clone)]
pub struct Collaborators {
    pub link: Arc<dyn PrinterLink>,
    pub notifier: Arc<dyn Notifier>,
    pub policy: Arc<dyn PolicySource>,
    pub clock: Arc<dyn Clock>,
}

pub struct DecisionEngine {
    session: Option<SessionState>,
    counters: PersistedCounters,
    store: Box<dyn CounterStore>,
    link: Arc<dyn PrinterLink>,
    notifier: Arc<dyn Notifier>,
    policy: Arc<dyn PolicySource>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
    wait: Option<WaitHandle>,
}

impl DecisionEngine {
    /// Build the engine, loading (or creating) the persisted counters.
    ///
    /// An unreadable record is replaced by a fresh one, which re-probes on the
    /// next print.
    pub fn new(collab: Collaborators, mut store: Box<dyn CounterStore>, settings: EngineSettings) -> Self {
        let counters = match load_or_init(store.as_mut(), collab.clock.as_ref()) {
            Ok(counters) => counters,
            Err(e) => {
                warn!(
                    backend = store.backend_name(),
                    error = %e,
                    "Could not load leveling counters, starting fresh"
                );
                PersistedCounters::fresh(collab.clock.today())
            }
        };

        Self {
            session: None,
            counters,
            store,
            link: collab.link,
            notifier: collab.notifier,
            policy: collab.policy,
            clock: collab.clock,
            settings,
            wait: None,
        }
    }

    pub fn session(&self) -> Option<&SessionState> {
        self.session.as_ref()
    }

    pub fn counters(&self) -> &PersistedCounters {
        &self.counters
    }

    pub fn phase(&self) -> Option<Phase> {
        self.session.as_ref().map(|s| s.phase)
    }

    /// `Settings(..) || State(..) || Internal(..)` line for decision logs.
    pub fn snapshot(&self) -> String {
        let policy = Policy::new(self.policy.as_ref());
        match &self.session {
            Some(session) => format!("{policy} || {} || {session}", self.counters),
            None => format!("{policy} || {} || Internal(disconnected)", self.counters),
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub fn on_event(&mut self, event: HostEvent) {
        debug!(?event, "Host event");
        match event {
            HostEvent::ClientOpened => {
                self.notifier
                    .publish(UiEvent::AlwaysRelevel(self.counters.always_relevel));
                self.publish_counter();
            }
            HostEvent::Connected => {
                self.abandon_wait();
                self.cancel_wait();
                self.session = Some(SessionState::new(self.settings.detection_window_lines));
            }
            HostEvent::Disconnected => {
                self.abandon_wait();
                self.cancel_wait();
                if self.session.take().is_some() {
                    info!("Printer disconnected, session discarded");
                }
            }
            HostEvent::PrintStarted => {
                if let Some(session) = self.session.as_mut() {
                    session.reset_cycle();
                    if let Some(firmware) = session.firmware() {
                        if !firmware.can_persist_mesh() {
                            session.probe_required = true;
                        }
                    }
                }
            }
            HostEvent::PrintDone => self.on_print_finished(true),
            HostEvent::PrintFailed => self.on_print_finished(false),
        }
    }

    fn on_print_finished(&mut self, success: bool) {
        self.abandon_wait();

        let firmware_known = self
            .session
            .as_ref()
            .is_some_and(|s| s.firmware().is_some());
        if !firmware_known {
            return;
        }

        let count_failed = Policy::new(self.policy.as_ref()).flag(PolicyKey::Failed);
        if success || count_failed {
            self.counters.prints_since_mesh = self.counters.prints_since_mesh.saturating_add(1);
            info!(
                success,
                prints = self.counters.prints_since_mesh,
                "Print finished, counted towards re-level threshold"
            );
            self.persist();
            self.publish_counter();
        }
    }

    /// Operator override: re-level before every print.
    pub fn set_always_relevel(&mut self, enabled: bool) {
        self.counters.always_relevel = enabled;
        info!(enabled, "Always re-level override changed");
        self.persist();
        self.notifier.publish(UiEvent::AlwaysRelevel(enabled));
    }

    // ========================================================================
    // Outgoing Commands
    // ========================================================================

    pub fn on_command_queuing(&mut self, command: &str, tags: CommandTags) -> Interception {
        if !tags.from_file {
            return Interception::Pass;
        }
        let Some(session) = self.session.as_mut() else {
            return Interception::Pass;
        };
        let Some(profile) = session.profile() else {
            return Interception::Pass;
        };
        let policy = Policy::new(self.policy.as_ref());

        if policy.flag(PolicyKey::CmdIgnore)
            && matches_any(command, &policy.command_list(PolicyKey::IgnoreGcode))
        {
            info!(command, "Dropping ignored command");
            return Interception::Suppress;
        }

        if gcode_word(command).eq_ignore_ascii_case(HOME_WORD) {
            session.reset_cycle();
            return Interception::Pass;
        }

        if !matches_any(command, &trigger_commands(profile, &policy)) {
            return Interception::Pass;
        }

        if session.phase != Phase::Idle {
            warn!(command, "Leveling decision already in progress, passing command through");
            return Interception::Pass;
        }

        self.intercept(command)
    }

    fn intercept(&mut self, command: &str) -> Interception {
        let Some(session) = self.session.as_mut() else {
            return Interception::Pass;
        };
        session.generation += 1;
        let generation = session.generation;
        session.phase = Phase::AwaitingQuery { generation };
        session.pending_query = true;
        session.last_intercepted = Some(command.to_string());

        self.link.suspend_dispatch();
        info!(command, generation, "Intercepted leveling command, querying mesh state");
        debug!("{}", self.snapshot());

        match wait::arm(generation, self.settings.query_timeout, self.link.clone()) {
            Some(handle) => {
                self.wait = Some(handle);
                Interception::Replace(vec![query_marker()])
            }
            None => {
                self.decide(generation);
                Interception::Suppress
            }
        }
    }

    /// Host commands (`@NAME params`) reaching the head of the queue.
    pub fn on_host_command(&mut self, name: &str, params: &str) {
        match name {
            QUERY_MARKER => {
                let Some(session) = self.session.as_ref() else {
                    return;
                };
                match (session.phase, session.profile()) {
                    (Phase::AwaitingQuery { .. }, Some(profile)) if session.pending_query => {
                        debug!(query = profile.query_command, "Sending mesh query");
                        self.link.send_commands(vec![profile.query_command.to_string()]);
                    }
                    _ => debug!("Mesh query marker with nothing outstanding"),
                }
            }
            DECIDE_MARKER => {
                let requested = params.parse::<u64>().ok();
                let outstanding = match self.session.as_ref().map(|s| s.phase) {
                    Some(Phase::AwaitingQuery { generation }) => Some(generation),
                    _ => None,
                };
                match (requested, outstanding) {
                    (Some(requested), Some(generation)) if requested == generation => {
                        warn!(generation, "No mesh information received, using last known state");
                        self.decide(generation);
                    }
                    _ => debug!(params, "Stale decide marker ignored"),
                }
            }
            _ => {}
        }
    }

    /// A command went out on the wire.
    pub fn on_command_sent(&mut self, command: &str, tags: CommandTags) {
        if !(tags.from_file && tags.via_engine) {
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.firmware().is_none() {
            return;
        }

        let policy = Policy::new(self.policy.as_ref());
        let observation = temperature::observe(session, &mut self.counters, &policy, command);
        if let TemperatureObservation::Recorded { .. } = observation {
            self.persist();
        }
    }

    // ========================================================================
    // Incoming Lines
    // ========================================================================

    pub fn on_line_received(&mut self, line: &str) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        match session.detector.status() {
            DetectionStatus::Pending => match session.detector.observe(line) {
                DetectionOutcome::Detected(classification) => {
                    session.apply_detection(classification);
                }
                DetectionOutcome::Exhausted => {
                    if !session.unsupported_notified {
                        session.unsupported_notified = true;
                        warn!("Unsupported firmware, leveling commands pass through unchanged");
                        self.notifier.publish(UiEvent::unsupported_firmware());
                    }
                }
                DetectionOutcome::Unchanged => {}
            },
            DetectionStatus::Unsupported => {}
            DetectionStatus::Detected(classification) => {
                let profile = classification.profile;

                if storage_disabled(line) && session.save_allowed {
                    warn!(line, "Firmware reports persistent storage disabled, saving turned off");
                    session.save_allowed = false;
                    session.save_expected = false;
                }

                if session.pending_query {
                    if let Some(validity) = classify_mesh_line(profile, line) {
                        debug!(?validity, line, "Mesh information received");
                        session.mesh = validity;
                        session.pending_query = false;
                        let phase = session.phase;
                        if let Phase::AwaitingQuery { generation } = phase {
                            self.decide(generation);
                        }
                    }
                } else if session.save_expected && is_save_done(profile, line) {
                    self.complete_save();
                }
            }
        }
    }

    // ========================================================================
    // Decision
    // ========================================================================

    fn decide(&mut self, generation: u64) {
        self.cancel_wait();

        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.phase != (Phase::AwaitingQuery { generation }) {
            return;
        }
        session.pending_query = false;
        let last = session.last_intercepted.take();

        let Some(profile) = session.profile() else {
            session.phase = Phase::Idle;
            self.link.resume_dispatch();
            return;
        };

        let policy = Policy::new(self.policy.as_ref());
        let today = self.clock.today();
        let inputs = TriggerInputs {
            always_relevel: self.counters.always_relevel,
            probe_required: session.probe_required,
            force_reprobe: session.force_reprobe,
            first_time: self.counters.first_time,
            mesh_valid: session.mesh.is_valid(),
            force_days: policy.flag(PolicyKey::ForceDays),
            days_since_mesh: self.counters.days_since_mesh(today),
            day_threshold: policy.int(PolicyKey::Days),
            force_prints: policy.flag(PolicyKey::ForcePrints),
            prints_since_mesh: self.counters.prints_since_mesh,
            print_threshold: policy.print_threshold(),
        };
        let reasons = inputs.reasons();

        let commands = if reasons.is_empty() {
            let commands = skip_sequence(profile, session.save_allowed, last.as_deref());
            info!(generation, ?commands, "ABL skip, reusing stored mesh");
            commands
        } else {
            session.force_reprobe = false;
            session.probe_required = false;
            let mut commands = probe_sequence(profile, &policy, last.as_deref());
            if session.save_allowed {
                if let Some(save) = profile.save_command {
                    commands.push(save.to_string());
                    session.save_expected = true;
                }
            }
            info!(
                generation,
                reasons = %format_reasons(&reasons),
                ?commands,
                "ABL trigger, re-probing bed"
            );
            commands
        };

        session.phase = Phase::Idle;
        debug!("{}", self.snapshot());

        if !commands.is_empty() {
            self.link.send_commands(commands);
        }
        self.link.resume_dispatch();
    }

    fn complete_save(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let Some(save) = session.profile().and_then(|p| p.save_command) else {
            return;
        };
        if !session.save_allowed || !session.save_expected {
            return;
        }
        session.save_expected = false;
        if !session.sent_this_cycle.insert(save.to_string()) {
            debug!("Mesh save already recorded this cycle");
            return;
        }

        self.counters.record_mesh_saved(self.clock.today());
        info!("Mesh saved, counters reset");
        self.persist();
        self.publish_counter();
    }

    /// Drop an outstanding query without deciding. Dispatch is released.
    fn abandon_wait(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if let Phase::AwaitingQuery { generation } = session.phase {
            info!(generation, "Wait for mesh information abandoned");
            session.phase = Phase::Idle;
            session.pending_query = false;
            session.last_intercepted = None;
            self.cancel_wait();
            self.link.resume_dispatch();
        }
    }

    fn cancel_wait(&mut self) {
        if let Some(handle) = self.wait.take() {
            handle.cancel();
        }
    }

    // ========================================================================
    // Persistence and UI
    // ========================================================================

    fn persist(&mut self) {
        if let Err(e) = self.store.save_record(&self.counters) {
            warn!(backend = self.store.backend_name(), error = %e, "Failed to persist leveling counters");
        }
    }

    fn publish_counter(&self) {
        let threshold = Policy::new(self.policy.as_ref()).print_threshold();
        self.notifier
            .publish(UiEvent::Counter(self.counters.prints_since_mesh, threshold));
    }
}

// ============================================================================
// Command Resolution
// ============================================================================

/// Commands that start a leveling decision.
pub fn trigger_commands(profile: &FirmwareProfile, policy: &Policy<'_>) -> Vec<String> {
    if policy.flag(PolicyKey::TriggerCustom) {
        return policy.command_list(PolicyKey::TriggerGcode);
    }
    let mut triggers = vec![profile.probe_command.to_string()];
    if let Some(load) = profile.load_word() {
        triggers.push(load.to_string());
    }
    triggers
}

/// Probe commands for the trigger branch, before any save.
///
/// A custom list wins. Otherwise an intercepted probe command is re-sent with
/// its arguments and anything else becomes the profile's probe command.
pub fn probe_sequence(
    profile: &FirmwareProfile,
    policy: &Policy<'_>,
    intercepted: Option<&str>,
) -> Vec<String> {
    if policy.flag(PolicyKey::AblCustom) {
        let custom = policy.command_list(PolicyKey::AblGcode);
        if !custom.is_empty() {
            return custom;
        }
        warn!("Custom probe list is empty, using firmware probe command");
    }

    match intercepted {
        Some(cmd) if gcode_word(cmd).eq_ignore_ascii_case(gcode_word(profile.probe_command)) => {
            vec![cmd.trim().to_string()]
        }
        _ => vec![profile.probe_command.to_string()],
    }
}

/// Commands for the skip branch: load the stored mesh, or nothing if the
/// firmware cannot keep one.
pub fn skip_sequence(
    profile: &FirmwareProfile,
    save_allowed: bool,
    intercepted: Option<&str>,
) -> Vec<String> {
    if !save_allowed {
        return Vec::new();
    }
    let Some(load) = profile.load_command else {
        return Vec::new();
    };
    match intercepted {
        Some(cmd) if is_offset_load(profile, cmd) => vec![cmd.trim().to_string()],
        _ => vec![load.to_string()],
    }
}

/// Load command carrying a non-zero Z offset.
fn is_offset_load(profile: &FirmwareProfile, command: &str) -> bool {
    let Some(load_word) = profile.load_word() else {
        return false;
    };
    gcode_word(command).eq_ignore_ascii_case(load_word)
        && parameter(command, 'Z').is_some_and(|z| z != 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::policy::PolicyValue;
    use crate::firmware::{profile, FirmwareKind};
    use std::collections::HashMap;

    struct MapSource(HashMap<PolicyKey, PolicyValue>);

    impl PolicySource for MapSource {
        fn lookup(&self, key: PolicyKey) -> Option<PolicyValue> {
            self.0.get(&key).cloned()
        }
    }

    fn defaults() -> MapSource {
        MapSource(HashMap::new())
    }

    #[test]
    fn test_default_triggers() {
        let src = defaults();
        let policy = Policy::new(&src);
        assert_eq!(
            trigger_commands(profile(FirmwareKind::Marlin), &policy),
            vec!["G29".to_string(), "M420".to_string()]
        );
        assert_eq!(
            trigger_commands(profile(FirmwareKind::Klipper), &policy),
            vec!["BED_MESH_CALIBRATE".to_string()]
        );
    }

    #[test]
    fn test_custom_triggers_replace_defaults() {
        let src = MapSource(HashMap::from([
            (PolicyKey::TriggerCustom, PolicyValue::Bool(true)),
            (PolicyKey::TriggerGcode, PolicyValue::Str("G29 P1, G80".into())),
        ]));
        let policy = Policy::new(&src);
        assert_eq!(
            trigger_commands(profile(FirmwareKind::Marlin), &policy),
            vec!["G29 P1".to_string(), "G80".to_string()]
        );
    }

    #[test]
    fn test_probe_sequence_resolution() {
        let src = defaults();
        let policy = Policy::new(&src);
        let marlin = profile(FirmwareKind::Marlin);

        assert_eq!(probe_sequence(marlin, &policy, Some("G29 P1")), vec!["G29 P1"]);
        assert_eq!(probe_sequence(marlin, &policy, Some("M420 S1")), vec!["G29"]);
        assert_eq!(probe_sequence(marlin, &policy, None), vec!["G29"]);
    }

    #[test]
    fn test_custom_probe_list_wins() {
        let src = MapSource(HashMap::from([
            (PolicyKey::AblCustom, PolicyValue::Bool(true)),
            (PolicyKey::AblGcode, PolicyValue::Str("G28,G29 T".into())),
        ]));
        let policy = Policy::new(&src);
        assert_eq!(
            probe_sequence(profile(FirmwareKind::Marlin), &policy, Some("G29")),
            vec!["G28", "G29 T"]
        );
    }

    #[test]
    fn test_empty_custom_probe_list_falls_back() {
        let src = MapSource(HashMap::from([
            (PolicyKey::AblCustom, PolicyValue::Bool(true)),
            (PolicyKey::AblGcode, PolicyValue::Str(" , ".into())),
        ]));
        let policy = Policy::new(&src);
        assert_eq!(
            probe_sequence(profile(FirmwareKind::Prusa), &policy, None),
            vec!["G80"]
        );
    }

    #[test]
    fn test_skip_sequence() {
        let marlin = profile(FirmwareKind::Marlin);
        assert_eq!(skip_sequence(marlin, true, Some("G29")), vec!["M420 S1"]);
        assert_eq!(skip_sequence(marlin, true, Some("M420 S1 Z0.3")), vec!["M420 S1 Z0.3"]);
        assert_eq!(skip_sequence(marlin, true, Some("M420 S1 Z0")), vec!["M420 S1"]);
        assert!(skip_sequence(marlin, false, Some("G29")).is_empty());
        assert!(skip_sequence(profile(FirmwareKind::Klipper), true, None).is_empty());
    }
}
