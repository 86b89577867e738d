//! Command-text helpers and the transport seam.
//!
//! The engine never parses G-code beyond the first word and a couple of
//! parameters.

use std::fmt;

/// Host command that sends the mesh query once queued commands have flushed.
pub const QUERY_MARKER: &str = "SMARTABLQUERY";

/// Host command that forces the decision when the bounded wait expires.
pub const DECIDE_MARKER: &str = "SMARTABLDECIDE";

/// Prefix that marks a queue entry as a host command rather than G-code.
pub const HOST_COMMAND_PREFIX: char = '@';

/// Homing command; starts a new probe cycle.
pub const HOME_WORD: &str = "G28";

// ============================================================================
// Transport Seam
// ============================================================================

/// Outgoing side of the printer connection, as seen by the engine.
pub trait PrinterLink: Send + Sync {
    /// Queue commands for the printer. Not subject to the dispatch hold.
    fn send_commands(&self, commands: Vec<String>);

    /// Hold print-job commands until [`resume_dispatch`](Self::resume_dispatch).
    fn suspend_dispatch(&self);

    /// Release the hold.
    fn resume_dispatch(&self);
}

/// Verdict of the queuing hook for one outgoing command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interception {
    /// Send the command unchanged.
    Pass,
    /// Send these commands instead.
    Replace(Vec<String>),
    /// Send nothing.
    Suppress,
}

/// Provenance tags carried by an outgoing command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandTags {
    /// Line of the print job being streamed.
    pub from_file: bool,
    /// Went through the engine's queuing hook on its way out.
    pub via_engine: bool,
}

impl CommandTags {
    pub const FILE: Self = Self {
        from_file: true,
        via_engine: false,
    };

    pub const FILE_VIA_ENGINE: Self = Self {
        from_file: true,
        via_engine: true,
    };

    pub const HOST: Self = Self {
        from_file: false,
        via_engine: false,
    };
}

impl fmt::Display for CommandTags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = if self.from_file { "source:file" } else { "source:host" };
        if self.via_engine {
            write!(f, "{source},plugin:smart_abl")
        } else {
            f.write_str(source)
        }
    }
}

// ============================================================================
// Parsing Helpers
// ============================================================================

/// First word of a command (`G29` for `G29 P1`), empty for blank input.
pub fn gcode_word(command: &str) -> &str {
    command.split_whitespace().next().unwrap_or("")
}

/// True if `command` matches any list entry, by full text or by first word.
pub fn matches_any<S: AsRef<str>>(command: &str, list: &[S]) -> bool {
    let command = command.trim();
    let word = gcode_word(command);
    list.iter().any(|entry| {
        let entry = entry.as_ref().trim();
        !entry.is_empty() && (entry.eq_ignore_ascii_case(command) || entry.eq_ignore_ascii_case(word))
    })
}

/// Numeric value of a single-letter parameter, e.g. `Z` in `M420 S1 Z0.2`.
pub fn parameter(command: &str, letter: char) -> Option<f64> {
    command.split_whitespace().skip(1).find_map(|token| {
        let mut chars = token.chars();
        let first = chars.next()?;
        if first.eq_ignore_ascii_case(&letter) {
            chars.as_str().parse::<f64>().ok()
        } else {
            None
        }
    })
}

/// Split a host command (`@SMARTABLDECIDE 3`) into name and parameters.
pub fn parse_host_command(line: &str) -> Option<(&str, &str)> {
    let rest = line.trim().strip_prefix(HOST_COMMAND_PREFIX)?;
    let mut parts = rest.splitn(2, char::is_whitespace);
    let name = parts.next().filter(|n| !n.is_empty())?;
    Some((name, parts.next().unwrap_or("").trim()))
}

pub fn query_marker() -> String {
    format!("{HOST_COMMAND_PREFIX}{QUERY_MARKER}")
}

pub fn decide_marker(generation: u64) -> String {
    format!("{HOST_COMMAND_PREFIX}{DECIDE_MARKER} {generation}")
}
