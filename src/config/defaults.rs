//! System-wide default constants.
//!
//! Centralises magic numbers used across the engine and the host runner.
//! Grouped by subsystem for easy discovery.

// ============================================================================
// Decision Engine
// ============================================================================

/// Bounded wait for a mesh query answer (seconds).
pub const QUERY_TIMEOUT_SECS: u64 = 5;

/// Upper bound accepted for `engine.query_timeout_secs`.
///
/// The job is held for the whole wait, so anything longer stalls the print.
pub const MAX_QUERY_TIMEOUT_SECS: u64 = 120;

/// Received lines after which firmware detection gives up.
pub const DETECTION_WINDOW_LINES: usize = 200;

// ============================================================================
// Persistence
// ============================================================================

/// Default state directory.
pub const STATE_DIR: &str = "./data";

/// File name of the persisted counters inside the state directory.
pub const STATE_FILE: &str = "state.json";

/// Date format of `last_mesh` in the persisted record.
pub const MESH_DATE_FORMAT: &str = "%d/%m/%Y";

// ============================================================================
// Printer Link
// ============================================================================

/// Default serial-over-TCP bridge address.
pub const PRINTER_ADDR: &str = "127.0.0.1:8888";

/// Connect timeout for the printer link (seconds).
pub const LINK_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Maximum silence while waiting for a printer line (seconds).
///
/// Probing a large bed can take minutes without any output.
pub const LINK_READ_TIMEOUT_SECS: u64 = 600;

/// Command asking the firmware to identify itself.
pub const FIRMWARE_INFO_COMMAND: &str = "M115";
