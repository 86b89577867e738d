//! Firmware Detector
//!
//! Watches response lines once per connection for the `FIRMWARE_NAME` report
//! and classifies it against the registry. Detection is one-way: once the
//! detector leaves `Pending` nothing moves it again until the session ends.

use super::profile::{
    classify, Classification, FIRMWARE_NAME_MARKER, FIRMWARE_NAME_WINDOW, STORAGE_DISABLED_MARKER,
};
use tracing::{debug, info, warn};

/// Where the detector stands for the current connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionStatus {
    /// Still inside the startup window, no firmware name seen yet.
    Pending,
    /// A registered firmware family was identified.
    Detected(Classification),
    /// The window closed without a recognised firmware name.
    Unsupported,
}

/// What a single observed line did to the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionOutcome {
    /// Nothing changed.
    Unchanged,
    /// This line identified the firmware.
    Detected(Classification),
    /// This line exhausted detection. Returned exactly once per session.
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct FirmwareDetector {
    status: DetectionStatus,
    lines_seen: usize,
    window_lines: usize,
}

impl FirmwareDetector {
    /// Create a detector that gives up after `window_lines` unmatched lines.
    pub fn new(window_lines: usize) -> Self {
        Self {
            status: DetectionStatus::Pending,
            lines_seen: 0,
            window_lines,
        }
    }

    pub fn status(&self) -> DetectionStatus {
        self.status
    }

    pub fn classification(&self) -> Option<Classification> {
        match self.status {
            DetectionStatus::Detected(c) => Some(c),
            _ => None,
        }
    }

    /// Feed one received line.
    pub fn observe(&mut self, line: &str) -> DetectionOutcome {
        if self.status != DetectionStatus::Pending {
            return DetectionOutcome::Unchanged;
        }
        self.lines_seen += 1;

        if let Some(idx) = line.find(FIRMWARE_NAME_MARKER) {
            debug!(line = %line, "Firmware name report received");
            let window = name_window(&line[idx..]);
            match classify(window) {
                Some(c) => {
                    info!(
                        firmware = %c.profile.kind,
                        variant = c.name(),
                        persistent_mesh = c.can_persist_mesh(),
                        "Detected firmware"
                    );
                    self.status = DetectionStatus::Detected(c);
                    return DetectionOutcome::Detected(c);
                }
                None => debug!(report = %window, "Unrecognised firmware name, still watching"),
            }
        }

        if self.lines_seen >= self.window_lines {
            warn!(
                lines = self.lines_seen,
                "No firmware name within the startup window, leveling control disabled"
            );
            self.status = DetectionStatus::Unsupported;
            return DetectionOutcome::Exhausted;
        }

        DetectionOutcome::Unchanged
    }
}

/// True if the line reports that persistent storage is unavailable.
pub fn storage_disabled(line: &str) -> bool {
    line.contains(STORAGE_DISABLED_MARKER)
}

/// First [`FIRMWARE_NAME_WINDOW`] characters of `report`, on a char boundary.
fn name_window(report: &str) -> &str {
    match report.char_indices().nth(FIRMWARE_NAME_WINDOW) {
        Some((end, _)) => &report[..end],
        None => report,
    }
}
