//! Mesh Validity Tracker
//!
//! Matches response lines against the active profile's mesh-info markers while
//! a query is outstanding. The tracker never times out on its own; the decision
//! engine's bounded wait covers a firmware that never answers.

use super::profile::FirmwareProfile;

/// Validity of the mesh currently loaded in the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MeshValidity {
    /// Nothing observed yet this session. Treated as invalid.
    #[default]
    Unknown,
    Invalid,
    Valid,
}

impl MeshValidity {
    pub const fn is_valid(self) -> bool {
        matches!(self, MeshValidity::Valid)
    }
}

/// Classify a response line against a profile's mesh-info markers.
///
/// Returns `None` for lines that carry no mesh information. Valid markers are
/// checked first so a line matching both sets counts as valid.
pub fn classify_mesh_line(profile: &FirmwareProfile, line: &str) -> Option<MeshValidity> {
    if profile.valid_mesh_markers.iter().any(|m| line.contains(m)) {
        return Some(MeshValidity::Valid);
    }
    if profile.invalid_mesh_markers.iter().any(|m| line.contains(m)) {
        return Some(MeshValidity::Invalid);
    }
    None
}

/// True if the line confirms that the profile's save command completed.
pub fn is_save_done(profile: &FirmwareProfile, line: &str) -> bool {
    profile.save_done_markers.iter().any(|m| line.contains(m))
}
