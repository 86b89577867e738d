//! Firmware Profile Registry
//!
//! Static command vocabulary for every supported firmware family. Profiles are
//! immutable and owned by the registry; sessions only hold `&'static` refs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Marker preceding the firmware identifier in an `M115` report.
pub const FIRMWARE_NAME_MARKER: &str = "FIRMWARE_NAME";

/// Characters of the report, starting at [`FIRMWARE_NAME_MARKER`], inspected for classification.
pub const FIRMWARE_NAME_WINDOW: usize = 40;

/// Line fragment Marlin prints when EEPROM support is compiled out.
pub const STORAGE_DISABLED_MARKER: &str = "EEPROM disabled";

// ============================================================================
// Firmware Kind
// ============================================================================

/// Closed set of supported firmware families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FirmwareKind {
    Marlin,
    Prusa,
    Klipper,
}

impl FirmwareKind {
    /// Lower-case identifier matched against the firmware name window.
    pub const fn identifier(self) -> &'static str {
        match self {
            FirmwareKind::Marlin => "marlin",
            FirmwareKind::Prusa => "prusa",
            FirmwareKind::Klipper => "klipper",
        }
    }
}

impl fmt::Display for FirmwareKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identifier())
    }
}

// ============================================================================
// Profiles
// ============================================================================

/// Command vocabulary and response markers for one firmware family.
#[derive(Debug, PartialEq, Eq)]
pub struct FirmwareProfile {
    pub kind: FirmwareKind,
    /// Full probe (ABL) command.
    pub probe_command: &'static str,
    /// Command that activates the stored mesh, if the firmware has one.
    pub load_command: Option<&'static str>,
    /// Command that prints mesh information.
    pub query_command: &'static str,
    /// Response fragments meaning "no usable mesh".
    pub invalid_mesh_markers: &'static [&'static str],
    /// Response fragments meaning "a mesh is loaded and active".
    pub valid_mesh_markers: &'static [&'static str],
    /// Command persisting the mesh; `None` means the firmware cannot save.
    pub save_command: Option<&'static str>,
    /// Response fragments echoed once a save has completed.
    pub save_done_markers: &'static [&'static str],
}

impl FirmwareProfile {
    pub const fn supports_save(&self) -> bool {
        self.save_command.is_some()
    }

    /// G-code word of the load command (`M420` for `M420 S1`).
    pub fn load_word(&self) -> Option<&'static str> {
        self.load_command
            .and_then(|cmd| cmd.split_whitespace().next())
    }
}

static MARLIN: FirmwareProfile = FirmwareProfile {
    kind: FirmwareKind::Marlin,
    probe_command: "G29",
    load_command: Some("M420 S1"),
    query_command: "M420 V1",
    invalid_mesh_markers: &["Invalid mesh"],
    valid_mesh_markers: &["Bilinear Leveling Grid", "Bed Topography Report"],
    save_command: Some("M500"),
    save_done_markers: &["Settings Stored"],
};

static PRUSA: FirmwareProfile = FirmwareProfile {
    kind: FirmwareKind::Prusa,
    probe_command: "G80",
    load_command: None,
    query_command: "G81",
    invalid_mesh_markers: &["Mesh bed leveling not active"],
    valid_mesh_markers: &["Measured points"],
    save_command: None,
    save_done_markers: &[],
};

static KLIPPER: FirmwareProfile = FirmwareProfile {
    kind: FirmwareKind::Klipper,
    probe_command: "BED_MESH_CALIBRATE",
    load_command: None,
    query_command: "BED_MESH_OUTPUT",
    invalid_mesh_markers: &["Bed has not been probed"],
    valid_mesh_markers: &["Mesh Leveling Probed Z positions"],
    save_command: None,
    save_done_markers: &[],
};

/// Registry order is also the classification order.
static REGISTRY: [&FirmwareProfile; 3] = [&MARLIN, &PRUSA, &KLIPPER];

/// A board family that reuses a base profile but cannot persist a mesh.
#[derive(Debug, PartialEq, Eq)]
pub struct SubVariant {
    pub name: &'static str,
    /// Lower-case fragment identifying the variant inside the name window.
    pub marker: &'static str,
    pub base: FirmwareKind,
}

static SUB_VARIANTS: [SubVariant; 1] = [SubVariant {
    name: "prusa-buddy",
    marker: "buddy",
    base: FirmwareKind::Marlin,
}];

/// All registered profiles, in classification order.
pub fn profiles() -> impl Iterator<Item = &'static FirmwareProfile> {
    REGISTRY.iter().copied()
}

/// Profile for a firmware family.
pub fn profile(kind: FirmwareKind) -> &'static FirmwareProfile {
    match kind {
        FirmwareKind::Marlin => &MARLIN,
        FirmwareKind::Prusa => &PRUSA,
        FirmwareKind::Klipper => &KLIPPER,
    }
}

/// Result of classifying a firmware name window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub profile: &'static FirmwareProfile,
    pub variant: Option<&'static SubVariant>,
}

impl Classification {
    /// Whether the detected board can persist a mesh across power cycles.
    pub fn can_persist_mesh(&self) -> bool {
        self.variant.is_none() && self.profile.supports_save()
    }

    pub fn name(&self) -> &'static str {
        match self.variant {
            Some(v) => v.name,
            None => self.profile.kind.identifier(),
        }
    }
}

/// Classify the text following a firmware name marker.
///
/// Matching is a case-insensitive substring search for each registered
/// identifier. A sub-variant marker found in the same window redirects the
/// match to the variant's base profile.
pub fn classify(window: &str) -> Option<Classification> {
    let window = window.to_lowercase();
    let matched = profiles().find(|p| window.contains(p.kind.identifier()))?;

    let variant = SUB_VARIANTS.iter().find(|v| window.contains(v.marker));
    Some(match variant {
        Some(v) => Classification {
            profile: profile(v.base),
            variant: Some(v),
        },
        None => Classification {
            profile: matched,
            variant: None,
        },
    })
}
