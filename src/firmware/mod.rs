//! Firmware knowledge: profile registry, detection, and mesh-info parsing.

pub mod detector;
pub mod mesh;
pub mod profile;

pub use detector::{storage_disabled, DetectionOutcome, DetectionStatus, FirmwareDetector};
pub use mesh::{classify_mesh_line, is_save_done, MeshValidity};
pub use profile::{classify, profile, profiles, Classification, FirmwareKind, FirmwareProfile};
