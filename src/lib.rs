//! SmartABL: auto bed leveling decision engine
//!
//! Sits between a print job and a 3D printer, intercepts bed-leveling
//! commands, and decides per print whether to re-probe the bed or reuse the
//! mesh the firmware already holds.
//!
//! ## Architecture
//!
//! - **Firmware**: profile registry, `M115` detection, mesh-info parsing
//! - **Engine**: interception state machine, bounded mesh query, re-level
//!   predicate, temperature tracking
//! - **Storage**: persisted counters (`state.json`) and the state directory lock
//! - **Config**: TOML leveling policy with hot reload
//! - **Host**: job sources, printer link, dispatch queue, print runner

pub mod config;
pub mod engine;
pub mod firmware;
pub mod host;
pub mod notify;
pub mod storage;

pub use config::{AblConfig, LivePolicy, Policy, PolicyKey, PolicySource};
pub use engine::{Collaborators, DecisionEngine, EngineSettings, HostEvent, Interception};
pub use firmware::{FirmwareKind, FirmwareProfile, MeshValidity};
pub use notify::{Notifier, UiEvent};
pub use storage::{CounterStore, JsonFileStore, PersistedCounters};
