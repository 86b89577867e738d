//! Leveling decision engine: command interception, bounded mesh query, the
//! re-level predicate, and temperature tracking.

pub mod commands;
pub mod decision;
pub mod session;
pub mod temperature;
pub mod trigger;
pub mod wait;

pub use commands::{parse_host_command, CommandTags, Interception, PrinterLink};
pub use decision::{Collaborators, DecisionEngine, EngineSettings, HostEvent};
pub use session::{Phase, SessionState};
pub use trigger::{TriggerInputs, TriggerReason};
