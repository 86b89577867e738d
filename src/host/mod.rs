//! Standalone print host: job sources, the printer link, the dispatch queue
//! the engine holds and feeds, and the runner tying them together.

pub mod job;
pub mod link;
pub mod queue;
pub mod runner;

pub use job::{FileJob, JobEvent, JobSource, ScriptedJob};
pub use link::{LinkError, PrinterConnection};
pub use queue::DispatchQueue;
pub use runner::{PrintOutcome, PrintRunner, PrintSummary};
