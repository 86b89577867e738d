//! Dispatch queue between the print job and the printer.
//!
//! Job lines are pulled lazily by the runner; this queue only holds commands
//! the engine injects (`send_commands`) plus the hold flag. Injected commands
//! are not subject to the hold, so the mesh query and the decision output
//! still reach the printer while the job is paused.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::engine::PrinterLink;

#[derive(Debug, Default)]
pub struct DispatchQueue {
    state: Mutex<QueueState>,
    wake: Notify,
}

#[derive(Debug, Default)]
struct QueueState {
    priority: VecDeque<String>,
    held: bool,
}

impl DispatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next injected command, if any.
    pub fn pop_priority(&self) -> Option<String> {
        self.lock().priority.pop_front()
    }

    /// Job commands are on hold.
    pub fn is_held(&self) -> bool {
        self.lock().held
    }

    pub fn pending(&self) -> usize {
        self.lock().priority.len()
    }

    /// Wait until something is injected or the hold is released.
    ///
    /// Wakeups are not lost: a change made before the call completes it
    /// immediately.
    pub async fn wait_for_work(&self) {
        self.wake.notified().await;
    }

    /// Forget injected commands and release the hold (end of a connection).
    pub fn clear(&self) {
        let mut state = self.lock();
        state.priority.clear();
        state.held = false;
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PrinterLink for DispatchQueue {
    fn send_commands(&self, commands: Vec<String>) {
        if commands.is_empty() {
            return;
        }
        tracing::debug!(?commands, "Queueing injected commands");
        self.lock().priority.extend(commands);
        self.wake.notify_one();
    }

    fn suspend_dispatch(&self) {
        self.lock().held = true;
        tracing::debug!("Job dispatch on hold");
    }

    fn resume_dispatch(&self) {
        self.lock().held = false;
        tracing::debug!("Job dispatch resumed");
        self.wake.notify_one();
    }
}
