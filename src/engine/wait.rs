//! Bounded wait for the mesh query.
//!
//! While dispatch is held, a timer task races a cancellation token. If the
//! timer wins it queues `@SMARTABLDECIDE <generation>` on the printer link;
//! the marker comes back through the engine's host-command hook, which only
//! acts when the generation still matches the outstanding query. That check
//! plus the token makes the decision happen exactly once.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::commands::{decide_marker, PrinterLink};

/// Handle on a running wait. Dropping it does not cancel the timer.
#[derive(Debug)]
pub struct WaitHandle {
    generation: u64,
    cancel: CancellationToken,
}

impl WaitHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Stop the timer. A no-op once it has fired.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Start the timer for `generation`.
///
/// Returns `None` when called outside a tokio runtime; the caller has to
/// decide immediately in that case.
pub fn arm(generation: u64, timeout: Duration, link: Arc<dyn PrinterLink>) -> Option<WaitHandle> {
    let handle = match tokio::runtime::Handle::try_current() {
        Ok(handle) => handle,
        Err(e) => {
            warn!(error = %e, "No async runtime for the mesh query timer");
            return None;
        }
    };

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    handle.spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {
                debug!(generation, "Mesh query answered before timeout");
            }
            _ = tokio::time::sleep(timeout) => {
                if token.is_cancelled() {
                    return;
                }
                warn!(
                    generation,
                    timeout_secs = timeout.as_secs_f64(),
                    "Mesh query timed out, deciding with last known mesh state"
                );
                link.send_commands(vec![decide_marker(generation)]);
            }
        }
    });

    Some(WaitHandle { generation, cancel })
}
