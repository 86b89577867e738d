//! Operator-facing notifications.
//!
//! The engine pushes small JSON messages to whatever UI is attached. Payload
//! keys (`abl_counter`, `abl_always`, `abl_notify`) are what existing
//! front-ends already understand.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UiEvent {
    /// `(prints since last mesh, print-count threshold)`
    #[serde(rename = "abl_counter")]
    Counter(u32, i64),

    /// Current "always re-level" override.
    #[serde(rename = "abl_always")]
    AlwaysRelevel(bool),

    /// One-shot `(title, message)` popup.
    #[serde(rename = "abl_notify")]
    Notify(String, String),
}

impl UiEvent {
    pub fn unsupported_firmware() -> Self {
        UiEvent::Notify(
            "SmartABL: disabled".to_string(),
            "Unknown firmware. Bed leveling commands are passed through unchanged.".to_string(),
        )
    }
}

/// Sink for UI events. Delivery is best effort.
pub trait Notifier: Send + Sync {
    fn publish(&self, event: UiEvent);
}

/// Writes every event to the log as JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn publish(&self, event: UiEvent) {
        match serde_json::to_string(&event) {
            Ok(json) => tracing::info!(target: "smart_abl::ui", "{json}"),
            Err(e) => tracing::warn!(error = %e, "Failed to encode UI event"),
        }
    }
}

/// Forwards events to an mpsc channel (web socket bridge, tests).
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<UiEvent>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<UiEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn publish(&self, event: UiEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("UI channel closed, dropping event");
        }
    }
}
