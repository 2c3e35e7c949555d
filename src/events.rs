//! Caller-facing session notifications
//!
//! Delivery is best-effort: events go out on a broadcast channel, a slow
//! receiver loses the oldest events, and sending never blocks protocol
//! processing.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::session::SessionState;

/// Default number of buffered events per receiver
pub const EVENT_CAPACITY: usize = 256;

/// Something the embedding application may want to know about
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The session moved between lifecycle states
    StateChanged {
        /// State before the transition
        from: SessionState,
        /// State after the transition
        to: SessionState,
    },
    /// Speech recognized by the remote service
    Transcript {
        /// Recognized text
        text: String,
        /// `false` for partial input transcription, `true` for output transcription
        is_final: bool,
    },
    /// Inline text produced by the model
    ModelText(String),
    /// A preference was persisted through the save-preference tool
    MemorySaved(String),
    /// Something went wrong; fatal errors are followed by a state change
    Error(String),
    /// The remote announced it will end the session soon
    GoAway {
        /// Remaining time hint as sent by the remote (e.g. `"30s"`)
        time_left: Option<String>,
    },
}

/// Fire-and-forget sender for [`SessionEvent`]s
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<SessionEvent>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(EVENT_CAPACITY)
    }
}

impl Notifier {
    /// Create a notifier buffering up to `capacity` events per receiver
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Register a new receiver
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Publish an event; dropped silently if nobody listens
    pub fn send(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }

    /// Publish a transcript, partial for the user and final for the model
    pub fn transcript(&self, text: impl Into<String>, is_final: bool) {
        self.send(SessionEvent::Transcript {
            text: text.into(),
            is_final,
        });
    }

    /// Publish that the assistant remembered `text`
    pub fn memory_saved(&self, text: impl Into<String>) {
        self.send(SessionEvent::MemorySaved(text.into()));
    }

    /// Publish a session error
    pub fn error(&self, message: impl Into<String>) {
        self.send(SessionEvent::Error(message.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_without_receivers_is_silent() {
        let notifier = Notifier::new(4);
        notifier.error("nobody is listening");
    }

    #[tokio::test]
    async fn receivers_see_events_in_order() {
        let notifier = Notifier::new(4);
        let mut rx = notifier.subscribe();
        notifier.transcript("hello", false);
        notifier.memory_saved("likes basil");

        assert_eq!(
            rx.recv().await.unwrap(),
            SessionEvent::Transcript {
                text: "hello".to_string(),
                is_final: false
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            SessionEvent::MemorySaved("likes basil".to_string())
        );
    }

    #[test]
    fn serializes_with_type_tag() {
        let json = serde_json::to_value(SessionEvent::GoAway {
            time_left: Some("30s".to_string()),
        })
        .unwrap();
        assert_eq!(json["type"], "go_away");
        assert_eq!(json["data"]["time_left"], "30s");
    }
}
