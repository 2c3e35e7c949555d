//! Routing of inbound frames
//!
//! Each frame is classified by its top-level key in a fixed priority order
//! and routed to playback, the tool executor, or the state machine. Malformed
//! frames are dropped without affecting the session.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt as _;
use serde_json::{Value, json};

use super::messages::{ClientMessage, FunctionCall, GoAway, ServerContent, ServerMessage};
use crate::audio::AudioOutput;
use crate::events::SessionEvent;
use crate::session::Trigger;
use crate::session::shared::SessionShared;
use crate::tools::{ToolCallExecutor, ToolInvocation};
use crate::transport::Transport;
use crate::{Error, Result};

/// An inbound frame reduced to what the session acts on
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Setup acknowledged
    SetupComplete,
    /// Model content, transcriptions and turn signals
    Content(ServerContent),
    /// Tool invocations to execute
    ToolCall(Vec<FunctionCall>),
    /// Invocations to abandon without answering
    ToolCallCancellation(Vec<String>),
    /// Advisory shutdown notice
    GoAway(GoAway),
    /// Valid JSON with no key we understand
    Unrecognized(Value),
}

/// Parse and classify one inbound text frame
///
/// # Errors
///
/// Returns error if the frame is not a JSON object of the expected shape
pub fn classify(text: &str) -> Result<InboundFrame> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| Error::Protocol(format!("invalid json: {e}")))?;
    let message: ServerMessage = serde_json::from_value(value.clone())
        .map_err(|e| Error::Protocol(format!("unexpected frame shape: {e}")))?;

    let frame = if message.setup_complete.is_some() {
        InboundFrame::SetupComplete
    } else if let Some(content) = message.server_content {
        InboundFrame::Content(content)
    } else if let Some(call) = message.tool_call {
        InboundFrame::ToolCall(call.function_calls)
    } else if let Some(cancellation) = message.tool_call_cancellation {
        InboundFrame::ToolCallCancellation(cancellation.ids)
    } else if let Some(go_away) = message.go_away {
        InboundFrame::GoAway(go_away)
    } else {
        InboundFrame::Unrecognized(value)
    };

    Ok(frame)
}

/// Applies inbound frames to one session
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<SessionShared>,
    output: Arc<dyn AudioOutput>,
    transport: Transport,
    executor: Arc<ToolCallExecutor>,
    generation: u64,
}

impl Dispatcher {
    pub(crate) fn new(
        shared: Arc<SessionShared>,
        output: Arc<dyn AudioOutput>,
        transport: Transport,
        executor: Arc<ToolCallExecutor>,
        generation: u64,
    ) -> Self {
        Self {
            shared,
            output,
            transport,
            executor,
            generation,
        }
    }

    /// Handle one inbound text frame
    pub fn dispatch(&self, text: &str) {
        match classify(text) {
            Ok(InboundFrame::SetupComplete) => self.setup_complete(),
            Ok(InboundFrame::Content(content)) => self.content(content),
            Ok(InboundFrame::ToolCall(calls)) => self.tool_call(calls),
            Ok(InboundFrame::ToolCallCancellation(ids)) => self.cancel(&ids),
            Ok(InboundFrame::GoAway(go_away)) => {
                tracing::warn!(
                    time_left = go_away.time_left.as_deref().unwrap_or(""),
                    "remote will end session"
                );
                self.shared.notifier().send(SessionEvent::GoAway {
                    time_left: go_away.time_left,
                });
            }
            Ok(InboundFrame::Unrecognized(value)) => {
                let keys: Vec<&str> = value
                    .as_object()
                    .map(|obj| obj.keys().map(String::as_str).collect())
                    .unwrap_or_default();
                tracing::debug!(?keys, "unrecognized frame dropped");
            }
            Err(e) => {
                tracing::warn!(error = %e, len = text.len(), "malformed frame dropped");
            }
        }
    }

    /// A buffer finished playing; leave `speaking` once everything has
    pub fn playback_finished(&self) {
        let Some(mut core) = self.shared.lock_current(self.generation) else {
            return;
        };
        if core.scheduler.is_drained(self.output.current_time()) {
            core.fire(Trigger::PlaybackDrained);
        }
    }

    fn setup_complete(&self) {
        if let Some(mut core) = self.shared.lock_current(self.generation) {
            tracing::info!("session setup acknowledged");
            core.fire(Trigger::SetupAcknowledged);
        }
    }

    fn content(&self, content: ServerContent) {
        let notifier = self.shared.notifier();

        {
            let Some(mut core) = self.shared.lock_current(self.generation) else {
                return;
            };

            if content.interrupted {
                let now = self.output.current_time();
                core.scheduler.interrupt(now);
                self.output.clear();
                tracing::debug!(now, "playback interrupted");
                core.fire(Trigger::Interrupted);
            }

            let parts = content
                .model_turn
                .as_ref()
                .map(|turn| turn.parts.as_slice())
                .unwrap_or_default();
            let audio = parts
                .iter()
                .filter_map(|p| p.inline_data.as_ref())
                .filter(|d| d.is_audio());
            for data in audio {
                match core.scheduler.enqueue(self.output.as_ref(), &data.data) {
                    Ok(Some(placed)) => {
                        tracing::trace!(
                            start = placed.start,
                            duration = placed.duration,
                            "audio chunk scheduled"
                        );
                        core.fire(Trigger::PlaybackStarted);
                    }
                    Ok(None) => {
                        tracing::trace!("empty audio chunk skipped");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "audio chunk dropped");
                    }
                }
            }
        }

        if let Some(turn) = &content.model_turn {
            for text in turn.parts.iter().filter_map(|p| p.text.as_ref()) {
                notifier.send(SessionEvent::ModelText(text.clone()));
            }
        }
        if let Some(transcription) = content.input_transcription {
            notifier.transcript(transcription.text, false);
        }
        if let Some(transcription) = content.output_transcription {
            notifier.transcript(transcription.text, true);
        }

        if content.turn_complete
            && let Some(mut core) = self.shared.lock_current(self.generation)
        {
            tracing::debug!("model turn complete");
            core.fire(Trigger::TurnComplete);
        }
    }

    fn tool_call(&self, calls: Vec<FunctionCall>) {
        if calls.is_empty() {
            tracing::debug!("empty tool call ignored");
            return;
        }

        {
            let Some(mut core) = self.shared.lock_current(self.generation) else {
                return;
            };
            for call in &calls {
                core.in_flight.insert(call.id.clone(), call.name.clone());
            }
            core.fire(Trigger::ToolCallReceived);
        }

        tracing::info!(count = calls.len(), "tool call batch received");

        for call in calls {
            let invocation = ToolInvocation {
                id: call.id,
                name: call.name,
                args: call.args,
            };
            let this = self.clone();
            tokio::spawn(async move {
                this.run_invocation(invocation).await;
            });
        }
    }

    async fn run_invocation(&self, invocation: ToolInvocation) {
        // A panicking collaborator still owes the remote an answer
        let response = AssertUnwindSafe(self.executor.execute(&invocation))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                tracing::error!(id = %invocation.id, tool = %invocation.name, "tool panicked");
                json!({ "error": "tool panicked" })
            });

        // Cancelled or stopped while running: answer nothing
        let still_wanted = self
            .shared
            .lock_current(self.generation)
            .is_some_and(|core| core.in_flight.contains_key(&invocation.id));
        if !still_wanted {
            tracing::debug!(id = %invocation.id, "discarding result of abandoned tool call");
            return;
        }

        let message =
            ClientMessage::tool_response(invocation.id.clone(), invocation.name.clone(), response);
        if let Err(e) = self.transport.send(&message).await {
            tracing::warn!(id = %invocation.id, error = %e, "failed to send tool response");
        } else {
            tracing::debug!(id = %invocation.id, tool = %invocation.name, "tool response sent");
        }

        if let Some(mut core) = self.shared.lock_current(self.generation) {
            core.in_flight.remove(&invocation.id);
            if core.in_flight.is_empty() {
                core.fire(Trigger::ToolCallsSettled);
            }
        }
    }

    fn cancel(&self, ids: &[String]) {
        let Some(mut core) = self.shared.lock_current(self.generation) else {
            return;
        };
        for id in ids {
            if core.in_flight.remove(id).is_some() {
                tracing::info!(id = %id, "tool call cancelled by remote");
            } else {
                tracing::debug!(id = %id, "cancellation for unknown tool call");
            }
        }
        if core.in_flight.is_empty() {
            core.fire(Trigger::ToolCallsSettled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_in_priority_order() {
        assert_eq!(classify(r#"{"setupComplete":{}}"#).unwrap(), InboundFrame::SetupComplete);
        assert!(matches!(
            classify(r#"{"serverContent":{"interrupted":true}}"#).unwrap(),
            InboundFrame::Content(c) if c.interrupted
        ));
        // Setup wins over anything else in the same frame
        assert_eq!(
            classify(r#"{"setupComplete":{},"goAway":{"timeLeft":"1s"}}"#).unwrap(),
            InboundFrame::SetupComplete
        );
    }

    #[test]
    fn classifies_tool_frames() {
        let frame = classify(
            r#"{"toolCall":{"functionCalls":[{"id":"a","name":"list_favourites","args":{"limit":3}}]}}"#,
        )
        .unwrap();
        let InboundFrame::ToolCall(calls) = frame else {
            panic!("expected tool call");
        };
        assert_eq!(calls[0].id, "a");
        assert_eq!(calls[0].args["limit"], 3);

        assert_eq!(
            classify(r#"{"toolCallCancellation":{"ids":["a","b"]}}"#).unwrap(),
            InboundFrame::ToolCallCancellation(vec!["a".into(), "b".into()])
        );
    }

    #[test]
    fn go_away_and_unknown() {
        assert_eq!(
            classify(r#"{"goAway":{"timeLeft":"30s"}}"#).unwrap(),
            InboundFrame::GoAway(GoAway {
                time_left: Some("30s".into())
            })
        );
        assert!(matches!(
            classify(r#"{"usageMetadata":{}}"#).unwrap(),
            InboundFrame::Unrecognized(_)
        ));
    }

    #[test]
    fn malformed_frames_are_errors() {
        assert!(classify("not json").is_err());
        assert!(classify(r#"{"toolCall":{"functionCalls":[{"id":"a"}]}}"#).is_err());
    }
}
