//! Session lifecycle state machine
//!
//! Only legal transitions are applied; anything else is ignored and reported
//! as `None`. While tools run, the state that was interrupted by the tool
//! call is retained and keeps tracking speaking/listening changes so the
//! session returns to the right place once every response is sent.

use std::fmt;

use serde::Serialize;

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No session
    #[default]
    Idle,
    /// Token fetched or connection opening, setup not yet acknowledged
    Connecting,
    /// Waiting for the user
    Listening,
    /// The user finished speaking, waiting for the model
    Thinking,
    /// Model audio is playing
    Speaking,
    /// Tool invocations are running
    ToolExecuting,
    /// A fatal fault ended the session
    Error,
}

impl SessionState {
    /// Whether a session currently holds devices and a connection
    #[must_use]
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::Idle | Self::Error)
    }

    /// Wire/log name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Listening => "listening",
            Self::Thinking => "thinking",
            Self::Speaking => "speaking",
            Self::ToolExecuting => "tool_executing",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that may move the session between states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// `start` was called
    Start,
    /// The remote acknowledged the setup frame
    SetupAcknowledged,
    /// The caller signalled the user finished an utterance
    UserUtterance,
    /// The first chunk of model audio was scheduled
    PlaybackStarted,
    /// The remote finished its turn
    TurnComplete,
    /// The audio clock caught up with everything scheduled
    PlaybackDrained,
    /// The remote reported the user talked over the model
    Interrupted,
    /// A tool call batch arrived
    ToolCallReceived,
    /// No tool invocations remain in flight
    ToolCallsSettled,
    /// Transport error or fatal capture failure
    Failed,
    /// The transport closed
    Closed,
    /// `stop` was called
    Stop,
}

/// An applied state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// State before
    pub from: SessionState,
    /// State after
    pub to: SessionState,
    /// What caused it
    pub trigger: Trigger,
}

/// Authority over the session state
#[derive(Debug, Clone, Default)]
pub struct SessionStateMachine {
    state: SessionState,
    before_tools: Option<SessionState>,
}

impl SessionStateMachine {
    /// Machine in [`SessionState::Idle`]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// State the session returns to when tools settle
    #[must_use]
    pub const fn state_before_tools(&self) -> Option<SessionState> {
        self.before_tools
    }

    /// Apply `trigger`, returning the visible transition if one happened
    pub fn fire(&mut self, trigger: Trigger) -> Option<Transition> {
        use SessionState as S;
        use Trigger as T;

        let from = self.state;

        let to = match (from, trigger) {
            (S::Idle | S::Error, T::Start) => S::Connecting,
            (S::Connecting, T::SetupAcknowledged) => S::Listening,
            (S::Listening, T::UserUtterance) => S::Thinking,
            (S::Listening | S::Thinking, T::PlaybackStarted) => S::Speaking,
            (S::Speaking, T::TurnComplete | T::PlaybackDrained | T::Interrupted) => S::Listening,

            (S::Connecting | S::Listening | S::Thinking | S::Speaking, T::ToolCallReceived) => {
                self.before_tools = Some(from);
                S::ToolExecuting
            }
            (S::ToolExecuting, T::ToolCallsSettled) => {
                self.before_tools.take().unwrap_or(S::Listening)
            }
            (
                S::ToolExecuting,
                T::PlaybackStarted | T::TurnComplete | T::PlaybackDrained | T::Interrupted,
            ) => {
                self.retain_across_tools(trigger);
                return None;
            }

            (S::Idle | S::Error, T::Failed) => return None,
            (_, T::Failed) => S::Error,
            (S::Idle | S::Error, T::Closed) => return None,
            (_, T::Closed) => S::Idle,
            (S::Idle, T::Stop) => return None,
            (_, T::Stop) => S::Idle,

            _ => return None,
        };

        if matches!(to, S::Idle | S::Error) {
            self.before_tools = None;
        }

        self.state = to;
        Some(Transition { from, to, trigger })
    }

    /// Track speaking/listening changes while the visible state is tool execution
    fn retain_across_tools(&mut self, trigger: Trigger) {
        let Some(prior) = self.before_tools else {
            return;
        };

        use SessionState as S;
        use Trigger as T;

        let updated = match (prior, trigger) {
            (S::Listening | S::Thinking, T::PlaybackStarted) => S::Speaking,
            (S::Speaking, T::TurnComplete | T::PlaybackDrained | T::Interrupted) => S::Listening,
            _ => prior,
        };

        if updated != prior {
            tracing::trace!(
                from = %prior,
                to = %updated,
                "retained state updated during tool execution"
            );
            self.before_tools = Some(updated);
        }
    }
}
