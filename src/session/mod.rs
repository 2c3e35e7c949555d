//! Live session lifecycle

mod controller;
pub(crate) mod shared;
mod state;

pub use controller::{
    DEFAULT_ENDPOINT, DEFAULT_MODEL, SessionConfig, SessionController, SessionDeps, VideoSettings,
};
pub use state::{SessionState, SessionStateMachine, Transition, Trigger};
