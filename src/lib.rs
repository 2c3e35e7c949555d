//! Sous Live - real-time voice/video assistant sessions
//!
//! This library runs one live conversation with a cloud conversation
//! service at a time:
//! - Microphone capture, chunked as 16 kHz PCM
//! - Gapless scheduled playback of streamed model speech
//! - Optional periodic camera frames
//! - Tool invocations answered mid-conversation
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 SessionController                    │
//! │   start  │  stop  │  state  │  events               │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │   Capture  │  Video  │  Dispatcher  │  Tools        │
//! │            │         │  Playback    │               │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │              Transport (WebSocket)                   │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod devices;
pub mod error;
pub mod events;
pub mod protocol;
pub mod session;
pub mod token;
pub mod tools;
pub mod transport;
pub mod video;

pub use config::Config;
pub use devices::{DeviceGuard, MediaDevices, SystemDevices};
pub use error::{Error, Result};
pub use events::{Notifier, SessionEvent};
pub use session::{SessionConfig, SessionController, SessionDeps, SessionState};
pub use token::{HttpTokenProvider, SessionToken, StaticTokenProvider, TokenProvider};
pub use tools::{HttpMemoryStore, InMemoryStore, MemoryStore};
pub use transport::{Connector, WebSocketConnector};
