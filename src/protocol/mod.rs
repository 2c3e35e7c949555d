//! Live conversation wire protocol

mod dispatcher;
mod messages;

pub use dispatcher::{Dispatcher, InboundFrame, classify};
pub use messages::{
    ClientMessage, Content, FunctionCall, FunctionResponse, GenerationConfig, GoAway, InlineData,
    MediaChunk, ModelTurn, Part, PrebuiltVoiceConfig, RealtimeInput, ServerContent, ServerMessage,
    Setup, SpeechConfig, TextPart, ToolCall, ToolCallCancellation, ToolResponse, Transcription,
    VoiceConfig,
};
