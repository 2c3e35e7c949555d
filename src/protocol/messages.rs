//! Wire envelope for the live conversation service
//!
//! Inbound frames carry exactly one of a handful of top-level keys; outbound
//! frames are externally tagged by their single key. Field names are
//! camelCase on the wire.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// =============================================================================
// Inbound
// =============================================================================

/// Raw inbound frame before classification
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    /// Present (usually as `{}`) once the setup frame was accepted
    #[serde(default)]
    pub setup_complete: Option<Value>,
    /// Conversational content
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    /// Tool invocation request
    #[serde(default)]
    pub tool_call: Option<ToolCall>,
    /// Withdrawn tool invocations
    #[serde(default)]
    pub tool_call_cancellation: Option<ToolCallCancellation>,
    /// Remote-initiated shutdown warning
    #[serde(default)]
    pub go_away: Option<GoAway>,
}

/// Conversational content of one frame
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    /// Model output parts (audio and text)
    #[serde(default)]
    pub model_turn: Option<ModelTurn>,
    /// Partial transcription of the user's speech
    #[serde(default)]
    pub input_transcription: Option<Transcription>,
    /// Transcription of the model's speech
    #[serde(default)]
    pub output_transcription: Option<Transcription>,
    /// The model finished its turn
    #[serde(default)]
    pub turn_complete: bool,
    /// The user talked over the model
    #[serde(default)]
    pub interrupted: bool,
}

/// Ordered model output parts
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ModelTurn {
    /// Parts in arrival order
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// One model output part
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    /// Inline text
    #[serde(default)]
    pub text: Option<String>,
    /// Inline binary payload (audio)
    #[serde(default)]
    pub inline_data: Option<InlineData>,
}

/// Base64 payload with its mime type
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    /// e.g. `audio/pcm;rate=24000`
    #[serde(default)]
    pub mime_type: String,
    /// Base64 data
    #[serde(default)]
    pub data: String,
}

impl InlineData {
    /// Whether this payload is PCM audio
    #[must_use]
    pub fn is_audio(&self) -> bool {
        self.mime_type.starts_with("audio/")
    }
}

/// Transcription fragment
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Transcription {
    /// Recognized text
    #[serde(default)]
    pub text: String,
}

/// Tool invocation request
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    /// Invocations in this batch
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

/// One requested invocation
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FunctionCall {
    /// Correlation id assigned by the remote
    #[serde(default)]
    pub id: String,
    /// Capability name
    pub name: String,
    /// Arguments, untyped
    #[serde(default)]
    pub args: Map<String, Value>,
}

/// Tool invocations the remote no longer wants answered
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ToolCallCancellation {
    /// Withdrawn correlation ids
    #[serde(default)]
    pub ids: Vec<String>,
}

/// Shutdown warning
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    /// Remaining time hint, e.g. `"30s"`
    #[serde(default)]
    pub time_left: Option<String>,
}

// =============================================================================
// Outbound
// =============================================================================

/// Frame sent to the remote service
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    /// One-time session setup
    Setup(Setup),
    /// Streamed microphone/camera media
    RealtimeInput(RealtimeInput),
    /// Result of one tool invocation
    ToolResponse(ToolResponse),
}

impl ClientMessage {
    /// A single media chunk
    #[must_use]
    pub fn media(mime_type: &str, data: String) -> Self {
        Self::RealtimeInput(RealtimeInput {
            media_chunks: vec![MediaChunk {
                mime_type: mime_type.to_string(),
                data,
            }],
        })
    }

    /// A response frame for exactly one invocation
    #[must_use]
    pub fn tool_response(id: String, name: String, response: Value) -> Self {
        Self::ToolResponse(ToolResponse {
            function_responses: vec![FunctionResponse { id, name, response }],
        })
    }

    /// Serialize to the JSON text sent on the wire
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Setup payload
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    /// Remote model identifier
    pub model: String,
    /// Output configuration
    pub generation_config: GenerationConfig,
    /// System prompt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    /// Tool declarations
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
    /// Ask the remote to transcribe user speech
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<Map<String, Value>>,
    /// Ask the remote to transcribe its own speech
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<Map<String, Value>>,
}

/// Output modalities and voice
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    /// e.g. `["AUDIO"]`
    pub response_modalities: Vec<String>,
    /// Voice selection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

/// Voice selection
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    /// Voice wrapper
    pub voice_config: VoiceConfig,
}

/// Voice wrapper
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    /// Named prebuilt voice
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

/// Named prebuilt voice
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    /// Voice name, e.g. `"Aoede"`
    pub voice_name: String,
}

/// Text content
#[derive(Debug, Clone, Serialize)]
pub struct Content {
    /// Text parts
    pub parts: Vec<TextPart>,
}

impl Content {
    /// Content with a single text part
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![TextPart { text: text.into() }],
        }
    }
}

/// Text part
#[derive(Debug, Clone, Serialize)]
pub struct TextPart {
    /// Text
    pub text: String,
}

/// Streamed media
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    /// Media chunks
    pub media_chunks: Vec<MediaChunk>,
}

/// One base64 media payload
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    /// e.g. `audio/pcm;rate=16000` or `image/jpeg`
    pub mime_type: String,
    /// Base64 data
    pub data: String,
}

/// Tool results
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    /// One entry per answered invocation
    pub function_responses: Vec<FunctionResponse>,
}

/// Result for one invocation
#[derive(Debug, Clone, Serialize)]
pub struct FunctionResponse {
    /// Correlation id copied from the request
    pub id: String,
    /// Capability name copied from the request
    pub name: String,
    /// `{"result": ...}` or `{"error": message}`
    pub response: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_frame_shape() {
        let message = ClientMessage::media("audio/pcm;rate=16000", "AAAA".into());
        let json = serde_json::to_value(message).unwrap();
        assert_eq!(json["realtimeInput"]["mediaChunks"][0]["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(json["realtimeInput"]["mediaChunks"][0]["data"], "AAAA");
    }

    #[test]
    fn tool_response_shape() {
        let msg = ClientMessage::tool_response(
            "a".into(),
            "list_favourites".into(),
            serde_json::json!({"result": []}),
        );
        let json = serde_json::to_value(msg).unwrap();
        let response = &json["toolResponse"]["functionResponses"][0];
        assert_eq!(response["id"], "a");
        assert_eq!(response["name"], "list_favourites");
        assert!(response["response"]["result"].is_array());
    }

    #[test]
    fn setup_skips_empty_fields() {
        let setup = ClientMessage::Setup(Setup {
            model: "models/live".into(),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".into()],
                speech_config: None,
            },
            system_instruction: None,
            tools: Vec::new(),
            input_audio_transcription: None,
            output_audio_transcription: None,
        });
        let json = serde_json::to_value(setup).unwrap();
        let obj = json["setup"].as_object().unwrap();
        assert_eq!(obj.len(), 2);
        assert_eq!(json["setup"]["generationConfig"]["responseModalities"][0], "AUDIO");
    }

    #[test]
    fn parses_content_flags() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"serverContent":{"turnComplete":true}}"#).unwrap();
        let content = msg.server_content.unwrap();
        assert!(content.turn_complete);
        assert!(!content.interrupted);
        assert!(content.model_turn.is_none());
    }
}
