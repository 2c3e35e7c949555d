//! Public session orchestrator
//!
//! `start` fetches a token, opens the transport, sends the setup frame and
//! acquires devices, then spawns the session tasks:
//!
//! - reader: inbound frames through the [`Dispatcher`]
//! - playback: finished-buffer notifications
//! - capture: microphone chunks to the transport
//! - video: periodic frames to the transport (optional)
//!
//! `stop` is the single cancellation path and may be called at any time.

use std::sync::Arc;
use std::time::Duration;

use secrecy::ExposeSecret;
use tokio::sync::{broadcast, mpsc};
use url::Url;

use super::shared::{ActiveSession, SessionShared};
use super::state::{SessionState, Trigger};
use crate::audio::{AUDIO_MIME_TYPE, AudioCaptureEncoder, PlaybackScheduler};
use crate::devices::MediaDevices;
use crate::events::{Notifier, SessionEvent};
use crate::protocol::{
    ClientMessage, Content, Dispatcher, GenerationConfig, PrebuiltVoiceConfig, Setup, SpeechConfig,
    VoiceConfig,
};
use crate::token::{SessionToken, TokenProvider};
use crate::tools::{Capability, MemoryStore, ToolCallExecutor};
use crate::transport::{Connector, TransportEvent};
use crate::video::{
    FRAME_INTERVAL, JPEG_QUALITY, MAX_DIMENSION, VIDEO_MIME_TYPE, VideoFrameSampler,
};
use crate::{Error, Result};

/// Default live endpoint for ephemeral-token sessions
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContentConstrained";

/// Default remote model
pub const DEFAULT_MODEL: &str = "models/gemini-2.0-flash-live-001";

/// Camera sampling parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoSettings {
    /// Stream camera frames
    pub enabled: bool,
    /// Time between frames
    pub interval: Duration,
    /// Longest edge of a sent frame
    pub max_dimension: u32,
    /// JPEG quality (1-100)
    pub quality: u8,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: FRAME_INTERVAL,
            max_dimension: MAX_DIMENSION,
            quality: JPEG_QUALITY,
        }
    }
}

/// Parameters for every session a controller runs
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket endpoint; the token is appended as `access_token`
    pub endpoint: Url,
    /// Remote model, unless the token overrides it
    pub model: String,
    /// Prebuilt voice name
    pub voice: Option<String>,
    /// System instruction, unless the token overrides it
    pub system_instruction: Option<String>,
    /// Camera sampling
    pub video: VideoSettings,
}

impl SessionConfig {
    /// Config for `endpoint` with default model and no video
    #[must_use]
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            model: DEFAULT_MODEL.to_string(),
            voice: None,
            system_instruction: None,
            video: VideoSettings::default(),
        }
    }
}

/// Collaborators a controller relies on
#[derive(Clone)]
pub struct SessionDeps {
    /// Session token source
    pub tokens: Arc<dyn TokenProvider>,
    /// Transport factory
    pub connector: Arc<dyn Connector>,
    /// Microphone, speaker and camera
    pub devices: Arc<dyn MediaDevices>,
    /// Memory collaborators for tools
    pub memory: Arc<dyn MemoryStore>,
}

/// Runs at most one live session at a time
pub struct SessionController {
    config: SessionConfig,
    deps: SessionDeps,
    shared: Arc<SessionShared>,
    executor: Arc<ToolCallExecutor>,
}

impl SessionController {
    /// Create an idle controller
    #[must_use]
    pub fn new(config: SessionConfig, deps: SessionDeps) -> Self {
        let notifier = Notifier::default();
        let executor = Arc::new(ToolCallExecutor::new(Arc::clone(&deps.memory), notifier.clone()));
        Self {
            config,
            deps,
            shared: Arc::new(SessionShared::new(PlaybackScheduler::default(), notifier)),
            executor,
        }
    }

    /// Receive session events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.notifier().subscribe()
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.shared.lock().state()
    }

    /// Playback cursor on the output clock, in seconds
    #[must_use]
    pub fn next_play_time(&self) -> f64 {
        self.shared.lock().scheduler.next_play_time()
    }

    /// Number of tool invocations awaiting a response
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.shared.lock().in_flight.len()
    }

    /// Whether sessions stream camera frames
    #[must_use]
    pub const fn video_enabled(&self) -> bool {
        self.config.video.enabled
    }

    /// Signal that the user finished speaking (`listening -> thinking`)
    ///
    /// Returns whether the state changed.
    pub fn mark_thinking(&self) -> bool {
        self.shared.lock().fire(Trigger::UserUtterance).is_some()
    }

    /// Start a session
    ///
    /// Resolves once the setup frame is sent and devices are running; the
    /// session reaches `listening` when the remote acknowledges setup.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionActive`] if a session is already running, or
    /// the cause of failure, in which case the session is left in `error`
    pub async fn start(&self) -> Result<()> {
        let generation = {
            let mut core = self.shared.lock();
            if core.state().is_active() {
                return Err(Error::SessionActive);
            }
            core.generation += 1;
            core.fire(Trigger::Start);
            core.generation
        };

        match self.establish(generation).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.shared.fail(generation, &e.to_string());
                Err(e)
            }
        }
    }

    /// Stop the session and release everything it holds
    ///
    /// Idempotent and safe in any state, including during `start`.
    pub fn stop(&self) {
        self.shared.stop();
    }

    async fn establish(&self, generation: u64) -> Result<()> {
        let token = self.deps.tokens.fetch().await?;
        self.ensure_current(generation)?;

        let url = self.session_url(&token);
        let handle = self.deps.connector.connect(&url).await?;
        let transport = handle.transport.clone();
        // Dropping this on any early return closes the transport and releases devices
        let mut active = ActiveSession::new(handle.transport);
        self.ensure_current(generation)?;

        transport.send(&self.setup_message(&token)).await?;
        tracing::debug!("setup frame sent");

        let (finished_tx, mut finished_rx) = mpsc::unbounded_channel();
        let (output, speaker) = self.deps.devices.open_speaker(finished_tx)?;
        active.output = Some(Arc::clone(&output));
        active.devices.push(speaker);

        let (mut microphone, mic_guard) = self.deps.devices.open_microphone()?;
        active.devices.push(mic_guard);
        let encoder = AudioCaptureEncoder::for_stream(&microphone)?;

        let camera = if self.config.video.enabled {
            match self.deps.devices.open_camera() {
                Ok((source, guard)) => {
                    active.devices.push(guard);
                    Some(source)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "camera unavailable, continuing without video");
                    None
                }
            }
        } else {
            None
        };

        let dispatcher = Dispatcher::new(
            Arc::clone(&self.shared),
            output,
            transport.clone(),
            Arc::clone(&self.executor),
            generation,
        );

        let mut core = self.shared.lock();
        if core.generation != generation {
            return Err(Error::Session("session stopped during start".to_string()));
        }

        let mut events = handle.events;
        let shared = Arc::clone(&self.shared);
        let reader = dispatcher.clone();
        active.tasks.push(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    TransportEvent::Message(text) => reader.dispatch(&text),
                    TransportEvent::Closed { reason } => {
                        shared.close(generation, reason.as_deref());
                        return;
                    }
                    TransportEvent::Failed(message) => {
                        shared.fail(generation, &format!("transport failed: {message}"));
                        return;
                    }
                }
            }
            shared.close(generation, None);
        }));

        let playback = dispatcher;
        active.tasks.push(tokio::spawn(async move {
            while finished_rx.recv().await.is_some() {
                playback.playback_finished();
            }
        }));

        let shared = Arc::clone(&self.shared);
        let audio_transport = transport.clone();
        active.tasks.push(tokio::spawn(async move {
            let result = encoder
                .run(&mut microphone, |chunk| {
                    let message = ClientMessage::media(AUDIO_MIME_TYPE, chunk.data);
                    audio_transport.send_media(&message);
                })
                .await;
            if let Err(e) = result {
                shared.fail(generation, &format!("microphone failed: {e}"));
            }
        }));

        if let Some(source) = camera {
            let video = &self.config.video;
            let sampler =
                VideoFrameSampler::new(video.interval, video.max_dimension, video.quality);
            let video_transport = transport;
            active.tasks.push(tokio::spawn(async move {
                sampler
                    .run(source, |frame| {
                        let message = ClientMessage::media(VIDEO_MIME_TYPE, frame.data);
                        video_transport.send_media(&message);
                    })
                    .await;
            }));
        }

        core.in_flight.clear();
        core.scheduler.reset();
        core.active = Some(active);
        drop(core);

        tracing::info!(video = self.config.video.enabled, "session started");
        Ok(())
    }

    fn ensure_current(&self, generation: u64) -> Result<()> {
        if self.shared.lock().generation == generation {
            Ok(())
        } else {
            Err(Error::Session("session stopped during start".to_string()))
        }
    }

    fn session_url(&self, token: &SessionToken) -> Url {
        let mut url = self.config.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("access_token", token.token.expose_secret());
        url
    }

    fn setup_message(&self, token: &SessionToken) -> ClientMessage {
        let model = token.model.clone().unwrap_or_else(|| self.config.model.clone());
        let instruction = token
            .system_instruction
            .clone()
            .or_else(|| self.config.system_instruction.clone());

        ClientMessage::Setup(Setup {
            model,
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: self.config.voice.clone().map(|voice_name| SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig { voice_name },
                    },
                }),
            },
            system_instruction: instruction.map(Content::text),
            tools: vec![Capability::declarations()],
            input_audio_transcription: Some(serde_json::Map::new()),
            output_audio_transcription: Some(serde_json::Map::new()),
        })
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.shared.stop();
    }
}
