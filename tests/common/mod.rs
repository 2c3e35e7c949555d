//! Shared test utilities
//!
//! Hardware-free stand-ins for the microphone, speaker and network so a full
//! session can be driven from a test.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use image::{DynamicImage, RgbImage};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{Notify, mpsc};
use url::Url;

use sous_live::audio::{AudioOutput, CaptureEvent, CaptureStream, PlaybackFinished};
use sous_live::devices::{DeviceGuard, MediaDevices};
use sous_live::session::{SessionConfig, SessionController, SessionDeps, SessionState};
use sous_live::tools::{InMemoryStore, MemoryRecord, MemoryStore};
use sous_live::transport::{Connector, RemoteEnd, TransportEvent, TransportHandle, channel};
use sous_live::video::FrameSource;
use sous_live::{Error, Result, StaticTokenProvider};

/// How long a test waits for something asynchronous to happen
pub const WAIT: Duration = Duration::from_secs(2);

/// Speaker with a hand-driven clock
#[derive(Default)]
pub struct FakeOutput {
    now: Mutex<f64>,
    scheduled: Mutex<Vec<(f64, usize)>>,
    clears: AtomicUsize,
}

impl FakeOutput {
    /// Move the audio clock
    pub fn set_time(&self, now: f64) {
        *self.now.lock() = now;
    }

    /// `(start, frames)` of everything scheduled so far
    pub fn scheduled(&self) -> Vec<(f64, usize)> {
        self.scheduled.lock().clone()
    }

    /// How often queued audio was discarded
    pub fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

impl AudioOutput for FakeOutput {
    fn current_time(&self) -> f64 {
        *self.now.lock()
    }

    fn schedule(&self, start: f64, samples: Vec<f32>) {
        self.scheduled.lock().push((start, samples.len()));
    }

    fn clear(&self) {
        self.clears.fetch_add(1, Ordering::SeqCst);
    }
}

/// Camera handed out by [`FakeDevices`]
#[derive(Debug, Clone, Copy, Default)]
pub struct FakeCamera {
    /// Every capture errors
    pub fail_capture: bool,
}

impl FrameSource for FakeCamera {
    fn capture(&mut self) -> Result<DynamicImage> {
        if self.fail_capture {
            return Err(Error::Video("lens cap on".to_string()));
        }
        Ok(DynamicImage::ImageRgb8(RgbImage::new(64, 48)))
    }
}

/// Devices backed by channels the test controls
#[derive(Default)]
pub struct FakeDevices {
    pub output: Arc<FakeOutput>,
    pub fail_microphone: bool,
    /// Camera to hand out; `None` refuses to open one
    pub camera: Option<FakeCamera>,
    pub(crate) finished: Mutex<Option<mpsc::UnboundedSender<PlaybackFinished>>>,
    pub(crate) microphone: Mutex<Option<mpsc::Sender<CaptureEvent>>>,
    pub(crate) opened: AtomicUsize,
    pub(crate) released: Arc<AtomicUsize>,
}

impl FakeDevices {
    /// Devices whose microphone refuses to open
    pub fn without_microphone() -> Self {
        Self {
            fail_microphone: true,
            ..Self::default()
        }
    }

    /// Number of devices acquired so far
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Number of devices released so far
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Report that a scheduled buffer finished playing
    pub fn finish_playback(&self) {
        if let Some(tx) = self.finished.lock().as_ref() {
            let at = self.output.current_time();
            let _ = tx.send(PlaybackFinished { at });
        }
    }

    /// Feed a buffer into the microphone
    pub async fn speak(&self, event: CaptureEvent) {
        let tx = self.microphone.lock().clone().expect("microphone not open");
        tx.send(event).await.expect("capture stream closed");
    }

    fn guard(&self, name: &'static str) -> DeviceGuard {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let released = Arc::clone(&self.released);
        DeviceGuard::new(name, move || {
            released.fetch_add(1, Ordering::SeqCst);
        })
    }
}

impl MediaDevices for FakeDevices {
    fn open_microphone(&self) -> Result<(CaptureStream, DeviceGuard)> {
        if self.fail_microphone {
            return Err(Error::Audio("microphone permission denied".to_string()));
        }
        let (tx, rx) = mpsc::channel(16);
        *self.microphone.lock() = Some(tx);
        Ok((CaptureStream::new(16000, 1, rx), self.guard("microphone")))
    }

    fn open_speaker(
        &self,
        finished: mpsc::UnboundedSender<PlaybackFinished>,
    ) -> Result<(Arc<dyn AudioOutput>, DeviceGuard)> {
        *self.finished.lock() = Some(finished);
        let output: Arc<dyn AudioOutput> = self.output.clone();
        Ok((output, self.guard("speaker")))
    }

    fn open_camera(&self) -> Result<(Box<dyn FrameSource>, DeviceGuard)> {
        match self.camera {
            Some(camera) => Ok((Box::new(camera), self.guard("camera"))),
            None => Err(Error::Video("no camera attached".to_string())),
        }
    }
}

/// Connector handing out in-process transports
#[derive(Default)]
pub struct LoopbackConnector {
    pub(crate) remote: Mutex<Option<RemoteEnd>>,
    pub(crate) urls: Mutex<Vec<Url>>,
    pub refuse: bool,
    /// When set, connecting waits for a notification
    pub gate: Option<Arc<Notify>>,
}

impl LoopbackConnector {
    /// Take the remote side of the latest connection
    pub fn remote(&self) -> RemoteEnd {
        self.remote.lock().take().expect("no connection was made")
    }

    /// URLs connected to so far
    pub fn urls(&self) -> Vec<Url> {
        self.urls.lock().clone()
    }
}

#[async_trait::async_trait]
impl Connector for LoopbackConnector {
    async fn connect(&self, url: &Url) -> Result<TransportHandle> {
        self.urls.lock().push(url.clone());
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.refuse {
            return Err(Error::Transport("connection refused".to_string()));
        }
        let (handle, remote) = channel(64);
        *self.remote.lock() = Some(remote);
        Ok(handle)
    }
}

/// Memory store whose searches wait until released
#[derive(Default)]
pub struct GatedMemory {
    pub gate: Notify,
    inner: InMemoryStore,
}

#[async_trait::async_trait]
impl MemoryStore for GatedMemory {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<MemoryRecord>> {
        self.gate.notified().await;
        self.inner.search(query, top_k).await
    }

    async fn list_favourites(&self, limit: usize) -> Result<Vec<MemoryRecord>> {
        self.inner.list_favourites(limit).await
    }

    async fn add_memory(&self, text: &str, category: &str) -> Result<MemoryRecord> {
        self.inner.add_memory(text, category).await
    }
}

/// Memory store whose searches panic
#[derive(Default)]
pub struct PanickingMemory;

#[async_trait::async_trait]
impl MemoryStore for PanickingMemory {
    async fn search(&self, _query: &str, _top_k: usize) -> Result<Vec<MemoryRecord>> {
        panic!("memory index corrupted");
    }

    async fn list_favourites(&self, _limit: usize) -> Result<Vec<MemoryRecord>> {
        Ok(Vec::new())
    }

    async fn add_memory(&self, text: &str, category: &str) -> Result<MemoryRecord> {
        Ok(MemoryRecord::new(text, category))
    }
}

/// A controller wired to fakes
pub struct Harness {
    pub controller: SessionController,
    pub devices: Arc<FakeDevices>,
    pub connector: Arc<LoopbackConnector>,
}

impl Harness {
    /// Harness with default fakes and a few favourites in memory
    pub fn new() -> Self {
        let memory = InMemoryStore::with_records(vec![
            MemoryRecord::new("shakshuka", "recipe").favourite(),
            MemoryRecord::new("no cilantro", "preference"),
        ]);
        Self::with(FakeDevices::default(), LoopbackConnector::default(), Arc::new(memory))
    }

    /// Harness with the given fakes
    pub fn with(
        devices: FakeDevices,
        connector: LoopbackConnector,
        memory: Arc<dyn MemoryStore>,
    ) -> Self {
        Self::with_config(devices, connector, memory, |_| {})
    }

    /// Harness with the given fakes and an adjusted session config
    pub fn with_config(
        devices: FakeDevices,
        connector: LoopbackConnector,
        memory: Arc<dyn MemoryStore>,
        configure: impl FnOnce(&mut SessionConfig),
    ) -> Self {
        let devices = Arc::new(devices);
        let connector = Arc::new(connector);
        let endpoint = Url::parse("wss://live.example.test/ws").expect("valid url");
        let mut config = SessionConfig::new(endpoint);
        configure(&mut config);

        let controller = SessionController::new(
            config,
            SessionDeps {
                tokens: Arc::new(StaticTokenProvider::new("test-token")),
                connector: connector.clone(),
                devices: devices.clone(),
                memory,
            },
        );

        Self {
            controller,
            devices,
            connector,
        }
    }

    /// Start, acknowledge setup and wait for `listening`
    pub async fn listening(&self) -> RemoteEnd {
        self.controller.start().await.expect("start failed");
        let mut remote = self.connector.remote();
        let setup = next_frame(&mut remote, "setup").await;
        assert!(setup["setup"]["model"].is_string());
        inject(&remote, r#"{"setupComplete":{}}"#).await;
        wait_for_state(&self.controller, SessionState::Listening).await;
        remote
    }
}

/// Deliver an inbound text frame
pub async fn inject(remote: &RemoteEnd, text: &str) {
    remote
        .inbound
        .send(TransportEvent::Message(text.to_string()))
        .await
        .expect("session reader gone");
}

/// Next outbound frame with top-level `key`, skipping others
pub async fn next_frame(remote: &mut RemoteEnd, key: &str) -> Value {
    tokio::time::timeout(WAIT, async {
        loop {
            let text = remote.sent.recv().await.expect("transport closed");
            let value: Value = serde_json::from_str(&text).expect("outbound frame is json");
            if value.get(key).is_some() {
                return value;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no {key} frame within {WAIT:?}"))
}

/// Whether any outbound frame with top-level `key` shows up within `within`
pub async fn frame_arrives(remote: &mut RemoteEnd, key: &str, within: Duration) -> bool {
    tokio::time::timeout(within, async {
        loop {
            let Some(text) = remote.sent.recv().await else {
                // Closed transport: nothing more can arrive
                return std::future::pending::<()>().await;
            };
            let value: Value = serde_json::from_str(&text).expect("outbound frame is json");
            if value.get(key).is_some() {
                return;
            }
        }
    })
    .await
    .is_ok()
}

/// Poll until the controller reaches `state`
pub async fn wait_for_state(controller: &SessionController, state: SessionState) {
    tokio::time::timeout(WAIT, async {
        while controller.state() != state {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("state {} never reached, still {}", state, controller.state()));
}

/// Poll until `condition` holds
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never became true");
}
