//! Exclusive media device acquisition
//!
//! A session acquires the microphone, speaker and (optionally) camera on
//! start and releases them on stop. Each acquisition hands back a
//! [`DeviceGuard`]; dropping it releases the device.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::audio::{AudioCapture, AudioOutput, CaptureStream, CpalOutput, PlaybackFinished};
use crate::video::{FrameSource, StillImageSource};
use crate::{Error, Result};

/// Releases a device when dropped
pub struct DeviceGuard {
    name: &'static str,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl DeviceGuard {
    /// Guard that runs `release` exactly once when dropped
    pub fn new(name: &'static str, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            name,
            release: Some(Box::new(release)),
        }
    }

    /// Guard for a device that needs no explicit release
    #[must_use]
    pub const fn noop(name: &'static str) -> Self {
        Self {
            name,
            release: None,
        }
    }

    /// Device label used in logs
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl Drop for DeviceGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
        tracing::debug!(device = self.name, "device released");
    }
}

impl std::fmt::Debug for DeviceGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceGuard").field("name", &self.name).finish()
    }
}

/// Source of the capture and playback devices a session needs
pub trait MediaDevices: Send + Sync {
    /// Acquire the microphone
    ///
    /// # Errors
    ///
    /// Returns error if the microphone is unavailable or permission is denied
    fn open_microphone(&self) -> Result<(CaptureStream, DeviceGuard)>;

    /// Acquire the speaker; finished buffers are reported on `finished`
    ///
    /// # Errors
    ///
    /// Returns error if no usable output device exists
    fn open_speaker(
        &self,
        finished: mpsc::UnboundedSender<PlaybackFinished>,
    ) -> Result<(Arc<dyn AudioOutput>, DeviceGuard)>;

    /// Acquire the camera
    ///
    /// # Errors
    ///
    /// Returns error if no camera source is available
    fn open_camera(&self) -> Result<(Box<dyn FrameSource>, DeviceGuard)>;
}

/// Devices of the local machine: cpal audio and a snapshot-file camera
#[derive(Debug, Clone, Default)]
pub struct SystemDevices {
    camera_snapshot: Option<PathBuf>,
}

impl SystemDevices {
    /// Use the default audio devices and, if given, a snapshot file as camera
    #[must_use]
    pub const fn new(camera_snapshot: Option<PathBuf>) -> Self {
        Self { camera_snapshot }
    }
}

impl MediaDevices for SystemDevices {
    fn open_microphone(&self) -> Result<(CaptureStream, DeviceGuard)> {
        AudioCapture::open()
    }

    fn open_speaker(
        &self,
        finished: mpsc::UnboundedSender<PlaybackFinished>,
    ) -> Result<(Arc<dyn AudioOutput>, DeviceGuard)> {
        let (output, guard) = CpalOutput::open(finished)?;
        let output: Arc<dyn AudioOutput> = output;
        Ok((output, guard))
    }

    fn open_camera(&self) -> Result<(Box<dyn FrameSource>, DeviceGuard)> {
        let path = self
            .camera_snapshot
            .clone()
            .ok_or_else(|| Error::Video("no camera source configured".to_string()))?;
        Ok((
            Box::new(StillImageSource::new(path)),
            DeviceGuard::noop("camera"),
        ))
    }
}
