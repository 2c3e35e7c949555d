//! Audio capture from microphone and chunk encoding
//!
//! The microphone is pulled through a [`CaptureStream`]; the
//! [`AudioCaptureEncoder`] turns whatever buffers the device delivers into
//! ~250 ms chunks of 16 kHz mono PCM ready for the transport.

use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use rubato::{FftFixedIn, Resampler};
use tokio::sync::mpsc;

use super::pcm::{encode_chunk, float_to_pcm16};
use crate::devices::DeviceGuard;
use crate::{Error, Result};

/// Sample rate expected by the remote service (16kHz for speech)
pub const INPUT_SAMPLE_RATE: u32 = 16000;

/// Duration of one outbound audio chunk
pub const CHUNK_INTERVAL: Duration = Duration::from_millis(250);

/// Mime type attached to outbound audio chunks
pub const AUDIO_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// Capacity of the buffer channel between the device thread and the encoder
const CAPTURE_CHANNEL_CAPACITY: usize = 64;

/// Resampler block size in input frames
const RESAMPLE_CHUNK: usize = 1024;

/// Something the capture device reported
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    /// One device buffer of interleaved float samples
    Buffer(Vec<f32>),
    /// The device failed; no more buffers will follow
    Failed(String),
}

/// Pull side of a live microphone
pub struct CaptureStream {
    sample_rate: u32,
    channels: u16,
    events: mpsc::Receiver<CaptureEvent>,
}

impl CaptureStream {
    /// Wrap a receiver fed by a capture device
    #[must_use]
    pub const fn new(
        sample_rate: u32,
        channels: u16,
        events: mpsc::Receiver<CaptureEvent>,
    ) -> Self {
        Self {
            sample_rate,
            channels,
            events,
        }
    }

    /// Native sample rate of the device
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Interleaved channel count of the device
    #[must_use]
    pub const fn channels(&self) -> u16 {
        self.channels
    }

    /// Wait for the next capture event
    ///
    /// Returns `None` once the device has been released.
    pub async fn next(&mut self) -> Option<CaptureEvent> {
        self.events.recv().await
    }
}

/// Captures audio from the default input device
///
/// The cpal stream lives on a dedicated thread so the returned handles stay
/// `Send`; dropping the [`DeviceGuard`] stops the stream and releases the
/// microphone.
pub struct AudioCapture;

impl AudioCapture {
    /// Open the default microphone
    ///
    /// Prefers 16kHz mono; otherwise falls back to the device default and
    /// leaves conversion to the encoder.
    ///
    /// # Errors
    ///
    /// Returns error if no input device is available or the stream cannot start
    pub fn open() -> Result<(CaptureStream, DeviceGuard)> {
        let (events_tx, events_rx) = mpsc::channel(CAPTURE_CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<Result<StreamConfig>>(1);
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

        std::thread::Builder::new()
            .name("sous-capture".to_string())
            .spawn(move || {
                let stream = match build_input_stream(events_tx) {
                    Ok((stream, config)) => {
                        let _ = ready_tx.send(Ok(config));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Park until the guard is dropped
                let _ = stop_rx.recv();
                drop(stream);
                tracing::debug!("audio capture stopped");
            })?;

        let config = ready_rx
            .recv()
            .map_err(|_| Error::Audio("capture thread exited during startup".to_string()))??;

        let stream = CaptureStream::new(config.sample_rate.0, config.channels, events_rx);
        let guard = DeviceGuard::new("microphone", move || {
            let _ = stop_tx.send(());
        });

        Ok((stream, guard))
    }
}

fn build_input_stream(events: mpsc::Sender<CaptureEvent>) -> Result<(cpal::Stream, StreamConfig)> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

    let preferred = device
        .supported_input_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.sample_format() == cpal::SampleFormat::F32
                && c.min_sample_rate() <= SampleRate(INPUT_SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(INPUT_SAMPLE_RATE)
        });

    let config = match preferred {
        Some(supported) => supported.with_sample_rate(SampleRate(INPUT_SAMPLE_RATE)).config(),
        None => device
            .default_input_config()
            .map_err(|e| Error::Audio(e.to_string()))?
            .config(),
    };

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = config.sample_rate.0,
        channels = config.channels,
        "audio capture initialized"
    );

    let error_events = events.clone();
    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                // Full channel means the encoder is behind; drop rather than block the device
                if events.try_send(CaptureEvent::Buffer(data.to_vec())).is_err() {
                    tracing::trace!("capture buffer dropped");
                }
            },
            move |err| {
                tracing::error!(error = %err, "audio capture error");
                let _ = error_events.try_send(CaptureEvent::Failed(err.to_string()));
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    tracing::debug!("audio capture started");

    Ok((stream, config))
}

/// One outbound block of base64 PCM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    /// Base64 of little-endian 16-bit samples
    pub data: String,
    /// Number of samples in the chunk
    pub samples: usize,
}

impl AudioChunk {
    /// Duration of the chunk at the input sample rate
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples as f64 / f64::from(INPUT_SAMPLE_RATE))
    }
}

/// Streaming resampler from the device rate to [`INPUT_SAMPLE_RATE`]
struct InputResampler {
    inner: FftFixedIn<f32>,
    carry: Vec<f32>,
}

impl InputResampler {
    fn new(from_rate: u32) -> Result<Self> {
        let inner = FftFixedIn::<f32>::new(
            from_rate as usize,
            INPUT_SAMPLE_RATE as usize,
            RESAMPLE_CHUNK,
            2,
            1,
        )
        .map_err(|e| Error::Audio(format!("failed to create resampler: {e}")))?;

        Ok(Self {
            inner,
            carry: Vec::new(),
        })
    }

    fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        self.carry.extend_from_slice(samples);
        let mut out = Vec::new();

        loop {
            let needed = self.inner.input_frames_next();
            if self.carry.len() < needed {
                break;
            }
            let block: Vec<f32> = self.carry.drain(..needed).collect();
            let frames = self
                .inner
                .process(&[block], None)
                .map_err(|e| Error::Audio(format!("resampling failed: {e}")))?;
            if let Some(channel) = frames.into_iter().next() {
                out.extend(channel);
            }
        }

        Ok(out)
    }
}

/// Turns raw capture buffers into fixed-interval [`AudioChunk`]s
pub struct AudioCaptureEncoder {
    channels: u16,
    chunk_samples: usize,
    pending: Vec<i16>,
    resampler: Option<InputResampler>,
}

impl AudioCaptureEncoder {
    /// Create an encoder for a device with the given native format
    ///
    /// # Errors
    ///
    /// Returns error if the format is unusable or a resampler cannot be built
    pub fn new(source_rate: u32, channels: u16, interval: Duration) -> Result<Self> {
        if source_rate == 0 || channels == 0 {
            return Err(Error::Audio(format!(
                "unsupported capture format: {source_rate} Hz, {channels} channels"
            )));
        }

        let resampler = if source_rate == INPUT_SAMPLE_RATE {
            None
        } else {
            tracing::debug!(from = source_rate, to = INPUT_SAMPLE_RATE, "resampling capture input");
            Some(InputResampler::new(source_rate)?)
        };

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let chunk_samples =
            (interval.as_secs_f64() * f64::from(INPUT_SAMPLE_RATE)).round() as usize;

        Ok(Self {
            channels,
            chunk_samples: chunk_samples.max(1),
            pending: Vec::with_capacity(chunk_samples),
            resampler,
        })
    }

    /// Encoder for a [`CaptureStream`] using the standard chunk interval
    ///
    /// # Errors
    ///
    /// Returns error if the stream format is unusable
    pub fn for_stream(stream: &CaptureStream) -> Result<Self> {
        Self::new(stream.sample_rate(), stream.channels(), CHUNK_INTERVAL)
    }

    /// Samples per emitted chunk at [`INPUT_SAMPLE_RATE`]
    #[must_use]
    pub const fn chunk_samples(&self) -> usize {
        self.chunk_samples
    }

    /// Feed one device buffer
    ///
    /// Returns a chunk once the accumulated audio reaches the chunk interval;
    /// the chunk holds everything accumulated so far.
    ///
    /// # Errors
    ///
    /// Returns error if resampling fails
    pub fn push(&mut self, buffer: &[f32]) -> Result<Option<AudioChunk>> {
        let mono = downmix(buffer, self.channels);
        let samples = match self.resampler.as_mut() {
            Some(resampler) => resampler.process(&mono)?,
            None => mono,
        };

        self.pending.extend(samples.iter().map(|&s| float_to_pcm16(s)));

        if self.pending.len() < self.chunk_samples {
            return Ok(None);
        }

        let chunk = AudioChunk {
            data: encode_chunk(&self.pending),
            samples: self.pending.len(),
        };
        self.pending.clear();
        Ok(Some(chunk))
    }

    /// Drive the encoder from a capture stream until it ends
    ///
    /// Every completed chunk is handed to `emit`. Returns `Ok` when the
    /// device is released and `Err` on the first capture failure.
    ///
    /// # Errors
    ///
    /// Returns error if the device reports a failure or resampling fails
    pub async fn run<F>(mut self, stream: &mut CaptureStream, mut emit: F) -> Result<()>
    where
        F: FnMut(AudioChunk) + Send,
    {
        while let Some(event) = stream.next().await {
            match event {
                CaptureEvent::Buffer(buffer) => {
                    if let Some(chunk) = self.push(&buffer)? {
                        tracing::trace!(samples = chunk.samples, "audio chunk ready");
                        emit(chunk);
                    }
                }
                CaptureEvent::Failed(message) => return Err(Error::Audio(message)),
            }
        }

        tracing::debug!("capture stream ended");
        Ok(())
    }
}

/// Average interleaved channels down to mono
fn downmix(buffer: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return buffer.to_vec();
    }

    let channels = usize::from(channels);
    #[allow(clippy::cast_precision_loss)]
    let scale = 1.0 / channels as f32;
    buffer
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() * scale)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_size_matches_interval() {
        let encoder = AudioCaptureEncoder::new(INPUT_SAMPLE_RATE, 1, CHUNK_INTERVAL).unwrap();
        assert_eq!(encoder.chunk_samples(), 4000);
    }

    #[test]
    fn rejects_zero_channels() {
        assert!(AudioCaptureEncoder::new(INPUT_SAMPLE_RATE, 0, CHUNK_INTERVAL).is_err());
    }

    #[test]
    fn downmix_averages_frames() {
        let mono = downmix(&[0.5, -0.5, 1.0, 0.0], 2);
        assert_eq!(mono, vec![0.0, 0.5]);
    }

    #[test]
    fn resampler_converts_rate() {
        let mut resampler = InputResampler::new(48000).unwrap();
        let out = resampler.process(&vec![0.0; 48000]).unwrap();
        // One second in, roughly one second out minus the resampler delay
        assert!(out.len() > 14000 && out.len() <= 16000, "got {}", out.len());
    }
}
