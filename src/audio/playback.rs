//! Gapless scheduled playback to speakers
//!
//! Inbound audio arrives in bursts; [`PlaybackScheduler`] keeps a running
//! cursor on the output's audio clock so consecutive chunks play back to back
//! in arrival order. [`CpalOutput`] renders scheduled buffers against a
//! frame-counting clock on the default output device.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::pcm::decode_chunk;
use crate::devices::DeviceGuard;
use crate::{Error, Result};

/// Sample rate of inbound model audio
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;

/// Push side of an audio output with its own clock
pub trait AudioOutput: Send + Sync {
    /// Current audio clock time in seconds
    fn current_time(&self) -> f64;

    /// Queue mono samples to start playing at `start` seconds on the clock
    fn schedule(&self, start: f64, samples: Vec<f32>);

    /// Drop everything queued, cutting off anything mid-playback
    fn clear(&self);
}

/// Placement of one chunk on the audio clock
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledChunk {
    /// Clock time the chunk starts playing
    pub start: f64,
    /// Chunk length in seconds
    pub duration: f64,
}

impl ScheduledChunk {
    /// Clock time the chunk finishes playing
    #[must_use]
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Running cursor that places chunks back to back
#[derive(Debug, Clone)]
pub struct PlaybackScheduler {
    sample_rate: u32,
    next_play_time: f64,
}

impl Default for PlaybackScheduler {
    fn default() -> Self {
        Self::new(OUTPUT_SAMPLE_RATE)
    }
}

impl PlaybackScheduler {
    /// Create a scheduler for audio at `sample_rate`
    #[must_use]
    pub const fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            next_play_time: 0.0,
        }
    }

    /// Where the next chunk will start, at the earliest
    #[must_use]
    pub const fn next_play_time(&self) -> f64 {
        self.next_play_time
    }

    /// Place `frames` samples on the clock given the current time `now`
    ///
    /// Starts at `max(now, next_play_time)` and advances the cursor by exactly
    /// the chunk duration.
    pub fn place(&mut self, now: f64, frames: usize) -> ScheduledChunk {
        let start = now.max(self.next_play_time);
        #[allow(clippy::cast_precision_loss)]
        let duration = frames as f64 / f64::from(self.sample_rate);
        self.next_play_time = start + duration;
        ScheduledChunk { start, duration }
    }

    /// Decode a base64 PCM payload and queue it on `output`
    ///
    /// Returns `None` for a payload holding no samples; nothing is scheduled
    /// and the cursor is untouched.
    ///
    /// # Errors
    ///
    /// Returns error if the payload cannot be decoded; the cursor is untouched
    pub fn enqueue(
        &mut self,
        output: &dyn AudioOutput,
        payload: &str,
    ) -> Result<Option<ScheduledChunk>> {
        let samples = decode_chunk(payload)?;
        if samples.is_empty() {
            return Ok(None);
        }
        let placed = self.place(output.current_time(), samples.len());
        output.schedule(placed.start, samples);
        Ok(Some(placed))
    }

    /// Snap the cursor back to `now` after the remote interrupted playback
    pub const fn interrupt(&mut self, now: f64) {
        self.next_play_time = now;
    }

    /// Whether the clock has caught up with everything scheduled
    #[must_use]
    pub fn is_drained(&self, now: f64) -> bool {
        // Half a frame of slack absorbs float error between frame counts and seconds
        let slack = 0.5 / f64::from(self.sample_rate);
        now + slack >= self.next_play_time
    }

    /// Return the cursor to zero for the next session
    pub const fn reset(&mut self) {
        self.next_play_time = 0.0;
    }
}

/// Notification that a scheduled buffer finished playing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackFinished {
    /// Clock time when the buffer ended
    pub at: f64,
}

struct QueuedBuffer {
    start_frame: u64,
    samples: Vec<f32>,
    position: usize,
}

/// Scheduled buffers shared between the scheduler side and the device callback
struct OutputQueue {
    buffers: VecDeque<QueuedBuffer>,
}

/// Plays scheduled audio on the default output device
///
/// The clock is the number of frames the device callback has rendered.
pub struct CpalOutput {
    sample_rate: u32,
    frames_played: Arc<AtomicU64>,
    queue: Arc<Mutex<OutputQueue>>,
}

impl CpalOutput {
    /// Open the default output device
    ///
    /// Finished buffers are reported on `finished`. Dropping the returned
    /// [`DeviceGuard`] stops the stream.
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn open(
        finished: mpsc::UnboundedSender<PlaybackFinished>,
    ) -> Result<(Arc<Self>, DeviceGuard)> {
        let output = Arc::new(Self {
            sample_rate: OUTPUT_SAMPLE_RATE,
            frames_played: Arc::new(AtomicU64::new(0)),
            queue: Arc::new(Mutex::new(OutputQueue {
                buffers: VecDeque::new(),
            })),
        });

        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<Result<()>>(1);
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
        let frames_played = Arc::clone(&output.frames_played);
        let queue = Arc::clone(&output.queue);

        std::thread::Builder::new()
            .name("sous-playback".to_string())
            .spawn(move || {
                let stream = match build_output_stream(frames_played, queue, finished) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let _ = stop_rx.recv();
                drop(stream);
                tracing::debug!("audio playback stopped");
            })?;

        ready_rx
            .recv()
            .map_err(|_| Error::Audio("playback thread exited during startup".to_string()))??;

        let guard = DeviceGuard::new("speaker", move || {
            let _ = stop_tx.send(());
        });

        Ok((output, guard))
    }
}

impl AudioOutput for CpalOutput {
    fn current_time(&self) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let frames = self.frames_played.load(Ordering::Acquire) as f64;
        frames / f64::from(self.sample_rate)
    }

    fn schedule(&self, start: f64, samples: Vec<f32>) {
        if samples.is_empty() {
            return;
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let start_frame = (start * f64::from(self.sample_rate)).round() as u64;
        self.queue.lock().buffers.push_back(QueuedBuffer {
            start_frame,
            samples,
            position: 0,
        });
    }

    fn clear(&self) {
        self.queue.lock().buffers.clear();
    }
}

fn build_output_stream(
    frames_played: Arc<AtomicU64>,
    queue: Arc<Mutex<OutputQueue>>,
    finished: mpsc::UnboundedSender<PlaybackFinished>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();

    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

    let supported_config = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(OUTPUT_SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(OUTPUT_SAMPLE_RATE)
        })
        .or_else(|| {
            // Fallback: try stereo
            device.supported_output_configs().ok()?.find(|c| {
                c.channels() == 2
                    && c.min_sample_rate() <= SampleRate(OUTPUT_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(OUTPUT_SAMPLE_RATE)
            })
        })
        .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

    let config: StreamConfig = supported_config
        .with_sample_rate(SampleRate(OUTPUT_SAMPLE_RATE))
        .config();
    let channels = usize::from(config.channels);

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = OUTPUT_SAMPLE_RATE,
        channels = config.channels,
        "audio playback initialized"
    );

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut queue = queue.lock();
                let mut clock = frames_played.load(Ordering::Acquire);

                for frame in data.chunks_mut(channels) {
                    let sample = next_sample(&mut queue.buffers, clock, &finished);
                    for out in frame.iter_mut() {
                        *out = sample;
                    }
                    clock += 1;
                }

                frames_played.store(clock, Ordering::Release);
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    Ok(stream)
}

/// Render the sample for clock frame `clock`, retiring finished buffers
fn next_sample(
    buffers: &mut VecDeque<QueuedBuffer>,
    clock: u64,
    finished: &mpsc::UnboundedSender<PlaybackFinished>,
) -> f32 {
    while let Some(front) = buffers.front_mut() {
        if front.position >= front.samples.len() {
            buffers.pop_front();
            #[allow(clippy::cast_precision_loss)]
            let at = clock as f64 / f64::from(OUTPUT_SAMPLE_RATE);
            let _ = finished.send(PlaybackFinished { at });
            continue;
        }

        if clock < front.start_frame {
            // Gap before the next chunk
            return 0.0;
        }

        let sample = front.samples[front.position];
        front.position += 1;
        return sample;
    }

    0.0
}
