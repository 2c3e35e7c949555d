//! Best-effort periodic camera frames
//!
//! Video is optional context for the model. Frames are sampled on a fixed
//! interval, shrunk and JPEG-compressed, then sent fire-and-forget. Nothing
//! here can fail a session: capture and encode errors are logged and the
//! next tick tries again.

use std::io::Cursor;
use std::path::PathBuf;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::DynamicImage;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use tokio::time::MissedTickBehavior;

use crate::{Error, Result};

/// Interval between sampled frames
pub const FRAME_INTERVAL: Duration = Duration::from_secs(1);

/// Longest edge of a transmitted frame in pixels
pub const MAX_DIMENSION: u32 = 640;

/// JPEG quality factor (1-100)
pub const JPEG_QUALITY: u8 = 70;

/// Mime type attached to outbound frames
pub const VIDEO_MIME_TYPE: &str = "image/jpeg";

/// A live camera (or anything that can produce a current still)
pub trait FrameSource: Send {
    /// Grab the current frame
    ///
    /// # Errors
    ///
    /// Returns error if no frame is available right now
    fn capture(&mut self) -> Result<DynamicImage>;
}

/// Camera stand-in that re-reads an image file on every capture
///
/// Useful with an external tool that keeps overwriting a snapshot file.
#[derive(Debug, Clone)]
pub struct StillImageSource {
    path: PathBuf,
}

impl StillImageSource {
    /// Read frames from `path`
    #[must_use]
    pub const fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl FrameSource for StillImageSource {
    fn capture(&mut self) -> Result<DynamicImage> {
        image::open(&self.path)
            .map_err(|e| Error::Video(format!("failed to read {}: {e}", self.path.display())))
    }
}

/// One compressed frame ready to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    /// Base64 JPEG bytes
    pub data: String,
    /// Encoded width in pixels
    pub width: u32,
    /// Encoded height in pixels
    pub height: u32,
}

/// Downscale `image` to fit `max_dimension` and JPEG-encode it
///
/// # Errors
///
/// Returns error if JPEG encoding fails
pub fn compress_frame(
    image: &DynamicImage,
    max_dimension: u32,
    quality: u8,
) -> Result<VideoFrame> {
    let resized;
    let image = if image.width() > max_dimension || image.height() > max_dimension {
        resized = image.resize(max_dimension, max_dimension, FilterType::Triangle);
        &resized
    } else {
        image
    };

    let rgb = image.to_rgb8();
    let mut bytes = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100))
        .encode_image(&rgb)
        .map_err(|e| Error::Video(format!("jpeg encode failed: {e}")))?;

    Ok(VideoFrame {
        data: STANDARD.encode(bytes.into_inner()),
        width: rgb.width(),
        height: rgb.height(),
    })
}

/// Samples a [`FrameSource`] on a fixed interval
#[derive(Debug, Clone)]
pub struct VideoFrameSampler {
    interval: Duration,
    max_dimension: u32,
    quality: u8,
}

impl Default for VideoFrameSampler {
    fn default() -> Self {
        Self::new(FRAME_INTERVAL, MAX_DIMENSION, JPEG_QUALITY)
    }
}

impl VideoFrameSampler {
    /// Create a sampler
    #[must_use]
    pub const fn new(interval: Duration, max_dimension: u32, quality: u8) -> Self {
        Self {
            interval,
            max_dimension,
            quality,
        }
    }

    /// Sample one frame
    ///
    /// # Errors
    ///
    /// Returns error if capture or compression fails
    pub fn sample(&self, source: &mut dyn FrameSource) -> Result<VideoFrame> {
        let image = source.capture()?;
        compress_frame(&image, self.max_dimension, self.quality)
    }

    /// Sample forever, handing each frame to `emit`
    ///
    /// Runs until the surrounding task is cancelled. Capture and compression
    /// run on the blocking pool so a slow camera never stalls other tasks.
    /// Failed ticks are logged and skipped.
    pub async fn run<F>(&self, mut source: Box<dyn FrameSource>, mut emit: F)
    where
        F: FnMut(VideoFrame) + Send,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            let sampler = self.clone();
            let sampled = tokio::task::spawn_blocking(move || {
                let result = sampler.sample(source.as_mut());
                (source, result)
            })
            .await;

            let result = match sampled {
                Ok((returned, result)) => {
                    source = returned;
                    result
                }
                Err(e) => {
                    tracing::warn!(error = %e, "video capture task died, video stopped");
                    return;
                }
            };

            match result {
                Ok(frame) => {
                    tracing::trace!(
                        width = frame.width,
                        height = frame.height,
                        "video frame sampled"
                    );
                    emit(frame);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "video frame capture failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};

    use super::*;

    struct Gradient;

    impl FrameSource for Gradient {
        fn capture(&mut self) -> Result<DynamicImage> {
            #[allow(clippy::cast_possible_truncation)]
            let img =
                RgbImage::from_fn(1280, 720, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
            Ok(DynamicImage::ImageRgb8(img))
        }
    }

    /// Fails every other capture
    struct Flaky {
        calls: usize,
    }

    impl FrameSource for Flaky {
        fn capture(&mut self) -> Result<DynamicImage> {
            self.calls += 1;
            if self.calls % 2 == 0 {
                return Err(Error::Video("camera busy".to_string()));
            }
            Ok(DynamicImage::ImageRgb8(RgbImage::new(32, 24)))
        }
    }

    #[test]
    fn downscales_to_bounded_resolution() {
        let sampler = VideoFrameSampler::default();
        let frame = sampler.sample(&mut Gradient).unwrap();
        assert_eq!(frame.width, 640);
        assert_eq!(frame.height, 360);

        let bytes = STANDARD.decode(&frame.data).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn small_frames_keep_their_size() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(320, 240));
        let frame = compress_frame(&image, MAX_DIMENSION, JPEG_QUALITY).unwrap();
        assert_eq!((frame.width, frame.height), (320, 240));
    }

    #[tokio::test]
    async fn run_keeps_sampling_past_failed_ticks() {
        let sampler =
            VideoFrameSampler::new(Duration::from_millis(10), MAX_DIMENSION, JPEG_QUALITY);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let ran = tokio::time::timeout(
            Duration::from_millis(200),
            sampler.run(Box::new(Flaky { calls: 0 }), move |frame| {
                let _ = tx.send(frame);
            }),
        )
        .await;
        assert!(ran.is_err(), "sampling should only end when cancelled");

        let mut frames = 0;
        while let Ok(frame) = rx.try_recv() {
            assert_eq!((frame.width, frame.height), (32, 24));
            frames += 1;
        }
        assert!(frames >= 2, "got {frames} frames");
    }

    #[test]
    fn missing_snapshot_is_an_error() {
        let mut source = StillImageSource::new(PathBuf::from("/nonexistent/frame.jpg"));
        assert!(source.capture().is_err());
    }
}
