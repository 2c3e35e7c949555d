//! Audio engine
//!
//! Pull-based microphone capture feeding the chunk encoder, and push-based
//! scheduled playback for model speech.

mod capture;
mod pcm;
mod playback;

pub use capture::{
    AUDIO_MIME_TYPE, AudioCapture, AudioCaptureEncoder, AudioChunk, CHUNK_INTERVAL, CaptureEvent,
    CaptureStream, INPUT_SAMPLE_RATE,
};
pub use pcm::{decode_chunk, encode_chunk, float_to_pcm16, pcm16_to_float, samples_to_wav};
pub use playback::{
    AudioOutput, CpalOutput, OUTPUT_SAMPLE_RATE, PlaybackFinished, PlaybackScheduler,
    ScheduledChunk,
};
