//! 16-bit PCM conversion and base64 framing

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::{Error, Result};

/// Convert one float sample in `[-1.0, 1.0]` to signed 16-bit PCM
///
/// Negative samples scale by 32768 and non-negative ones by 32767, so both
/// ends of the range map onto the full `i16` span. Rounding is half away
/// from zero.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn float_to_pcm16(sample: f32) -> i16 {
    let clamped = sample.clamp(-1.0, 1.0);
    let scaled = if clamped < 0.0 {
        clamped * 32768.0
    } else {
        clamped * 32767.0
    };
    scaled.round() as i16
}

/// Convert one signed 16-bit PCM sample back to a float
#[must_use]
pub fn pcm16_to_float(sample: i16) -> f32 {
    f32::from(sample) / 32768.0
}

/// Encode PCM samples as little-endian bytes wrapped in standard base64
#[must_use]
pub fn encode_chunk(samples: &[i16]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    STANDARD.encode(bytes)
}

/// Decode a base64 little-endian PCM payload into float samples
///
/// # Errors
///
/// Returns error if the payload is not valid base64 or has an odd byte count
pub fn decode_chunk(data: &str) -> Result<Vec<f32>> {
    let bytes = STANDARD
        .decode(data)
        .map_err(|e| Error::Audio(format!("invalid base64 audio payload: {e}")))?;

    if bytes.len() % 2 != 0 {
        return Err(Error::Audio(format!(
            "pcm payload has odd length ({} bytes)",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| pcm16_to_float(i16::from_le_bytes([pair[0], pair[1]])))
        .collect())
}

/// Convert f32 samples to WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            writer
                .write_sample(float_to_pcm16(sample))
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scales_asymmetrically() {
        assert_eq!(float_to_pcm16(1.0), 32767);
        assert_eq!(float_to_pcm16(-1.0), -32768);
        assert_eq!(float_to_pcm16(0.0), 0);
    }

    #[test]
    fn clamps_out_of_range() {
        assert_eq!(float_to_pcm16(3.5), 32767);
        assert_eq!(float_to_pcm16(-7.0), -32768);
    }

    #[test]
    fn rounds_half_away_from_zero() {
        // 0.5 / 32768 lands exactly on a half step for negative samples
        assert_eq!(float_to_pcm16(-0.5 / 32768.0), -1);
        assert_eq!(float_to_pcm16(-1.5 / 32768.0), -2);
    }

    #[test]
    fn decode_rejects_odd_length() {
        let payload = STANDARD.encode([1u8, 2, 3]);
        assert!(decode_chunk(&payload).is_err());
    }

    #[test]
    fn decode_rejects_bad_base64() {
        assert!(decode_chunk("not base64 !!").is_err());
    }

    #[test]
    fn decode_is_little_endian() {
        let payload = encode_chunk(&[-32768, 16384]);
        let samples = decode_chunk(&payload).unwrap();
        assert_eq!(samples, vec![-1.0, 0.5]);
    }

    #[test]
    fn wav_has_riff_header() {
        let wav = samples_to_wav(&[0.0, 0.5, -0.5], 16000).unwrap();
        assert_eq!(&wav[..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
    }
}
