//! Buffer decoder for streamed narration chunks.
//!
//! Chunks arrive as base64 text wrapping signed 16-bit little-endian mono PCM.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;

use crate::buffer::{AudioBuffer, BufferKind};
use crate::config::PlaybackConfig;

/// Why a chunk could not become a buffer. The chunk is dropped, nothing is enqueued.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferDecodeError {
    #[error("chunk is not valid base64: {0}")]
    InvalidBase64(String),
    #[error("chunk holds no complete sample")]
    Empty,
}

/// Decode a base64 PCM16LE chunk into a speech buffer at the session rate.
pub fn decode_base64_chunk(
    chunk: &str,
    cfg: &PlaybackConfig,
) -> Result<AudioBuffer, BufferDecodeError> {
    let bytes = STANDARD
        .decode(chunk.trim())
        .map_err(|e| BufferDecodeError::InvalidBase64(e.to_string()))?;
    decode_pcm16_le(&bytes, cfg)
}

/// Decode raw PCM16LE bytes.
///
/// Samples are normalized by 1/32768. A trailing odd byte is ignored. Chunks shorter
/// than `min_buffer_frames` are padded with zeros up to that floor.
pub fn decode_pcm16_le(bytes: &[u8], cfg: &PlaybackConfig) -> Result<AudioBuffer, BufferDecodeError> {
    let frames = bytes.len() / 2;
    if frames == 0 {
        return Err(BufferDecodeError::Empty);
    }

    let mut samples: Vec<f32> = Vec::with_capacity(frames.max(cfg.min_buffer_frames));
    samples.extend(
        bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0),
    );
    if samples.len() < cfg.min_buffer_frames {
        samples.resize(cfg.min_buffer_frames, 0.0);
    }

    Ok(AudioBuffer::new(BufferKind::Speech, cfg.sample_rate, samples))
}

/// The end-of-stream marker: one buffer's worth of silence at the session rate.
pub fn end_of_stream(cfg: &PlaybackConfig) -> AudioBuffer {
    AudioBuffer::silence(cfg.sample_rate, cfg.end_silence_frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn normalizes_full_scale_samples() {
        let cfg = PlaybackConfig {
            min_buffer_frames: 0,
            ..PlaybackConfig::default()
        };
        let buf = decode_pcm16_le(&pcm_bytes(&[i16::MIN, 0, 16_384, i16::MAX]), &cfg).unwrap();
        assert_eq!(buf.samples()[0], -1.0);
        assert_eq!(buf.samples()[1], 0.0);
        assert_eq!(buf.samples()[2], 0.5);
        assert!(buf.samples()[3] < 1.0 && buf.samples()[3] > 0.999);
    }

    #[test]
    fn short_chunk_is_padded_to_floor() {
        let cfg = PlaybackConfig::default();
        let buf = decode_pcm16_le(&pcm_bytes(&[100; 10]), &cfg).unwrap();
        assert_eq!(buf.frames(), 1024);
        assert_eq!(buf.samples()[10], 0.0);
        assert_eq!(buf.kind(), BufferKind::Speech);
        assert_eq!(buf.sample_rate(), 44_100);
    }

    #[test]
    fn odd_trailing_byte_is_ignored() {
        let cfg = PlaybackConfig {
            min_buffer_frames: 0,
            ..PlaybackConfig::default()
        };
        let buf = decode_pcm16_le(&[0x00, 0x40, 0x7f], &cfg).unwrap();
        assert_eq!(buf.frames(), 1);
    }

    #[test]
    fn rejects_empty_and_invalid_chunks() {
        let cfg = PlaybackConfig::default();
        assert_eq!(decode_pcm16_le(&[1], &cfg).unwrap_err(), BufferDecodeError::Empty);
        assert!(matches!(
            decode_base64_chunk("@@not base64@@", &cfg),
            Err(BufferDecodeError::InvalidBase64(_))
        ));
    }

    #[test]
    fn decodes_base64_chunk() {
        let cfg = PlaybackConfig::default();
        let encoded = STANDARD.encode(pcm_bytes(&[0; 2048]));
        let buf = decode_base64_chunk(&encoded, &cfg).unwrap();
        assert_eq!(buf.frames(), 2048);
    }

    #[test]
    fn end_of_stream_is_one_second_of_silence() {
        let buf = end_of_stream(&PlaybackConfig::default());
        assert_eq!(buf.kind(), BufferKind::EndMarker);
        assert_eq!(buf.frames(), 44_100);
    }
}
