//! Whole-file decode for bundled assets and pregenerated episodes.
//!
//! Uses Symphonia to:
//! - probe the input container/codec
//! - decode every packet into interleaved `f32`
//! - downmix to mono and resample to the session rate
//!
//! Streamed narration never goes through here; see [`crate::pcm`].

use std::fs::File;
use std::io::Cursor;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::CodecParameters;
use symphonia::core::io::MediaSource;
use symphonia::core::{
    codecs::DecoderOptions, formats::FormatOptions, io::MediaSourceStream, meta::MetadataOptions,
    probe::Hint,
};

use crate::buffer::{AudioBuffer, BufferKind};
use crate::config::PlaybackConfig;
use crate::resample::resample_mono;

/// Metadata captured while probing the source.
#[derive(Clone, Debug, Default)]
pub struct SourceInfo {
    /// Codec name (best-effort).
    pub codec: Option<String>,
    /// Native sample rate before conversion.
    pub source_rate: u32,
    /// Native channel count before downmix.
    pub source_channels: usize,
    /// Duration reported by the container, when present.
    pub duration_ms: Option<u64>,
}

/// Decode an audio file from disk into a mono buffer at `cfg.sample_rate`.
pub fn decode_file(path: &Path, kind: BufferKind, cfg: &PlaybackConfig) -> Result<(AudioBuffer, SourceInfo)> {
    let file = File::open(path).with_context(|| format!("open {:?}", path))?;

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    decode_media_source(Box::new(file), hint, kind, cfg)
        .with_context(|| format!("decode {:?}", path))
}

/// Decode an in-memory audio document (e.g. a downloaded episode).
///
/// `extension` is only a probe hint; the container is sniffed either way.
pub fn decode_bytes(
    bytes: Vec<u8>,
    extension: Option<&str>,
    kind: BufferKind,
    cfg: &PlaybackConfig,
) -> Result<(AudioBuffer, SourceInfo)> {
    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }
    decode_media_source(Box::new(Cursor::new(bytes)), hint, kind, cfg)
}

fn decode_media_source(
    source: Box<dyn MediaSource>,
    hint: Hint,
    kind: BufferKind,
    cfg: &PlaybackConfig,
) -> Result<(AudioBuffer, SourceInfo)> {
    let mss = MediaSourceStream::new(source, Default::default());

    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| anyhow!("No default audio track"))?;
    let track_id = track.id;

    let codec_params: CodecParameters = track.codec_params.clone();
    let channels = codec_params
        .channels
        .ok_or_else(|| anyhow!("Unknown channels"))?
        .count();
    let rate = codec_params
        .sample_rate
        .ok_or_else(|| anyhow!("Unknown sample rate"))?;

    let mut decoder =
        symphonia::default::get_codecs().make(&codec_params, &DecoderOptions::default())?;

    let mut mono: Vec<f32> = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(_) => break, // EOF
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(_) => continue,
        };

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.frames() as u64, *decoded.spec());
        sample_buf.copy_interleaved_ref(decoded);
        downmix_into(sample_buf.samples(), channels, &mut mono);
    }

    if mono.is_empty() {
        return Err(anyhow!("no audio frames decoded"));
    }

    let info = SourceInfo {
        codec: symphonia::default::get_codecs()
            .get_codec(codec_params.codec)
            .map(|d| d.short_name.to_string()),
        source_rate: rate,
        source_channels: channels,
        duration_ms: container_duration_ms(&codec_params),
    };

    let samples = if rate == cfg.sample_rate {
        mono
    } else {
        tracing::debug!(
            src_rate = rate,
            dst_rate = cfg.sample_rate,
            frames = mono.len(),
            "resampling decoded asset"
        );
        resample_mono(&mono, rate, cfg.sample_rate, cfg.resample_chunk_frames)?
    };

    Ok((AudioBuffer::new(kind, cfg.sample_rate, samples), info))
}

/// Average interleaved frames down to one channel.
fn downmix_into(interleaved: &[f32], channels: usize, out: &mut Vec<f32>) {
    if channels <= 1 {
        out.extend_from_slice(interleaved);
        return;
    }
    let scale = 1.0 / channels as f32;
    out.extend(
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() * scale),
    );
}

/// Length announced by the container; `None` when it is missing or nonsensical.
fn container_duration_ms(params: &CodecParameters) -> Option<u64> {
    match (params.n_frames, params.sample_rate) {
        (Some(frames), Some(rate)) if rate > 0 => Some(frames.saturating_mul(1000) / rate as u64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, rate: u32, channels: u16, frames: usize, value: i16) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for _ in 0..frames * channels as usize {
            writer.write_sample(value).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn decodes_mono_wav_at_session_rate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chirp.wav");
        write_wav(&path, 44_100, 1, 4_410, 16_384);

        let (buf, info) = decode_file(&path, BufferKind::Trigger, &PlaybackConfig::default()).unwrap();
        assert_eq!(buf.kind(), BufferKind::Trigger);
        assert_eq!(buf.sample_rate(), 44_100);
        assert_eq!(buf.frames(), 4_410);
        assert!((buf.samples()[100] - 0.5).abs() < 1e-3);
        assert_eq!(info.source_channels, 1);
        assert_eq!(info.codec.as_deref(), Some("pcm_s16le"));
    }

    #[test]
    fn stereo_is_downmixed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loop.wav");
        write_wav(&path, 44_100, 2, 1_000, 8_192);

        let (buf, info) = decode_file(&path, BufferKind::Ambience, &PlaybackConfig::default()).unwrap();
        assert_eq!(info.source_channels, 2);
        assert_eq!(buf.channels(), 1);
        assert_eq!(buf.frames(), 1_000);
        assert!((buf.samples()[10] - 0.25).abs() < 1e-3);
    }

    #[test]
    fn decodes_from_memory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("episode.wav");
        write_wav(&path, 44_100, 1, 2_000, 0);
        let bytes = std::fs::read(&path).unwrap();

        let (buf, _) = decode_bytes(bytes, Some("wav"), BufferKind::Pregenerated, &PlaybackConfig::default())
            .unwrap();
        assert_eq!(buf.kind(), BufferKind::Pregenerated);
        assert_eq!(buf.frames(), 2_000);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = decode_file(
            Path::new("/definitely/not/here.wav"),
            BufferKind::Ambience,
            &PlaybackConfig::default(),
        );
        assert!(err.is_err());
    }

    #[test]
    fn downmix_averages_channels() {
        let mut out = Vec::new();
        downmix_into(&[1.0, 0.0, 0.5, 0.5], 2, &mut out);
        assert_eq!(out, vec![0.5, 0.5]);
    }

    #[test]
    fn container_duration_needs_frames_and_rate() {
        let mut params = CodecParameters::new();
        params.n_frames = Some(22_050);
        assert_eq!(container_duration_ms(&params), None);
        params.sample_rate = Some(0);
        assert_eq!(container_duration_ms(&params), None);
        params.sample_rate = Some(44_100);
        assert_eq!(container_duration_ms(&params), Some(500));
    }
}
