//! Sample-rate conversion.
//!
//! Uses Rubato to convert mono `f32` audio between rates. Assets and pregenerated
//! episodes are converted once at load time. Streamed chunks are brought to the
//! render node's rate with [`conform`] by the producer, before they are queued.
//! [`resample_mono`] in the output stage is only a fallback.

use anyhow::{Result, anyhow};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

use crate::buffer::AudioBuffer;

fn sinc_params() -> SincInterpolationParameters {
    let sinc_len = 128;
    let window = WindowFunction::BlackmanHarris2;
    SincInterpolationParameters {
        sinc_len,
        f_cutoff: calculate_cutoff(sinc_len, window),
        interpolation: SincInterpolationType::Cubic,
        oversampling_factor: 256,
        window,
    }
}

/// Bring `buffer` to `rate`, keeping its kind. Returns it untouched when it already matches.
pub fn conform(buffer: AudioBuffer, rate: u32, chunk_frames: usize) -> Result<AudioBuffer> {
    if buffer.sample_rate() == rate {
        return Ok(buffer);
    }
    let samples = resample_mono(buffer.samples(), buffer.sample_rate(), rate, chunk_frames)?;
    Ok(AudioBuffer::new(buffer.kind(), rate, samples))
}

/// Convert a whole mono signal from `src_rate` to `dst_rate`.
///
/// Input is fed in fixed chunks of `chunk_frames`; the last partial chunk is flushed
/// with `partial_len`. Output length is trimmed to the ideal `len * dst / src` so
/// buffer durations stay exact.
pub fn resample_mono(
    input: &[f32],
    src_rate: u32,
    dst_rate: u32,
    chunk_frames: usize,
) -> Result<Vec<f32>> {
    if src_rate == 0 || dst_rate == 0 {
        return Err(anyhow!("invalid sample rate {src_rate} -> {dst_rate}"));
    }
    if src_rate == dst_rate || input.is_empty() {
        return Ok(input.to_vec());
    }

    let channels = 1;
    let chunk_in_frames = chunk_frames.max(1);
    let f_ratio = dst_rate as f64 / src_rate as f64;
    let params = sinc_params();

    let mut resampler = Async::<f32>::new_sinc(
        f_ratio,
        1.1,
        &params,
        chunk_in_frames,
        channels,
        FixedAsync::Input,
    )
    .map_err(|e| anyhow!("resampler init error: {e}"))?;

    let expected = (input.len() as u64 * dst_rate as u64 / src_rate as u64) as usize;
    let delay = resampler.output_delay();
    let mut out: Vec<f32> = Vec::with_capacity(expected + delay + chunk_in_frames * 3);
    let mut out_chunk = vec![0.0f32; channels * chunk_in_frames * 3];

    let mut indexing = Indexing {
        input_offset: 0,
        output_offset: 0,
        active_channels_mask: None,
        partial_len: None,
    };

    // Pad with silence so the filter delay is flushed out of the resampler.
    let flush = vec![0.0f32; chunk_in_frames];
    let mut pos = 0usize;
    while out.len() < expected + delay {
        let (chunk, partial) = if pos + chunk_in_frames <= input.len() {
            (&input[pos..pos + chunk_in_frames], None)
        } else if pos < input.len() {
            (&input[pos..], Some(input.len() - pos))
        } else {
            (&flush[..], None)
        };
        let frames = chunk.len();
        pos += frames;

        let input_adapter = InterleavedSlice::new(chunk, channels, frames)
            .map_err(|e| anyhow!("interleaved slice (input) error: {e}"))?;
        let out_capacity_frames = out_chunk.len() / channels;
        let mut output_adapter =
            InterleavedSlice::new_mut(&mut out_chunk, channels, out_capacity_frames)
                .map_err(|e| anyhow!("interleaved slice (output) error: {e}"))?;

        indexing.input_offset = 0;
        indexing.output_offset = 0;
        indexing.partial_len = partial;

        let (_nbr_in, nbr_out) = resampler
            .process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing))
            .map_err(|e| anyhow!("resampler process error: {e}"))?;
        out.extend_from_slice(&out_chunk[..nbr_out * channels]);
    }

    let start = delay.min(out.len());
    let mut trimmed = out.split_off(start);
    trimmed.truncate(expected);
    Ok(trimmed)
}
