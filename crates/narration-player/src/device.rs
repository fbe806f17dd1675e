//! Output device discovery and selection.
//!
//! Narration is mono at a fixed session rate, so selection favours configs that run at
//! exactly that rate (no conversion at all), then the closest rate, then the sample
//! format that needs the least conversion.

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

/// A device plus the stream parameters chosen for it.
pub struct OutputTarget {
    pub device: cpal::Device,
    pub stream_config: cpal::StreamConfig,
    pub sample_format: cpal::SampleFormat,
}

impl OutputTarget {
    pub fn sample_rate(&self) -> u32 {
        self.stream_config.sample_rate
    }
}

/// Resolve the output for narration at `target_rate`.
///
/// `needle` selects a device by case-insensitive substring; `None` uses the default.
pub fn open_output(needle: Option<&str>, target_rate: u32) -> Result<OutputTarget> {
    let host = cpal::default_host();
    let device = pick_device(&host, needle)?;
    let supported = pick_output_config(&device, target_rate)?;
    let mut stream_config: cpal::StreamConfig = supported.clone().into();
    if let Some(buf) = pick_buffer_size(&supported) {
        stream_config.buffer_size = buf;
    }
    tracing::debug!(
        device = %device.description().map(|d| d.to_string()).unwrap_or_default(),
        rate_hz = stream_config.sample_rate,
        channels = stream_config.channels,
        format = ?supported.sample_format(),
        "output selected"
    );
    Ok(OutputTarget {
        device,
        stream_config,
        sample_format: supported.sample_format(),
    })
}

/// Pick the first output device matching `needle`, or the host default.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    let Some(needle) = needle else {
        return host
            .default_output_device()
            .ok_or_else(|| anyhow!("No default output device"));
    };

    host.output_devices()
        .context("No output devices")?
        .find(|d| {
            d.description()
                .map(|n| matches_device_name(&n.name(), needle))
                .unwrap_or(false)
        })
        .ok_or_else(|| anyhow!("No output device matched: {needle}"))
}

/// Pick the supported config closest to `target_rate`.
pub fn pick_output_config(
    device: &cpal::Device,
    target_rate: u32,
) -> Result<cpal::SupportedStreamConfig> {
    device
        .supported_output_configs()
        .context("query output configs")?
        .map(|range| {
            let rate = clamp_rate(range.min_sample_rate(), range.max_sample_rate(), target_rate);
            let score = config_score(rate, target_rate, range.sample_format(), range.channels());
            (score, range.with_sample_rate(rate))
        })
        .min_by_key(|(score, _)| *score)
        .map(|(_, cfg)| cfg)
        .ok_or_else(|| anyhow!("No supported output configs"))
}

/// Pick a stream buffer size, preferring larger values to reduce underruns.
///
/// If the device reports a range, choose the max (capped). If `Unknown`, return `None`
/// so CPAL uses the device default.
pub fn pick_buffer_size(config: &cpal::SupportedStreamConfig) -> Option<cpal::BufferSize> {
    const MAX_FRAMES: u32 = 8_192;
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            Some(cpal::BufferSize::Fixed((*max).min(MAX_FRAMES).max(*min)))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

/// Print available output devices to stdout.
pub fn list_devices(host: &cpal::Host) -> Result<()> {
    let devices = host.output_devices().context("No output devices")?;
    for (i, d) in devices.enumerate() {
        println!("#{i}: {}", d.description()?);
    }
    Ok(())
}

fn clamp_rate(min: u32, max: u32, target: u32) -> u32 {
    target.clamp(min, max.max(min))
}

/// Lower is better: rate distance first, then format conversion cost, then channel count.
fn config_score(rate: u32, target: u32, format: cpal::SampleFormat, channels: u16) -> (u32, u8, u16) {
    (rate.abs_diff(target), sample_format_rank(format), channels)
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}
