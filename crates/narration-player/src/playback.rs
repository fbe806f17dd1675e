//! CPAL output backend.
//!
//! Two independent output streams back the engine seams:
//! - [`CpalRenderNode`]: renders one scheduled buffer and reports its completion
//! - [`CpalLoopOutput`]: loops the filler clip
//!
//! The real-time callbacks only touch a small mutex-protected slot, never wait on a
//! condition variable, and output silence when there is nothing to play.
//!
//! Producers conform buffers to [`RenderNode::output_rate`] before queueing, so
//! `schedule` is a slot swap. Each buffer boundary still carries a short gap: the
//! callback that drains a buffer zero-fills the rest of its period, and the next
//! buffer starts on the first period after the owner has handled the completion. The
//! gap is at most one device period plus that hand-off, and the per-buffer fades keep
//! it click-free.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::Sender;

use crate::buffer::AudioBuffer;
use crate::config::PlaybackConfig;
use crate::device::{self, OutputTarget};
use crate::render::{AudioBackend, LoopOutput, RenderEvent, RenderNode};
use crate::resample::resample_mono;

/// Opens CPAL streams on the selected device.
pub struct CpalBackend {
    device: Option<String>,
    cfg: PlaybackConfig,
}

impl CpalBackend {
    pub fn new(device: Option<String>, cfg: PlaybackConfig) -> Self {
        Self { device, cfg }
    }

    fn open(&self) -> Result<OutputTarget> {
        device::open_output(self.device.as_deref(), self.cfg.sample_rate)
    }
}

impl AudioBackend for CpalBackend {
    fn render_node(&self, completions: Sender<RenderEvent>) -> Result<Box<dyn RenderNode>> {
        let target = self.open()?;
        Ok(Box::new(CpalRenderNode::open(&target, &self.cfg, completions)?))
    }

    fn loop_output(&self) -> Result<Box<dyn LoopOutput>> {
        let target = self.open()?;
        Ok(Box::new(CpalLoopOutput::open(&target, &self.cfg)?))
    }
}

/// Slot holding the single scheduled buffer.
#[derive(Default)]
struct NodeSlot {
    ticket: Option<u64>,
    samples: Vec<f32>,
    pos: usize,
}

/// Copy from the slot into `out`, zero-filling the rest.
///
/// Returns the ticket that drained during this call, if any.
fn render_into(slot: &mut NodeSlot, out: &mut [f32]) -> Option<u64> {
    let Some(ticket) = slot.ticket else {
        out.fill(0.0);
        return None;
    };
    let available = slot.samples.len().saturating_sub(slot.pos);
    let n = available.min(out.len());
    out[..n].copy_from_slice(&slot.samples[slot.pos..slot.pos + n]);
    out[n..].fill(0.0);
    slot.pos += n;
    if slot.pos >= slot.samples.len() {
        slot.ticket = None;
        slot.samples.clear();
        slot.pos = 0;
        return Some(ticket);
    }
    None
}

pub struct CpalRenderNode {
    _stream: cpal::Stream,
    slot: Arc<Mutex<NodeSlot>>,
    paused: Arc<AtomicBool>,
    device_rate: u32,
    resample_chunk: usize,
}

impl CpalRenderNode {
    fn open(target: &OutputTarget, cfg: &PlaybackConfig, completions: Sender<RenderEvent>) -> Result<Self> {
        let slot = Arc::new(Mutex::new(NodeSlot::default()));
        let paused = Arc::new(AtomicBool::new(false));

        let slot_cb = slot.clone();
        let paused_cb = paused.clone();
        let done_tx = completions.clone();
        let fill = move |out: &mut [f32]| {
            if paused_cb.load(Ordering::Relaxed) {
                out.fill(0.0);
                return;
            }
            let finished = match slot_cb.try_lock() {
                Ok(mut st) => render_into(&mut st, out),
                Err(_) => {
                    out.fill(0.0);
                    None
                }
            };
            if let Some(ticket) = finished {
                let _ = done_tx.send(RenderEvent::Completed { ticket });
            }
        };

        let stream = build_output_stream(target, cfg.refill_max_frames, Some(completions), fill)?;
        stream.play()?;
        tracing::info!(rate_hz = target.sample_rate(), "render node ready");

        Ok(Self {
            _stream: stream,
            slot,
            paused,
            device_rate: target.sample_rate(),
            resample_chunk: cfg.resample_chunk_frames,
        })
    }
}

impl RenderNode for CpalRenderNode {
    fn schedule(&mut self, ticket: u64, buffer: AudioBuffer) -> Result<()> {
        let src_rate = buffer.sample_rate();
        let samples = if src_rate == self.device_rate {
            buffer.into_samples()
        } else {
            tracing::debug!(src_rate, dst_rate = self.device_rate, "resampling on schedule");
            resample_mono(buffer.samples(), src_rate, self.device_rate, self.resample_chunk)?
        };
        let mut st = self
            .slot
            .lock()
            .map_err(|_| anyhow!("render slot poisoned"))?;
        st.ticket = Some(ticket);
        st.samples = samples;
        st.pos = 0;
        Ok(())
    }

    fn pause(&mut self) {
        self.paused.store(true, Ordering::Relaxed);
    }

    fn resume(&mut self) {
        self.paused.store(false, Ordering::Relaxed);
    }

    fn stop(&mut self) {
        if let Ok(mut st) = self.slot.lock() {
            *st = NodeSlot::default();
        }
        self.paused.store(false, Ordering::Relaxed);
    }

    fn output_rate(&self) -> u32 {
        self.device_rate
    }
}

#[derive(Default)]
struct LoopSlot {
    clip: Vec<f32>,
    pos: usize,
    active: bool,
}

fn loop_into(slot: &mut LoopSlot, out: &mut [f32]) {
    if !slot.active || slot.clip.is_empty() {
        out.fill(0.0);
        return;
    }
    for s in out.iter_mut() {
        *s = slot.clip[slot.pos];
        slot.pos = (slot.pos + 1) % slot.clip.len();
    }
}

pub struct CpalLoopOutput {
    _stream: cpal::Stream,
    slot: Arc<Mutex<LoopSlot>>,
    device_rate: u32,
    resample_chunk: usize,
}

impl CpalLoopOutput {
    fn open(target: &OutputTarget, cfg: &PlaybackConfig) -> Result<Self> {
        let slot = Arc::new(Mutex::new(LoopSlot::default()));
        let slot_cb = slot.clone();
        let fill = move |out: &mut [f32]| match slot_cb.try_lock() {
            Ok(mut st) => loop_into(&mut st, out),
            Err(_) => out.fill(0.0),
        };

        let stream = build_output_stream(target, cfg.refill_max_frames, None, fill)?;
        stream.play()?;

        Ok(Self {
            _stream: stream,
            slot,
            device_rate: target.sample_rate(),
            resample_chunk: cfg.resample_chunk_frames,
        })
    }
}

impl LoopOutput for CpalLoopOutput {
    fn start(&mut self, clip: &AudioBuffer) -> Result<()> {
        let samples = resample_mono(clip.samples(), clip.sample_rate(), self.device_rate, self.resample_chunk)?;
        let mut st = self.slot.lock().map_err(|_| anyhow!("loop slot poisoned"))?;
        st.clip = samples;
        st.pos = 0;
        st.active = true;
        Ok(())
    }

    fn stop(&mut self) {
        if let Ok(mut st) = self.slot.lock() {
            st.active = false;
            st.pos = 0;
        }
    }
}

/// Build a CPAL output stream fed by a mono `fill` callback.
///
/// `fill` is called with a mono scratch slice sized to the device period; its output
/// is duplicated to every device channel and converted to the device sample format.
fn build_output_stream<F>(
    target: &OutputTarget,
    scratch_frames: usize,
    errors: Option<Sender<RenderEvent>>,
    fill: F,
) -> Result<cpal::Stream>
where
    F: FnMut(&mut [f32]) + Send + 'static,
{
    match target.sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32, F>(target, scratch_frames, errors, fill),
        cpal::SampleFormat::I16 => build_stream::<i16, F>(target, scratch_frames, errors, fill),
        cpal::SampleFormat::I32 => build_stream::<i32, F>(target, scratch_frames, errors, fill),
        cpal::SampleFormat::U16 => build_stream::<u16, F>(target, scratch_frames, errors, fill),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

fn build_stream<T, F>(
    target: &OutputTarget,
    scratch_frames: usize,
    errors: Option<Sender<RenderEvent>>,
    mut fill: F,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
    F: FnMut(&mut [f32]) + Send + 'static,
{
    let channels_out = (target.stream_config.channels as usize).max(1);
    let mut mono = vec![0.0f32; scratch_frames.max(1)];

    let err_fn = move |err| {
        tracing::warn!("stream error: {err}");
        if let Some(tx) = &errors {
            let _ = tx.send(RenderEvent::Failed);
        }
    };

    let stream = target.device.build_output_stream(
        &target.stream_config,
        move |data: &mut [T], _| {
            let frames = data.len() / channels_out;
            if mono.len() < frames {
                mono.resize(frames, 0.0);
            }
            fill(&mut mono[..frames]);
            write_mono_frames(&mono[..frames], channels_out, data);
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}

/// Spread mono frames over an interleaved device buffer.
fn write_mono_frames<T>(mono: &[f32], channels_out: usize, data: &mut [T])
where
    T: cpal::Sample + cpal::FromSample<f32>,
{
    for (frame, s) in data.chunks_exact_mut(channels_out).zip(mono.iter()) {
        let v = <T as cpal::Sample>::from_sample::<f32>(*s);
        frame.fill(v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_into_reports_completion_once() {
        let mut slot = NodeSlot {
            ticket: Some(4),
            samples: vec![1.0; 5],
            pos: 0,
        };
        let mut out = [9.0f32; 3];
        assert_eq!(render_into(&mut slot, &mut out), None);
        assert_eq!(out, [1.0, 1.0, 1.0]);

        assert_eq!(render_into(&mut slot, &mut out), Some(4));
        assert_eq!(out, [1.0, 1.0, 0.0]);

        assert_eq!(render_into(&mut slot, &mut out), None);
        assert_eq!(out, [0.0, 0.0, 0.0]);
    }

    #[test]
    fn empty_slot_renders_silence() {
        let mut slot = NodeSlot::default();
        let mut out = [0.5f32; 4];
        assert_eq!(render_into(&mut slot, &mut out), None);
        assert_eq!(out, [0.0; 4]);
    }

    #[test]
    fn loop_wraps_around() {
        let mut slot = LoopSlot {
            clip: vec![1.0, 2.0, 3.0],
            pos: 0,
            active: true,
        };
        let mut out = [0.0f32; 5];
        loop_into(&mut slot, &mut out);
        assert_eq!(out, [1.0, 2.0, 3.0, 1.0, 2.0]);

        slot.active = false;
        loop_into(&mut slot, &mut out);
        assert_eq!(out, [0.0; 5]);
    }

    #[test]
    fn mono_is_duplicated_across_channels() {
        let mut data = [0.0f32; 6];
        write_mono_frames(&[0.1, 0.2, 0.3], 2, &mut data);
        assert_eq!(data, [0.1, 0.1, 0.2, 0.2, 0.3, 0.3]);
    }
}
