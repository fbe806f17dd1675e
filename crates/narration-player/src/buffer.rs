//! Decoded, render-ready audio buffers.
//!
//! Every buffer handed to a render node is mono `f32` at the session rate. Buffers
//! are moved, never shared: decoder → [`crate::queue::PlaybackQueue`] → render node.

/// What a buffer represents inside a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferKind {
    /// Narration audio decoded from the stream.
    Speech,
    /// Short chirp injected ahead of the first narration buffer.
    Trigger,
    /// Synthetic silence marking the true end of content.
    EndMarker,
    /// A whole pregenerated file (legacy path).
    Pregenerated,
    /// Looping ambience clip played by the filler loop.
    Ambience,
}

/// Owned mono sample buffer.
#[derive(Clone, Debug)]
pub struct AudioBuffer {
    kind: BufferKind,
    sample_rate: u32,
    samples: Vec<f32>,
}

impl AudioBuffer {
    pub fn new(kind: BufferKind, sample_rate: u32, samples: Vec<f32>) -> Self {
        Self {
            kind,
            sample_rate,
            samples,
        }
    }

    /// One buffer of zeros flagged as the end-of-stream marker.
    pub fn silence(sample_rate: u32, frames: usize) -> Self {
        Self::new(BufferKind::EndMarker, sample_rate, vec![0.0; frames])
    }

    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Always 1; buffers are mono.
    pub fn channels(&self) -> usize {
        1
    }

    pub fn frames(&self) -> usize {
        self.samples.len()
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    /// Duration in milliseconds, rounded down.
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / self.sample_rate as u64
    }

    /// Re-tag a buffer, e.g. a decoded file used as trigger chirp.
    pub fn with_kind(mut self, kind: BufferKind) -> Self {
        self.kind = kind;
        self
    }

    /// Consume the buffer and return it with linear edge fades applied.
    pub fn faded(mut self, fade_frames: usize) -> Self {
        apply_fade(&mut self.samples, fade_frames);
        self
    }
}

/// Apply a linear fade-in to the first `fade_frames` samples and a linear fade-out
/// to the last `fade_frames` samples.
///
/// Short buffers get both ramps over the overlap; the gain never exceeds 1.
pub fn apply_fade(samples: &mut [f32], fade_frames: usize) {
    if fade_frames == 0 || samples.is_empty() {
        return;
    }
    let len = samples.len();
    let fade = fade_frames as f32;

    for (i, s) in samples.iter_mut().take(fade_frames).enumerate() {
        *s *= i as f32 / fade;
    }

    let start = len.saturating_sub(fade_frames);
    for (i, s) in samples.iter_mut().enumerate().skip(start) {
        *s *= (len - i) as f32 / fade;
    }
}
