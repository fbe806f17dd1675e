//! Render seams between the playback engine and the audio output.
//!
//! The engine never touches CPAL directly. It drives a [`RenderNode`] (one scheduled
//! buffer at a time) and a [`LoopOutput`] (the filler ambience), both produced by an
//! [`AudioBackend`]. The CPAL implementation lives in [`crate::playback`]; tests use
//! the recording fakes in `testing`.

use anyhow::Result;
use crossbeam_channel::Sender;

use crate::buffer::AudioBuffer;

/// Notifications sent by a render node back to its owner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderEvent {
    /// The buffer scheduled under `ticket` has been fully rendered.
    Completed { ticket: u64 },
    /// The output stream reported an error; the node is no longer usable.
    Failed,
}

/// Output that renders one scheduled buffer at a time.
///
/// Implementations must send [`RenderEvent::Completed`] exactly once per scheduled
/// ticket that drains naturally, and never for a ticket discarded by [`RenderNode::stop`].
pub trait RenderNode {
    /// Start rendering `buffer`. Replaces nothing: the caller only schedules while idle.
    fn schedule(&mut self, ticket: u64, buffer: AudioBuffer) -> Result<()>;
    /// Hold the current position; output silence.
    fn pause(&mut self);
    /// Continue from the held position.
    fn resume(&mut self);
    /// Drop the scheduled buffer without a completion.
    fn stop(&mut self);
    /// Rate the node renders at. Buffers at any other rate are converted in
    /// `schedule`, which delays the next buffer, so producers should conform first.
    fn output_rate(&self) -> u32;
}

/// Independent output for a looping clip.
pub trait LoopOutput {
    /// Start looping `clip` from the top. Restarting an active loop rewinds it.
    fn start(&mut self, clip: &AudioBuffer) -> Result<()>;
    fn stop(&mut self);
}

/// Factory for outputs.
///
/// Outputs are created on the thread that uses them, so they do not need to be `Send`.
pub trait AudioBackend: Send + Sync {
    fn render_node(&self, completions: Sender<RenderEvent>) -> Result<Box<dyn RenderNode>>;
    fn loop_output(&self) -> Result<Box<dyn LoopOutput>>;
}
