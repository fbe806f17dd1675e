//! Audio side of the narration engine.
//!
//! Buffers flow one way: [`pcm`] decodes streamed chunks into [`buffer::AudioBuffer`]s,
//! the producer pushes them into the shared [`queue::PlaybackQueue`], and the
//! [`engine::PlaybackEngine`] hands them to a [`render::RenderNode`] one at a time.
//! [`playback`] provides the CPAL outputs; `testing` provides recording fakes.

pub mod buffer;
pub mod config;
pub mod decode;
pub mod device;
pub mod engine;
pub mod filler;
pub mod pcm;
pub mod playback;
pub mod queue;
pub mod render;
pub mod resample;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use buffer::{AudioBuffer, BufferKind};
pub use config::PlaybackConfig;
pub use engine::{EngineEvent, PlaybackEngine};
pub use render::{AudioBackend, LoopOutput, RenderEvent, RenderNode};
