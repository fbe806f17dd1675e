//! Narration playback engine.
//!
//! [`controller::NarrationController`] runs one generation session at a time: it opens
//! the narration stream, decodes audio frames into the player queue, keeps a filler
//! loop going until the first chunk is scheduled and reports progress to the host.

pub mod assets;
pub mod cli;
pub mod codec;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod legacy;
pub mod now_playing;
pub mod request;
pub mod runtime;
pub mod session;
pub mod transport;

mod progress;
mod receiver;
#[cfg(test)]
mod testing;

pub use controller::{Collaborators, NarrationController};
pub use error::NarrationError;
pub use events::NarrationEvent;
pub use request::GenerationKind;
