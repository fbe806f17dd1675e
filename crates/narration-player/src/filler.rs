use anyhow::Result;

use crate::buffer::AudioBuffer;
use crate::render::LoopOutput;

/// Ambience loop played while the first narration buffer is pending.
///
/// Start/stop are idempotent; the loop never interleaves with narration because the
/// engine stops it before the first buffer is scheduled.
pub struct FillerLoop {
    output: Box<dyn LoopOutput>,
    clip: AudioBuffer,
    running: bool,
}

impl FillerLoop {
    pub fn new(output: Box<dyn LoopOutput>, clip: AudioBuffer) -> Self {
        Self {
            output,
            clip,
            running: false,
        }
    }

    /// Start looping from the top. No-op when already running.
    pub fn start(&mut self) -> Result<()> {
        if self.running {
            return Ok(());
        }
        self.output.start(&self.clip)?;
        self.running = true;
        tracing::debug!(frames = self.clip.frames(), "filler loop started");
        Ok(())
    }

    /// Stop the loop. Returns whether it was running.
    pub fn stop(&mut self) -> bool {
        if !self.running {
            return false;
        }
        self.output.stop();
        self.running = false;
        tracing::debug!("filler loop stopped");
        true
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}
