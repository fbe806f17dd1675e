/// Playback tuning parameters shared by the decoder, renderer and output stages.
#[derive(Clone, Debug)]
pub struct PlaybackConfig {
    /// Session-wide sample rate of every narration buffer (mono).
    pub sample_rate: u32,
    /// Length of the linear fade applied at both ends of each buffer.
    pub fade_ms: u32,
    /// Minimum frames per decoded chunk; shorter chunks are padded with silence.
    pub min_buffer_frames: usize,
    /// Length of the synthetic silence appended at end of stream.
    pub end_silence_frames: usize,
    /// Max frames copied per output callback refill.
    pub refill_max_frames: usize,
    /// Resampler input chunk size in frames.
    pub resample_chunk_frames: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            fade_ms: 10,
            min_buffer_frames: 1024,
            end_silence_frames: 44_100,
            refill_max_frames: 4096,
            resample_chunk_frames: 1024,
        }
    }
}

impl PlaybackConfig {
    /// Fade length in frames at the session rate.
    pub fn fade_frames(&self) -> usize {
        self.fade_frames_at(self.sample_rate)
    }

    /// Fade length in frames for a buffer running at `rate`.
    pub fn fade_frames_at(&self, rate: u32) -> usize {
        (rate as u64 * self.fade_ms as u64 / 1000) as usize
    }
}
