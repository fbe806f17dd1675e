//! OS media-center seam.
//!
//! The controller pushes lock-screen metadata through [`NowPlaying`]; media keys come
//! back through [`RemoteCommands`], which maps them onto pause/resume.

use crossbeam_channel::Sender;
use narration_types::PlaybackState;

use crate::controller::Command;

/// Album shown for every narration.
pub const NOW_PLAYING_ALBUM: &str = "Rabbithole";

#[derive(Clone, Debug, PartialEq)]
pub struct NowPlayingInfo {
    pub title: String,
    pub artist: Option<String>,
    pub album: String,
    pub artwork_url: Option<String>,
    /// 1.0 while playing, 0.0 otherwise.
    pub rate: f32,
}

impl NowPlayingInfo {
    pub fn rate_for(state: Option<PlaybackState>) -> f32 {
        if state == Some(PlaybackState::Playing) {
            1.0
        } else {
            0.0
        }
    }
}

pub trait NowPlaying: Send {
    fn set_now_playing(&mut self, info: &NowPlayingInfo);
    fn clear_now_playing(&mut self);
}

/// Bridge that only logs. Used by the CLI, which has no media center.
#[derive(Default)]
pub struct LogNowPlaying;

impl NowPlaying for LogNowPlaying {
    fn set_now_playing(&mut self, info: &NowPlayingInfo) {
        tracing::info!(
            title = %info.title,
            artist = info.artist.as_deref().unwrap_or(""),
            rate = info.rate,
            "now playing"
        );
    }

    fn clear_now_playing(&mut self) {
        tracing::info!("now playing cleared");
    }
}

/// Play/pause requests coming from the media center.
#[derive(Clone)]
pub struct RemoteCommands {
    pub(crate) cmd_tx: Sender<Command>,
}

impl RemoteCommands {
    /// Maps to `resume()`. Returns whether the request reached the controller.
    pub fn on_play_requested(&self) -> bool {
        self.cmd_tx.send(Command::Resume { reply: None }).is_ok()
    }

    /// Maps to `pause()`.
    pub fn on_pause_requested(&self) -> bool {
        self.cmd_tx.send(Command::Pause { reply: None }).is_ok()
    }
}
