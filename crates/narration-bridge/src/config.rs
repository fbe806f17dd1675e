//! Configuration loading and resolution.
//!
//! A TOML file provides the base; command-line flags override it. The streaming vs.
//! legacy choice is a plain value handed to the controller.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

pub use narration_player::PlaybackConfig;

/// How generation requests are served.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Audio streams over the persistent connection.
    #[default]
    Streaming,
    /// One request/response call, then the whole file is fetched.
    Legacy,
}

/// Bundled audio assets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssetPaths {
    pub filler_loop: PathBuf,
    pub trigger_chirp: Option<PathBuf>,
}

impl Default for AssetPaths {
    fn default() -> Self {
        Self {
            filler_loop: PathBuf::from("assets/generating.mp3"),
            trigger_chirp: Some(PathBuf::from("assets/trigger.mp3")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct NarrationConfig {
    pub mode: Mode,
    pub assets: AssetPaths,
    /// End a stream that goes quiet for this long. `None` waits forever.
    pub stall_timeout: Option<Duration>,
    /// Transport read poll; bounds how long a close request can wait.
    pub read_poll: Duration,
    pub max_message_bytes: usize,
    /// Timeout for each legacy HTTP call.
    pub http_timeout: Duration,
    /// Output device substring.
    pub device: Option<String>,
    pub playback: PlaybackConfig,
}

impl Default for NarrationConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Streaming,
            assets: AssetPaths::default(),
            stall_timeout: None,
            read_poll: Duration::from_millis(250),
            max_message_bytes: 10 * 1024 * 1024,
            http_timeout: Duration::from_secs(120),
            device: None,
            playback: PlaybackConfig::default(),
        }
    }
}

/// Narration config file (TOML). Every key is optional.
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub mode: Option<Mode>,
    pub filler_loop: Option<PathBuf>,
    pub trigger_chirp: Option<String>,
    pub stall_timeout_ms: Option<u64>,
    pub read_poll_ms: Option<u64>,
    pub max_message_bytes: Option<usize>,
    pub http_timeout_ms: Option<u64>,
    pub device: Option<String>,
    pub playback: Option<PlaybackFileConfig>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PlaybackFileConfig {
    pub sample_rate: Option<u32>,
    pub fade_ms: Option<u32>,
    pub min_buffer_frames: Option<usize>,
    pub end_silence_ms: Option<u32>,
    pub refill_max_frames: Option<usize>,
    pub resample_chunk_frames: Option<usize>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        Self::parse(&raw).with_context(|| format!("parse config {:?}", path))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str::<FileConfig>(raw)?)
    }

    /// Apply the file on top of defaults.
    pub fn resolve(self) -> NarrationConfig {
        let mut cfg = NarrationConfig::default();
        if let Some(mode) = self.mode {
            cfg.mode = mode;
        }
        if let Some(path) = self.filler_loop {
            cfg.assets.filler_loop = path;
        }
        // An empty trigger path disables the chirp.
        if let Some(trigger) = self.trigger_chirp {
            let trimmed = trigger.trim();
            cfg.assets.trigger_chirp = (!trimmed.is_empty()).then(|| PathBuf::from(trimmed));
        }
        cfg.stall_timeout = self
            .stall_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);
        if let Some(ms) = self.read_poll_ms {
            cfg.read_poll = Duration::from_millis(ms.max(10));
        }
        if let Some(bytes) = self.max_message_bytes {
            cfg.max_message_bytes = bytes;
        }
        if let Some(ms) = self.http_timeout_ms {
            cfg.http_timeout = Duration::from_millis(ms);
        }
        cfg.device = normalize_device_name(self.device);
        if let Some(p) = self.playback {
            let pb = &mut cfg.playback;
            if let Some(rate) = p.sample_rate {
                pb.sample_rate = rate;
            }
            if let Some(ms) = p.fade_ms {
                pb.fade_ms = ms;
            }
            if let Some(frames) = p.min_buffer_frames {
                pb.min_buffer_frames = frames;
            }
            if let Some(frames) = p.refill_max_frames {
                pb.refill_max_frames = frames;
            }
            if let Some(frames) = p.resample_chunk_frames {
                pb.resample_chunk_frames = frames.max(64);
            }
            let silence_ms = p.end_silence_ms.unwrap_or(1000) as u64;
            pb.end_silence_frames = (pb.sample_rate as u64 * silence_ms / 1000) as usize;
        }
        cfg
    }
}

/// Load the config file when given, else use defaults.
pub fn load_config(path: Option<&Path>) -> Result<NarrationConfig> {
    match path {
        Some(path) => Ok(FileConfig::load(path)?.resolve()),
        None => Ok(NarrationConfig::default()),
    }
}

pub(crate) fn normalize_device_name(device: Option<String>) -> Option<String> {
    device.and_then(|name| {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_have_no_stall_timeout() {
        let cfg = NarrationConfig::default();
        assert_eq!(cfg.mode, Mode::Streaming);
        assert_eq!(cfg.stall_timeout, None);
        assert_eq!(cfg.max_message_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn file_overrides_defaults() {
        let cfg = FileConfig::parse(
            r#"
            mode = "legacy"
            filler_loop = "/opt/sounds/loop.wav"
            trigger_chirp = ""
            stall_timeout_ms = 30000
            device = "  USB DAC "

            [playback]
            sample_rate = 48000
            fade_ms = 5
            "#,
        )
        .unwrap()
        .resolve();
        assert_eq!(cfg.mode, Mode::Legacy);
        assert_eq!(cfg.assets.filler_loop, PathBuf::from("/opt/sounds/loop.wav"));
        assert_eq!(cfg.assets.trigger_chirp, None);
        assert_eq!(cfg.stall_timeout, Some(Duration::from_secs(30)));
        assert_eq!(cfg.device.as_deref(), Some("USB DAC"));
        assert_eq!(cfg.playback.sample_rate, 48_000);
        assert_eq!(cfg.playback.end_silence_frames, 48_000);
        assert_eq!(cfg.playback.fade_frames(), 240);
    }

    #[test]
    fn zero_stall_timeout_means_none() {
        let cfg = FileConfig::parse("stall_timeout_ms = 0").unwrap().resolve();
        assert_eq!(cfg.stall_timeout, None);
    }

    #[test]
    fn unknown_mode_is_rejected() {
        assert!(FileConfig::parse(r#"mode = "carrier-pigeon""#).is_err());
    }

    #[test]
    fn load_reports_path_on_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let err = load_config(Some(&missing)).unwrap_err();
        assert!(format!("{err:#}").contains("nope.toml"));
    }

    #[test]
    fn normalize_device_name_trims_and_drops_empty() {
        assert_eq!(normalize_device_name(None), None);
        assert_eq!(normalize_device_name(Some("  ".to_string())), None);
        assert_eq!(
            normalize_device_name(Some(" USB  DAC ".to_string())),
            Some("USB  DAC".to_string())
        );
    }
}
