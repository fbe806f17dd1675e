//! Bundled filler and trigger clips, decoded once at controller construction.

use std::path::Path;

use narration_player::decode::decode_file;
use narration_player::{AudioBuffer, BufferKind, PlaybackConfig};

use crate::config::AssetPaths;
use crate::error::NarrationError;

pub struct NarrationAssets {
    /// Ambience looped while generation catches up.
    pub filler: AudioBuffer,
    /// Chirp played once ahead of the first narration buffer.
    pub trigger: Option<AudioBuffer>,
}

impl NarrationAssets {
    pub fn load(paths: &AssetPaths, playback: &PlaybackConfig) -> Result<Self, NarrationError> {
        let filler = load_clip(&paths.filler_loop, BufferKind::Ambience, playback)?;
        let trigger = paths
            .trigger_chirp
            .as_deref()
            .map(|path| load_clip(path, BufferKind::Trigger, playback))
            .transpose()?;
        Ok(Self { filler, trigger })
    }
}

fn load_clip(path: &Path, kind: BufferKind, playback: &PlaybackConfig) -> Result<AudioBuffer, NarrationError> {
    if !path.is_file() {
        return Err(NarrationError::AssetMissing {
            path: path.to_path_buf(),
        });
    }
    let (buffer, info) = decode_file(path, kind, playback).map_err(|e| NarrationError::AssetDecode {
        path: path.to_path_buf(),
        reason: format!("{e:#}"),
    })?;
    tracing::info!(
        path = %path.display(),
        codec = info.codec.as_deref().unwrap_or("unknown"),
        source_rate = info.source_rate,
        frames = buffer.frames(),
        "asset loaded"
    );
    Ok(buffer)
}
