//! Non-streaming episode source.
//!
//! The legacy path asks the API for a whole episode document, then downloads the
//! episode's audio file. Non-2xx responses map onto [`HttpFailure`].

use std::io::Read;
use std::time::Duration;

use narration_types::Episode;
use serde_json::Value;

use crate::error::{HttpFailure, NarrationError};
use crate::request::{GenerationKind, join_url};

/// How to look an existing episode up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EpisodeRef {
    Id(i64),
    Share(String),
}

impl EpisodeRef {
    pub fn path(&self) -> String {
        match self {
            EpisodeRef::Id(id) => format!("podcast/{id}"),
            EpisodeRef::Share(share) => format!("public/podcast/{share}"),
        }
    }
}

pub trait EpisodeSource: Send + Sync {
    /// Generate an episode in one request/response exchange.
    fn generate(
        &self,
        kind: GenerationKind,
        payload: &Value,
        token: &str,
        base: &str,
    ) -> Result<Episode, NarrationError>;

    fn fetch(&self, reference: &EpisodeRef, token: &str, base: &str) -> Result<Episode, NarrationError>;

    /// Download an episode's audio document.
    fn fetch_audio(&self, url: &str) -> Result<Vec<u8>, NarrationError>;
}

/// `ureq`-backed source.
#[derive(Clone, Debug)]
pub struct HttpEpisodeSource {
    pub timeout: Duration,
}

impl Default for HttpEpisodeSource {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
        }
    }
}

impl HttpEpisodeSource {
    fn read_episode(resp: ureq::http::Response<ureq::Body>, label: &str) -> Result<Episode, NarrationError> {
        let status = resp.status().as_u16();
        let (_, body) = resp.into_parts();
        let mut bytes = Vec::new();
        body.into_reader()
            .read_to_end(&mut bytes)
            .map_err(|e| NarrationError::Transport(format!("read {label} body: {e}")))?;
        episode_from_response(status, &bytes)
    }
}

impl EpisodeSource for HttpEpisodeSource {
    fn generate(
        &self,
        kind: GenerationKind,
        payload: &Value,
        token: &str,
        base: &str,
    ) -> Result<Episode, NarrationError> {
        let url = join_url(base, &kind.legacy_path(payload)?);
        tracing::info!(url = %url, event = kind.event_name(), "legacy generation request");
        let resp = ureq::post(&url)
            .config()
            .timeout_per_call(Some(self.timeout))
            .http_status_as_error(false)
            .build()
            .header("Authorization", &format!("Bearer {token}"))
            .send_json(payload)
            .map_err(|e| NarrationError::Transport(format!("request {url}: {e}")))?;
        Self::read_episode(resp, "generation")
    }

    fn fetch(&self, reference: &EpisodeRef, token: &str, base: &str) -> Result<Episode, NarrationError> {
        let url = join_url(base, &reference.path());
        tracing::info!(url = %url, "episode fetch");
        let resp = ureq::get(&url)
            .config()
            .timeout_per_call(Some(self.timeout))
            .http_status_as_error(false)
            .build()
            .header("Authorization", &format!("Bearer {token}"))
            .call()
            .map_err(|e| NarrationError::Transport(format!("request {url}: {e}")))?;
        Self::read_episode(resp, "episode")
    }

    fn fetch_audio(&self, url: &str) -> Result<Vec<u8>, NarrationError> {
        let started = std::time::Instant::now();
        let resp = ureq::get(url)
            .config()
            .timeout_per_call(Some(self.timeout))
            .http_status_as_error(false)
            .build()
            .call()
            .map_err(|e| NarrationError::Transport(format!("audio request {url}: {e}")))?;
        let status = resp.status().as_u16();
        let (_, body) = resp.into_parts();
        let mut bytes = Vec::new();
        body.into_reader()
            .read_to_end(&mut bytes)
            .map_err(|e| NarrationError::Transport(format!("audio read: {e}")))?;
        if !(200..300).contains(&status) {
            return Err(NarrationError::Http(HttpFailure::from_status(status, &bytes)));
        }
        tracing::info!(
            bytes = bytes.len(),
            took_ms = started.elapsed().as_millis() as u64,
            "episode audio downloaded"
        );
        Ok(bytes)
    }
}

/// Decode an API response into an episode, mapping failure statuses.
pub fn episode_from_response(status: u16, body: &[u8]) -> Result<Episode, NarrationError> {
    if !(200..300).contains(&status) {
        let failure = HttpFailure::from_status(status, body);
        tracing::warn!(status, reason = %failure.user_message(), "legacy request failed");
        return Err(NarrationError::Http(failure));
    }
    serde_json::from_slice(body).map_err(|e| NarrationError::EpisodeDecode(e.to_string()))
}

/// File extension of an audio URL, used as a decode hint.
pub fn extension_hint(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let file = path.rsplit('/').next()?;
    let (_, ext) = file.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 5 {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
