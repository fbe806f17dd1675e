use serde::{Deserialize, Serialize};

/// Externally observable playback state of a narration session.
///
/// Both the streamed and the pregenerated paths report through this same set, so
/// callers never need to know which one is active.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    /// Session created; nothing audible from the narration yet.
    Loading,
    /// A narration buffer is being rendered.
    Playing,
    /// Local rendering is paused. Remote generation keeps going.
    Paused,
    /// The session reached its end (naturally or through a failure).
    Finished,
}

impl PlaybackState {
    /// Lower-case label used in logs and the progress snapshot.
    pub fn as_str(self) -> &'static str {
        match self {
            PlaybackState::Loading => "loading",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Finished => "finished",
        }
    }
}

/// Reason why a session stopped producing audio.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackEndReason {
    /// The end-of-stream marker (or the pregenerated file) finished rendering.
    Eof,
    /// Transport, HTTP or decode failure ended the session.
    Error,
    /// The caller cancelled or stopped the session.
    Cancelled,
}

/// A suggested next branch returned when an episode completes.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FollowUpPrompt {
    pub id: i64,
    pub content: String,
}

/// Narrator metadata attached to an episode.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Persona {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture_url: Option<String>,
}

/// Episode document as served by the episode store and the legacy generation routes.
///
/// Only the fields the engine reads are modelled; unknown fields are ignored.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Episode {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub transcript: Option<String>,
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(default, rename = "childPodcasts")]
    pub children: Vec<Episode>,
    #[serde(default)]
    pub follow_ups: Vec<FollowUpPrompt>,
    #[serde(default)]
    pub persona: Option<Persona>,
    #[serde(default)]
    pub share_id: Option<String>,
    #[serde(default)]
    pub audio_length: Option<f64>,
}

impl Episode {
    /// Chapter at `level` in this episode's hierarchy: 0 is the episode itself,
    /// `n` is child `n - 1`.
    pub fn chapter(&self, level: usize) -> Option<&Episode> {
        if level == 0 {
            Some(self)
        } else {
            self.children.get(level - 1)
        }
    }

    /// Whether a chapter follows the one at `level`.
    pub fn has_chapter_after(&self, level: usize) -> bool {
        level < self.children.len()
    }
}

/// Title/id pair describing either the current chapter or the root episode.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EpisodeSummary {
    pub id: Option<i64>,
    pub title: String,
}

/// Polling-style view of the active session.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// `None` when no session is active.
    pub state: Option<PlaybackState>,
    /// Title of the chapter being narrated.
    pub title: String,
    /// Depth of the current chapter in the episode hierarchy.
    pub level: u32,
    /// Transcript accumulated so far.
    pub transcript: String,
    /// Current chapter.
    pub chapter: EpisodeSummary,
    /// Root episode of the hierarchy.
    pub root: EpisodeSummary,
    /// Follow-up prompts delivered when the episode completed.
    pub follow_ups: Vec<FollowUpPrompt>,
    /// Narrator artwork, when announced.
    pub artwork_url: Option<String>,
    /// How the last session ended.
    pub end_reason: Option<PlaybackEndReason>,
    /// Human-readable reason of the last failure.
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn episode_decodes_nested_children_and_ignores_unknown_fields() {
        let raw = r#"{
            "id": 7,
            "title": "Harbour",
            "audioUrl": "https://cdn/7.mp3",
            "likeCount": 3,
            "persona": {"id": 2, "name": "Ada", "pictureUrl": "https://cdn/ada.png"},
            "childPodcasts": [
                {"id": 8, "title": "Lighthouse", "audioUrl": "https://cdn/8.mp3"}
            ]
        }"#;
        let episode: Episode = serde_json::from_str(raw).unwrap();
        assert_eq!(episode.id, 7);
        assert_eq!(episode.children.len(), 1);
        assert_eq!(episode.chapter(1).unwrap().title, "Lighthouse");
        assert_eq!(
            episode.persona.unwrap().picture_url.as_deref(),
            Some("https://cdn/ada.png")
        );
    }

    #[test]
    fn chapter_navigation_bounds() {
        let episode = Episode {
            id: 1,
            title: "root".to_string(),
            children: vec![Episode {
                id: 2,
                title: "child".to_string(),
                ..Episode::default()
            }],
            ..Episode::default()
        };
        assert_eq!(episode.chapter(0).unwrap().id, 1);
        assert!(episode.chapter(2).is_none());
        assert!(episode.has_chapter_after(0));
        assert!(!episode.has_chapter_after(1));
    }

    #[test]
    fn playback_state_serializes_snake_case() {
        let json = serde_json::to_string(&PlaybackState::Finished).unwrap();
        assert_eq!(json, "\"finished\"");
        assert_eq!(PlaybackState::Paused.as_str(), "paused");
    }
}
