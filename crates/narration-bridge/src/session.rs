//! Per-session metadata accumulated from INFO/TRANSCRIPT frames or episode documents.

use narration_types::{Episode, EpisodeSummary, FollowUpPrompt, ProgressSnapshot};

use crate::codec::{EpisodeCompletion, EpisodeHeader};
use crate::now_playing::{NOW_PLAYING_ALBUM, NowPlayingInfo};
use crate::request::GenerationKind;

/// Metadata of the current session plus the hierarchy bookmark (level, root) that
/// survives from one session to the next.
#[derive(Clone, Debug, Default)]
pub struct SessionData {
    pub title: String,
    pub level: u32,
    pub transcript: String,
    pub chapter: EpisodeSummary,
    pub root: EpisodeSummary,
    pub follow_ups: Vec<FollowUpPrompt>,
    pub artwork_url: Option<String>,
    pub persona_name: Option<String>,
    /// A new episode was requested and its root is not fully known yet.
    awaiting_root: bool,
}

impl SessionData {
    /// Prepare for a generation request of `kind`.
    ///
    /// Continuing goes one level deeper under the same root; a new episode starts a
    /// new hierarchy at level 0.
    pub fn begin(&mut self, kind: GenerationKind) {
        self.reset();
        if kind.is_continuation() {
            self.level = self.level.saturating_add(1);
            self.awaiting_root = false;
        } else {
            self.level = 0;
            self.root = EpisodeSummary::default();
            self.awaiting_root = true;
        }
    }

    /// Prepare for playing chapter `level` of an existing hierarchy.
    pub fn begin_chapter(&mut self, root: &Episode, level: usize) {
        self.reset();
        self.awaiting_root = false;
        self.level = level as u32;
        self.root = EpisodeSummary {
            id: Some(root.id),
            title: root.title.clone(),
        };
        if let Some(chapter) = root.chapter(level) {
            self.load_episode(chapter);
            if self.artwork_url.is_none() {
                self.load_persona(root);
            }
        }
    }

    pub fn apply_header(&mut self, header: &EpisodeHeader) {
        self.title = header.title.clone();
        self.chapter.title = header.title.clone();
        if let Some(level) = header.level {
            self.level = level;
        }
        if header.picture_url.is_some() {
            self.artwork_url = header.picture_url.clone();
        }
        if header.persona_name.is_some() {
            self.persona_name = header.persona_name.clone();
        }
        if self.awaiting_root {
            self.root.title = header.title.clone();
        }
    }

    pub fn apply_completion(&mut self, completion: &EpisodeCompletion) {
        self.follow_ups = completion.follow_ups.clone();
        self.chapter.id = Some(completion.podcast_id);
        if self.awaiting_root {
            self.root.id = Some(completion.podcast_id);
            self.awaiting_root = false;
        }
    }

    /// A generated episode delivered whole by the request/response path.
    pub fn apply_generated(&mut self, episode: &Episode) {
        self.load_episode(episode);
        if self.awaiting_root {
            self.root = EpisodeSummary {
                id: Some(episode.id),
                title: episode.title.clone(),
            };
            self.awaiting_root = false;
        }
    }

    pub fn append_transcript(&mut self, delta: &str) {
        self.transcript.push_str(delta);
    }

    /// Forget per-session metadata. Level and root are kept.
    pub fn reset(&mut self) {
        self.title.clear();
        self.transcript.clear();
        self.chapter = EpisodeSummary::default();
        self.follow_ups.clear();
        self.artwork_url = None;
        self.persona_name = None;
    }

    pub fn now_playing(&self, rate: f32) -> NowPlayingInfo {
        NowPlayingInfo {
            title: self.title.clone(),
            artist: self.persona_name.clone(),
            album: if self.root.title.is_empty() {
                NOW_PLAYING_ALBUM.to_string()
            } else {
                self.root.title.clone()
            },
            artwork_url: self.artwork_url.clone(),
            rate,
        }
    }

    pub fn write_into(&self, snap: &mut ProgressSnapshot) {
        snap.title = self.title.clone();
        snap.level = self.level;
        snap.transcript = self.transcript.clone();
        snap.chapter = self.chapter.clone();
        snap.root = self.root.clone();
        snap.follow_ups = self.follow_ups.clone();
        snap.artwork_url = self.artwork_url.clone();
    }

    fn load_episode(&mut self, episode: &Episode) {
        self.title = episode.title.clone();
        self.chapter = EpisodeSummary {
            id: Some(episode.id),
            title: episode.title.clone(),
        };
        self.transcript = episode.transcript.clone().unwrap_or_default();
        self.follow_ups = episode.follow_ups.clone();
        self.load_persona(episode);
    }

    fn load_persona(&mut self, episode: &Episode) {
        if let Some(persona) = &episode.persona {
            self.artwork_url = persona.picture_url.clone();
            self.persona_name = persona.name.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use narration_types::Persona;

    fn header(title: &str, level: Option<u32>) -> EpisodeHeader {
        EpisodeHeader {
            title: title.to_string(),
            level,
            picture_url: Some("https://cdn/p.png".to_string()),
            persona_name: Some("Ada".to_string()),
        }
    }

    #[test]
    fn new_episode_records_root_from_first_header_and_completion() {
        let mut s = SessionData::default();
        s.begin(GenerationKind::NewFromSingleSeed);
        s.apply_header(&header("Harbour", Some(0)));
        s.apply_completion(&EpisodeCompletion {
            podcast_id: 10,
            follow_ups: vec![FollowUpPrompt {
                id: 1,
                content: "Lighthouse?".into(),
            }],
        });
        assert_eq!(s.root, EpisodeSummary { id: Some(10), title: "Harbour".into() });
        assert_eq!(s.chapter.id, Some(10));
        assert_eq!(s.follow_ups.len(), 1);

        s.begin(GenerationKind::Continue);
        assert_eq!(s.level, 1);
        s.apply_header(&header("Lighthouse", None));
        s.apply_completion(&EpisodeCompletion {
            podcast_id: 11,
            follow_ups: vec![],
        });
        assert_eq!(s.root.id, Some(10));
        assert_eq!(s.root.title, "Harbour");
        assert_eq!(s.chapter.id, Some(11));
    }

    #[test]
    fn level_bookkeeping() {
        let mut s = SessionData::default();
        s.begin(GenerationKind::Continue);
        s.begin(GenerationKind::Continue);
        assert_eq!(s.level, 2);
        s.begin(GenerationKind::NewFromMultiSeed);
        assert_eq!(s.level, 0);
        s.apply_header(&header("Deep", Some(3)));
        assert_eq!(s.level, 3);
    }

    #[test]
    fn chapter_selection_uses_hierarchy() {
        let root = Episode {
            id: 1,
            title: "Root".into(),
            persona: Some(Persona {
                name: Some("Ada".into()),
                picture_url: Some("https://cdn/ada.png".into()),
                ..Persona::default()
            }),
            children: vec![Episode {
                id: 2,
                title: "Child".into(),
                transcript: Some("Once".into()),
                ..Episode::default()
            }],
            ..Episode::default()
        };
        let mut s = SessionData::default();
        s.begin_chapter(&root, 1);
        assert_eq!(s.title, "Child");
        assert_eq!(s.level, 1);
        assert_eq!(s.transcript, "Once");
        assert_eq!(s.root.id, Some(1));
        assert_eq!(s.artwork_url.as_deref(), Some("https://cdn/ada.png"));

        let info = s.now_playing(1.0);
        assert_eq!(info.album, "Root");
        assert_eq!(info.artist.as_deref(), Some("Ada"));
    }

    #[test]
    fn reset_keeps_hierarchy_bookmark() {
        let mut s = SessionData::default();
        s.begin(GenerationKind::NewFromSingleSeed);
        s.apply_header(&header("Harbour", Some(0)));
        s.append_transcript("abc");
        s.begin(GenerationKind::Continue);
        s.reset();
        assert!(s.transcript.is_empty());
        assert!(s.title.is_empty());
        assert_eq!(s.level, 1);
        assert_eq!(s.root.title, "Harbour");
    }
}
