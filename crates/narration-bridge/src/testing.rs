//! In-memory collaborators for controller tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use crossbeam_channel::{Receiver, Sender, unbounded};
use narration_player::testing::Journal;
use narration_types::Episode;
use serde_json::Value;

use crate::error::NarrationError;
use crate::legacy::{EpisodeRef, EpisodeSource};
use crate::now_playing::{NowPlaying, NowPlayingInfo};
use crate::request::GenerationKind;
use crate::transport::{Connector, Incoming, Transport};

fn note(journal: &Option<Journal>, entry: &str) {
    if let Some(journal) = journal {
        if let Ok(mut j) = journal.lock() {
            j.push(entry.to_string());
        }
    }
}

/// AUDIO frame in the byte-array envelope, carrying `samples` as PCM16LE.
pub(crate) fn audio_frame(samples: &[i16]) -> Incoming {
    let pcm: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    let inner = serde_json::json!({ "audio": STANDARD.encode(pcm) }).to_string();
    let bytes: Vec<u8> = inner.into_bytes();
    Incoming::Text(
        serde_json::json!({
            "type": "AUDIO",
            "payload": { "audioChunk": { "data": bytes } }
        })
        .to_string(),
    )
}

pub(crate) fn end_frame() -> Incoming {
    Incoming::Text(r#"{"type":"AUDIO","payload":{"audio":null}}"#.to_string())
}

pub(crate) fn text_frame(raw: &str) -> Incoming {
    Incoming::Text(raw.to_string())
}

#[derive(Debug, Default)]
pub(crate) struct TransportLog {
    pub(crate) sent: Vec<String>,
    pub(crate) closed: Option<(u16, String)>,
    pub(crate) close_calls: usize,
}

/// Transport fed from a channel. Reads idle while the feed is empty and fail once the
/// feed is dropped and drained.
#[derive(Clone)]
pub(crate) struct ScriptedTransport {
    rx: Receiver<Incoming>,
    log: Arc<Mutex<TransportLog>>,
    journal: Option<Journal>,
}

impl ScriptedTransport {
    /// Transport that plays `script` and then reports a reset connection.
    pub(crate) fn new(script: Vec<Incoming>) -> Self {
        let (tx, rx) = unbounded();
        for item in script {
            let _ = tx.send(item);
        }
        Self {
            rx,
            log: Arc::default(),
            journal: None,
        }
    }

    pub(crate) fn closed_with(&self) -> Option<(u16, String)> {
        self.log.lock().ok().and_then(|l| l.closed.clone())
    }

    pub(crate) fn remaining(&self) -> usize {
        self.rx.len()
    }
}

impl Transport for ScriptedTransport {
    fn send_text(&mut self, text: &str) -> Result<(), NarrationError> {
        if let Ok(mut log) = self.log.lock() {
            log.sent.push(text.to_string());
        }
        Ok(())
    }

    fn read(&mut self) -> Result<Incoming, NarrationError> {
        match self.rx.recv_timeout(Duration::from_millis(5)) {
            Ok(item) => Ok(item),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => Ok(Incoming::Idle),
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                Err(NarrationError::Transport("reset".to_string()))
            }
        }
    }

    fn close(&mut self, code: u16, reason: &str) {
        let Ok(mut log) = self.log.lock() else {
            return;
        };
        log.close_calls += 1;
        if log.closed.is_none() {
            log.closed = Some((code, reason.to_string()));
            drop(log);
            note(&self.journal, "transport.close");
        }
    }
}

/// Server side of one scripted connection.
#[derive(Clone)]
pub(crate) struct Feed {
    pub(crate) endpoint: String,
    pub(crate) token: String,
    tx: Sender<Incoming>,
    log: Arc<Mutex<TransportLog>>,
}

impl Feed {
    pub(crate) fn send(&self, item: Incoming) {
        let _ = self.tx.send(item);
    }

    pub(crate) fn sent(&self) -> Vec<String> {
        self.log.lock().map(|l| l.sent.clone()).unwrap_or_default()
    }

    pub(crate) fn closed_with(&self) -> Option<(u16, String)> {
        self.log.lock().ok().and_then(|l| l.closed.clone())
    }
}

/// Connector handing out scripted transports; every connection is recorded.
#[derive(Clone, Default)]
pub(crate) struct ScriptedConnector {
    feeds: Arc<Mutex<Vec<Feed>>>,
    refuse: Arc<Mutex<bool>>,
    journal: Option<Journal>,
}

impl ScriptedConnector {
    pub(crate) fn with_journal(journal: Journal) -> Self {
        Self {
            journal: Some(journal),
            ..Self::default()
        }
    }

    pub(crate) fn refuse_connections(&self) {
        if let Ok(mut r) = self.refuse.lock() {
            *r = true;
        }
    }

    pub(crate) fn connections(&self) -> usize {
        self.feeds.lock().map(|f| f.len()).unwrap_or(0)
    }

    /// Feed of connection `index`, waiting briefly for it to be opened.
    pub(crate) fn feed(&self, index: usize) -> Feed {
        for _ in 0..400 {
            if let Some(feed) = self.feeds.lock().ok().and_then(|f| f.get(index).cloned()) {
                return feed;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("connection {index} was never opened");
    }
}

impl Connector for ScriptedConnector {
    fn connect(&self, endpoint: &str, token: &str) -> Result<Box<dyn Transport>, NarrationError> {
        if self.refuse.lock().map(|r| *r).unwrap_or(false) {
            return Err(NarrationError::Transport("connection refused".to_string()));
        }
        let (tx, rx) = unbounded();
        let log: Arc<Mutex<TransportLog>> = Arc::default();
        if let Ok(mut feeds) = self.feeds.lock() {
            feeds.push(Feed {
                endpoint: endpoint.to_string(),
                token: token.to_string(),
                tx,
                log: log.clone(),
            });
        }
        Ok(Box::new(ScriptedTransport {
            rx,
            log,
            journal: self.journal.clone(),
        }))
    }
}

#[derive(Debug, Default)]
pub(crate) struct NowPlayingLog {
    pub(crate) sets: Vec<NowPlayingInfo>,
    pub(crate) clears: usize,
}

#[derive(Clone, Default)]
pub(crate) struct RecordingNowPlaying {
    pub(crate) log: Arc<Mutex<NowPlayingLog>>,
    journal: Option<Journal>,
}

impl RecordingNowPlaying {
    pub(crate) fn with_journal(journal: Journal) -> Self {
        Self {
            journal: Some(journal),
            ..Self::default()
        }
    }

    pub(crate) fn clears(&self) -> usize {
        self.log.lock().map(|l| l.clears).unwrap_or(0)
    }

    pub(crate) fn last(&self) -> Option<NowPlayingInfo> {
        self.log.lock().ok().and_then(|l| l.sets.last().cloned())
    }
}

impl NowPlaying for RecordingNowPlaying {
    fn set_now_playing(&mut self, info: &NowPlayingInfo) {
        if let Ok(mut log) = self.log.lock() {
            log.sets.push(info.clone());
        }
    }

    fn clear_now_playing(&mut self) {
        if let Ok(mut log) = self.log.lock() {
            log.clears += 1;
        }
        note(&self.journal, "now_playing.clear");
    }
}

/// Episode store and generation endpoint answering from memory.
#[derive(Clone, Default)]
pub(crate) struct StubEpisodes {
    pub(crate) episodes: HashMap<i64, Episode>,
    pub(crate) generated: Option<Result<Episode, NarrationError>>,
    pub(crate) audio: HashMap<String, Vec<u8>>,
    pub(crate) requests: Arc<Mutex<Vec<String>>>,
}

impl StubEpisodes {
    fn record(&self, what: String) {
        if let Ok(mut r) = self.requests.lock() {
            r.push(what);
        }
    }
}

impl EpisodeSource for StubEpisodes {
    fn generate(
        &self,
        kind: GenerationKind,
        payload: &Value,
        _token: &str,
        _base: &str,
    ) -> Result<Episode, NarrationError> {
        self.record(format!("generate {}", kind.legacy_path(payload)?));
        self.generated
            .clone()
            .unwrap_or(Err(NarrationError::Transport("no generation scripted".into())))
    }

    fn fetch(&self, reference: &EpisodeRef, _token: &str, _base: &str) -> Result<Episode, NarrationError> {
        self.record(format!("fetch {}", reference.path()));
        match reference {
            EpisodeRef::Id(id) => self
                .episodes
                .get(id)
                .cloned()
                .ok_or(NarrationError::Http(crate::error::HttpFailure::NotFound)),
            EpisodeRef::Share(_) => Err(NarrationError::Http(crate::error::HttpFailure::NotFound)),
        }
    }

    fn fetch_audio(&self, url: &str) -> Result<Vec<u8>, NarrationError> {
        self.record(format!("audio {url}"));
        self.audio
            .get(url)
            .cloned()
            .ok_or(NarrationError::Http(crate::error::HttpFailure::NotFound))
    }
}

/// Mono 16-bit WAV document of `frames` frames at `rate`.
pub(crate) fn wav_bytes(rate: u32, frames: usize) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..frames {
            writer.write_sample(((i % 64) as i16 - 32) * 200).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}
