//! Session controller.
//!
//! One worker thread owns the [`PlaybackEngine`] and serializes everything that
//! touches it: caller commands, receive-loop notifications, legacy fetch results and
//! render completions. Callers talk to it through [`NarrationController`], which only
//! holds the command channel, the progress store and the event hub.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use narration_player::decode::decode_bytes;
use narration_player::{
    AudioBackend, AudioBuffer, BufferKind, EngineEvent, PlaybackEngine, RenderEvent,
    filler::FillerLoop,
};
use narration_types::{Episode, PlaybackEndReason, PlaybackState, ProgressSnapshot};
use serde_json::Value;

use crate::assets::NarrationAssets;
use crate::config::{Mode, NarrationConfig};
use crate::error::NarrationError;
use crate::events::{EventHub, NarrationEvent};
use crate::legacy::{EpisodeRef, EpisodeSource, extension_hint};
use crate::now_playing::{NowPlaying, NowPlayingInfo, RemoteCommands};
use crate::progress::ProgressStore;
use crate::receiver::{ReceiveContext, StopSignal, StreamEvent, run_stream};
use crate::request::{GenerationKind, StreamRequest};
use crate::session::SessionData;
use crate::transport::{CLOSE_CANCEL, CLOSE_CANCEL_REASON, CLOSE_NORMAL, Connector};

/// External collaborators injected at construction.
pub struct Collaborators {
    pub backend: Arc<dyn AudioBackend>,
    pub connector: Arc<dyn Connector>,
    pub episodes: Arc<dyn EpisodeSource>,
    pub now_playing: Box<dyn NowPlaying>,
}

/// Commands accepted by the worker thread.
pub(crate) enum Command {
    Start {
        request: StreamRequest,
        reply: Sender<Result<(), NarrationError>>,
    },
    PlayEpisode {
        reference: EpisodeRef,
        start_from_child: usize,
        token: String,
        base: String,
        reply: Sender<Result<(), NarrationError>>,
    },
    Pause {
        reply: Option<Sender<bool>>,
    },
    Resume {
        reply: Option<Sender<bool>>,
    },
    Cancel {
        reason: String,
        reply: Sender<()>,
    },
    Shutdown,
}

/// Results of the legacy request/response path, sent from its helper thread.
enum LegacyEvent {
    Generated(Episode),
    Hierarchy { root: Episode, level: usize },
    Audio(AudioBuffer),
    Failed(NarrationError),
}

enum LegacyJob {
    Generate {
        kind: GenerationKind,
        payload: Value,
        token: String,
        base: String,
    },
    Fetch {
        reference: EpisodeRef,
        level: usize,
        token: String,
        base: String,
    },
    Chapter(Episode),
}

/// Owner-facing handle of the narration engine.
pub struct NarrationController {
    cmd_tx: Sender<Command>,
    progress: Arc<ProgressStore>,
    events: EventHub,
    worker: Option<JoinHandle<()>>,
}

impl NarrationController {
    /// Load the bundled assets and start the worker.
    ///
    /// Fails with `AssetMissing`/`AssetDecode` when an asset cannot be used and with
    /// `Audio` when the output cannot be opened.
    pub fn new(cfg: NarrationConfig, parts: Collaborators) -> Result<Self, NarrationError> {
        let assets = NarrationAssets::load(&cfg.assets, &cfg.playback)?;
        Self::with_assets(cfg, assets, parts)
    }

    pub fn with_assets(
        cfg: NarrationConfig,
        assets: NarrationAssets,
        parts: Collaborators,
    ) -> Result<Self, NarrationError> {
        let (cmd_tx, cmd_rx) = unbounded();
        let (ready_tx, ready_rx) = bounded(1);
        let progress = ProgressStore::shared();
        let events = EventHub::new();

        let worker = {
            let progress = progress.clone();
            let events = events.clone();
            std::thread::Builder::new()
                .name("narration-worker".to_string())
                .spawn(move || {
                    let mut worker = match Worker::new(cfg, assets, parts, progress, events) {
                        Ok(w) => {
                            let _ = ready_tx.send(Ok(()));
                            w
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                    worker.run(cmd_rx);
                })
                .map_err(|e| NarrationError::Audio(format!("spawn worker: {e}")))?
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = worker.join();
                return Err(e);
            }
            Err(_) => {
                let _ = worker.join();
                return Err(NarrationError::Audio("worker exited during startup".to_string()));
            }
        }

        Ok(Self {
            cmd_tx,
            progress,
            events,
            worker: Some(worker),
        })
    }

    /// Start a streamed (or, in legacy mode, request/response) generation session.
    ///
    /// Any previous session is torn down first.
    pub fn start(
        &self,
        kind: GenerationKind,
        payload: Value,
        token: &str,
        endpoint: &str,
    ) -> Result<(), NarrationError> {
        let request = StreamRequest {
            kind,
            payload,
            token: token.to_string(),
            endpoint: endpoint.to_string(),
        };
        self.call(|reply| Command::Start { request, reply })
            .unwrap_or_else(|| Err(stopped()))
    }

    /// Play chapter `start_from_child` of an existing episode (0 = the episode itself).
    pub fn play_episode(
        &self,
        reference: EpisodeRef,
        start_from_child: usize,
        token: &str,
        base: &str,
    ) -> Result<(), NarrationError> {
        self.call(|reply| Command::PlayEpisode {
            reference,
            start_from_child,
            token: token.to_string(),
            base: base.to_string(),
            reply,
        })
        .unwrap_or_else(|| Err(stopped()))
    }

    /// Hold local rendering. Returns whether the state changed.
    pub fn pause(&self) -> bool {
        self.call(|reply| Command::Pause { reply: Some(reply) })
            .unwrap_or(false)
    }

    pub fn resume(&self) -> bool {
        self.call(|reply| Command::Resume { reply: Some(reply) })
            .unwrap_or(false)
    }

    /// Tear the session down. Safe to call at any time, any number of times.
    pub fn cancel(&self, reason: &str) {
        let reason = reason.to_string();
        let _ = self.call(|reply| Command::Cancel { reason, reply });
    }

    pub fn current_state(&self) -> Option<PlaybackState> {
        self.progress.state()
    }

    pub fn current_progress(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    pub fn subscribe(&self) -> Receiver<NarrationEvent> {
        self.events.subscribe()
    }

    /// Handle for the media center's play/pause requests.
    pub fn remote_commands(&self) -> RemoteCommands {
        RemoteCommands {
            cmd_tx: self.cmd_tx.clone(),
        }
    }

    /// Cancel any session and stop the worker.
    pub fn shutdown(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = self.cmd_tx.send(Command::Shutdown);
            let _ = worker.join();
        }
    }

    fn call<T>(&self, make: impl FnOnce(Sender<T>) -> Command) -> Option<T> {
        let (tx, rx) = bounded(1);
        self.cmd_tx.send(make(tx)).ok()?;
        rx.recv().ok()
    }
}

impl Drop for NarrationController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn stopped() -> NarrationError {
    NarrationError::Audio("narration worker is not running".to_string())
}

enum Source {
    Stream {
        stop: Arc<StopSignal>,
        /// Disconnects when the receive thread exits.
        exit: Receiver<()>,
        join: Option<JoinHandle<()>>,
        closed: bool,
        end_queued: bool,
    },
    Legacy {
        /// Root episode and chapter being played, for auto-advance.
        hierarchy: Option<(Episode, usize)>,
    },
}

struct ActiveSession {
    id: u64,
    source: Source,
    last_activity: Instant,
}

struct Worker {
    cfg: NarrationConfig,
    engine: PlaybackEngine,
    render_rx: Receiver<RenderEvent>,
    connector: Arc<dyn Connector>,
    episodes: Arc<dyn EpisodeSource>,
    now_playing: Box<dyn NowPlaying>,
    progress: Arc<ProgressStore>,
    events: EventHub,
    session: SessionData,
    active: Option<ActiveSession>,
    next_id: u64,
    stream_tx: Sender<(u64, StreamEvent)>,
    stream_rx: Receiver<(u64, StreamEvent)>,
    legacy_tx: Sender<(u64, LegacyEvent)>,
    legacy_rx: Receiver<(u64, LegacyEvent)>,
    /// Now-playing was populated for the current session and not cleared yet.
    now_playing_live: bool,
    end_reason: Option<PlaybackEndReason>,
    last_error: Option<String>,
}

impl Worker {
    fn new(
        cfg: NarrationConfig,
        assets: NarrationAssets,
        parts: Collaborators,
        progress: Arc<ProgressStore>,
        events: EventHub,
    ) -> Result<Self, NarrationError> {
        let (render_tx, render_rx) = unbounded();
        let node = parts
            .backend
            .render_node(render_tx)
            .map_err(|e| NarrationError::Audio(format!("{e:#}")))?;
        let output = parts
            .backend
            .loop_output()
            .map_err(|e| NarrationError::Audio(format!("{e:#}")))?;
        let filler = FillerLoop::new(output, assets.filler);
        let engine = PlaybackEngine::new(cfg.playback.clone(), node, Some(filler), assets.trigger);
        let (stream_tx, stream_rx) = unbounded();
        let (legacy_tx, legacy_rx) = unbounded();
        tracing::info!(mode = ?cfg.mode, stall_timeout = ?cfg.stall_timeout, "narration worker ready");

        Ok(Self {
            cfg,
            engine,
            render_rx,
            connector: parts.connector,
            episodes: parts.episodes,
            now_playing: parts.now_playing,
            progress,
            events,
            session: SessionData::default(),
            active: None,
            next_id: 0,
            stream_tx,
            stream_rx,
            legacy_tx,
            legacy_rx,
            now_playing_live: false,
            end_reason: None,
            last_error: None,
        })
    }

    fn run(&mut self, cmd_rx: Receiver<Command>) {
        let tick = self
            .cfg
            .stall_timeout
            .map(|t| (t / 4).max(Duration::from_millis(10)))
            .unwrap_or(Duration::from_secs(1));
        let stream_rx = self.stream_rx.clone();
        let legacy_rx = self.legacy_rx.clone();
        let render_rx = self.render_rx.clone();

        loop {
            crossbeam_channel::select! {
                recv(cmd_rx) -> cmd => match cmd {
                    Ok(Command::Shutdown) | Err(_) => {
                        self.cancel("shutdown");
                        break;
                    }
                    Ok(cmd) => self.on_command(cmd),
                },
                recv(stream_rx) -> msg => {
                    if let Ok((id, event)) = msg {
                        self.on_stream_event(id, event);
                    }
                }
                recv(legacy_rx) -> msg => {
                    if let Ok((id, event)) = msg {
                        self.on_legacy_event(id, event);
                    }
                }
                recv(render_rx) -> msg => {
                    if let Ok(event) = msg {
                        self.on_render_event(event);
                    }
                }
                default(tick) => self.check_stall(),
            }
        }
        tracing::info!("narration worker stopped");
    }

    fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Start { request, reply } => {
                let _ = reply.send(self.start(request));
            }
            Command::PlayEpisode {
                reference,
                start_from_child,
                token,
                base,
                reply,
            } => {
                self.cancel("superseded");
                tracing::info!(reference = ?reference, level = start_from_child, "episode playback requested");
                self.begin_session();
                self.engine.begin_pregenerated();
                let id = self.next_session_id();
                self.active = Some(ActiveSession {
                    id,
                    source: Source::Legacy { hierarchy: None },
                    last_activity: Instant::now(),
                });
                self.spawn_legacy(
                    id,
                    LegacyJob::Fetch {
                        reference,
                        level: start_from_child,
                        token,
                        base,
                    },
                );
                self.flush();
                let _ = reply.send(Ok(()));
            }
            Command::Pause { reply } => {
                let paused = self.engine.pause();
                if paused {
                    tracing::info!("paused; inbound audio is discarded until resume");
                }
                self.flush();
                if let Some(reply) = reply {
                    let _ = reply.send(paused);
                }
            }
            Command::Resume { reply } => {
                let resumed = match self.engine.resume() {
                    Ok(resumed) => resumed,
                    Err(e) => {
                        self.fail(NarrationError::Audio(format!("{e:#}")));
                        false
                    }
                };
                if resumed {
                    if let Some(active) = self.active.as_mut() {
                        active.last_activity = Instant::now();
                    }
                }
                self.flush();
                if let Some(reply) = reply {
                    let _ = reply.send(resumed);
                }
            }
            Command::Cancel { reason, reply } => {
                self.cancel(&reason);
                let _ = reply.send(());
            }
            Command::Shutdown => {}
        }
    }

    fn start(&mut self, request: StreamRequest) -> Result<(), NarrationError> {
        if request.endpoint.trim().is_empty() {
            return Err(NarrationError::InvalidRequest("endpoint is empty".to_string()));
        }
        if self.cfg.mode == Mode::Legacy {
            request.kind.legacy_path(&request.payload)?;
        }

        self.cancel("superseded");
        self.begin_session();
        self.session.begin(request.kind);
        let id = self.next_session_id();
        tracing::info!(
            session = id,
            mode = ?self.cfg.mode,
            event = request.kind.event_name(),
            level = self.session.level,
            "session start"
        );

        match self.cfg.mode {
            Mode::Streaming => {
                self.engine.begin_stream();
                let source = self.spawn_stream(id, request);
                self.active = Some(ActiveSession {
                    id,
                    source,
                    last_activity: Instant::now(),
                });
            }
            Mode::Legacy => {
                self.engine.begin_pregenerated();
                self.active = Some(ActiveSession {
                    id,
                    source: Source::Legacy { hierarchy: None },
                    last_activity: Instant::now(),
                });
                self.spawn_legacy(
                    id,
                    LegacyJob::Generate {
                        kind: request.kind,
                        payload: request.payload,
                        token: request.token,
                        base: request.endpoint,
                    },
                );
            }
        }
        self.flush();
        Ok(())
    }

    fn begin_session(&mut self) {
        self.end_reason = None;
        self.last_error = None;
        self.now_playing_live = true;
    }

    fn next_session_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn spawn_stream(&mut self, id: u64, request: StreamRequest) -> Source {
        let stop = Arc::new(StopSignal::default());
        let (exit_tx, exit_rx) = bounded::<()>(0);
        let ctx = ReceiveContext {
            session: id,
            queue: self.engine.queue(),
            stop: stop.clone(),
            playback: self.cfg.playback.clone(),
            output_rate: self.engine.output_rate(),
            events: self.stream_tx.clone(),
        };
        let connector = self.connector.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("narration-rx-{id}"))
            .spawn(move || {
                let _exit = exit_tx;
                run_stream(connector.as_ref(), &request, ctx);
            });
        let join = match spawned {
            Ok(join) => Some(join),
            Err(e) => {
                self.fail(NarrationError::Transport(format!("spawn receive thread: {e}")));
                None
            }
        };
        Source::Stream {
            stop,
            exit: exit_rx,
            closed: join.is_none(),
            join,
            end_queued: false,
        }
    }

    fn spawn_legacy(&mut self, id: u64, job: LegacyJob) {
        let episodes = self.episodes.clone();
        let playback = self.cfg.playback.clone();
        let tx = self.legacy_tx.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("narration-fetch-{id}"))
            .spawn(move || {
                let send = |event| {
                    let _ = tx.send((id, event));
                };
                if let Err(e) = run_legacy_job(job, episodes.as_ref(), &playback, &send) {
                    send(LegacyEvent::Failed(e));
                }
            });
        if let Err(e) = spawned {
            self.fail(NarrationError::Transport(format!("spawn fetch thread: {e}")));
        }
    }

    fn is_current(&self, id: u64) -> bool {
        self.active.as_ref().is_some_and(|a| a.id == id)
    }

    fn on_stream_event(&mut self, id: u64, event: StreamEvent) {
        if !self.is_current(id) {
            tracing::debug!(session = id, "stale stream event dropped");
            return;
        }
        if let Some(active) = self.active.as_mut() {
            active.last_activity = Instant::now();
        }

        match event {
            StreamEvent::Enqueued => {
                if let Err(e) = self.engine.pump() {
                    self.fail(NarrationError::Audio(format!("{e:#}")));
                }
            }
            StreamEvent::EndOfAudio => {
                if let Some(ActiveSession {
                    source: Source::Stream { end_queued, .. },
                    ..
                }) = self.active.as_mut()
                {
                    *end_queued = true;
                }
            }
            StreamEvent::Header(header) => {
                self.session.apply_header(&header);
                tracing::info!(session = id, title = %header.title, level = self.session.level, "episode header");
                self.events.publish(NarrationEvent::Header {
                    title: self.session.title.clone(),
                    level: self.session.level,
                });
                self.show_now_playing();
            }
            StreamEvent::Completion(completion) => {
                self.session.apply_completion(&completion);
                tracing::info!(
                    session = id,
                    podcast_id = completion.podcast_id,
                    follow_ups = completion.follow_ups.len(),
                    "episode completed"
                );
                self.events
                    .publish(NarrationEvent::FollowUps(completion.follow_ups));
            }
            StreamEvent::Transcript(delta) => {
                self.session.append_transcript(&delta);
                self.events.publish(NarrationEvent::TranscriptDelta(delta));
            }
            StreamEvent::Closed { error } => {
                if let Some(ActiveSession {
                    source: Source::Stream { closed, join, .. },
                    ..
                }) = self.active.as_mut()
                {
                    *closed = true;
                    if let Some(join) = join.take() {
                        let _ = join.join();
                    }
                }
                if let Some(error) = error {
                    if self.engine.state() != Some(PlaybackState::Finished) {
                        self.fail(error);
                    }
                }
            }
        }
        self.flush();
    }

    fn on_legacy_event(&mut self, id: u64, event: LegacyEvent) {
        if !self.is_current(id) {
            tracing::debug!(session = id, "stale fetch result dropped");
            return;
        }
        match event {
            LegacyEvent::Generated(episode) => {
                self.session.apply_generated(&episode);
                self.announce_episode();
            }
            LegacyEvent::Hierarchy { root, level } => {
                self.session.begin_chapter(&root, level);
                if let Some(ActiveSession {
                    source: Source::Legacy { hierarchy },
                    ..
                }) = self.active.as_mut()
                {
                    *hierarchy = Some((root, level));
                }
                self.announce_episode();
            }
            LegacyEvent::Audio(buffer) => {
                if let Err(e) = self.engine.play_pregenerated(buffer) {
                    self.fail(NarrationError::Audio(format!("{e:#}")));
                }
            }
            LegacyEvent::Failed(error) => self.fail(error),
        }
        self.flush();
    }

    fn announce_episode(&mut self) {
        tracing::info!(title = %self.session.title, level = self.session.level, "episode loaded");
        self.events.publish(NarrationEvent::Header {
            title: self.session.title.clone(),
            level: self.session.level,
        });
        if !self.session.transcript.is_empty() {
            self.events
                .publish(NarrationEvent::TranscriptDelta(self.session.transcript.clone()));
        }
        if !self.session.follow_ups.is_empty() {
            self.events
                .publish(NarrationEvent::FollowUps(self.session.follow_ups.clone()));
        }
        self.show_now_playing();
    }

    fn on_render_event(&mut self, event: RenderEvent) {
        if let Err(e) = self.engine.on_render_event(event) {
            self.fail(NarrationError::Audio(format!("{e:#}")));
        }
        if self.flush() == Some(PlaybackEndReason::Eof) {
            self.advance_chapter();
        }
    }

    /// After a legacy chapter ends, start the next one when the hierarchy has it.
    fn advance_chapter(&mut self) {
        let Some(ActiveSession {
            source: Source::Legacy {
                hierarchy: Some((root, level)),
            },
            ..
        }) = self.active.as_ref()
        else {
            return;
        };
        if !root.has_chapter_after(*level) {
            return;
        }
        let root = root.clone();
        let next = *level + 1;
        let Some(chapter) = root.chapter(next).cloned() else {
            return;
        };

        tracing::info!(level = next, title = %chapter.title, "advancing to next chapter");
        self.session.begin_chapter(&root, next);
        self.begin_session();
        self.engine.begin_pregenerated();
        let id = self.next_session_id();
        self.active = Some(ActiveSession {
            id,
            source: Source::Legacy {
                hierarchy: Some((root, next)),
            },
            last_activity: Instant::now(),
        });
        self.flush();
        self.announce_episode();
        self.spawn_legacy(id, LegacyJob::Chapter(chapter));
    }

    fn check_stall(&mut self) {
        let Some(timeout) = self.cfg.stall_timeout else {
            return;
        };
        let Some(active) = self.active.as_ref() else {
            return;
        };
        let Source::Stream {
            closed: false,
            end_queued: false,
            stop,
            ..
        } = &active.source
        else {
            return;
        };
        if !matches!(
            self.engine.state(),
            Some(PlaybackState::Loading) | Some(PlaybackState::Playing)
        ) {
            return;
        }
        let quiet = active.last_activity.elapsed();
        if quiet < timeout {
            return;
        }
        stop.request(CLOSE_NORMAL, "stalled");
        self.fail(NarrationError::Transport(format!(
            "no frames received for {} ms",
            quiet.as_millis()
        )));
        self.flush();
    }

    /// End the session in `Finished` with `error` as the last error.
    fn fail(&mut self, error: NarrationError) {
        if self.engine.state() == Some(PlaybackState::Finished) {
            return;
        }
        tracing::warn!("narration session failed: {error}");
        if let Some(ActiveSession {
            source: Source::Stream { stop, closed: false, .. },
            ..
        }) = self.active.as_ref()
        {
            stop.request(CLOSE_NORMAL, "error");
        }
        self.last_error = Some(error.to_string());
        self.engine.finish(PlaybackEndReason::Error);
    }

    /// Teardown: transport, filler, renderer, session, now-playing. Every step is a
    /// no-op when already done.
    fn cancel(&mut self, reason: &str) {
        let was_live = matches!(
            self.engine.state(),
            Some(PlaybackState::Loading) | Some(PlaybackState::Playing) | Some(PlaybackState::Paused)
        );

        if let Some(active) = self.active.take() {
            self.close_source(active);
        }
        if self.engine.stop_filler() {
            tracing::debug!("filler stopped by cancel");
        }
        self.engine.stop_renderer();
        self.engine.reset();
        self.session.reset();
        if self.now_playing_live {
            self.now_playing.clear_now_playing();
            self.now_playing_live = false;
        }
        self.flush();

        if was_live {
            tracing::info!(reason, "session cancelled");
            self.end_reason = Some(PlaybackEndReason::Cancelled);
            self.last_error = None;
            self.events.publish(NarrationEvent::Cancelled {
                reason: reason.to_string(),
            });
            self.refresh_progress();
        }
    }

    fn close_source(&mut self, active: ActiveSession) {
        match active.source {
            Source::Stream {
                stop, exit, join, ..
            } => {
                stop.request(CLOSE_CANCEL, CLOSE_CANCEL_REASON);
                let wait = self.cfg.read_poll * 4 + Duration::from_secs(1);
                match exit.recv_timeout(wait) {
                    Err(RecvTimeoutError::Disconnected) => {
                        if let Some(join) = join {
                            let _ = join.join();
                        }
                    }
                    _ => {
                        tracing::warn!(session = active.id, "receive thread did not stop in time; detaching");
                    }
                }
            }
            Source::Legacy { .. } => {
                tracing::debug!(session = active.id, "pending fetch abandoned");
            }
        }
    }

    /// Publish engine events, keep now-playing and progress in step. Returns how the
    /// session ended when it ended during this call.
    fn flush(&mut self) -> Option<PlaybackEndReason> {
        let mut ended = None;
        for event in self.engine.drain_events() {
            match event {
                EngineEvent::StateChanged { from, to } => {
                    self.events.publish(NarrationEvent::StateChanged { from, to });
                    if to.is_some() {
                        self.show_now_playing();
                    }
                }
                EngineEvent::BufferReady { kind, frames } => {
                    self.events
                        .publish(NarrationEvent::BufferReady { kind, frames });
                }
                EngineEvent::DurationKnown { ms } => {
                    self.events.publish(NarrationEvent::DurationKnown { ms });
                }
                EngineEvent::Ended { reason } => {
                    if reason == PlaybackEndReason::Error && self.last_error.is_none() {
                        self.last_error =
                            Some(NarrationError::Audio("output stream failed".to_string()).to_string());
                    }
                    self.end_reason = Some(reason);
                    ended = Some(reason);
                    self.events.publish(NarrationEvent::Ended {
                        reason,
                        error: self.last_error.clone(),
                    });
                }
            }
        }
        self.refresh_progress();
        ended
    }

    fn show_now_playing(&mut self) {
        if !self.now_playing_live || self.session.title.is_empty() {
            return;
        }
        let info = self
            .session
            .now_playing(NowPlayingInfo::rate_for(self.engine.state()));
        self.now_playing.set_now_playing(&info);
    }

    fn refresh_progress(&self) {
        self.progress.update(|snap| {
            *snap = ProgressSnapshot::default();
            snap.state = self.engine.state();
            self.session.write_into(snap);
            snap.end_reason = self.end_reason;
            snap.last_error = self.last_error.clone();
        });
    }
}

fn run_legacy_job(
    job: LegacyJob,
    episodes: &dyn EpisodeSource,
    playback: &narration_player::PlaybackConfig,
    send: &dyn Fn(LegacyEvent),
) -> Result<(), NarrationError> {
    let episode = match job {
        LegacyJob::Generate {
            kind,
            payload,
            token,
            base,
        } => {
            let episode = episodes.generate(kind, &payload, &token, &base)?;
            send(LegacyEvent::Generated(episode.clone()));
            episode
        }
        LegacyJob::Fetch {
            reference,
            level,
            token,
            base,
        } => {
            let root = episodes.fetch(&reference, &token, &base)?;
            let chapter = root.chapter(level).cloned().ok_or_else(|| {
                NarrationError::EpisodeDecode(format!("episode {} has no chapter {level}", root.id))
            })?;
            send(LegacyEvent::Hierarchy { root, level });
            chapter
        }
        LegacyJob::Chapter(episode) => episode,
    };

    let url = episode.audio_url.as_deref().ok_or_else(|| {
        NarrationError::EpisodeDecode(format!("episode {} has no audio", episode.id))
    })?;
    let bytes = episodes.fetch_audio(url)?;
    let hint = extension_hint(url);
    let (buffer, info) = decode_bytes(bytes, hint.as_deref(), BufferKind::Pregenerated, playback)
        .map_err(|e| NarrationError::EpisodeDecode(format!("{e:#}")))?;
    tracing::info!(
        episode = episode.id,
        codec = info.codec.as_deref().unwrap_or("unknown"),
        source_rate = info.source_rate,
        frames = buffer.frames(),
        "episode audio decoded"
    );
    send(LegacyEvent::Audio(buffer));
    Ok(())
}
