//! Playback engine: queue draining, render scheduling and the state machine.
//!
//! The engine is owned by one thread (the session worker). It pulls buffers from the
//! shared [`PlaybackQueue`] and hands them to the [`RenderNode`] strictly one at a
//! time: the next buffer is only pulled after the node reports the current ticket as
//! completed. Every state change is recorded as an [`EngineEvent`] for the owner to
//! publish.

use std::sync::Arc;

use anyhow::Result;
use narration_types::{PlaybackEndReason, PlaybackState};

use crate::buffer::{AudioBuffer, BufferKind};
use crate::config::PlaybackConfig;
use crate::filler::FillerLoop;
use crate::queue::PlaybackQueue;
use crate::render::{RenderEvent, RenderNode};
use crate::resample::conform;

/// Observable side effects of engine calls, drained by the owner.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    StateChanged {
        from: Option<PlaybackState>,
        to: Option<PlaybackState>,
    },
    /// A buffer was handed to the render node.
    BufferReady { kind: BufferKind, frames: usize },
    /// Length of a pregenerated item, reported once when it is loaded.
    DurationKnown { ms: u64 },
    /// The session reached `Finished`.
    Ended { reason: PlaybackEndReason },
}

#[derive(Clone, Copy, Debug)]
struct InFlight {
    ticket: u64,
    kind: BufferKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Idle,
    Streaming,
    Pregenerated,
}

pub struct PlaybackEngine {
    cfg: PlaybackConfig,
    queue: Arc<PlaybackQueue>,
    node: Box<dyn RenderNode>,
    filler: Option<FillerLoop>,
    trigger: Option<AudioBuffer>,
    state: Option<PlaybackState>,
    mode: Mode,
    in_flight: Option<InFlight>,
    staged: Option<AudioBuffer>,
    next_ticket: u64,
    trigger_injected: bool,
    started: bool,
    events: Vec<EngineEvent>,
}

impl PlaybackEngine {
    pub fn new(
        cfg: PlaybackConfig,
        node: Box<dyn RenderNode>,
        filler: Option<FillerLoop>,
        trigger: Option<AudioBuffer>,
    ) -> Self {
        let queue = Arc::new(PlaybackQueue::new());
        queue.close();
        let rate = node.output_rate();
        let trigger = trigger.and_then(|t| match conform(t, rate, cfg.resample_chunk_frames) {
            Ok(t) => Some(t.with_kind(BufferKind::Trigger)),
            Err(e) => {
                tracing::warn!("trigger chirp dropped: {e:#}");
                None
            }
        });
        Self {
            cfg,
            queue,
            node,
            filler,
            trigger,
            state: None,
            mode: Mode::Idle,
            in_flight: None,
            staged: None,
            next_ticket: 1,
            trigger_injected: false,
            started: false,
            events: Vec::new(),
        }
    }

    /// Queue shared with the producer side. Closed while no stream is active, held
    /// while paused.
    pub fn queue(&self) -> Arc<PlaybackQueue> {
        self.queue.clone()
    }

    pub fn state(&self) -> Option<PlaybackState> {
        self.state
    }

    /// Rate buffers should be at when queued; see [`RenderNode::output_rate`].
    pub fn output_rate(&self) -> u32 {
        self.node.output_rate()
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.cfg
    }

    /// Whether a buffer is scheduled and not yet completed.
    pub fn has_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }

    /// Start a streamed session: `Loading`, filler running, queue open and empty.
    pub fn begin_stream(&mut self) {
        self.reset();
        self.mode = Mode::Streaming;
        self.queue.reopen();
        self.set_state(Some(PlaybackState::Loading));
        if let Some(filler) = self.filler.as_mut() {
            if let Err(e) = filler.start() {
                tracing::warn!("filler loop failed to start: {e:#}");
            }
        }
    }

    /// Start a pregenerated session. No filler, no trigger, no queue.
    pub fn begin_pregenerated(&mut self) {
        self.reset();
        self.mode = Mode::Pregenerated;
        self.set_state(Some(PlaybackState::Loading));
    }

    /// Hand a whole fetched file to the render node.
    pub fn play_pregenerated(&mut self, buffer: AudioBuffer) -> Result<()> {
        if self.mode != Mode::Pregenerated {
            tracing::debug!("pregenerated buffer ignored: no pregenerated session");
            return Ok(());
        }
        self.events.push(EngineEvent::DurationKnown {
            ms: buffer.duration_ms(),
        });
        let buffer = conform(buffer, self.output_rate(), self.cfg.resample_chunk_frames)?;
        self.staged = Some(buffer.with_kind(BufferKind::Pregenerated));
        self.pump()
    }

    /// Schedule the next buffer if the node is idle and playback is not held.
    ///
    /// Call after every enqueue; an empty queue leaves the node idle.
    pub fn pump(&mut self) -> Result<()> {
        match self.state {
            Some(PlaybackState::Loading) | Some(PlaybackState::Playing) => {}
            _ => return Ok(()),
        }
        if self.in_flight.is_some() {
            return Ok(());
        }

        let next = match self.mode {
            Mode::Idle => None,
            Mode::Pregenerated => self.staged.take(),
            Mode::Streaming => self.next_streamed(),
        };
        let Some(buffer) = next else {
            return Ok(());
        };

        if !self.started {
            self.started = true;
            if let Some(filler) = self.filler.as_mut() {
                filler.stop();
            }
            self.set_state(Some(PlaybackState::Playing));
        }

        let ticket = self.next_ticket;
        self.next_ticket += 1;
        let kind = buffer.kind();
        let frames = buffer.frames();
        let fade_frames = self.cfg.fade_frames_at(buffer.sample_rate());
        let buffer = buffer.faded(fade_frames);

        self.in_flight = Some(InFlight { ticket, kind });
        if let Err(e) = self.node.schedule(ticket, buffer) {
            self.in_flight = None;
            return Err(e);
        }
        tracing::debug!(ticket, kind = ?kind, frames, "buffer scheduled");
        self.events.push(EngineEvent::BufferReady { kind, frames });
        Ok(())
    }

    fn next_streamed(&mut self) -> Option<AudioBuffer> {
        let buffer = self.queue.pop_front()?;
        if self.trigger_injected || buffer.kind() != BufferKind::Speech {
            return Some(buffer);
        }
        self.trigger_injected = true;
        match self.trigger.clone() {
            Some(trigger) => {
                self.queue.push_front(buffer);
                Some(trigger)
            }
            None => Some(buffer),
        }
    }

    /// Feed a render node notification back into the engine.
    pub fn on_render_event(&mut self, event: RenderEvent) -> Result<()> {
        match event {
            RenderEvent::Completed { ticket } => self.on_completed(ticket),
            RenderEvent::Failed => {
                self.finish(PlaybackEndReason::Error);
                Ok(())
            }
        }
    }

    fn on_completed(&mut self, ticket: u64) -> Result<()> {
        let Some(current) = self.in_flight else {
            tracing::debug!(ticket, "completion with nothing in flight");
            return Ok(());
        };
        if current.ticket != ticket {
            tracing::debug!(ticket, current = current.ticket, "stale completion ignored");
            return Ok(());
        }
        self.in_flight = None;

        match current.kind {
            BufferKind::EndMarker | BufferKind::Pregenerated => {
                self.finish(PlaybackEndReason::Eof);
                Ok(())
            }
            _ => self.pump(),
        }
    }

    /// Hold local rendering. Only valid from `Loading` or `Playing`.
    pub fn pause(&mut self) -> bool {
        match self.state {
            Some(PlaybackState::Loading) | Some(PlaybackState::Playing) => {}
            _ => return false,
        }
        self.queue.hold();
        self.node.pause();
        self.set_state(Some(PlaybackState::Paused));
        true
    }

    /// Continue rendering what was scheduled before the pause.
    pub fn resume(&mut self) -> Result<bool> {
        if self.state != Some(PlaybackState::Paused) {
            return Ok(false);
        }
        self.queue.release();
        self.node.resume();
        let to = if self.started {
            PlaybackState::Playing
        } else {
            PlaybackState::Loading
        };
        self.set_state(Some(to));
        self.pump()?;
        Ok(true)
    }

    /// End the session in `Finished`. Idempotent.
    pub fn finish(&mut self, reason: PlaybackEndReason) {
        if self.state == Some(PlaybackState::Finished) {
            return;
        }
        if let Some(filler) = self.filler.as_mut() {
            filler.stop();
        }
        self.node.stop();
        self.queue.close();
        self.in_flight = None;
        self.staged = None;
        self.queue.release();
        self.set_state(Some(PlaybackState::Finished));
        self.events.push(EngineEvent::Ended { reason });
        tracing::info!(reason = ?reason, "playback ended");
    }

    /// Stop the filler loop. Returns whether it was running.
    pub fn stop_filler(&mut self) -> bool {
        self.filler.as_mut().map(FillerLoop::stop).unwrap_or(false)
    }

    /// Drop everything scheduled and queued without completions.
    pub fn stop_renderer(&mut self) {
        self.queue.close();
        self.staged = None;
        if self.in_flight.take().is_some() {
            tracing::debug!("in-flight buffer discarded");
        }
        self.node.stop();
    }

    /// Forget the session. State becomes `None`.
    pub fn reset(&mut self) {
        self.stop_filler();
        self.stop_renderer();
        self.queue.release();
        self.mode = Mode::Idle;
        self.trigger_injected = false;
        self.started = false;
        self.set_state(None);
    }

    fn set_state(&mut self, to: Option<PlaybackState>) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        tracing::info!(
            from = from.map(PlaybackState::as_str).unwrap_or("none"),
            to = to.map(PlaybackState::as_str).unwrap_or("none"),
            "playback state"
        );
        self.events.push(EngineEvent::StateChanged { from, to });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pcm::end_of_stream;
    use crate::testing::RecordingBackend;
    use crate::render::AudioBackend;
    use crossbeam_channel::{Receiver, unbounded};

    struct Rig {
        engine: PlaybackEngine,
        backend: RecordingBackend,
        completions: Receiver<RenderEvent>,
    }

    fn rig(trigger: bool) -> Rig {
        rig_on(RecordingBackend::new(), trigger)
    }

    fn rig_on(backend: RecordingBackend, trigger: bool) -> Rig {
        let (tx, rx) = unbounded();
        let node = backend.render_node(tx).unwrap();
        let filler = FillerLoop::new(
            backend.loop_output().unwrap(),
            AudioBuffer::new(BufferKind::Ambience, 44_100, vec![0.2; 512]),
        );
        let trigger = trigger.then(|| AudioBuffer::new(BufferKind::Speech, 44_100, vec![0.3; 2048]));
        Rig {
            engine: PlaybackEngine::new(PlaybackConfig::default(), node, Some(filler), trigger),
            backend,
            completions: rx,
        }
    }

    fn speech(frames: usize) -> AudioBuffer {
        AudioBuffer::new(BufferKind::Speech, 44_100, vec![0.5; frames])
    }

    impl Rig {
        fn enqueue(&mut self, buffer: AudioBuffer) {
            self.engine.queue().push(buffer);
            self.engine.pump().unwrap();
        }

        fn complete(&mut self) -> bool {
            if self.backend.complete_current().is_none() {
                return false;
            }
            let ev = self.completions.recv().unwrap();
            self.engine.on_render_event(ev).unwrap();
            true
        }

        fn states(&mut self) -> Vec<Option<PlaybackState>> {
            self.engine
                .drain_events()
                .into_iter()
                .filter_map(|e| match e {
                    EngineEvent::StateChanged { to, .. } => Some(to),
                    _ => None,
                })
                .collect()
        }
    }

    #[test]
    fn streams_in_order_and_finishes_after_silence() {
        let mut r = rig(false);
        r.engine.begin_stream();
        r.enqueue(speech(2048));
        r.enqueue(speech(1024));
        r.enqueue(end_of_stream(&PlaybackConfig::default()));

        assert!(r.complete());
        assert!(r.complete());
        assert_eq!(r.engine.state(), Some(PlaybackState::Playing));
        assert!(r.complete());
        assert_eq!(r.engine.state(), Some(PlaybackState::Finished));

        let log = r.backend.node_log();
        let log = log.lock().unwrap();
        let frames: Vec<usize> = log.scheduled.iter().map(|s| s.frames()).collect();
        assert_eq!(frames, vec![2048, 1024, 44_100]);
        assert_eq!(
            log.kinds(),
            vec![BufferKind::Speech, BufferKind::Speech, BufferKind::EndMarker]
        );
        drop(log);
        assert_eq!(
            r.states(),
            vec![
                Some(PlaybackState::Loading),
                Some(PlaybackState::Playing),
                Some(PlaybackState::Finished)
            ]
        );
    }

    #[test]
    fn only_one_buffer_in_flight() {
        let mut r = rig(false);
        r.engine.begin_stream();
        for _ in 0..5 {
            r.enqueue(speech(1024));
        }
        assert_eq!(r.backend.node_log().lock().unwrap().scheduled.len(), 1);
        assert_eq!(r.engine.queue().len(), 4);
        r.complete();
        assert_eq!(r.backend.node_log().lock().unwrap().scheduled.len(), 2);
    }

    #[test]
    fn end_marker_does_not_finish_until_rendered() {
        let mut r = rig(false);
        r.engine.begin_stream();
        r.enqueue(speech(1024));
        r.enqueue(end_of_stream(&PlaybackConfig::default()));
        assert_eq!(r.engine.state(), Some(PlaybackState::Playing));
        r.complete();
        assert_eq!(r.backend.current_kind(), Some(BufferKind::EndMarker));
        assert_eq!(r.engine.state(), Some(PlaybackState::Playing));
        r.complete();
        assert_eq!(r.engine.state(), Some(PlaybackState::Finished));
    }

    #[test]
    fn trigger_is_injected_once_ahead_of_first_speech() {
        let mut r = rig(true);
        r.engine.begin_stream();
        r.enqueue(speech(1024));
        r.enqueue(speech(1024));
        while r.complete() {}
        assert_eq!(
            r.backend.scheduled_kinds(),
            vec![BufferKind::Trigger, BufferKind::Speech, BufferKind::Speech]
        );

        r.engine.begin_stream();
        r.enqueue(speech(1024));
        let kinds = r.backend.scheduled_kinds();
        assert_eq!(kinds[3], BufferKind::Trigger);
    }

    #[test]
    fn filler_stops_when_first_buffer_is_scheduled() {
        let mut r = rig(false);
        r.engine.begin_stream();
        assert!(r.backend.loop_log().lock().unwrap().running);
        r.enqueue(speech(1024));
        let log = r.backend.loop_log();
        let log = log.lock().unwrap();
        assert!(!log.running);
        assert_eq!(log.starts, 1);
        assert_eq!(log.stops, 1);
    }

    #[test]
    fn every_scheduled_buffer_is_faded() {
        let mut r = rig(false);
        r.engine.begin_stream();
        r.enqueue(speech(2048));
        let log = r.backend.node_log();
        let log = log.lock().unwrap();
        let samples = &log.scheduled[0].samples;
        assert_eq!(samples[0], 0.0);
        assert_eq!(samples[1024], 0.5);
        assert!(samples[2047] < 0.01);
    }

    #[test]
    fn audio_decoded_before_pause_is_refused_after_it() {
        let cfg = PlaybackConfig::default();
        let mut r = rig(false);
        r.engine.begin_stream();
        r.enqueue(speech(1024));
        r.engine.queue().push(speech(1024));
        let queued_at_pause = r.engine.queue().len();

        let late = crate::pcm::decode_pcm16_le(&[0x10, 0x00].repeat(4096), &cfg).unwrap();
        assert!(r.engine.pause());
        assert!(!r.engine.queue().push(late));
        assert!(r.engine.resume().unwrap());

        assert_eq!(r.engine.queue().len(), queued_at_pause);
        assert_eq!(r.engine.state(), Some(PlaybackState::Playing));
    }

    #[test]
    fn trigger_and_pregenerated_items_are_brought_to_the_node_rate() {
        let mut r = rig_on(RecordingBackend::new().with_output_rate(48_000), true);
        assert_eq!(r.engine.output_rate(), 48_000);
        r.engine.begin_stream();
        r.enqueue(AudioBuffer::new(BufferKind::Speech, 48_000, vec![0.5; 4_800]));
        {
            let log = r.backend.node_log();
            let log = log.lock().unwrap();
            assert_eq!(log.scheduled[0].kind, BufferKind::Trigger);
            assert_eq!(log.scheduled[0].sample_rate, 48_000);
            assert_eq!(log.scheduled[0].frames(), 2_229);
        }

        r.engine.begin_pregenerated();
        r.engine
            .play_pregenerated(AudioBuffer::new(BufferKind::Pregenerated, 44_100, vec![0.1; 44_100]))
            .unwrap();
        let log = r.backend.node_log();
        let log = log.lock().unwrap();
        let last = log.scheduled.last().unwrap();
        assert_eq!(last.kind, BufferKind::Pregenerated);
        assert_eq!(last.sample_rate, 48_000);
        assert_eq!(last.frames(), 48_000);
    }

    #[test]
    fn pause_before_audio_returns_to_loading() {
        let mut r = rig(false);
        r.engine.begin_stream();
        assert!(r.engine.pause());
        assert!(r.engine.queue().is_held());
        assert!(r.engine.resume().unwrap());
        assert!(!r.engine.queue().is_held());
        assert_eq!(
            r.states(),
            vec![
                Some(PlaybackState::Loading),
                Some(PlaybackState::Paused),
                Some(PlaybackState::Loading)
            ]
        );
    }

    #[test]
    fn pause_holds_the_queue_and_resume_continues() {
        let mut r = rig(false);
        r.engine.begin_stream();
        r.enqueue(speech(1024));
        r.enqueue(speech(1024));
        assert!(r.engine.pause());
        assert!(!r.engine.pause());
        assert!(r.engine.has_in_flight());
        assert_eq!(r.engine.queue().len(), 1);

        r.engine.resume().unwrap();
        assert_eq!(r.engine.state(), Some(PlaybackState::Playing));
        assert_eq!(r.engine.queue().len(), 1);
        let log = r.backend.node_log();
        assert_eq!(log.lock().unwrap().pauses, 1);
        assert_eq!(log.lock().unwrap().resumes, 1);
    }

    #[test]
    fn stale_completion_is_ignored() {
        let mut r = rig(false);
        r.engine.begin_stream();
        r.enqueue(speech(1024));
        r.engine.on_render_event(RenderEvent::Completed { ticket: 99 }).unwrap();
        assert!(r.engine.has_in_flight());
    }

    #[test]
    fn reset_is_idempotent_and_closes_queue() {
        let mut r = rig(false);
        r.engine.begin_stream();
        r.enqueue(speech(1024));
        r.engine.reset();
        r.engine.reset();
        assert_eq!(r.engine.state(), None);
        assert!(r.engine.queue().is_closed());
        assert!(!r.engine.queue().push(speech(1)));
        assert!(!r.engine.has_in_flight());
        assert_eq!(r.backend.loop_log().lock().unwrap().stops, 1);
    }

    #[test]
    fn pregenerated_path_reports_duration_and_finishes() {
        let mut r = rig(true);
        r.engine.begin_pregenerated();
        assert!(!r.backend.loop_log().lock().unwrap().running);
        r.engine
            .play_pregenerated(AudioBuffer::new(BufferKind::Speech, 44_100, vec![0.1; 88_200]))
            .unwrap();
        let events = r.engine.drain_events();
        assert!(events.contains(&EngineEvent::DurationKnown { ms: 2000 }));
        assert_eq!(r.engine.state(), Some(PlaybackState::Playing));
        assert_eq!(r.backend.scheduled_kinds(), vec![BufferKind::Pregenerated]);

        r.complete();
        assert_eq!(r.engine.state(), Some(PlaybackState::Finished));
        assert!(r.engine.drain_events().contains(&EngineEvent::Ended {
            reason: PlaybackEndReason::Eof
        }));
    }

    #[test]
    fn output_failure_finishes_with_error() {
        let mut r = rig(false);
        r.engine.begin_stream();
        r.enqueue(speech(1024));
        r.engine.on_render_event(RenderEvent::Failed).unwrap();
        assert_eq!(r.engine.state(), Some(PlaybackState::Finished));
    }
}
