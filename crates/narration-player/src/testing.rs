//! In-memory outputs for tests.
//!
//! `RecordingBackend` hands out nodes and loops that log every call instead of
//! producing sound. Completions are driven by hand through [`RecordingBackend::complete_current`],
//! so tests decide exactly when a buffer "finishes".

use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use crossbeam_channel::Sender;

use crate::buffer::{AudioBuffer, BufferKind};
use crate::render::{AudioBackend, LoopOutput, RenderEvent, RenderNode};

/// Ordered log of side effects shared between fakes (e.g. to assert teardown order).
pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

/// One `schedule` call as seen by a [`RecordingNode`].
#[derive(Clone, Debug)]
pub struct Scheduled {
    pub ticket: u64,
    pub kind: BufferKind,
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

impl Scheduled {
    pub fn frames(&self) -> usize {
        self.samples.len()
    }
}

#[derive(Default)]
pub struct NodeLog {
    pub scheduled: Vec<Scheduled>,
    /// Ticket scheduled and neither completed nor stopped.
    pub current: Option<u64>,
    pub paused: bool,
    pub pauses: usize,
    pub resumes: usize,
    pub stops: usize,
    pub nodes_created: usize,
    completions: Option<Sender<RenderEvent>>,
}

impl NodeLog {
    pub fn kinds(&self) -> Vec<BufferKind> {
        self.scheduled.iter().map(|s| s.kind).collect()
    }
}

#[derive(Default)]
pub struct LoopLog {
    pub starts: usize,
    pub stops: usize,
    pub running: bool,
    pub clip_frames: usize,
}

/// Rate reported by recording nodes unless a backend sets another.
pub const DEFAULT_OUTPUT_RATE: u32 = 44_100;

pub struct RecordingNode {
    log: Arc<Mutex<NodeLog>>,
    journal: Option<Journal>,
    rate: u32,
}

impl RecordingNode {
    /// Standalone node reporting to `completions`.
    pub fn new(completions: Sender<RenderEvent>) -> (Self, Arc<Mutex<NodeLog>>) {
        let log = Arc::new(Mutex::new(NodeLog {
            completions: Some(completions),
            nodes_created: 1,
            ..NodeLog::default()
        }));
        (
            Self {
                log: log.clone(),
                journal: None,
                rate: DEFAULT_OUTPUT_RATE,
            },
            log,
        )
    }
}

impl RenderNode for RecordingNode {
    fn schedule(&mut self, ticket: u64, buffer: AudioBuffer) -> Result<()> {
        let mut log = self.log.lock().map_err(|_| anyhow!("node log poisoned"))?;
        if let Some(current) = log.current {
            return Err(anyhow!("ticket {current} still in flight"));
        }
        log.current = Some(ticket);
        log.scheduled.push(Scheduled {
            ticket,
            kind: buffer.kind(),
            sample_rate: buffer.sample_rate(),
            samples: buffer.into_samples(),
        });
        Ok(())
    }

    fn pause(&mut self) {
        if let Ok(mut log) = self.log.lock() {
            log.paused = true;
            log.pauses += 1;
        }
    }

    fn resume(&mut self) {
        if let Ok(mut log) = self.log.lock() {
            log.paused = false;
            log.resumes += 1;
        }
    }

    fn stop(&mut self) {
        if let Ok(mut log) = self.log.lock() {
            log.current = None;
            log.paused = false;
            log.stops += 1;
        }
        if let Some(journal) = &self.journal {
            if let Ok(mut j) = journal.lock() {
                j.push("renderer.stop".to_string());
            }
        }
    }

    fn output_rate(&self) -> u32 {
        self.rate
    }
}

pub struct RecordingLoop {
    log: Arc<Mutex<LoopLog>>,
    journal: Option<Journal>,
}

impl RecordingLoop {
    pub fn new() -> (Self, Arc<Mutex<LoopLog>>) {
        let log = Arc::new(Mutex::new(LoopLog::default()));
        (
            Self {
                log: log.clone(),
                journal: None,
            },
            log,
        )
    }
}

impl LoopOutput for RecordingLoop {
    fn start(&mut self, clip: &AudioBuffer) -> Result<()> {
        let mut log = self.log.lock().map_err(|_| anyhow!("loop log poisoned"))?;
        log.starts += 1;
        log.running = true;
        log.clip_frames = clip.frames();
        Ok(())
    }

    fn stop(&mut self) {
        if let Ok(mut log) = self.log.lock() {
            log.stops += 1;
            log.running = false;
        }
        if let Some(journal) = &self.journal {
            if let Ok(mut j) = journal.lock() {
                j.push("filler.stop".to_string());
            }
        }
    }
}

/// Backend whose outputs all share one [`NodeLog`] and one [`LoopLog`].
#[derive(Clone, Default)]
pub struct RecordingBackend {
    node: Arc<Mutex<NodeLog>>,
    filler: Arc<Mutex<LoopLog>>,
    journal: Option<Journal>,
    output_rate: Option<u32>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(journal: Journal) -> Self {
        Self {
            journal: Some(journal),
            ..Self::default()
        }
    }

    /// Nodes report `rate` instead of [`DEFAULT_OUTPUT_RATE`].
    pub fn with_output_rate(mut self, rate: u32) -> Self {
        self.output_rate = Some(rate);
        self
    }

    pub fn node_log(&self) -> Arc<Mutex<NodeLog>> {
        self.node.clone()
    }

    pub fn loop_log(&self) -> Arc<Mutex<LoopLog>> {
        self.filler.clone()
    }

    /// Finish the in-flight buffer as if it drained. Returns its ticket.
    pub fn complete_current(&self) -> Option<u64> {
        let (ticket, tx) = {
            let mut log = self.node.lock().ok()?;
            let ticket = log.current.take()?;
            (ticket, log.completions.clone()?)
        };
        tx.send(RenderEvent::Completed { ticket }).ok()?;
        Some(ticket)
    }

    /// Kind of the in-flight buffer, if any.
    pub fn current_kind(&self) -> Option<BufferKind> {
        let log = self.node.lock().ok()?;
        let ticket = log.current?;
        log.scheduled
            .iter()
            .rev()
            .find(|s| s.ticket == ticket)
            .map(|s| s.kind)
    }

    pub fn scheduled_kinds(&self) -> Vec<BufferKind> {
        self.node.lock().map(|l| l.kinds()).unwrap_or_default()
    }
}

impl AudioBackend for RecordingBackend {
    fn render_node(&self, completions: Sender<RenderEvent>) -> Result<Box<dyn RenderNode>> {
        {
            let mut log = self.node.lock().map_err(|_| anyhow!("node log poisoned"))?;
            log.completions = Some(completions);
            log.nodes_created += 1;
        }
        Ok(Box::new(RecordingNode {
            log: self.node.clone(),
            journal: self.journal.clone(),
            rate: self.output_rate.unwrap_or(DEFAULT_OUTPUT_RATE),
        }))
    }

    fn loop_output(&self) -> Result<Box<dyn LoopOutput>> {
        Ok(Box::new(RecordingLoop {
            log: self.filler.clone(),
            journal: self.journal.clone(),
        }))
    }
}
