//! Observer fan-out.
//!
//! Every subscriber gets its own unbounded channel, so the UI and the media-center
//! bridge can observe the same session without stepping on each other. Dropped
//! receivers are pruned on the next publish.

use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender, unbounded};
use narration_player::BufferKind;
use narration_types::{FollowUpPrompt, PlaybackEndReason, PlaybackState};

#[derive(Clone, Debug, PartialEq)]
pub enum NarrationEvent {
    StateChanged {
        from: Option<PlaybackState>,
        to: Option<PlaybackState>,
    },
    TranscriptDelta(String),
    Header {
        title: String,
        level: u32,
    },
    FollowUps(Vec<FollowUpPrompt>),
    BufferReady {
        kind: BufferKind,
        frames: usize,
    },
    DurationKnown {
        ms: u64,
    },
    Ended {
        reason: PlaybackEndReason,
        error: Option<String>,
    },
    /// Not an error: the caller tore the session down.
    Cancelled {
        reason: String,
    },
}

#[derive(Clone, Default)]
pub struct EventHub {
    subscribers: Arc<Mutex<Vec<Sender<NarrationEvent>>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<NarrationEvent> {
        let (tx, rx) = unbounded();
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }
        rx
    }

    pub fn publish(&self, event: NarrationEvent) {
        let Ok(mut subs) = self.subscribers.lock() else {
            return;
        };
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_subscriber_sees_every_event() {
        let hub = EventHub::new();
        let a = hub.subscribe();
        let b = hub.subscribe();
        hub.publish(NarrationEvent::TranscriptDelta("hi".into()));
        assert_eq!(a.try_recv().unwrap(), NarrationEvent::TranscriptDelta("hi".into()));
        assert_eq!(b.try_recv().unwrap(), NarrationEvent::TranscriptDelta("hi".into()));
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let hub = EventHub::new();
        let keep = hub.subscribe();
        drop(hub.subscribe());
        hub.publish(NarrationEvent::DurationKnown { ms: 5 });
        assert_eq!(hub.subscriber_count(), 1);
        assert!(keep.try_recv().is_ok());
    }
}
