//! Thread-safe FIFO of render-ready buffers.
//!
//! This is the only mutable structure shared between the network receive context
//! (which enqueues decoded buffers) and the playback engine (which pulls one buffer
//! at a time for the render node):
//! - receive thread → `push`
//! - engine → `pop_front` when the render node is idle
//!
//! Shutdown is deterministic: `close()` makes every later `push` a no-op, so buffers
//! decoded after a stop request are dropped instead of leaking into the next session.
//! `hold()` does the same for audio while paused; only the end marker is admitted.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::buffer::{AudioBuffer, BufferKind};

/// Queued-buffer count above which a (rate limited) log line is emitted.
const HIGH_WATERMARK_BUFFERS: usize = 256;

/// Ordered queue of pending [`AudioBuffer`]s.
///
/// ## Design
/// - `closed` and `held` are stored *under the same mutex* as the queue so a push can
///   never slip in after `close()` or `hold()` returns.
/// - No blocking pops: the consumer is woken by a message, never by waiting here.
pub struct PlaybackQueue {
    inner: Mutex<QueueInner>,
    high_watermark_ms: AtomicU64,
}

struct QueueInner {
    queue: VecDeque<AudioBuffer>,
    closed: bool,
    held: bool,
}

impl Default for PlaybackQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                queue: VecDeque::new(),
                closed: false,
                held: false,
            }),
            high_watermark_ms: AtomicU64::new(0),
        }
    }

    /// Append a buffer. Returns `false` (and drops the buffer) when the queue is closed,
    /// or when it is held and the buffer is not the end marker.
    pub fn push(&self, buffer: AudioBuffer) -> bool {
        let queued = {
            let mut g = self.lock();
            if g.closed || (g.held && buffer.kind() != BufferKind::EndMarker) {
                return false;
            }
            g.queue.push_back(buffer);
            g.queue.len()
        };
        self.log_high_watermark(queued);
        true
    }

    /// Put a buffer ahead of everything already queued.
    pub fn push_front(&self, buffer: AudioBuffer) -> bool {
        let mut g = self.lock();
        if g.closed {
            return false;
        }
        g.queue.push_front(buffer);
        true
    }

    pub fn pop_front(&self) -> Option<AudioBuffer> {
        self.lock().queue.pop_front()
    }

    /// Number of queued buffers (best-effort snapshot).
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    /// Total queued frames (best-effort snapshot).
    pub fn len_frames(&self) -> usize {
        self.lock().queue.iter().map(AudioBuffer::frames).sum()
    }

    /// Refuse further pushes and drop everything queued.
    ///
    /// Idempotent.
    pub fn close(&self) {
        let mut g = self.lock();
        g.closed = true;
        g.queue.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Clear and accept pushes again, ready for a new session.
    pub fn reopen(&self) {
        let mut g = self.lock();
        g.queue.clear();
        g.closed = false;
        g.held = false;
    }

    /// Refuse audio until [`release`](Self::release). Queued buffers stay.
    pub fn hold(&self) {
        self.lock().held = true;
    }

    pub fn release(&self) {
        self.lock().held = false;
    }

    pub fn is_held(&self) -> bool {
        self.lock().held
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueInner> {
        // A panic while holding the lock cannot leave the deque half-updated.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn log_high_watermark(&self, queued: usize) {
        if queued < HIGH_WATERMARK_BUFFERS {
            return;
        }
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_else(|_| Duration::from_millis(0))
            .as_millis() as u64;
        let last = self.high_watermark_ms.load(Ordering::Relaxed);
        if now.saturating_sub(last) > 1000 {
            self.high_watermark_ms.store(now, Ordering::Relaxed);
            tracing::info!(
                queued_buffers = queued,
                threshold_buffers = HIGH_WATERMARK_BUFFERS,
                "playback queue high watermark"
            );
        }
    }
}
