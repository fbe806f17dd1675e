//! Receive loop: the only reader of a session's transport.
//!
//! Audio frames are decoded and pushed straight into the playback queue; metadata is
//! forwarded to the worker without waiting on audio. The loop consults the stop
//! signal before each frame and closes the transport itself when asked to stop.
//! Whether a decoded chunk is admitted (paused, stopped) is decided by the queue under
//! its own lock, so the queue is the only state shared with the playback side.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::Sender;
use narration_player::pcm::{decode_base64_chunk, end_of_stream};
use narration_player::queue::PlaybackQueue;
use narration_player::resample::conform;
use narration_player::{AudioBuffer, PlaybackConfig};

use crate::codec::{EpisodeCompletion, EpisodeHeader, Frame, parse_frame};
use crate::error::NarrationError;
use crate::request::StreamRequest;
use crate::transport::{
    CLOSE_CANCEL, CLOSE_CANCEL_REASON, CLOSE_NORMAL, Connector, Incoming, Transport,
};

/// What the receive loop reports to the worker.
#[derive(Debug)]
pub(crate) enum StreamEvent {
    /// A buffer (or the end marker) was pushed into the queue.
    Enqueued,
    /// The end-of-audio marker was queued.
    EndOfAudio,
    Header(EpisodeHeader),
    Completion(EpisodeCompletion),
    Transcript(String),
    /// The loop exited. `error` is set when the connection failed or the peer closed
    /// before the end of audio.
    Closed { error: Option<NarrationError> },
}

/// Cooperative stop request with the close code to use.
#[derive(Debug, Default)]
pub(crate) struct StopSignal {
    requested: AtomicBool,
    close: Mutex<Option<(u16, String)>>,
}

impl StopSignal {
    /// First request wins; later ones only re-raise the flag.
    pub(crate) fn request(&self, code: u16, reason: &str) {
        if let Ok(mut close) = self.close.lock() {
            close.get_or_insert_with(|| (code, reason.to_string()));
        }
        self.requested.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    fn close_frame(&self) -> (u16, String) {
        self.close
            .lock()
            .ok()
            .and_then(|c| c.clone())
            .unwrap_or((CLOSE_CANCEL, CLOSE_CANCEL_REASON.to_string()))
    }
}

pub(crate) struct ReceiveContext {
    pub(crate) session: u64,
    pub(crate) queue: Arc<PlaybackQueue>,
    pub(crate) stop: Arc<StopSignal>,
    pub(crate) playback: PlaybackConfig,
    /// Render node rate; chunks are converted here so scheduling never resamples.
    pub(crate) output_rate: u32,
    pub(crate) events: Sender<(u64, StreamEvent)>,
}

impl ReceiveContext {
    fn notify(&self, event: StreamEvent) {
        let _ = self.events.send((self.session, event));
    }

    fn to_output_rate(&self, buffer: AudioBuffer) -> Option<AudioBuffer> {
        match conform(buffer, self.output_rate, self.playback.resample_chunk_frames) {
            Ok(buffer) => Some(buffer),
            Err(e) => {
                tracing::warn!(session = self.session, "dropping audio chunk: {e:#}");
                None
            }
        }
    }
}

/// Connect, send the generation request, then run the receive loop.
pub(crate) fn run_stream(connector: &dyn Connector, request: &StreamRequest, ctx: ReceiveContext) {
    let session = ctx.session;
    let mut transport = match connector.connect(&request.endpoint, &request.token) {
        Ok(transport) => transport,
        Err(e) => {
            tracing::warn!(session, endpoint = %request.endpoint, "connect failed: {e}");
            ctx.notify(StreamEvent::Closed { error: Some(e) });
            return;
        }
    };
    if !ctx.stop.is_requested() {
        if let Err(e) = transport.send_text(&request.outbound_message()) {
            tracing::warn!(session, "generation request not sent: {e}");
            transport.close(CLOSE_NORMAL, "");
            ctx.notify(StreamEvent::Closed { error: Some(e) });
            return;
        }
        tracing::info!(session, event = request.kind.event_name(), "generation requested");
    }
    run_receive_loop(transport, ctx);
}

/// Read frames until completion, stop, or transport failure.
pub(crate) fn run_receive_loop(mut transport: Box<dyn Transport>, ctx: ReceiveContext) {
    let session = ctx.session;
    let mut end_queued = false;
    let mut chunks = 0u64;
    let mut dropped = 0u64;

    loop {
        if ctx.stop.is_requested() {
            let (code, reason) = ctx.stop.close_frame();
            transport.close(code, &reason);
            tracing::info!(session, code, chunks, dropped, "receive loop stopped");
            ctx.notify(StreamEvent::Closed { error: None });
            return;
        }

        let text = match transport.read() {
            Ok(Incoming::Text(text)) => text,
            Ok(Incoming::Idle) => continue,
            Ok(Incoming::Closed) => {
                let error = (!end_queued).then(|| {
                    NarrationError::Transport("connection closed before end of audio".to_string())
                });
                tracing::info!(session, chunks, end_queued, "peer closed connection");
                ctx.notify(StreamEvent::Closed { error });
                return;
            }
            Err(e) => {
                tracing::warn!(session, "receive failed: {e}");
                transport.close(CLOSE_NORMAL, "");
                ctx.notify(StreamEvent::Closed { error: Some(e) });
                return;
            }
        };

        // Frames racing with a stop request are dropped; the next turn closes.
        if ctx.stop.is_requested() {
            continue;
        }

        let frame = match parse_frame(&text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(session, "dropping malformed frame: {e}");
                continue;
            }
        };

        match frame {
            Frame::Audio(Some(chunk)) => {
                if ctx.queue.is_held() {
                    dropped += 1;
                    tracing::debug!(session, "audio chunk discarded while paused");
                    continue;
                }
                let buffer = match decode_base64_chunk(&chunk, &ctx.playback) {
                    Ok(buffer) => buffer,
                    Err(e) => {
                        tracing::warn!(session, "dropping audio chunk: {e}");
                        continue;
                    }
                };
                let Some(buffer) = ctx.to_output_rate(buffer) else {
                    continue;
                };
                if ctx.stop.is_requested() {
                    continue;
                }
                let frames = buffer.frames();
                // The queue rejects it if a pause or teardown landed during decode.
                if ctx.queue.push(buffer) {
                    chunks += 1;
                    tracing::debug!(session, frames, "audio chunk queued");
                    ctx.notify(StreamEvent::Enqueued);
                } else {
                    dropped += 1;
                    tracing::debug!(session, frames, "audio chunk refused by queue");
                }
            }
            Frame::Audio(None) => {
                if !end_queued && push_end_marker(&ctx) {
                    end_queued = true;
                }
            }
            Frame::Header(header) => ctx.notify(StreamEvent::Header(header)),
            Frame::Transcript(delta) => ctx.notify(StreamEvent::Transcript(delta)),
            Frame::Completion(completion) => {
                ctx.notify(StreamEvent::Completion(completion));
                if !end_queued {
                    push_end_marker(&ctx);
                }
                transport.close(CLOSE_NORMAL, "");
                tracing::info!(session, chunks, dropped, "episode complete");
                ctx.notify(StreamEvent::Closed { error: None });
                return;
            }
            Frame::Unrecognized(kind) => {
                tracing::debug!(session, kind = %kind, "ignoring frame");
            }
        }
    }
}

fn push_end_marker(ctx: &ReceiveContext) -> bool {
    if ctx.stop.is_requested() {
        return false;
    }
    let Some(marker) = ctx.to_output_rate(end_of_stream(&ctx.playback)) else {
        return false;
    };
    if !ctx.queue.push(marker) {
        return false;
    }
    tracing::debug!(session = ctx.session, "end of audio queued");
    ctx.notify(StreamEvent::EndOfAudio);
    ctx.notify(StreamEvent::Enqueued);
    true
}
