//! **AudioPlaybackPipeline** — bounded producer/consumer playback with
//! cooperative cancellation.
//!
//! A producer task pulls frames from the synthesis stream into a bounded
//! queue; a consumer task writes them to the output sink. Cancellation closes
//! the session token, which the consumer observes before every write: queued
//! frames are discarded and the sink is stopped before `cancel` returns, so
//! silence lands within one frame-write duration.

use crate::error::{VoiceError, VoiceResult};
use crate::output::AudioSink;
use crate::synthesize::{AudioFrame, FrameStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Playback session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, tasks not yet running.
    Idle,
    /// Audio flowing toward the sink.
    Streaming,
    /// Cancelled (barge-in or supersession) or failed mid-stream.
    Interrupted,
    /// All frames written and drained.
    Completed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Interrupted | SessionState::Completed)
    }
}

/// Result of waiting on a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    Completed,
    Interrupted,
    TimedOut,
}

/// Configuration for the playback pipeline.
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Frames buffered between producer and consumer.
    pub queue_capacity: usize,
    /// How long the producer blocks on a full queue before dropping the
    /// frame it is holding and logging saturation.
    pub enqueue_timeout: Duration,
    /// Poll interval while waiting for the sink to drain after end of
    /// stream. Cancellation is checked at every poll.
    pub drain_poll_interval: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 32,
            enqueue_timeout: Duration::from_millis(250),
            drain_poll_interval: Duration::from_millis(5),
        }
    }
}

struct SessionInner {
    state_tx: watch::Sender<SessionState>,
    cancel: CancellationToken,
    error: StdMutex<Option<String>>,
}

/// Cheap clone handle to one `start()` invocation. Exactly one session is
/// current at a time; superseding it cancels this one first.
#[derive(Clone)]
pub struct PlaybackSession {
    id: u64,
    inner: Arc<SessionInner>,
}

impl PlaybackSession {
    fn new(id: u64) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        Self {
            id,
            inner: Arc::new(SessionInner {
                state_tx,
                cancel: CancellationToken::new(),
                error: StdMutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state_tx.borrow()
    }

    pub fn is_streaming(&self) -> bool {
        self.state() == SessionState::Streaming
    }

    /// Error tag attached when the session ended because of a synthesis or
    /// device failure rather than cancellation.
    pub fn error(&self) -> Option<String> {
        self.inner.error.lock().ok().and_then(|e| e.clone())
    }

    /// The session's cooperative cancel token (already-cancelled once the
    /// session is superseded or interrupted).
    pub fn cancel_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Suspend until the session reaches a terminal state.
    pub async fn wait_until_terminal(&self) -> SessionState {
        let mut rx = self.inner.state_tx.subscribe();
        loop {
            let state = *rx.borrow();
            if state.is_terminal() {
                return state;
            }
            if rx.changed().await.is_err() {
                // Sender kept alive by this handle's Arc; unreachable, but
                // fall back to whatever state we last saw.
                return *self.inner.state_tx.borrow();
            }
        }
    }

    fn mark_streaming(&self) {
        self.inner.state_tx.send_modify(|s| {
            if *s == SessionState::Idle {
                *s = SessionState::Streaming;
            }
        });
    }

    /// Terminal states are sticky: finishing twice (or finishing after the
    /// other outcome) is a no-op.
    fn finish(&self, state: SessionState) {
        debug_assert!(state.is_terminal());
        self.inner.state_tx.send_modify(|s| {
            if !s.is_terminal() {
                *s = state;
            }
        });
    }

    fn set_error(&self, message: String) {
        if let Ok(mut slot) = self.inner.error.lock() {
            slot.get_or_insert(message);
        }
    }
}

enum QueueItem {
    Frame(AudioFrame),
    /// Clean end of the synthesis stream.
    EndOfStream,
    /// Terminal synthesis failure; queued frames ahead of it still drain.
    SourceError(String),
}

/// Producer/consumer playback over a shared output sink.
pub struct AudioPlaybackPipeline {
    sink: Arc<dyn AudioSink>,
    config: PlaybackConfig,
    current: Mutex<Option<PlaybackSession>>,
    next_id: AtomicU64,
}

impl AudioPlaybackPipeline {
    pub fn new(sink: Arc<dyn AudioSink>, config: PlaybackConfig) -> Self {
        Self {
            sink,
            config,
            current: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Start streaming `frames` to the sink. Any prior session is cancelled
    /// synchronously first — at most one session is ever `Streaming`.
    pub async fn start(&self, frames: FrameStream) -> VoiceResult<PlaybackSession> {
        let mut current = self.current.lock().await;
        if let Some(prev) = current.take() {
            if !prev.state().is_terminal() {
                info!("superseding playback session {}", prev.id());
            }
            self.cancel(&prev).await;
        }

        let session = PlaybackSession::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        session.mark_streaming();

        let (queue_tx, queue_rx) = mpsc::channel(self.config.queue_capacity.max(1));
        self.spawn_producer(frames, queue_tx, session.clone());
        self.spawn_consumer(queue_rx, session.clone());

        debug!("playback session {} streaming", session.id());
        *current = Some(session.clone());
        Ok(session)
    }

    fn spawn_producer(
        &self,
        mut frames: FrameStream,
        queue_tx: mpsc::Sender<QueueItem>,
        session: PlaybackSession,
    ) {
        let enqueue_timeout = self.config.enqueue_timeout;
        let cancel = session.cancel_token();

        tokio::spawn(async move {
            loop {
                let item = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    item = frames.recv() => item,
                };
                match item {
                    Some(Ok(frame)) => {
                        let seq = frame.seq;
                        match queue_tx
                            .send_timeout(QueueItem::Frame(frame), enqueue_timeout)
                            .await
                        {
                            Ok(()) => {}
                            Err(SendTimeoutError::Timeout(_)) => {
                                // Backpressure exhausted: shed this frame only.
                                warn!(
                                    "playback queue saturated; dropping frame {} of session {}",
                                    seq,
                                    session.id()
                                );
                            }
                            Err(SendTimeoutError::Closed(_)) => return,
                        }
                    }
                    Some(Err(e)) => {
                        let _ = queue_tx.send(QueueItem::SourceError(e.to_string())).await;
                        return;
                    }
                    None => {
                        let _ = queue_tx.send(QueueItem::EndOfStream).await;
                        return;
                    }
                }
            }
        });
    }

    fn spawn_consumer(&self, mut queue_rx: mpsc::Receiver<QueueItem>, session: PlaybackSession) {
        let sink = Arc::clone(&self.sink);
        let drain_poll = self.config.drain_poll_interval;
        let cancel = session.cancel_token();

        tokio::spawn(async move {
            loop {
                let item = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        Self::abort_consumer(&mut queue_rx, sink.as_ref(), &session);
                        return;
                    }
                    item = queue_rx.recv() => item,
                };
                match item {
                    Some(QueueItem::Frame(frame)) => {
                        if let Err(e) = sink.write_frame(&frame).await {
                            // One bad write does not end the stream.
                            warn!(
                                "frame {} write failed on session {}: {}",
                                frame.seq,
                                session.id(),
                                e
                            );
                        }
                    }
                    Some(QueueItem::SourceError(message)) => {
                        warn!("synthesis failed on session {}: {}", session.id(), message);
                        sink.stop();
                        session.set_error(message);
                        session.finish(SessionState::Interrupted);
                        return;
                    }
                    Some(QueueItem::EndOfStream) | None => {
                        // Drain the sink, staying responsive to cancellation.
                        loop {
                            if cancel.is_cancelled() {
                                Self::abort_consumer(&mut queue_rx, sink.as_ref(), &session);
                                return;
                            }
                            if sink.is_idle() {
                                session.finish(SessionState::Completed);
                                debug!("playback session {} completed", session.id());
                                return;
                            }
                            tokio::time::sleep(drain_poll).await;
                        }
                    }
                }
            }
        });
    }

    fn abort_consumer(
        queue_rx: &mut mpsc::Receiver<QueueItem>,
        sink: &dyn AudioSink,
        session: &PlaybackSession,
    ) {
        while queue_rx.try_recv().is_ok() {}
        sink.stop();
        session.finish(SessionState::Interrupted);
        debug!("playback session {} interrupted", session.id());
    }

    /// Cancel a session. Idempotent: already-terminal sessions are left
    /// untouched. Returns only after queued frames are discarded and the sink
    /// has been stopped.
    pub async fn cancel(&self, session: &PlaybackSession) {
        if session.state().is_terminal() {
            return;
        }
        if session.state() == SessionState::Idle {
            session.finish(SessionState::Interrupted);
            return;
        }
        session.inner.cancel.cancel();
        session.wait_until_terminal().await;
    }

    /// Wait for the session to finish, one way or the other. A timeout does
    /// not cancel the session; the caller decides what to do with it.
    pub async fn await_completion(
        &self,
        session: &PlaybackSession,
        timeout: Duration,
    ) -> CompletionStatus {
        match tokio::time::timeout(timeout, session.wait_until_terminal()).await {
            Ok(SessionState::Completed) => CompletionStatus::Completed,
            Ok(_) => CompletionStatus::Interrupted,
            Err(_) => CompletionStatus::TimedOut,
        }
    }

    /// Convenience for error paths: build a failed frame stream so a
    /// synthesis-start failure surfaces through normal session semantics.
    pub fn failed_stream(error: &VoiceError) -> FrameStream {
        let (tx, rx) = mpsc::channel(1);
        let message = error.to_string();
        tokio::spawn(async move {
            let _ = tx.send(Err(VoiceError::Playback(message))).await;
        });
        rx
    }
}
