//! **Speech recognition contract** — the capture collaborator consumed by the
//! monitor.
//!
//! The coordinator never touches an acoustic model; it only consumes a stream
//! of recognition events. Implement `SpeechRecognizer` for a real engine
//! (local Whisper-style or a remote streaming API). The backend must keep
//! producing events at all times, including while audio is playing — that is
//! the enabling property for barge-in.

use crate::error::{VoiceError, VoiceResult};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// One recognition update from the engine.
#[derive(Debug, Clone)]
pub struct RecognitionEvent {
    /// Raw engine text (uncorrected; the monitor normalizes it).
    pub text: String,
    /// False for in-progress partials, true when the segment is complete.
    pub is_final: bool,
}

impl RecognitionEvent {
    pub fn partial(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }

    pub fn finalized(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }
}

/// Continuous-capture backend. `start_capture` may be called once per
/// session; the returned channel closes when capture ends (engine failure or
/// `stop_capture`).
pub trait SpeechRecognizer: Send + Sync {
    /// Begin continuous capture and return the event stream.
    fn start_capture(&self) -> VoiceResult<mpsc::Receiver<RecognitionEvent>>;

    /// Stop capture; the event stream closes shortly after.
    fn stop_capture(&self);
}

/// A timed event for [`ScriptedRecognizer`].
#[derive(Debug, Clone)]
pub struct ScriptedEvent {
    /// Delay from capture start until this event fires.
    pub after: Duration,
    pub event: RecognitionEvent,
}

impl ScriptedEvent {
    pub fn partial(after: Duration, text: impl Into<String>) -> Self {
        Self {
            after,
            event: RecognitionEvent::partial(text),
        }
    }

    pub fn finalized(after: Duration, text: impl Into<String>) -> Self {
        Self {
            after,
            event: RecognitionEvent::finalized(text),
        }
    }
}

/// Replays a fixed script of recognition events on a timer, then leaves the
/// stream open until stopped. Stands in for a real engine in tests and the
/// offline demo.
pub struct ScriptedRecognizer {
    script: Mutex<Vec<ScriptedEvent>>,
    cancel: CancellationToken,
}

impl ScriptedRecognizer {
    pub fn new(mut script: Vec<ScriptedEvent>) -> Self {
        script.sort_by_key(|e| e.after);
        Self {
            script: Mutex::new(script),
            cancel: CancellationToken::new(),
        }
    }
}

impl SpeechRecognizer for ScriptedRecognizer {
    fn start_capture(&self) -> VoiceResult<mpsc::Receiver<RecognitionEvent>> {
        let script = std::mem::take(
            &mut *self
                .script
                .lock()
                .map_err(|_| VoiceError::Capture("script lock poisoned".to_string()))?,
        );
        let (tx, rx) = mpsc::channel(64);
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let start = tokio::time::Instant::now();
            for item in script {
                let fire_at = start + item.after;
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep_until(fire_at) => {}
                }
                if tx.send(item.event).await.is_err() {
                    return;
                }
            }
            // Script exhausted: hold the stream open until stopped, like a
            // live engine sitting in silence.
            cancel.cancelled().await;
            debug!("scripted recognizer stopped");
        });

        Ok(rx)
    }

    fn stop_capture(&self) {
        self.cancel.cancel();
    }
}

/// Recognizer driven externally through a [`RecognizerFeed`]. Bridges engines
/// that deliver results via callbacks; also the workhorse for coordinator
/// tests that need events synchronized with playback state.
pub struct PushRecognizer {
    pending_rx: Mutex<Option<mpsc::Receiver<RecognitionEvent>>>,
    cancel: CancellationToken,
}

/// Sender half handed out by [`PushRecognizer::new`]. Drop it (or call
/// `stop_capture`) to close the stream.
#[derive(Clone)]
pub struct RecognizerFeed {
    tx: mpsc::Sender<RecognitionEvent>,
    cancel: CancellationToken,
}

impl RecognizerFeed {
    /// Inject a partial update.
    pub async fn partial(&self, text: impl Into<String>) -> VoiceResult<()> {
        self.send(RecognitionEvent::partial(text)).await
    }

    /// Inject a finalized segment.
    pub async fn finalized(&self, text: impl Into<String>) -> VoiceResult<()> {
        self.send(RecognitionEvent::finalized(text)).await
    }

    pub async fn send(&self, event: RecognitionEvent) -> VoiceResult<()> {
        if self.cancel.is_cancelled() {
            return Err(VoiceError::ChannelSend("capture stopped".to_string()));
        }
        self.tx
            .send(event)
            .await
            .map_err(|e| VoiceError::ChannelSend(e.to_string()))
    }
}

impl PushRecognizer {
    /// Create the recognizer and its feed handle.
    pub fn new() -> (Self, RecognizerFeed) {
        let (tx, rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let feed = RecognizerFeed {
            tx,
            cancel: cancel.clone(),
        };
        let me = Self {
            pending_rx: Mutex::new(Some(rx)),
            cancel,
        };
        (me, feed)
    }
}

impl SpeechRecognizer for PushRecognizer {
    fn start_capture(&self) -> VoiceResult<mpsc::Receiver<RecognitionEvent>> {
        self.pending_rx
            .lock()
            .map_err(|_| VoiceError::Capture("receiver lock poisoned".to_string()))?
            .take()
            .ok_or_else(|| VoiceError::Capture("capture already started".to_string()))
    }

    fn stop_capture(&self) {
        self.cancel.cancel();
    }
}
