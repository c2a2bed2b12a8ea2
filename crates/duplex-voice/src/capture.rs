//! **SpeechCaptureMonitor** — continuous capture for the whole session.
//!
//! Wraps a [`SpeechRecognizer`] and runs one background task for the session
//! lifetime. Capture never pauses during playback; that is the enabling
//! invariant for barge-in. The monitor exposes two views of the same stream:
//! an instant `latest_partial()` snapshot for the barge-in detector, and a
//! `next_finalized()` channel the coordinator suspends on between turns.

use crate::error::VoiceResult;
use crate::normalize::Normalizer;
use crate::recognize::SpeechRecognizer;
use crate::transcript::{FinalizedUtterance, PartialTranscript};
use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Configuration for the capture monitor.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Finalized-utterance buffer. One per turn is consumed; overflow beyond
    /// this is dropped with a warning rather than stalling partial updates.
    pub finalized_buffer: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self { finalized_buffer: 8 }
    }
}

/// Read-only session statistics, not part of the correctness contract.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CaptureStats {
    /// Finalized segments observed so far.
    pub finalized_count: u64,
    /// Mean first-partial-to-finalized latency, over segments that had a
    /// partial phase.
    pub avg_latency_ms: f64,
}

#[derive(Default)]
struct StatsInner {
    finalized_count: u64,
    measured: u64,
    avg_latency_ms: f64,
}

struct CaptureShared {
    latest: Mutex<PartialTranscript>,
    stats: Mutex<StatsInner>,
    stopped: AtomicBool,
}

/// Session-lifetime capture monitor. Created with [`SpeechCaptureMonitor::start`];
/// dropped or [`stop`](SpeechCaptureMonitor::stop)ped at session end.
pub struct SpeechCaptureMonitor {
    shared: Arc<CaptureShared>,
    finalized_rx: mpsc::Receiver<FinalizedUtterance>,
    recognizer: Arc<dyn SpeechRecognizer>,
    _task: JoinHandle<()>,
}

impl SpeechCaptureMonitor {
    /// Start continuous capture. The recognizer's event stream is consumed on
    /// a background task until it closes or `stop()` is called.
    pub fn start(
        recognizer: Arc<dyn SpeechRecognizer>,
        normalizer: Normalizer,
        config: CaptureConfig,
    ) -> VoiceResult<Self> {
        let mut events = recognizer.start_capture()?;
        let (finalized_tx, finalized_rx) = mpsc::channel(config.finalized_buffer.max(1));

        let shared = Arc::new(CaptureShared {
            latest: Mutex::new(PartialTranscript::default()),
            stats: Mutex::new(StatsInner::default()),
            stopped: AtomicBool::new(false),
        });

        let task_shared = Arc::clone(&shared);
        let task = tokio::spawn(async move {
            // First-partial time of the segment in flight, for latency stats.
            let mut segment_started: Option<tokio::time::Instant> = None;

            while let Some(event) = events.recv().await {
                let text = normalizer.apply(&event.text);

                if event.is_final {
                    // Segment over: the partial belongs to the next segment.
                    if let Ok(mut latest) = task_shared.latest.lock() {
                        *latest = PartialTranscript::default();
                    }

                    if text.is_empty() {
                        segment_started = None;
                        continue;
                    }

                    let latency_ms = segment_started
                        .take()
                        .map(|t| t.elapsed().as_secs_f64() * 1000.0);
                    if let Ok(mut stats) = task_shared.stats.lock() {
                        stats.finalized_count += 1;
                        if let Some(lat) = latency_ms {
                            stats.measured += 1;
                            let n = stats.measured as f64;
                            stats.avg_latency_ms =
                                (stats.avg_latency_ms * (n - 1.0) + lat) / n;
                        }
                    }

                    let utterance = FinalizedUtterance {
                        text,
                        completed_at: Utc::now(),
                    };
                    // try_send: a stalled consumer must never stall partials.
                    if let Err(e) = finalized_tx.try_send(utterance) {
                        warn!("finalized utterance dropped (buffer full): {}", e);
                    }
                } else {
                    if segment_started.is_none() && !text.is_empty() {
                        segment_started = Some(tokio::time::Instant::now());
                    }
                    if let Ok(mut latest) = task_shared.latest.lock() {
                        *latest = PartialTranscript {
                            text,
                            observed_at: Some(Utc::now()),
                        };
                    }
                }
            }

            if !task_shared.stopped.load(Ordering::SeqCst) {
                warn!("capture stream ended without stop()");
            }
        });

        info!("capture monitor started (continuous, full-duplex)");

        Ok(Self {
            shared,
            finalized_rx,
            recognizer,
            _task: task,
        })
    }

    /// Instant snapshot of the in-progress transcript. Safe to call from any
    /// task at any rate; the lock is held only for the clone.
    pub fn latest_partial(&self) -> PartialTranscript {
        self.shared
            .latest
            .lock()
            .map(|g| g.clone())
            .unwrap_or_default()
    }

    /// Cheap clone handle onto the live partial transcript, for observers
    /// (the barge-in detector) running on their own tasks.
    pub fn partial_view(&self) -> PartialView {
        PartialView {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Suspend until the next finalized utterance. Returns `None` once the
    /// monitor has stopped (or the recognizer died); the caller decides
    /// whether that is a graceful stop or a [`crate::error::VoiceError::Capture`].
    pub async fn next_finalized(&mut self) -> Option<FinalizedUtterance> {
        self.finalized_rx.recv().await
    }

    /// Stop capture. Idempotent; the background task exits once the
    /// recognizer closes its stream.
    pub fn stop(&self) {
        if !self.shared.stopped.swap(true, Ordering::SeqCst) {
            self.recognizer.stop_capture();
            let stats = self.stats();
            info!(
                "capture stopped ({} utterances, avg latency {:.0}ms)",
                stats.finalized_count, stats.avg_latency_ms
            );
        }
    }

    /// True once `stop()` has been called.
    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::SeqCst)
    }

    /// Observability snapshot.
    pub fn stats(&self) -> CaptureStats {
        self.shared
            .stats
            .lock()
            .map(|s| CaptureStats {
                finalized_count: s.finalized_count,
                avg_latency_ms: s.avg_latency_ms,
            })
            .unwrap_or_default()
    }
}

/// Read-only view of the monitor's live partial transcript.
#[derive(Clone)]
pub struct PartialView {
    shared: Arc<CaptureShared>,
}

impl PartialView {
    /// Same semantics as [`SpeechCaptureMonitor::latest_partial`].
    pub fn latest(&self) -> PartialTranscript {
        self.shared
            .latest
            .lock()
            .map(|g| g.clone())
            .unwrap_or_default()
    }
}

impl Drop for SpeechCaptureMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognize::PushRecognizer;

    fn monitor_with_feed() -> (SpeechCaptureMonitor, crate::recognize::RecognizerFeed) {
        let (rec, feed) = PushRecognizer::new();
        let monitor = SpeechCaptureMonitor::start(
            Arc::new(rec),
            Normalizer::new(),
            CaptureConfig::default(),
        )
        .unwrap();
        (monitor, feed)
    }

    #[tokio::test]
    async fn partials_are_visible_instantly() {
        let (monitor, feed) = monitor_with_feed();
        assert!(monitor.latest_partial().is_empty());

        feed.partial("tell me").await.unwrap();
        tokio::task::yield_now().await;

        let partial = monitor.latest_partial();
        assert_eq!(partial.text, "tell me");
        assert!(partial.observed_at.is_some());
    }

    #[tokio::test]
    async fn finalized_clears_partial_and_is_consumed_once() {
        let (mut monitor, feed) = monitor_with_feed();

        feed.partial("hel").await.unwrap();
        feed.finalized("hello").await.unwrap();

        let utterance = monitor.next_finalized().await.unwrap();
        assert_eq!(utterance.text, "hello");
        assert!(monitor.latest_partial().is_empty());
    }

    #[tokio::test]
    async fn transcripts_are_corrected_before_exposure() {
        let (mut monitor, feed) = monitor_with_feed();

        feed.partial("I wanna").await.unwrap();
        tokio::task::yield_now().await;
        assert_eq!(monitor.latest_partial().text, "I want to");

        feed.finalized("I wanna know about the A P I").await.unwrap();
        let utterance = monitor.next_finalized().await.unwrap();
        assert_eq!(utterance.text, "I want to know about the API");
    }

    #[tokio::test]
    async fn empty_finalized_segments_are_skipped() {
        let (mut monitor, feed) = monitor_with_feed();

        feed.finalized("   ").await.unwrap();
        feed.finalized("real words").await.unwrap();

        let utterance = monitor.next_finalized().await.unwrap();
        assert_eq!(utterance.text, "real words");
        assert_eq!(monitor.stats().finalized_count, 1);
    }

    #[tokio::test]
    async fn stop_closes_the_finalized_stream() {
        let (mut monitor, feed) = monitor_with_feed();
        monitor.stop();
        drop(feed);
        assert!(monitor.next_finalized().await.is_none());
        assert!(monitor.is_stopped());
    }
}
