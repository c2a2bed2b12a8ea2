//! **TurnCoordinator** — the conversation state machine.
//!
//! One sequential control flow drives the session:
//! `AwaitingSpeech → Generating → Speaking → (Completed | Interrupted)`,
//! looping back to `AwaitingSpeech` after a completed reply. A confirmed
//! barge-in folds the interrupting fragment into history and re-enters
//! `Generating` directly — the interrupted utterance is abandoned, never
//! resumed. `Aborted` is reached from any state by exit phrase, error
//! ceiling, or turn ceiling.
//!
//! The coordinator owns the conversation history exclusively and suspends on
//! its collaborators (speech await, reply generation, playback) rather than
//! polling them.

use crate::barge_in::BargeInDetector;
use crate::capture::{CaptureStats, SpeechCaptureMonitor};
use crate::error::{VoiceError, VoiceResult};
use crate::generate::ReplyGenerator;
use crate::history::{ConversationHistory, Role};
use crate::playback::{AudioPlaybackPipeline, CompletionStatus};
use crate::synthesize::SpeechSynthesizer;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Coordinator configuration. Timeouts are independent per suspension point;
/// every timeout is a recoverable error, never a crash.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Maximum wait for a finalized utterance per turn.
    pub speech_timeout: Duration,
    /// Maximum wait for the reply generator.
    pub generation_timeout: Duration,
    /// Maximum wait for playback to complete or be interrupted.
    pub playback_timeout: Duration,
    /// Consecutive recoverable failures that abort the session.
    pub max_consecutive_errors: u32,
    /// Hard bound on session length in turns.
    pub max_turns: u32,
    /// Normalized utterances that end the session gracefully.
    pub exit_phrases: Vec<String>,
    /// Replies shorter than this are treated as a generation failure.
    pub min_reply_chars: usize,
    /// Spoken instead of a failed or empty generated reply.
    pub fallback_reply: String,
    /// Spoken when the error ceiling or turn ceiling ends the session.
    pub termination_reply: String,
    /// Spoken on a graceful exit.
    pub farewell_reply: String,
    /// Optional greeting spoken before the first listening turn.
    pub greeting: Option<String>,
    /// Pinned system preamble for the conversation history.
    pub preamble: Option<String>,
    /// Bound on the conversation history, preamble included.
    pub history_limit: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            speech_timeout: Duration::from_secs(30),
            generation_timeout: Duration::from_secs(20),
            playback_timeout: Duration::from_secs(30),
            max_consecutive_errors: 3,
            max_turns: 50,
            exit_phrases: ["quit", "exit", "goodbye", "bye"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            min_reply_chars: 2,
            fallback_reply: "I'm sorry, I'm having a little trouble on my end. \
                             Could you say that again?"
                .to_string(),
            termination_reply: "I keep running into trouble, so I'll stop here. \
                                Let's pick this up another time. Goodbye!"
                .to_string(),
            farewell_reply: "Goodbye! Thanks for talking with me.".to_string(),
            greeting: None,
            preamble: None,
            history_limit: 16,
        }
    }
}

/// Consecutive-failure counter. Reset on any successful turn; the ceiling is
/// checked only at turn boundaries, never mid-turn.
#[derive(Debug, Default)]
pub struct ErrorCounter {
    consecutive: u32,
}

impl ErrorCounter {
    pub fn record_failure(&mut self) -> u32 {
        self.consecutive += 1;
        self.consecutive
    }

    pub fn reset(&mut self) {
        self.consecutive = 0;
    }

    pub fn count(&self) -> u32 {
        self.consecutive
    }
}

/// Outcome of one `run_turn` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Reply played to completion (possibly after barge-in cycles).
    Completed,
    /// Nothing heard within the speech window; history unchanged.
    NoSpeech,
    /// A fallback reply was spoken after generation failed.
    CompletedWithFallback,
    /// Playback failed or timed out; no user speech involved.
    PlaybackFailed,
    /// Exit phrase recognized; reply generation was bypassed.
    ExitRequested,
}

/// Why the session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EndReason {
    GracefulExit,
    ErrorCeiling,
    TurnCeiling,
}

/// Read-only result of a completed session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub reason: EndReason,
    pub turns: u32,
    pub capture: CaptureStats,
}

enum SpeakOutcome {
    Completed,
    /// `Some` carries the confirmed barge-in fragment; `None` means the
    /// session ended interrupted without user speech (failure or timeout).
    Interrupted(Option<String>),
}

/// Sequential conversation driver. See the module docs for the state machine.
pub struct TurnCoordinator {
    monitor: SpeechCaptureMonitor,
    pipeline: Arc<AudioPlaybackPipeline>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    generator: Arc<dyn ReplyGenerator>,
    detector: BargeInDetector,
    history: ConversationHistory,
    errors: ErrorCounter,
    turns_completed: u32,
    /// Barge-in fragments folded into history whose segments have not yet
    /// finalized. The eventual finalization of such a segment is a duplicate
    /// and is discarded, not replayed as a fresh turn.
    folded_fragments: Vec<String>,
    config: CoordinatorConfig,
}

impl TurnCoordinator {
    pub fn new(
        monitor: SpeechCaptureMonitor,
        pipeline: Arc<AudioPlaybackPipeline>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        generator: Arc<dyn ReplyGenerator>,
        detector: BargeInDetector,
        config: CoordinatorConfig,
    ) -> Self {
        let history = match &config.preamble {
            Some(preamble) => ConversationHistory::with_preamble(preamble, config.history_limit),
            None => ConversationHistory::new(config.history_limit),
        };
        Self {
            monitor,
            pipeline,
            synthesizer,
            generator,
            detector,
            history,
            errors: ErrorCounter::default(),
            turns_completed: 0,
            folded_fragments: Vec::new(),
            config,
        }
    }

    /// Run the session to its end. Returns the summary for every outcome
    /// except capture failure, the one error that terminates the session
    /// exceptionally.
    pub async fn run(&mut self) -> VoiceResult<SessionSummary> {
        info!("conversation session starting");

        if let Some(greeting) = self.config.greeting.clone() {
            self.history.push(Role::Agent, greeting.clone());
            match self.speak(&greeting).await {
                SpeakOutcome::Interrupted(Some(fragment)) => {
                    info!("greeting interrupted; continuing with user's input");
                    self.history.push(Role::User, fragment.clone());
                    self.folded_fragments.push(fragment.clone());
                    let outcome = self.generate_and_speak(fragment).await;
                    self.account(outcome);
                }
                SpeakOutcome::Interrupted(None) => {
                    self.errors.record_failure();
                }
                SpeakOutcome::Completed => {}
            }
        }

        let reason = loop {
            // Ceiling checks happen only here, at the turn boundary.
            if self.turns_completed >= self.config.max_turns {
                info!("turn ceiling reached ({})", self.config.max_turns);
                break EndReason::TurnCeiling;
            }
            if self.errors.count() >= self.config.max_consecutive_errors {
                warn!(
                    "error ceiling reached ({} consecutive failures)",
                    self.errors.count()
                );
                break EndReason::ErrorCeiling;
            }

            match self.run_turn().await {
                Ok(TurnOutcome::ExitRequested) => break EndReason::GracefulExit,
                Ok(_) => {}
                Err(e) if e.is_fatal() => {
                    self.monitor.stop();
                    return Err(e);
                }
                Err(e) => {
                    warn!("turn failed: {}", e);
                    self.errors.record_failure();
                }
            }
        };

        let closing = match reason {
            EndReason::GracefulExit => self.config.farewell_reply.clone(),
            EndReason::ErrorCeiling | EndReason::TurnCeiling => {
                self.config.termination_reply.clone()
            }
        };
        // Best effort; the session is over either way.
        let _ = self.speak(&closing).await;
        self.monitor.stop();

        let summary = SessionSummary {
            reason,
            turns: self.turns_completed,
            capture: self.monitor.stats(),
        };
        info!(
            "session ended: {:?} after {} turns",
            summary.reason, summary.turns
        );
        Ok(summary)
    }

    /// Drive a single turn through the state machine. Error-counter updates
    /// happen here; ceiling enforcement is the caller's job.
    pub async fn run_turn(&mut self) -> VoiceResult<TurnOutcome> {
        // AwaitingSpeech
        debug!("awaiting speech");
        let utterance = loop {
            match timeout(self.config.speech_timeout, self.monitor.next_finalized()).await {
                Err(_) => {
                    info!("no speech within the listening window");
                    self.errors.record_failure();
                    return Ok(TurnOutcome::NoSpeech);
                }
                Ok(None) => {
                    return Err(VoiceError::Capture(if self.monitor.is_stopped() {
                        "capture stopped".to_string()
                    } else {
                        "capture stream ended unexpectedly".to_string()
                    }));
                }
                Ok(Some(utterance)) => {
                    if self.take_folded(&utterance.text) {
                        debug!(
                            "discarding finalization of folded fragment: {:?}",
                            utterance.text
                        );
                        continue;
                    }
                    self.folded_fragments.clear();
                    break utterance;
                }
            }
        };

        if utterance.text.trim().is_empty() {
            self.errors.record_failure();
            return Ok(TurnOutcome::NoSpeech);
        }

        info!("user said: {:?}", utterance.text);

        if self.is_exit_phrase(&utterance.text) {
            self.history.push(Role::User, utterance.text);
            info!("exit phrase recognized");
            return Ok(TurnOutcome::ExitRequested);
        }

        self.history.push(Role::User, utterance.text.clone());
        let outcome = self.generate_and_speak(utterance.text).await;
        self.account(outcome);
        Ok(outcome)
    }

    /// Generating → Speaking, looping on barge-in without returning to
    /// `AwaitingSpeech`.
    async fn generate_and_speak(&mut self, mut utterance: String) -> TurnOutcome {
        let mut used_fallback = false;

        loop {
            // Generating
            let reply = match timeout(
                self.config.generation_timeout,
                self.generator.generate(&utterance, self.history.records()),
            )
            .await
            {
                Ok(Ok(reply))
                    if reply.trim().chars().count() >= self.config.min_reply_chars =>
                {
                    reply.trim().to_string()
                }
                Ok(Ok(_)) => {
                    warn!("generated reply too short; speaking fallback");
                    used_fallback = true;
                    self.config.fallback_reply.clone()
                }
                Ok(Err(e)) => {
                    warn!("reply generation failed: {}", e);
                    used_fallback = true;
                    self.config.fallback_reply.clone()
                }
                Err(_) => {
                    warn!("reply generation timed out");
                    used_fallback = true;
                    self.config.fallback_reply.clone()
                }
            };

            self.history.push(Role::Agent, reply.clone());
            info!("agent speaking: {:?}", reply);

            // Speaking
            match self.speak(&reply).await {
                SpeakOutcome::Completed => {
                    return if used_fallback {
                        TurnOutcome::CompletedWithFallback
                    } else {
                        TurnOutcome::Completed
                    };
                }
                SpeakOutcome::Interrupted(Some(fragment)) => {
                    // The spoken prefix stands as said; only the user's words
                    // enter the record. Straight back to Generating.
                    info!("barge-in: {:?}", fragment);
                    self.history.push(Role::User, fragment.clone());
                    self.folded_fragments.push(fragment.clone());
                    utterance = fragment;
                }
                SpeakOutcome::Interrupted(None) => {
                    return TurnOutcome::PlaybackFailed;
                }
            }
        }
    }

    /// One playback session with the barge-in detector armed alongside.
    async fn speak(&self, text: &str) -> SpeakOutcome {
        let frames = match self.synthesizer.synthesize(text) {
            Ok(frames) => frames,
            Err(e) => {
                warn!("synthesis failed to start: {}", e);
                AudioPlaybackPipeline::failed_stream(&e)
            }
        };

        let session = match self.pipeline.start(frames).await {
            Ok(session) => session,
            Err(e) => {
                warn!("playback failed to start: {}", e);
                return SpeakOutcome::Interrupted(None);
            }
        };

        let watcher = self.detector.arm(
            Arc::clone(&self.pipeline),
            session.clone(),
            self.monitor.partial_view(),
        );

        let status = self
            .pipeline
            .await_completion(&session, self.config.playback_timeout)
            .await;

        match status {
            CompletionStatus::Completed => {
                // Detector stands down on its next poll.
                let _ = watcher.await;
                SpeakOutcome::Completed
            }
            CompletionStatus::Interrupted => {
                let fragment = watcher.await.ok().flatten();
                if fragment.is_none() {
                    if let Some(tag) = session.error() {
                        warn!("playback interrupted by failure: {}", tag);
                    }
                }
                SpeakOutcome::Interrupted(fragment)
            }
            CompletionStatus::TimedOut => {
                warn!("playback timed out; cancelling");
                self.pipeline.cancel(&session).await;
                let _ = watcher.await;
                SpeakOutcome::Interrupted(None)
            }
        }
    }

    fn account(&mut self, outcome: TurnOutcome) {
        match outcome {
            TurnOutcome::Completed => {
                self.errors.reset();
                self.turns_completed += 1;
            }
            TurnOutcome::CompletedWithFallback | TurnOutcome::PlaybackFailed => {
                self.errors.record_failure();
                self.turns_completed += 1;
            }
            TurnOutcome::NoSpeech | TurnOutcome::ExitRequested => {}
        }
    }

    fn is_exit_phrase(&self, text: &str) -> bool {
        let normalized = normalize_phrase(text);
        self.config
            .exit_phrases
            .iter()
            .any(|phrase| phrase == &normalized)
    }

    /// True when `text` finalizes a segment already folded as a barge-in
    /// fragment; the matching fragment is retired. Only an exact (normalized)
    /// match is a duplicate — an utterance that grew beyond the fragment
    /// carries new content and is processed as fresh speech.
    fn take_folded(&mut self, text: &str) -> bool {
        let normalized = normalize_phrase(text);
        if let Some(pos) = self
            .folded_fragments
            .iter()
            .position(|f| normalize_phrase(f) == normalized)
        {
            self.folded_fragments.remove(pos);
            true
        } else {
            false
        }
    }

    /// The bounded conversation log.
    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    /// Completed turns so far.
    pub fn turns_completed(&self) -> u32 {
        self.turns_completed
    }

    /// Current consecutive-failure count.
    pub fn consecutive_errors(&self) -> u32 {
        self.errors.count()
    }

    /// Capture-side observability.
    pub fn capture_stats(&self) -> CaptureStats {
        self.monitor.stats()
    }
}

/// Lowercased, trimmed, trailing punctuation stripped — the comparison form
/// for exit phrases and folded fragments.
fn normalize_phrase(text: &str) -> String {
    text.trim()
        .trim_end_matches(['.', '!', '?', ','])
        .trim()
        .to_lowercase()
}
