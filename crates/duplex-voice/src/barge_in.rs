//! **BargeInDetector** — debounced interruption watch during playback.
//!
//! Polls the capture monitor's live partial transcript while a playback
//! session is streaming. A fragment must persist across consecutive polls,
//! after an initial grace window that suppresses synthesized-audio echo,
//! before playback is cancelled. The detector is cancel-only: it never feeds
//! audio state back into capture, and it never delays playback start.

use crate::capture::PartialView;
use crate::playback::{AudioPlaybackPipeline, PlaybackSession};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Debounce policy. Every threshold is configuration: the right values are
/// environment-dependent (mic gain, speaker bleed) and belong to the caller.
#[derive(Debug, Clone)]
pub struct BargeInConfig {
    /// How often the live partial is sampled while playback streams.
    pub poll_interval: Duration,
    /// Window after playback start in which partials are ignored, to reject
    /// the microphone picking up the synthetic voice.
    pub grace_window: Duration,
    /// Fragments shorter than this never confirm (noise spikes).
    pub min_chars: usize,
    /// Consecutive qualifying polls required to confirm genuine speech.
    pub confirm_polls: u32,
}

impl Default for BargeInConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(20),
            grace_window: Duration::from_millis(180),
            min_chars: 2,
            confirm_polls: 2,
        }
    }
}

/// Observational watcher armed once per speaking turn.
#[derive(Debug, Clone, Default)]
pub struct BargeInDetector {
    config: BargeInConfig,
}

impl BargeInDetector {
    pub fn new(config: BargeInConfig) -> Self {
        Self { config }
    }

    /// Arm the detector for one session. The task resolves to the confirmed
    /// interrupting fragment, or `None` if the session ended on its own.
    ///
    /// On confirmation the pipeline is cancelled before the task resolves,
    /// so the caller observes `Interrupted` and the fragment together.
    pub fn arm(
        &self,
        pipeline: Arc<AudioPlaybackPipeline>,
        session: PlaybackSession,
        partials: PartialView,
    ) -> JoinHandle<Option<String>> {
        let config = self.config.clone();

        tokio::spawn(async move {
            let armed_at = tokio::time::Instant::now();
            // Whatever the partial held before this playback began is not an
            // interruption of it: a just-folded barge-in fragment lingers
            // until its segment finalizes, and must not retrigger.
            let baseline = partials.latest().text.trim().to_string();
            let mut consecutive: u32 = 0;
            let mut last_rejected: Option<String> = None;

            loop {
                tokio::time::sleep(config.poll_interval).await;

                if !session.is_streaming() {
                    return None;
                }
                if armed_at.elapsed() < config.grace_window {
                    continue;
                }

                let text = partials.latest().text.trim().to_string();
                if !baseline.is_empty() && text == baseline {
                    continue;
                }
                if text.is_empty() {
                    consecutive = 0;
                    continue;
                }
                if text.chars().count() < config.min_chars {
                    // Noise spike. Seeing the same rejected fragment again
                    // does not reset the counter; accumulation is monotonic.
                    if last_rejected.as_deref() != Some(text.as_str()) {
                        debug!("barge-in fragment too short, ignoring: {:?}", text);
                        last_rejected = Some(text);
                    }
                    continue;
                }

                consecutive += 1;
                if consecutive >= config.confirm_polls {
                    info!("barge-in confirmed: {:?}", text);
                    pipeline.cancel(&session).await;
                    return Some(text);
                }
            }
        })
    }
}
