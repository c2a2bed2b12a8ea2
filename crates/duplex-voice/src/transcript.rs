//! Transcript value types shared between capture, barge-in, and the coordinator.

use chrono::{DateTime, Utc};

/// A provisional recognition result, rewritten in place on every update.
///
/// Lifetime is one listening segment: the capture monitor clears it whenever
/// a segment finalizes. Readers always see a complete value (never a
/// half-written string) because the monitor swaps it under a short-held lock.
#[derive(Debug, Clone, Default)]
pub struct PartialTranscript {
    /// Current best guess, already vocabulary-corrected. Empty when silent.
    pub text: String,
    /// When this guess was last observed. `None` until the first update.
    pub observed_at: Option<DateTime<Utc>>,
}

impl PartialTranscript {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            observed_at: Some(Utc::now()),
        }
    }

    /// True when no speech has been observed in the current segment.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// A completed speech segment, immutable after creation and consumed at most
/// once by the coordinator.
#[derive(Debug, Clone)]
pub struct FinalizedUtterance {
    /// Corrected transcript of the full segment.
    pub text: String,
    /// When the recognizer considered the segment complete.
    pub completed_at: DateTime<Utc>,
}

impl FinalizedUtterance {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            completed_at: Utc::now(),
        }
    }
}
