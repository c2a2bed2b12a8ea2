//! Error types for the duplex voice coordinator

use thiserror::Error;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors that can occur in the conversation coordination layer
#[derive(Error, Debug)]
pub enum VoiceError {
    /// The speech-await window elapsed without a finalized utterance.
    /// Recoverable: the coordinator retries the turn.
    #[error("no speech detected within the listening window")]
    NoSpeechDetected,

    /// Reply generation failed or timed out. Recoverable: a canned
    /// fallback is spoken instead.
    #[error("reply generation failed: {0}")]
    Generation(String),

    /// Playback failed (sink or synthesis-source error). Recoverable: the
    /// turn ends as interrupted without user speech.
    #[error("audio playback error: {0}")]
    Playback(String),

    /// Capture is foundational; losing it ends the session.
    #[error("speech capture failed: {0}")]
    Capture(String),

    /// Terminal: the session ended by exit phrase or error ceiling.
    #[error("session aborted ({})", abort_reason(.graceful))]
    Aborted { graceful: bool },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("channel send error: {0}")]
    ChannelSend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn abort_reason(graceful: &bool) -> &'static str {
    if *graceful {
        "graceful exit"
    } else {
        "error ceiling"
    }
}

impl VoiceError {
    /// Whether this error terminates the session rather than the turn.
    pub fn is_fatal(&self) -> bool {
        matches!(self, VoiceError::Capture(_) | VoiceError::Aborted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(VoiceError::Capture("mic gone".into()).is_fatal());
        assert!(VoiceError::Aborted { graceful: true }.is_fatal());
        assert!(!VoiceError::NoSpeechDetected.is_fatal());
        assert!(!VoiceError::Generation("timeout".into()).is_fatal());
        assert!(!VoiceError::Playback("sink".into()).is_fatal());
    }

    #[test]
    fn aborted_display_names_the_cause() {
        let graceful = VoiceError::Aborted { graceful: true }.to_string();
        assert!(graceful.contains("graceful"));
        let ceiling = VoiceError::Aborted { graceful: false }.to_string();
        assert!(ceiling.contains("error ceiling"));
    }
}
