//! # duplex-voice — full-duplex conversation coordination
//!
//! This crate is the concurrency and turn-taking layer of a voice agent: it
//! lets a synthetic speaker stream audio while the human may interrupt at any
//! moment, detects the interruption within a debounce window, silences
//! playback, and folds the interruption into the conversation as the next
//! turn. Speech recognition, speech synthesis, and reply generation are
//! black-box collaborators behind narrow traits.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       TurnCoordinator                         │
//! │  ┌───────────────┐   ┌──────────────┐   ┌────────────────┐  │
//! │  │ CaptureMonitor│ → │ ReplyGenerator│ → │ PlaybackPipeline│  │
//! │  │ (continuous)  │   │  (suspends)  │   │ (bounded queue) │  │
//! │  └───────┬───────┘   └──────────────┘   └────────┬───────┘  │
//! │          │  latest partial                        │          │
//! │          ▼                                        ▼          │
//! │  ┌───────────────┐        cancel          ┌────────────────┐ │
//! │  │ BargeInDetect │ ──────────────────────▶│   AudioSink    │ │
//! │  │ (poll+debounce)│                       │  (stop = mute) │ │
//! │  └───────────────┘                        └────────────────┘ │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Capture never pauses during playback; that is what makes barge-in
//! possible. At most one playback session streams at a time, and starting a
//! new one cancels the old one before any new audio is produced.

pub mod barge_in;
pub mod capture;
pub mod coordinator;
pub mod error;
pub mod generate;
pub mod history;
pub mod normalize;
pub mod output;
pub mod playback;
pub mod recognize;
pub mod synthesize;
pub mod transcript;

pub use barge_in::{BargeInConfig, BargeInDetector};
pub use capture::{CaptureConfig, CaptureStats, PartialView, SpeechCaptureMonitor};
pub use coordinator::{
    CoordinatorConfig, EndReason, ErrorCounter, SessionSummary, TurnCoordinator, TurnOutcome,
};
pub use error::{VoiceError, VoiceResult};
pub use generate::{CannedReplyGenerator, OpenAiReplyGenerator, ReplyGenerator};
pub use history::{ConversationHistory, Role, TurnRecord};
pub use normalize::Normalizer;
pub use output::{AudioSink, CollectingSink, RodioSink};
pub use playback::{
    AudioPlaybackPipeline, CompletionStatus, PlaybackConfig, PlaybackSession, SessionState,
};
pub use recognize::{
    PushRecognizer, RecognitionEvent, RecognizerFeed, ScriptedEvent, ScriptedRecognizer,
    SpeechRecognizer,
};
pub use synthesize::{AudioFrame, FrameStream, SpeechSynthesizer, ToneSynthesizer};
pub use transcript::{FinalizedUtterance, PartialTranscript};
