//! **Speech synthesis contract** — the streaming TTS collaborator.
//!
//! The pipeline never knows what voice model produced a frame; it consumes an
//! ordered frame stream and feeds the output sink. Implement
//! [`SpeechSynthesizer`] for a real engine (local model or remote streaming
//! API). Streams must be lazy (frames produced as they are consumed) and
//! cancel-safe (dropping the receiver aborts production promptly).

use crate::error::{VoiceError, VoiceResult};
use std::f32::consts::TAU;
use std::time::Duration;
use tokio::sync::mpsc;

/// One synthesized audio frame: an opaque payload with a sequence number.
/// Exactly one consumer drains a given frame.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Position in the stream, starting at 0 per synthesis call.
    pub seq: u64,
    /// Encoded audio. The sink decides how to interpret it; the in-crate
    /// sinks use 16-bit little-endian mono PCM.
    pub bytes: Vec<u8>,
}

/// Stream of frames from one `synthesize` call. An `Err` item is a terminal
/// synthesis failure; the channel closing marks a clean end of stream.
pub type FrameStream = mpsc::Receiver<VoiceResult<AudioFrame>>;

/// Streaming synthesis backend.
pub trait SpeechSynthesizer: Send + Sync {
    /// Begin synthesizing `text`. Returns immediately with the lazy stream.
    fn synthesize(&self, text: &str) -> VoiceResult<FrameStream>;
}

/// Deterministic synthesizer: a quiet tone whose length scales with the text.
/// Stands in for a voice model in tests and the offline demo.
#[derive(Debug, Clone)]
pub struct ToneSynthesizer {
    /// PCM sample rate of produced frames.
    pub sample_rate: u32,
    /// Duration of each frame.
    pub frame_duration: Duration,
    /// Characters of text per frame of audio.
    pub chars_per_frame: usize,
    /// Optional artificial delay between frames, to mimic a remote stream.
    pub frame_delay: Option<Duration>,
}

impl Default for ToneSynthesizer {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            frame_duration: Duration::from_millis(20),
            chars_per_frame: 4,
            frame_delay: None,
        }
    }
}

impl ToneSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a remote stream that delivers one frame per `delay`.
    pub fn with_frame_delay(mut self, delay: Duration) -> Self {
        self.frame_delay = Some(delay);
        self
    }

    fn frame_count(&self, text: &str) -> u64 {
        let chars = text.trim().chars().count();
        if chars == 0 {
            return 0;
        }
        (chars as u64).div_ceil(self.chars_per_frame.max(1) as u64)
    }

    fn render_frame(&self, seq: u64) -> Vec<u8> {
        let samples = (self.sample_rate as f64 * self.frame_duration.as_secs_f64()) as usize;
        let mut bytes = Vec::with_capacity(samples * 2);
        let offset = seq as usize * samples;
        for i in 0..samples {
            let t = (offset + i) as f32 / self.sample_rate as f32;
            let value = (TAU * 220.0 * t).sin() * 0.1;
            let pcm = (value * i16::MAX as f32) as i16;
            bytes.extend_from_slice(&pcm.to_le_bytes());
        }
        bytes
    }
}

impl SpeechSynthesizer for ToneSynthesizer {
    fn synthesize(&self, text: &str) -> VoiceResult<FrameStream> {
        let total = self.frame_count(text);
        if total == 0 {
            return Err(VoiceError::Playback("nothing to synthesize".to_string()));
        }
        // Small buffer keeps production lazy: the task stalls until the
        // pipeline drains, and aborts when the receiver is dropped.
        let (tx, rx) = mpsc::channel(4);
        let this = self.clone();

        tokio::spawn(async move {
            for seq in 0..total {
                if let Some(delay) = this.frame_delay {
                    tokio::time::sleep(delay).await;
                }
                let frame = AudioFrame {
                    seq,
                    bytes: this.render_frame(seq),
                };
                if tx.send(Ok(frame)).await.is_err() {
                    return; // cancelled
                }
            }
        });

        Ok(rx)
    }
}
