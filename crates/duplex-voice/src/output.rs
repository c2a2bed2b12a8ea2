//! **Audio output sink** — where playback frames land.
//!
//! The pipeline drives a sink through a narrow trait: write a frame, stop
//! (synchronous silence), and report drain state. `RodioSink` is the
//! production implementation; `CollectingSink` records frames for tests and
//! can simulate a slow device for backpressure scenarios.

use crate::error::{VoiceError, VoiceResult};
use crate::synthesize::AudioFrame;
use async_trait::async_trait;
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStreamHandle, Sink};
use std::sync::Mutex;
use std::time::Duration;
use tracing::info;

/// Output device abstraction used by the playback consumer.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Write one frame. May suspend while the device accepts the audio.
    async fn write_frame(&self, frame: &AudioFrame) -> VoiceResult<()>;

    /// Stop immediately: discard anything buffered and fall silent before
    /// returning. Must be idempotent.
    fn stop(&self);

    /// True when everything written has played out.
    fn is_idle(&self) -> bool;
}

/// Production sink backed by a rodio `Sink`. Frames are interpreted as
/// 16-bit little-endian mono PCM at the configured rate.
///
/// The caller keeps the `OutputStream` alive for the session (it is not
/// `Send`); only the handle is needed here.
pub struct RodioSink {
    sink: Sink,
    sample_rate: u32,
}

impl RodioSink {
    pub fn new(handle: &OutputStreamHandle, sample_rate: u32) -> VoiceResult<Self> {
        let sink = Sink::try_new(handle).map_err(|e| VoiceError::Playback(e.to_string()))?;
        info!("output sink ready ({}Hz mono)", sample_rate);
        Ok(Self { sink, sample_rate })
    }
}

#[async_trait]
impl AudioSink for RodioSink {
    async fn write_frame(&self, frame: &AudioFrame) -> VoiceResult<()> {
        if frame.bytes.is_empty() {
            return Ok(());
        }
        let samples: Vec<i16> = frame
            .bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        self.sink
            .append(SamplesBuffer::new(1, self.sample_rate, samples));
        Ok(())
    }

    fn stop(&self) {
        self.sink.stop();
    }

    fn is_idle(&self) -> bool {
        self.sink.empty()
    }
}

/// Test sink: records every frame, optionally simulating a slow device.
#[derive(Default)]
pub struct CollectingSink {
    frames: Mutex<Vec<AudioFrame>>,
    stopped: Mutex<bool>,
    /// Simulated device write time per frame.
    pub write_delay: Option<Duration>,
    /// When set, `write_frame` fails after this many frames.
    pub fail_after: Option<usize>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_write_delay(delay: Duration) -> Self {
        Self {
            write_delay: Some(delay),
            ..Self::default()
        }
    }

    /// Sink whose writes start failing after `frames` successful ones.
    pub fn failing_after(frames: usize) -> Self {
        Self {
            fail_after: Some(frames),
            ..Self::default()
        }
    }

    /// Frames written so far.
    pub fn written(&self) -> Vec<AudioFrame> {
        self.frames.lock().map(|f| f.clone()).unwrap_or_default()
    }

    pub fn written_count(&self) -> usize {
        self.frames.lock().map(|f| f.len()).unwrap_or(0)
    }

    pub fn was_stopped(&self) -> bool {
        self.stopped.lock().map(|s| *s).unwrap_or(false)
    }
}

#[async_trait]
impl AudioSink for CollectingSink {
    async fn write_frame(&self, frame: &AudioFrame) -> VoiceResult<()> {
        if let Some(limit) = self.fail_after {
            if self.written_count() >= limit {
                return Err(VoiceError::Playback("simulated device failure".to_string()));
            }
        }
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }
        self.frames
            .lock()
            .map_err(|_| VoiceError::Playback("frame lock poisoned".to_string()))?
            .push(frame.clone());
        Ok(())
    }

    fn stop(&self) {
        if let Ok(mut stopped) = self.stopped.lock() {
            *stopped = true;
        }
    }

    fn is_idle(&self) -> bool {
        true
    }
}
