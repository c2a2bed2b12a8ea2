//! Pipeline-level properties: session exclusivity, cancellation latency,
//! idempotence, and backpressure under a saturated queue.

use duplex_voice::{
    AudioFrame, AudioPlaybackPipeline, CollectingSink, CompletionStatus, PlaybackConfig,
    PlaybackSession, SessionState, VoiceResult,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn frame(seq: u64) -> AudioFrame {
    AudioFrame {
        seq,
        bytes: vec![0u8; 64],
    }
}

/// Feed `count` frames through a channel, as a synthesizer stream would.
async fn frames(count: u64) -> mpsc::Receiver<VoiceResult<AudioFrame>> {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        for seq in 0..count {
            if tx.send(Ok(frame(seq))).await.is_err() {
                return;
            }
        }
    });
    rx
}

#[tokio::test(start_paused = true)]
async fn at_most_one_session_is_streaming() {
    let sink = Arc::new(CollectingSink::with_write_delay(Duration::from_millis(20)));
    let pipeline = AudioPlaybackPipeline::new(sink, PlaybackConfig::default());

    let mut sessions: Vec<PlaybackSession> = Vec::new();
    for _ in 0..5 {
        let session = pipeline.start(frames(100).await).await.unwrap();
        // Every session that came before is already terminal.
        for prior in &sessions {
            assert!(prior.state().is_terminal());
        }
        sessions.push(session);
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    let streaming = sessions.iter().filter(|s| s.is_streaming()).count();
    assert_eq!(streaming, 1);
}

#[tokio::test(start_paused = true)]
async fn cancellation_latency_stays_within_one_frame_write() {
    let write_delay = Duration::from_millis(20);
    // Fixed offsets standing in for random cancellation points.
    let offsets_ms: [u64; 8] = [3, 17, 42, 88, 123, 199, 256, 301];

    for offset in offsets_ms {
        let sink = Arc::new(CollectingSink::with_write_delay(write_delay));
        let pipeline = AudioPlaybackPipeline::new(sink.clone(), PlaybackConfig::default());
        let session = pipeline.start(frames(500).await).await.unwrap();

        tokio::time::sleep(Duration::from_millis(offset)).await;

        let before = tokio::time::Instant::now();
        pipeline.cancel(&session).await;
        let latency = before.elapsed();

        assert_eq!(session.state(), SessionState::Interrupted);
        assert!(sink.was_stopped());
        // Silence within one frame-write duration (plus scheduling slack).
        assert!(
            latency <= write_delay + Duration::from_millis(5),
            "cancel took {latency:?} at offset {offset}ms"
        );
    }
}

#[tokio::test(start_paused = true)]
async fn cancel_on_terminal_sessions_is_a_no_op() {
    let sink = Arc::new(CollectingSink::with_write_delay(Duration::from_millis(20)));
    let pipeline = AudioPlaybackPipeline::new(sink, PlaybackConfig::default());

    // Completed session.
    let done = pipeline.start(frames(3).await).await.unwrap();
    let status = pipeline
        .await_completion(&done, Duration::from_secs(5))
        .await;
    assert_eq!(status, CompletionStatus::Completed);
    for _ in 0..3 {
        pipeline.cancel(&done).await;
        assert_eq!(done.state(), SessionState::Completed);
    }

    // Interrupted session: long enough that cancellation lands mid-stream.
    let killed = pipeline.start(frames(100).await).await.unwrap();
    pipeline.cancel(&killed).await;
    for _ in 0..3 {
        pipeline.cancel(&killed).await;
        assert_eq!(killed.state(), SessionState::Interrupted);
    }
}

#[tokio::test(start_paused = true)]
async fn saturated_queue_applies_backpressure_not_wholesale_drops() {
    let sink = Arc::new(CollectingSink::with_write_delay(Duration::from_millis(15)));
    let config = PlaybackConfig {
        queue_capacity: 2,
        enqueue_timeout: Duration::from_secs(5),
        ..PlaybackConfig::default()
    };
    let pipeline = AudioPlaybackPipeline::new(sink.clone(), config);

    let total = 60u64;
    let session = pipeline.start(frames(total).await).await.unwrap();
    let status = pipeline
        .await_completion(&session, Duration::from_secs(120))
        .await;

    assert_eq!(status, CompletionStatus::Completed);
    // The producer waited out queue saturation; nothing was shed.
    let written = sink.written();
    assert_eq!(written.len(), total as usize);
    assert!(written.windows(2).all(|w| w[0].seq < w[1].seq));
}
