//! End-to-end coordinator scenarios with scripted collaborators: a
//! push-driven recognizer, the tone synthesizer, and a collecting sink.

use async_trait::async_trait;
use duplex_voice::{
    AudioPlaybackPipeline, BargeInDetector, CannedReplyGenerator, CaptureConfig, CollectingSink,
    CoordinatorConfig, EndReason, Normalizer, PlaybackConfig, PushRecognizer, RecognizerFeed,
    ReplyGenerator, Role, SpeechCaptureMonitor, ToneSynthesizer, TurnCoordinator, TurnOutcome,
    TurnRecord, VoiceError, VoiceResult,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Generator that takes too long, for timeout scenarios.
struct SlowGenerator {
    delay: Duration,
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl ReplyGenerator for SlowGenerator {
    async fn generate(&self, _utterance: &str, _history: &[TurnRecord]) -> VoiceResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok("a reply that arrives far too late".to_string())
    }
}

/// Generator that always fails outright.
struct BrokenGenerator;

#[async_trait]
impl ReplyGenerator for BrokenGenerator {
    async fn generate(&self, _utterance: &str, _history: &[TurnRecord]) -> VoiceResult<String> {
        Err(VoiceError::Generation("model unavailable".to_string()))
    }
}

fn build(
    generator: Arc<dyn ReplyGenerator>,
    sink: Arc<CollectingSink>,
    config: CoordinatorConfig,
) -> (TurnCoordinator, RecognizerFeed) {
    let (recognizer, feed) = PushRecognizer::new();
    let monitor = SpeechCaptureMonitor::start(
        Arc::new(recognizer),
        Normalizer::new(),
        CaptureConfig::default(),
    )
    .unwrap();
    let pipeline = Arc::new(AudioPlaybackPipeline::new(sink, PlaybackConfig::default()));
    let coordinator = TurnCoordinator::new(
        monitor,
        pipeline,
        Arc::new(ToneSynthesizer::new()),
        generator,
        BargeInDetector::default(),
        config,
    );
    (coordinator, feed)
}

fn texts(records: &[TurnRecord]) -> Vec<(Role, &str)> {
    records.iter().map(|r| (r.role, r.text.as_str())).collect()
}

#[tokio::test(start_paused = true)]
async fn turn_completes_uninterrupted_and_returns_to_listening() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let sink = Arc::new(CollectingSink::new());
    let (mut coordinator, feed) = build(
        Arc::new(CannedReplyGenerator::fixed("Hi there!")),
        sink.clone(),
        CoordinatorConfig::default(),
    );

    feed.finalized("hello").await.unwrap();
    let outcome = coordinator.run_turn().await.unwrap();

    assert_eq!(outcome, TurnOutcome::Completed);
    assert_eq!(coordinator.consecutive_errors(), 0);
    assert_eq!(coordinator.turns_completed(), 1);
    assert!(sink.written_count() > 0);

    let records = texts(coordinator.history().records());
    assert_eq!(
        records,
        vec![(Role::User, "hello"), (Role::Agent, "Hi there!")]
    );
}

#[tokio::test(start_paused = true)]
async fn barge_in_cancels_playback_and_folds_the_fragment() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let sink = Arc::new(CollectingSink::with_write_delay(Duration::from_millis(25)));
    let reply_one = "Our pricing has three tiers, starting with the basic plan \
                     at ten dollars per month for a single seat.";
    let (mut coordinator, feed) = build(
        Arc::new(CannedReplyGenerator::new(vec![
            reply_one.to_string(),
            "Sure, go ahead.".to_string(),
        ])),
        sink.clone(),
        CoordinatorConfig::default(),
    );

    feed.finalized("tell me about pricing").await.unwrap();

    let interrupter = feed.clone();
    tokio::spawn(async move {
        // Well past the grace window, partials arrive ~20ms apart.
        tokio::time::sleep(Duration::from_millis(400)).await;
        let _ = interrupter.partial("w").await;
        tokio::time::sleep(Duration::from_millis(25)).await;
        let _ = interrupter.partial("wa").await;
        tokio::time::sleep(Duration::from_millis(25)).await;
        let _ = interrupter.partial("wait").await;
    });

    let outcome = coordinator.run_turn().await.unwrap();
    assert_eq!(outcome, TurnOutcome::Completed);

    let records = texts(coordinator.history().records());
    assert_eq!(records.len(), 4);
    assert_eq!(records[0], (Role::User, "tell me about pricing"));
    assert_eq!(records[1], (Role::Agent, reply_one));
    assert_eq!(records[2], (Role::User, "wait"));
    assert_eq!(records[3], (Role::Agent, "Sure, go ahead."));

    // The first reply was cut off mid-stream.
    let first_reply_frames = reply_one.trim().chars().count().div_ceil(4);
    assert!(sink.written_count() < first_reply_frames);
}

#[tokio::test(start_paused = true)]
async fn folded_fragment_finalization_is_not_a_new_turn() {
    let sink = Arc::new(CollectingSink::with_write_delay(Duration::from_millis(25)));
    let (mut coordinator, feed) = build(
        Arc::new(CannedReplyGenerator::new(vec![
            "Let me walk you through the setup process from the very beginning."
                .to_string(),
            "Okay, stopping there.".to_string(),
        ])),
        sink.clone(),
        CoordinatorConfig {
            speech_timeout: Duration::from_secs(2),
            ..CoordinatorConfig::default()
        },
    );

    feed.finalized("how do I get started").await.unwrap();
    let interrupter = feed.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(250)).await;
        let _ = interrupter.partial("stop").await;
        tokio::time::sleep(Duration::from_millis(25)).await;
        let _ = interrupter.partial("stop").await;
        // The interrupted segment finalizes later, as real recognizers do.
        tokio::time::sleep(Duration::from_millis(300)).await;
        let _ = interrupter.finalized("stop").await;
    });

    let outcome = coordinator.run_turn().await.unwrap();
    assert_eq!(outcome, TurnOutcome::Completed);
    let after_first = coordinator.history().len();

    // The late finalization of "stop" is a duplicate of the folded fragment:
    // the next turn must not replay it, so with no fresh speech it times out.
    let outcome = coordinator.run_turn().await.unwrap();
    assert_eq!(outcome, TurnOutcome::NoSpeech);
    assert_eq!(coordinator.history().len(), after_first);
}

#[tokio::test(start_paused = true)]
async fn exit_phrase_bypasses_generation_after_two_timeouts() {
    let sink = Arc::new(CollectingSink::new());
    let calls = Arc::new(AtomicU32::new(0));
    let generator = SlowGenerator {
        delay: Duration::from_secs(120),
        calls: Arc::clone(&calls),
    };
    let (mut coordinator, feed) = build(
        Arc::new(generator),
        sink.clone(),
        CoordinatorConfig {
            generation_timeout: Duration::from_secs(1),
            speech_timeout: Duration::from_secs(10),
            ..CoordinatorConfig::default()
        },
    );

    feed.finalized("what can you do").await.unwrap();
    feed.finalized("are you still there").await.unwrap();
    feed.finalized("goodbye").await.unwrap();

    let summary = coordinator.run().await.unwrap();

    assert_eq!(summary.reason, EndReason::GracefulExit);
    // Two timed-out attempts, none for the exit phrase.
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(summary.turns, 2);

    // Both failed turns spoke the fallback apology.
    let records = texts(coordinator.history().records());
    let fallbacks = records
        .iter()
        .filter(|(role, text)| *role == Role::Agent && text.contains("say that again"))
        .count();
    assert_eq!(fallbacks, 2);
    // The exit phrase itself is recorded as the final user turn.
    assert_eq!(records.last().unwrap(), &(Role::User, "goodbye"));
}

#[tokio::test(start_paused = true)]
async fn three_consecutive_failures_hit_the_error_ceiling() {
    let sink = Arc::new(CollectingSink::new());
    let (mut coordinator, feed) = build(
        Arc::new(BrokenGenerator),
        sink.clone(),
        CoordinatorConfig::default(),
    );

    for text in ["one", "two", "three", "four"] {
        feed.finalized(text).await.unwrap();
    }

    let summary = coordinator.run().await.unwrap();
    assert_eq!(summary.reason, EndReason::ErrorCeiling);
    assert_eq!(summary.turns, 3);
    assert_eq!(coordinator.consecutive_errors(), 3);
}

#[tokio::test(start_paused = true)]
async fn silence_alone_reaches_the_error_ceiling() {
    let sink = Arc::new(CollectingSink::new());
    let (mut coordinator, _feed) = build(
        Arc::new(CannedReplyGenerator::default()),
        sink,
        CoordinatorConfig {
            speech_timeout: Duration::from_secs(1),
            ..CoordinatorConfig::default()
        },
    );

    let summary = coordinator.run().await.unwrap();
    assert_eq!(summary.reason, EndReason::ErrorCeiling);
    assert_eq!(summary.turns, 0);
    // Silence never advances the history.
    assert!(coordinator.history().is_empty());
}

#[tokio::test(start_paused = true)]
async fn turn_ceiling_bounds_the_session() {
    let sink = Arc::new(CollectingSink::new());
    let (mut coordinator, feed) = build(
        Arc::new(CannedReplyGenerator::fixed("Noted.")),
        sink,
        CoordinatorConfig {
            max_turns: 2,
            ..CoordinatorConfig::default()
        },
    );

    for text in ["first", "second", "third"] {
        feed.finalized(text).await.unwrap();
    }

    let summary = coordinator.run().await.unwrap();
    assert_eq!(summary.reason, EndReason::TurnCeiling);
    assert_eq!(summary.turns, 2);
}

#[tokio::test(start_paused = true)]
async fn normalized_exit_phrase_ends_the_session() {
    let sink = Arc::new(CollectingSink::new());
    let (mut coordinator, feed) = build(
        Arc::new(CannedReplyGenerator::default()),
        sink,
        CoordinatorConfig::default(),
    );

    feed.finalized("Goodbye!").await.unwrap();
    let outcome = coordinator.run_turn().await.unwrap();
    assert_eq!(outcome, TurnOutcome::ExitRequested);
    assert_eq!(
        coordinator.history().last_turn().unwrap().text,
        "Goodbye!"
    );
}

#[tokio::test(start_paused = true)]
async fn greeting_is_spoken_first_and_interruptible() {
    let sink = Arc::new(CollectingSink::with_write_delay(Duration::from_millis(25)));
    let greeting = "Hello and thank you for calling! I'm your assistant today \
                    and I can help with plans, billing, and technical questions.";
    let (mut coordinator, feed) = build(
        Arc::new(CannedReplyGenerator::fixed("Of course, take your time.")),
        sink.clone(),
        CoordinatorConfig {
            greeting: Some(greeting.to_string()),
            preamble: Some("You are a helpful voice agent.".to_string()),
            speech_timeout: Duration::from_secs(5),
            ..CoordinatorConfig::default()
        },
    );

    let interrupter = feed.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        let _ = interrupter.partial("hold on").await;
        tokio::time::sleep(Duration::from_millis(25)).await;
        let _ = interrupter.partial("hold on").await;
        tokio::time::sleep(Duration::from_millis(400)).await;
        let _ = interrupter.finalized("goodbye").await;
    });

    let summary = coordinator.run().await.unwrap();
    assert_eq!(summary.reason, EndReason::GracefulExit);

    let records = texts(coordinator.history().records());
    // Preamble pinned first, greeting next, then the folded interruption.
    assert_eq!(records[0], (Role::System, "You are a helpful voice agent."));
    assert_eq!(records[1], (Role::Agent, greeting));
    assert_eq!(records[2], (Role::User, "hold on"));
    assert_eq!(records[3], (Role::Agent, "Of course, take your time."));
}

#[tokio::test(start_paused = true)]
async fn losing_capture_is_fatal() {
    let sink = Arc::new(CollectingSink::new());
    let (mut coordinator, feed) = build(
        Arc::new(CannedReplyGenerator::default()),
        sink,
        CoordinatorConfig::default(),
    );

    drop(feed);
    let err = coordinator.run().await.unwrap_err();
    assert!(matches!(err, VoiceError::Capture(_)));
}
