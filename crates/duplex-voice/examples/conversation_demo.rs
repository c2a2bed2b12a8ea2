//! Conversation demo — scripted speech in, tone audio out, barge-in live.
//!
//! The recognizer replays a small script: a greeting exchange, a barge-in
//! ("wait") during the agent's reply, and a goodbye. Replies come from an
//! OpenAI-compatible API when `LLM_API_KEY` (or `OPENAI_API_KEY`) is set,
//! otherwise from canned text. Audio goes to the default output device when
//! one exists, else to a silent collecting sink.
//!
//! Run with: `cargo run --example conversation_demo`

use anyhow::Result;
use duplex_voice::{
    AudioPlaybackPipeline, AudioSink, BargeInDetector, CannedReplyGenerator, CaptureConfig,
    CollectingSink, CoordinatorConfig, Normalizer, OpenAiReplyGenerator, PlaybackConfig,
    ReplyGenerator, RodioSink, ScriptedEvent, ScriptedRecognizer, SpeechCaptureMonitor,
    ToneSynthesizer, TurnCoordinator,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Conversation demo — scripted capture, barge-in, turn-taking");
    info!("Set LLM_API_KEY for real replies; otherwise canned text is used.\n");

    let script = vec![
        ScriptedEvent::partial(Duration::from_millis(600), "hel"),
        ScriptedEvent::finalized(Duration::from_millis(900), "hello"),
        // Barge-in during the agent's reply to "hello".
        ScriptedEvent::partial(Duration::from_millis(1150), "wa"),
        ScriptedEvent::partial(Duration::from_millis(1180), "wait"),
        // The same segment grows into a full question and finalizes.
        ScriptedEvent::partial(Duration::from_millis(1900), "wait what about pricing"),
        ScriptedEvent::finalized(Duration::from_millis(2400), "wait what about pricing"),
        ScriptedEvent::finalized(Duration::from_millis(7000), "goodbye"),
    ];
    let recognizer = Arc::new(ScriptedRecognizer::new(script));
    let monitor =
        SpeechCaptureMonitor::start(recognizer, Normalizer::new(), CaptureConfig::default())?;

    // Keep the output stream alive for the session; RodioSink only needs the
    // handle. Fall back to a silent sink on machines without audio.
    let rodio_out = rodio::OutputStream::try_default().ok();
    let sink: Arc<dyn AudioSink> = match &rodio_out {
        Some((_stream, handle)) => {
            info!("audio: default output device");
            Arc::new(RodioSink::new(handle, 16000)?)
        }
        None => {
            info!("audio: no output device, running silent");
            Arc::new(CollectingSink::new())
        }
    };
    let pipeline = Arc::new(AudioPlaybackPipeline::new(sink, PlaybackConfig::default()));

    let generator: Arc<dyn ReplyGenerator> = match OpenAiReplyGenerator::from_env() {
        Ok(g) => {
            info!("replies: OpenAI-compatible API ({})", g.model);
            Arc::new(g)
        }
        Err(_) => {
            info!("replies: canned (set LLM_API_KEY for a real model)");
            Arc::new(CannedReplyGenerator::new(vec![
                "Hi! Great to hear from you. I can talk plans, pricing, or setup — \
                 what would you like to know?"
                    .to_string(),
                "Of course — pricing starts with a free tier, and paid plans begin \
                 at ten dollars a month."
                    .to_string(),
                "Anything else I can help with?".to_string(),
            ]))
        }
    };

    let synthesizer = Arc::new(
        ToneSynthesizer::new().with_frame_delay(Duration::from_millis(20)),
    );

    let config = CoordinatorConfig {
        greeting: Some("Hello! Thanks for calling. How can I help you today?".to_string()),
        preamble: Some(
            "You are a friendly voice agent. Keep replies short; they are spoken aloud."
                .to_string(),
        ),
        speech_timeout: Duration::from_secs(10),
        ..CoordinatorConfig::default()
    };

    let mut coordinator = TurnCoordinator::new(
        monitor,
        pipeline,
        synthesizer,
        generator,
        BargeInDetector::default(),
        config,
    );

    let summary = coordinator.run().await?;
    info!(
        "session over: {:?}, {} turns, {} utterances captured (avg latency {:.0}ms)",
        summary.reason,
        summary.turns,
        summary.capture.finalized_count,
        summary.capture.avg_latency_ms
    );

    for record in coordinator.history().records() {
        info!("  {:?}: {}", record.role, record.text);
    }

    Ok(())
}
