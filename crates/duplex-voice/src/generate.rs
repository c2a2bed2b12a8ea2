//! **Reply generation contract** — the language-model collaborator.
//!
//! The coordinator treats reply generation as a side-effect-free call that
//! may fail or time out. `OpenAiReplyGenerator` talks to any
//! OpenAI-compatible chat completions API; `CannedReplyGenerator` serves
//! tests and offline demos.

use crate::error::{VoiceError, VoiceResult};
use crate::history::{Role, TurnRecord};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

/// Generates the agent's next reply.
///
/// `history` is the bounded conversation log and already contains the
/// triggering utterance as its newest `User` record; `utterance` is passed
/// separately for implementations that do not model full context.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate(&self, utterance: &str, history: &[TurnRecord]) -> VoiceResult<String>;
}

/// Production generator: OpenAI-compatible chat completions (OpenAI,
/// OpenRouter, vLLM, etc.).
#[derive(Debug, Clone)]
pub struct OpenAiReplyGenerator {
    /// Base URL without trailing slash (e.g. https://api.openai.com/v1).
    pub base_url: String,
    /// Bearer API key.
    pub api_key: String,
    /// Chat model id.
    pub model: String,
    /// Cap on generated tokens; spoken replies should stay short.
    pub max_tokens: u32,
    pub temperature: f32,
    client: reqwest::Client,
}

impl OpenAiReplyGenerator {
    /// Build from environment: `LLM_API_URL` (default OpenAI), `LLM_API_KEY`
    /// (or `OPENAI_API_KEY` / `OPENROUTER_API_KEY`), `LLM_MODEL`.
    pub fn from_env() -> VoiceResult<Self> {
        let base_url = std::env::var("LLM_API_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let api_key = std::env::var("LLM_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .or_else(|_| std::env::var("OPENROUTER_API_KEY"))
            .map_err(|_| {
                VoiceError::Config(
                    "reply generation requires LLM_API_KEY, OPENAI_API_KEY, or OPENROUTER_API_KEY"
                        .to_string(),
                )
            })?;
        let model = std::env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        Self::new(base_url, api_key, model)
    }

    /// Create with explicit config (e.g. for tests or non-env wiring).
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> VoiceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| VoiceError::Generation(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            max_tokens: 300,
            temperature: 0.8,
            client,
        })
    }

    fn messages(history: &[TurnRecord]) -> Vec<serde_json::Value> {
        history
            .iter()
            .map(|record| {
                let role = match record.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Agent => "assistant",
                };
                serde_json::json!({ "role": role, "content": record.text })
            })
            .collect()
    }
}

#[async_trait]
impl ReplyGenerator for OpenAiReplyGenerator {
    async fn generate(&self, utterance: &str, history: &[TurnRecord]) -> VoiceResult<String> {
        let url = format!(
            "{}/chat/completions",
            self.base_url.trim_end_matches('/')
        );
        let body = serde_json::json!({
            "model": self.model,
            "messages": Self::messages(history),
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        });

        debug!("generating reply for {:?}", utterance);
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| VoiceError::Generation(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(VoiceError::Generation(format!(
                "chat API error {status}: {body}"
            )));
        }
        let json: serde_json::Value = res
            .json()
            .await
            .map_err(|e| VoiceError::Generation(e.to_string()))?;
        let reply = json
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .unwrap_or("")
            .trim()
            .to_string();
        info!("reply generated ({} chars)", reply.len());
        Ok(reply)
    }
}

/// Offline generator cycling through fixed replies.
#[derive(Debug)]
pub struct CannedReplyGenerator {
    replies: Vec<String>,
    index: AtomicUsize,
}

impl CannedReplyGenerator {
    pub fn new(replies: Vec<String>) -> Self {
        Self {
            replies,
            index: AtomicUsize::new(0),
        }
    }

    /// Single fixed reply for every turn.
    pub fn fixed(reply: impl Into<String>) -> Self {
        Self::new(vec![reply.into()])
    }
}

impl Default for CannedReplyGenerator {
    fn default() -> Self {
        Self::fixed("I hear you. Tell me more.")
    }
}

#[async_trait]
impl ReplyGenerator for CannedReplyGenerator {
    async fn generate(&self, _utterance: &str, _history: &[TurnRecord]) -> VoiceResult<String> {
        if self.replies.is_empty() {
            return Ok(String::new());
        }
        let i = self.index.fetch_add(1, Ordering::Relaxed) % self.replies.len();
        Ok(self.replies[i].clone())
    }
}
