//! Finance assistant
//!
//! Validates questions, bounds conversation context and applies the fixed
//! beginner-oriented system prompt before handing the request to a
//! [`CompletionBackend`] (Gemini in production).

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::info;

use crate::config::AssistantSettings;
use crate::error::{AssistantError, UnavailableReason};
use crate::models::{AiAnswer, AiQuery, AnswerMetadata};

const MAX_QUESTION_CHARS: usize = 4000;
const TEMPERATURE: f32 = 0.2;

const SYSTEM_PROMPT: &str = r#"You are a friendly personal-finance guide for beginners.

Guidelines:
- Explain concepts in plain language and define any jargon you use
- Give practical, actionable next steps the user can take
- Keep answers short and structured (bullets where helpful)
- Mention risks and the value of diversification when investing comes up
- Never promise returns and never claim certainty about future prices
- You are not a licensed advisor; suggest a professional for complex situations"#;

/// Fully prepared request for a text-completion backend.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub model: String,
    pub prompt_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub finish_reason: Option<String>,
}

/// Opaque text-completion service.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    fn model(&self) -> &str;
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, AssistantError>;
}

/// Limits applied to every question.
#[derive(Debug, Clone)]
pub struct AssistantOptions {
    pub timeout: Duration,
    pub max_output_tokens: u32,
    pub max_context_turns: usize,
    pub max_context_tokens: usize,
}

impl Default for AssistantOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_output_tokens: 1024,
            max_context_turns: 6,
            max_context_tokens: 2000,
        }
    }
}

impl From<&AssistantSettings> for AssistantOptions {
    fn from(settings: &AssistantSettings) -> Self {
        Self {
            timeout: settings.timeout,
            max_output_tokens: settings.max_output_tokens,
            max_context_turns: settings.max_context_turns,
            max_context_tokens: settings.max_context_tokens,
        }
    }
}

pub struct FinanceAssistant {
    backend: Arc<dyn CompletionBackend>,
    options: AssistantOptions,
}

impl FinanceAssistant {
    pub fn new(backend: Arc<dyn CompletionBackend>, options: AssistantOptions) -> Self {
        Self { backend, options }
    }

    pub async fn ask(&self, query: &AiQuery) -> Result<AiAnswer, AssistantError> {
        let question = query.question.trim();
        if question.is_empty() {
            return Err(AssistantError::InvalidQuery("question is empty".to_string()));
        }
        if question.chars().count() > MAX_QUESTION_CHARS {
            return Err(AssistantError::InvalidQuery(format!(
                "question exceeds {} characters",
                MAX_QUESTION_CHARS
            )));
        }

        let context = truncate_context(
            &query.context,
            self.options.max_context_turns,
            self.options.max_context_tokens,
        );
        if context.len() < query.context.len() {
            info!(
                kept = context.len(),
                dropped = query.context.len() - context.len(),
                "Truncated conversation context"
            );
        }

        let request = CompletionRequest {
            system_prompt: SYSTEM_PROMPT.to_string(),
            prompt: build_prompt(question, &context, query.portfolio.as_deref()),
            temperature: TEMPERATURE,
            max_output_tokens: self.options.max_output_tokens,
            timeout: self.options.timeout,
        };

        let started = Instant::now();
        let completion = tokio::time::timeout(self.options.timeout, self.backend.complete(&request))
            .await
            .map_err(|_| {
                AssistantError::unavailable(UnavailableReason::Timeout, "AI service timeout")
            })??;
        let latency_ms = started.elapsed().as_millis() as u64;

        info!(
            model = %completion.model,
            latency_ms,
            output_tokens = ?completion.output_tokens,
            "Assistant answer generated"
        );

        Ok(AiAnswer {
            text: completion.text,
            metadata: AnswerMetadata {
                model: completion.model,
                prompt_tokens: completion.prompt_tokens,
                output_tokens: completion.output_tokens,
                finish_reason: completion.finish_reason,
                latency_ms,
            },
        })
    }
}

/// Approximate token count (4 characters per token).
fn estimate_tokens(text: &str) -> usize {
    (text.len() + 3) / 4
}

/// Keep the most recent non-blank turns that fit both the turn and token
/// budgets, in their original order.
pub fn truncate_context(turns: &[String], max_turns: usize, max_tokens: usize) -> Vec<String> {
    let mut kept = Vec::new();
    let mut used_tokens = 0;

    for turn in turns.iter().rev().map(|t| t.trim()).filter(|t| !t.is_empty()) {
        if kept.len() >= max_turns {
            break;
        }
        let cost = estimate_tokens(turn);
        if used_tokens + cost > max_tokens {
            break;
        }
        used_tokens += cost;
        kept.push(turn.to_string());
    }

    kept.reverse();
    kept
}

fn build_prompt(question: &str, context: &[String], portfolio: Option<&str>) -> String {
    let mut prompt = String::new();

    if !context.is_empty() {
        prompt.push_str("Conversation so far (oldest first):\n");
        for turn in context {
            prompt.push_str("- ");
            prompt.push_str(turn);
            prompt.push('\n');
        }
        prompt.push('\n');
    }

    if let Some(portfolio) = portfolio.map(str::trim).filter(|p| !p.is_empty()) {
        prompt.push_str("User's portfolio:\n");
        prompt.push_str(portfolio);
        prompt.push_str("\n\n");
    }

    prompt.push_str("Question: ");
    prompt.push_str(question);
    prompt
}

/// Mock backend for development & testing: returns a fixed outcome and
/// records every request it receives.
pub struct ScriptedBackend {
    outcome: Result<String, AssistantError>,
    delay: Duration,
    calls: AtomicUsize,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedBackend {
    pub fn answering(text: impl Into<String>) -> Self {
        Self::new(Ok(text.into()))
    }

    pub fn failing(error: AssistantError) -> Self {
        Self::new(Err(error))
    }

    fn new(outcome: Result<String, AssistantError>) -> Self {
        Self {
            outcome,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.requests.lock().ok().and_then(|r| r.last().cloned())
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, AssistantError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.outcome.clone().map(|text| Completion {
            text,
            model: self.model().to_string(),
            prompt_tokens: None,
            output_tokens: None,
            finish_reason: Some("STOP".to_string()),
        })
    }
}
