//! Closed-loop prompt improvement for debt-collection voice agents.
//!
//! `callcoach` tunes the system prompt of a collections voice agent without
//! placing a single real call. A training run simulates conversations between
//! the agent and synthetic customer personas, has a language model grade each
//! transcript, rewrites the prompt from the grader's recommendations, and
//! merges the per-persona rewrites into one final prompt.
//!
//! The language model is an opaque [`Oracle`](oracle::Oracle): anything that
//! turns a prompt into text. [`OpenRouterOracle`](oracle::OpenRouterOracle)
//! talks to the [OpenRouter](https://openrouter.ai/) chat completions API;
//! [`FnOracle`](oracle::FnOracle) wraps a closure for tests and offline runs.
//!
//! # Getting started
//!
//! ```ignore
//! use callcoach::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), String> {
//!     let oracle = OpenRouterOracle::from_env(OracleConfig::from_env()?)?;
//!     let trainer = Trainer::new(Arc::new(oracle), TrainerConfig::default())
//!         .with_event_handler(Arc::new(LoggingHandler));
//!
//!     let personas = vec![
//!         Persona::new("already-paid", "You insist you paid last week."),
//!         Persona::new("angry", "You are furious about the late fees."),
//!     ];
//!
//!     let run = trainer
//!         .train_with_named_personas("Collect payment politely.", personas, None)
//!         .await
//!         .map_err(|e| e.to_string())?;
//!
//!     println!("{}", run.final_improved_prompt);
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`dialogue`] | [`DialogueEngine`](dialogue::DialogueEngine): one chat participant with private memory |
//! | [`simulation`] | [`Simulator`](simulation::Simulator), [`Transcript`](simulation::Transcript), stop keywords |
//! | [`evaluation`] | [`EvaluationRecord`](evaluation::EvaluationRecord) extraction with tolerant parsing |
//! | [`rewrite`] | Prompt rewriting from edit lists and merging of per-persona rewrites |
//! | [`train`] | [`Trainer`](train::Trainer): single- and multi-persona training runs |
//! | [`persona`] | [`Persona`](persona::Persona) and oracle-backed persona generation |
//! | [`insights`] | Payment-risk classification of finished call transcripts |
//! | [`events`] | [`EventHandler`](events::EventHandler) observer for training progress |
//! | [`oracle`] | The [`Oracle`](oracle::Oracle) trait and its implementations |
//! | [`config`] | [`OracleConfig`](config::OracleConfig), [`TrainerConfig`](config::TrainerConfig) |
//! | [`api`] | Retry with backoff, run ids, token cost tracking |

pub mod api;
pub mod config;
pub mod dialogue;
pub mod error;
pub mod evaluation;
pub mod events;
pub mod insights;
pub mod oracle;
pub mod persona;
pub mod prelude;
pub mod prompts;
pub mod rewrite;
pub mod simulation;
pub mod train;

use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, trace};

pub use error::{CoachError, ErrorKind, MalformedEvaluation, OracleError, TrainingFailure};

// ── Constants ──────────────────────────────────────────────────────

/// Chat completions endpoint used unless a client overrides it.
pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Default model for all oracle calls.
pub const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` from a type that implements
/// `schemars::JsonSchema`.
///
/// Used both to tell the model what shape to answer in and to validate what
/// it actually answered.
pub fn json_schema_for<T: schemars::JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}

// ── Request types ──────────────────────────────────────────────────

/// Chat completion request body. Only the fields the oracle adapter sets;
/// unused optional fields are omitted from serialization.
#[derive(Serialize, Debug, Default)]
pub struct ChatRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    pub messages: Vec<Message>,

    #[serde(skip_serializing_if = "is_zero_u32")]
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "is_zero_f32")]
    pub temperature: f32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}
fn is_zero_f32(v: &f32) -> bool {
    *v == 0.0
}

/// JSON output format type.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum ResponseFormatType {
    #[serde(rename = "json_object")]
    JsonObject,
}

/// JSON output mode.
#[derive(Serialize, Debug)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub fmt_type: ResponseFormatType,
}

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// A message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

// ── Response types ─────────────────────────────────────────────────

/// Raw API response (internal deserialization target).
#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorResponse>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    message: String,
}

/// Clean return type from `OpenRouterClient::chat()`.
#[derive(Debug)]
pub struct ChatCompletion {
    pub content: Option<String>,
    pub usage: Option<UsageInfo>,
    pub finish_reason: Option<String>,
}

/// Token usage statistics.
#[derive(Deserialize, Debug, Clone)]
pub struct UsageInfo {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

// ── Client ─────────────────────────────────────────────────────────

/// Async HTTP client for the OpenRouter chat completions API.
pub struct OpenRouterClient {
    pub(crate) client: reqwest::Client,
    pub(crate) endpoint: String,
    pub(crate) api_key: String,
    pub(crate) referer: String,
    pub(crate) title: String,
}

impl OpenRouterClient {
    /// Create a new client with the given API key and default headers.
    pub fn new(api_key: impl Into<String>) -> Result<Self, String> {
        Self::with_headers(api_key, "https://github.com/callcoach", "callcoach")
    }

    /// Create a new client with custom Referer and X-Title headers.
    ///
    /// The client itself has no request timeout; callers bound each call
    /// (see [`oracle::OpenRouterOracle`]).
    pub fn with_headers(
        api_key: impl Into<String>,
        referer: impl Into<String>,
        title: impl Into<String>,
    ) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .user_agent("callcoach/0.1")
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            client,
            endpoint: OPENROUTER_URL.to_string(),
            api_key: api_key.into(),
            referer: referer.into(),
            title: title.into(),
        })
    }

    /// Post to `endpoint` instead of [`OPENROUTER_URL`].
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Send a chat completion request.
    ///
    /// Errors are plain strings carrying the HTTP status (`"... HTTP 429: ..."`)
    /// so that [`api::retry::is_transient_error`] can classify them.
    pub async fn chat(&self, body: &ChatRequest) -> Result<ChatCompletion, String> {
        debug!(
            "LLM request: model={}, messages={}, max_tokens={}, temp={}",
            body.model.as_deref().unwrap_or("(none)"),
            body.messages.len(),
            body.max_tokens,
            body.temperature,
        );
        trace!(
            "Request payload size: {} bytes",
            serde_json::to_string(body).map_or(0, |s| s.len())
        );

        let start = Instant::now();

        let resp = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("HTTP-Referer", &self.referer)
            .header("X-Title", &self.title)
            .json(body)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| format!("failed to read response: {e}"))?;

        debug!(
            "LLM response: HTTP {} in {:.1}s ({} bytes)",
            status,
            start.elapsed().as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            return Err(format!("OpenRouter API HTTP {status}: {text}"));
        }

        let parsed: RawChatResponse =
            serde_json::from_str(&text).map_err(|e| format!("failed to parse response: {e}"))?;

        if let Some(err) = parsed.error {
            return Err(format!("OpenRouter API error: {}", err.message));
        }

        if let Some(ref usage) = parsed.usage {
            debug!(
                "Token usage: prompt={}, completion={}, total={}",
                usage.prompt_tokens.unwrap_or(0),
                usage.completion_tokens.unwrap_or(0),
                usage.total_tokens.unwrap_or(0),
            );
        }

        match parsed.choices.and_then(|c| c.into_iter().next()) {
            Some(c) => Ok(ChatCompletion {
                content: c.message.content,
                usage: parsed.usage,
                finish_reason: c.finish_reason,
            }),
            None => {
                debug!("LLM output: empty (no choices)");
                Ok(ChatCompletion {
                    content: None,
                    usage: parsed.usage,
                    finish_reason: None,
                })
            }
        }
    }
}

// ── Text helpers ───────────────────────────────────────────────────

/// Remove a surrounding Markdown code fence (```` ```json ... ``` ````) if the
/// whole text is wrapped in one. Text without a fence is returned trimmed.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. "json") on the opening fence line.
    let body = match rest.find('\n') {
        Some(newline) => rest.get(newline + 1..).unwrap_or(""),
        None => rest,
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

/// Shorten `text` to at most `max_chars` characters for log previews.
pub(crate) fn preview(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors() {
        let sys = Message::system("hello");
        assert_eq!(sys.role, MessageRole::System);
        assert_eq!(sys.content, "hello");

        let user = Message::user("world");
        assert_eq!(user.role, MessageRole::User);
    }

    #[test]
    fn chat_request_default_skips_unset_fields() {
        let req = ChatRequest {
            model: Some("test-model".into()),
            messages: vec![Message::user("hi")],
            max_tokens: 100,
            temperature: 0.5,
            ..Default::default()
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("max_tokens").is_some());
        assert!(json.get("response_format").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn json_output_mode_serializes_as_json_object() {
        let req = ChatRequest {
            response_format: Some(ResponseFormat {
                fmt_type: ResponseFormatType::JsonObject,
            }),
            ..Default::default()
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["response_format"]["type"], "json_object");
    }

    #[test]
    fn strip_code_fences_handles_info_string() {
        let fenced = "```json\n{\"a\": 1}\n```";
        assert_eq!(strip_code_fences(fenced), "{\"a\": 1}");
    }

    #[test]
    fn strip_code_fences_leaves_plain_text() {
        assert_eq!(strip_code_fences("  plain text \n"), "plain text");
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        assert_eq!(preview("héllo wörld", 5), "héllo...");
        assert_eq!(preview("short", 10), "short");
    }
}
