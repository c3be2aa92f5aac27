//! The language model seen as an opaque text-completion oracle.
//!
//! Everything in the core talks to the model through [`Oracle::complete`]:
//! a prompt goes in, text or an [`OracleError`] comes out. The trait returns
//! a boxed future so it stays dyn-compatible and can be shared as
//! `Arc<dyn Oracle>` across persona pipelines.
//!
//! | Implementation | Use case |
//! |----------------|----------|
//! | [`OpenRouterOracle`] | Real model calls with timeout, retry and cost tracking |
//! | [`FnOracle`] | Closures: tests, offline runs, canned answers |

use crate::api::retry::retry_with_backoff;
use crate::api::tracing::{CostTracker, ModelPricing, pricing_for_model};
use crate::config::OracleConfig;
use crate::error::OracleError;
use crate::{ChatRequest, Message, OpenRouterClient, ResponseFormat, ResponseFormatType, preview};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use tracing::{debug, trace};

/// Boxed future returned by [`Oracle::complete`].
pub type OracleFuture<'a> = Pin<Box<dyn Future<Output = Result<String, OracleError>> + Send + 'a>>;

/// One completion request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OracleRequest {
    /// Standing instructions (the participant's persona or role).
    pub system: Option<String>,
    /// The text to complete.
    pub prompt: String,
    /// Ask the backend to constrain output to a single JSON object.
    pub json_output: bool,
}

impl OracleRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_json_output(mut self) -> Self {
        self.json_output = true;
        self
    }
}

/// A text-completion backend.
///
/// A call either returns text or fails; implementations decide whether to
/// retry internally. Callers never hold a lock across `complete`, so
/// implementations must tolerate concurrent calls.
///
/// # Example
///
/// ```ignore
/// struct Echo;
///
/// impl Oracle for Echo {
///     fn complete(&self, request: OracleRequest) -> OracleFuture<'_> {
///         Box::pin(async move { Ok(request.prompt) })
///     }
/// }
/// ```
pub trait Oracle: Send + Sync {
    fn complete(&self, request: OracleRequest) -> OracleFuture<'_>;
}

// ── OpenRouterOracle ───────────────────────────────────────────────

/// [`Oracle`] backed by the OpenRouter chat completions API.
///
/// Each call is bounded by [`OracleConfig::timeout`] and retried according
/// to [`OracleConfig::retry`]. Token usage from every successful call is
/// accumulated in a [`CostTracker`].
pub struct OpenRouterOracle {
    client: OpenRouterClient,
    config: OracleConfig,
    pricing: ModelPricing,
    usage: Mutex<CostTracker>,
}

const TIMEOUT_MARKER: &str = "request timed out after";

impl OpenRouterOracle {
    pub fn new(client: OpenRouterClient, config: OracleConfig) -> Self {
        let pricing = pricing_for_model(&config.model);
        Self {
            client,
            config,
            pricing,
            usage: Mutex::new(CostTracker::new()),
        }
    }

    /// Build a client from the `OPENROUTER_KEY` environment variable.
    pub fn from_env(config: OracleConfig) -> Result<Self, String> {
        let api_key =
            std::env::var("OPENROUTER_KEY").map_err(|_| "OPENROUTER_KEY not set".to_string())?;
        Ok(Self::new(OpenRouterClient::new(api_key)?, config))
    }

    pub fn config(&self) -> &OracleConfig {
        &self.config
    }

    /// Snapshot of token usage so far.
    pub fn usage(&self) -> CostTracker {
        self.usage
            .lock()
            .map(|tracker| tracker.clone())
            .unwrap_or_default()
    }

    pub fn usage_summary(&self) -> String {
        self.usage().summary()
    }

    fn chat_request(&self, request: &OracleRequest) -> ChatRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system.as_deref().filter(|s| !s.trim().is_empty()) {
            messages.push(Message::system(system));
        }
        messages.push(Message::user(request.prompt.as_str()));

        ChatRequest {
            model: Some(self.config.model.clone()),
            messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            response_format: request.json_output.then_some(ResponseFormat {
                fmt_type: ResponseFormatType::JsonObject,
            }),
            ..Default::default()
        }
    }
}

impl Oracle for OpenRouterOracle {
    fn complete(&self, request: OracleRequest) -> OracleFuture<'_> {
        Box::pin(async move {
            let body = self.chat_request(&request);
            let timeout = self.config.timeout;
            debug!(
                "Oracle request: model={}, system={} chars, prompt={} chars, json={}",
                self.config.model,
                request.system.as_deref().map_or(0, str::len),
                request.prompt.len(),
                request.json_output,
            );

            let body = &body;
            let client = &self.client;
            let completion = retry_with_backoff(&self.config.retry, move || async move {
                match tokio::time::timeout(timeout, client.chat(body)).await {
                    Ok(result) => result,
                    Err(_) => Err(format!("{TIMEOUT_MARKER} {timeout:?}")),
                }
            })
            .await
            .map_err(|e| {
                if e.starts_with(TIMEOUT_MARKER) {
                    OracleError::Timeout(timeout)
                } else {
                    OracleError::Unavailable(e)
                }
            })?;

            if let Some(usage) = &completion.usage
                && let Ok(mut tracker) = self.usage.lock()
            {
                tracker.record(
                    usage.prompt_tokens.unwrap_or(0),
                    usage.completion_tokens.unwrap_or(0),
                    &self.pricing,
                );
            }

            let text = completion.content.unwrap_or_default();
            if text.trim().is_empty() {
                debug!(
                    "Oracle returned no text (finish_reason={})",
                    completion.finish_reason.as_deref().unwrap_or("none")
                );
                return Err(OracleError::EmptyResponse);
            }
            trace!("Oracle output: {}", preview(&text, 200));
            Ok(text)
        })
    }
}

// ── FnOracle ───────────────────────────────────────────────────────

type ErasedOracleHandler = Box<
    dyn Fn(OracleRequest) -> Pin<Box<dyn Future<Output = Result<String, OracleError>> + Send>>
        + Send
        + Sync,
>;

/// [`Oracle`] backed by a closure.
///
/// ```ignore
/// let oracle = FnOracle::from_fn(|req| {
///     if req.json_output {
///         Ok(r#"{"resolution_score": 7}"#.to_string())
///     } else {
///         Ok("Sure, I can help.".to_string())
///     }
/// });
/// ```
pub struct FnOracle {
    handler: ErasedOracleHandler,
}

impl FnOracle {
    /// Wrap an async closure.
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(OracleRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, OracleError>> + Send + 'static,
    {
        Self {
            handler: Box::new(move |request| Box::pin(handler(request))),
        }
    }

    /// Wrap a synchronous closure.
    pub fn from_fn<F>(handler: F) -> Self
    where
        F: Fn(&OracleRequest) -> Result<String, OracleError> + Send + Sync + 'static,
    {
        Self::new(move |request| std::future::ready(handler(&request)))
    }

    /// An oracle that answers every request with the same text.
    pub fn constant(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::from_fn(move |_| Ok(text.clone()))
    }
}

impl Oracle for FnOracle {
    fn complete(&self, request: OracleRequest) -> OracleFuture<'_> {
        (self.handler)(request)
    }
}
