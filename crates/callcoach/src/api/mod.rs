//! Support code between the oracle adapter and the OpenRouter API.
//!
//! - [`retry`]: classifies failed chat calls as transient (429, 5xx, network
//!   trouble) or permanent (400/401/403/404/422) and re-issues transient ones
//!   with capped exponential backoff.
//! - [`tracing`]: run ids, per-persona span ids, and a [`CostTracker`] that
//!   accumulates token usage across every oracle call of a process.

pub mod retry;
pub mod tracing;

pub use retry::{RetryConfig, retry_with_backoff};
pub use tracing::{CostTracker, generate_persona_span_id, generate_run_id, pricing_for_model};
