//! Convenience re-exports for common `callcoach` types.
//!
//! ```ignore
//! use callcoach::prelude::*;
//! ```
//!
//! Covers building a [`Trainer`] and reading its results. Parsing helpers
//! and prompt templates stay in their modules.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::error::{CoachError, ErrorKind, MalformedEvaluation, OracleError, TrainingFailure};
pub use crate::persona::Persona;
pub use crate::prompts::CallContext;

// ── Oracle ──────────────────────────────────────────────────────────
pub use crate::api::RetryConfig;
pub use crate::config::{FailurePolicy, OracleConfig, TrainerConfig};
pub use crate::oracle::{FnOracle, OpenRouterOracle, Oracle, OracleRequest};

// ── Training ────────────────────────────────────────────────────────
pub use crate::evaluation::EvaluationRecord;
pub use crate::events::{EventHandler, FnEventHandler, LoggingHandler, NoopHandler, TrainingEvent};
pub use crate::simulation::{Role, Transcript, Turn};
pub use crate::train::{ImproveResult, PersonaOutcome, PersonaResult, Trainer, TrainingRun};
