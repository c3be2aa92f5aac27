//! Error types for oracle calls, evaluation parsing, and training runs.

use crate::train::PersonaOutcome;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single oracle call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OracleError {
    /// The backend refused or could not be reached.
    #[error("oracle unavailable: {0}")]
    Unavailable(String),
    /// No answer within the per-call deadline.
    #[error("oracle call timed out after {0:?}")]
    Timeout(Duration),
    /// The backend answered with no text.
    #[error("oracle returned an empty response")]
    EmptyResponse,
}

/// Evaluator output that could not be turned into an
/// [`EvaluationRecord`](crate::evaluation::EvaluationRecord).
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
#[error("malformed evaluation: {reason}")]
pub struct MalformedEvaluation {
    pub reason: String,
    /// The model output exactly as received.
    pub raw: String,
}

impl MalformedEvaluation {
    pub fn new(reason: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            raw: raw.into(),
        }
    }
}

/// Everything that can go wrong in the core.
#[derive(Debug, Error)]
pub enum CoachError {
    #[error("model unavailable: {0}")]
    ModelUnavailable(#[from] OracleError),
    #[error(transparent)]
    MalformedEvaluation(#[from] MalformedEvaluation),
    #[error("at least one persona is required")]
    EmptyPersonaSet,
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("training run cancelled")]
    Cancelled,
    /// A persona pipeline died without returning (panic).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Machine-readable error category, used in HTTP bodies and partial results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    ModelUnavailable,
    MalformedEvaluation,
    EmptyPersonaSet,
    InvalidConfiguration,
    Cancelled,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::ModelUnavailable => "ModelUnavailable",
            ErrorKind::MalformedEvaluation => "MalformedEvaluation",
            ErrorKind::EmptyPersonaSet => "EmptyPersonaSet",
            ErrorKind::InvalidConfiguration => "InvalidConfiguration",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Internal => "Internal",
        };
        f.write_str(s)
    }
}

impl CoachError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoachError::ModelUnavailable(_) => ErrorKind::ModelUnavailable,
            CoachError::MalformedEvaluation(_) => ErrorKind::MalformedEvaluation,
            CoachError::EmptyPersonaSet => ErrorKind::EmptyPersonaSet,
            CoachError::InvalidConfiguration(_) => ErrorKind::InvalidConfiguration,
            CoachError::Cancelled => ErrorKind::Cancelled,
            CoachError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Shorthand for [`CoachError::InvalidConfiguration`].
    pub fn invalid(message: impl Into<String>) -> Self {
        CoachError::InvalidConfiguration(message.into())
    }
}

/// A training run that did not produce a [`TrainingRun`](crate::train::TrainingRun).
///
/// `partial` holds one outcome per persona in input order when the failure
/// happened after the personas were known; it is empty for failures during
/// input validation or persona generation.
#[derive(Debug)]
pub struct TrainingFailure {
    pub error: CoachError,
    /// Persona whose pipeline caused the failure. `None` for run-level
    /// failures (validation, aggregation, cancellation).
    pub persona_index: Option<usize>,
    pub partial: Vec<PersonaOutcome>,
}

impl TrainingFailure {
    pub fn new(error: CoachError) -> Self {
        Self {
            error,
            persona_index: None,
            partial: Vec::new(),
        }
    }

    pub fn at_persona(mut self, index: usize) -> Self {
        self.persona_index = Some(index);
        self
    }

    pub fn with_partial(mut self, partial: Vec<PersonaOutcome>) -> Self {
        self.partial = partial;
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

impl From<CoachError> for TrainingFailure {
    fn from(error: CoachError) -> Self {
        Self::new(error)
    }
}

impl fmt::Display for TrainingFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.persona_index {
            Some(i) => write!(f, "persona {i}: {}", self.error),
            None => write!(f, "{}", self.error),
        }
    }
}

impl std::error::Error for TrainingFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
