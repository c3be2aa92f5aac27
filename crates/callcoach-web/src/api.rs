//! REST endpoint handlers and the JSON error body.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use callcoach::persona::Persona;
use callcoach::train::{ImproveResult, PersonaOutcome, Trainer, TrainingRun};
use callcoach::{CoachError, ErrorKind, TrainingFailure};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Shared application state passed to all handlers via axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub trainer: Arc<Trainer>,
}

// ── Request bodies ─────────────────────────────────────────────────

/// Body of `POST /testing/improve/prompt`.
#[derive(Debug, Deserialize)]
pub struct ImproveRequest {
    /// Blank or missing means the stock agent instructions.
    #[serde(default)]
    pub base_agent_prompt: String,
    pub persona: Persona,
    pub max_turns: Option<u32>,
}

/// Body of `POST /testing/train`.
#[derive(Debug, Deserialize)]
pub struct TrainRequest {
    #[serde(default)]
    pub base_agent_prompt: String,
    pub personas: Vec<Persona>,
    pub max_turns: Option<u32>,
}

/// Body of `POST /testing/train/auto`.
#[derive(Debug, Deserialize)]
pub struct TrainAutoRequest {
    #[serde(default)]
    pub base_agent_prompt: String,
    pub persona_names: Vec<String>,
    pub max_turns: Option<u32>,
}

// ── Errors ─────────────────────────────────────────────────────────

/// JSON error body:
///
/// ```json
/// {"error": "ModelUnavailable", "message": "...", "persona_index": 1, "partial": [...]}
/// ```
///
/// `raw` carries the evaluator output for `MalformedEvaluation`; `partial`
/// lists per-persona outcomes when a run failed part way.
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persona_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub partial: Vec<PersonaOutcome>,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.error {
            ErrorKind::EmptyPersonaSet | ErrorKind::InvalidConfiguration => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ErrorKind::ModelUnavailable => StatusCode::BAD_GATEWAY,
            ErrorKind::MalformedEvaluation | ErrorKind::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ErrorKind::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<CoachError> for ApiError {
    fn from(error: CoachError) -> Self {
        let raw = match &error {
            CoachError::MalformedEvaluation(m) => Some(m.raw.clone()),
            _ => None,
        };
        Self {
            error: error.kind(),
            message: error.to_string(),
            persona_index: None,
            raw,
            partial: Vec::new(),
        }
    }
}

impl From<TrainingFailure> for ApiError {
    fn from(failure: TrainingFailure) -> Self {
        let mut api = ApiError::from(failure.error);
        api.persona_index = failure.persona_index;
        api.partial = failure.partial;
        api
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!("Request failed with {status}: {}", self.message);
        }
        (status, Json(self)).into_response()
    }
}

// ── Handlers ───────────────────────────────────────────────────────

/// GET /: Liveness check.
pub async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({"message": "callcoach training service is running"}))
}

/// POST /testing/improve/prompt: Single-persona improvement.
pub async fn post_improve(
    State(app): State<AppState>,
    Json(body): Json<ImproveRequest>,
) -> Result<Json<ImproveResult>, ApiError> {
    info!("POST /testing/improve/prompt: persona={:?}", body.persona.name);
    let result = app
        .trainer
        .improve(&body.base_agent_prompt, &body.persona, body.max_turns)
        .await?;
    Ok(Json(result))
}

/// POST /testing/train: Multi-persona training with caller-supplied personas.
pub async fn post_train(
    State(app): State<AppState>,
    Json(body): Json<TrainRequest>,
) -> Result<Json<TrainingRun>, ApiError> {
    info!("POST /testing/train: personas={}", body.personas.len());
    let run = app
        .trainer
        .train_with_named_personas(&body.base_agent_prompt, body.personas, body.max_turns)
        .await?;
    Ok(Json(run))
}

/// POST /testing/train/auto: Multi-persona training with generated personas.
pub async fn post_train_auto(
    State(app): State<AppState>,
    Json(body): Json<TrainAutoRequest>,
) -> Result<Json<TrainingRun>, ApiError> {
    info!("POST /testing/train/auto: personas={}", body.persona_names.len());
    let run = app
        .trainer
        .train_with_generated_personas(&body.base_agent_prompt, body.persona_names, body.max_turns)
        .await?;
    Ok(Json(run))
}

#[cfg(test)]
mod tests {
    use super::*;
    use callcoach::{MalformedEvaluation, OracleError};

    #[test]
    fn improve_request_deserializes_without_optional_fields() {
        let json = r#"{"persona": {"name": "angry", "persona_prompt": "You are angry."}}"#;
        let req: ImproveRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.base_agent_prompt, "");
        assert_eq!(req.persona.name, "angry");
        assert_eq!(req.max_turns, None);
    }

    #[test]
    fn train_auto_request_deserializes() {
        let json = r#"{"base_agent_prompt": "Be kind.", "persona_names": ["a", "b"], "max_turns": 3}"#;
        let req: TrainAutoRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.persona_names, ["a", "b"]);
        assert_eq!(req.max_turns, Some(3));
    }

    #[test]
    fn status_follows_error_kind() {
        let cases = [
            (CoachError::EmptyPersonaSet, StatusCode::UNPROCESSABLE_ENTITY),
            (CoachError::invalid("x"), StatusCode::UNPROCESSABLE_ENTITY),
            (
                CoachError::from(OracleError::EmptyResponse),
                StatusCode::BAD_GATEWAY,
            ),
            (
                CoachError::from(MalformedEvaluation::new("bad", "raw")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (CoachError::Cancelled, StatusCode::SERVICE_UNAVAILABLE),
            (
                CoachError::Internal("boom".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(ApiError::from(error).status(), status);
        }
    }

    #[test]
    fn error_body_omits_empty_fields() {
        let body = serde_json::to_value(ApiError::from(CoachError::EmptyPersonaSet)).unwrap();
        assert_eq!(body["error"], "EmptyPersonaSet");
        assert!(body.get("persona_index").is_none());
        assert!(body.get("raw").is_none());
        assert!(body.get("partial").is_none());

        let failure = TrainingFailure::new(CoachError::from(MalformedEvaluation::new(
            "no JSON object",
            "meh",
        )))
        .at_persona(2);
        let body = serde_json::to_value(ApiError::from(failure)).unwrap();
        assert_eq!(body["persona_index"], 2);
        assert_eq!(body["raw"], "meh");
    }
}
