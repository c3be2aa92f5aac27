//! Transcript grading.
//!
//! The evaluator model is asked for a single JSON object shaped like
//! [`EvaluationRecord`]. Models rarely follow that instruction exactly, so
//! [`parse_evaluation`] normalizes the usual deviations before validating
//! against the record's JSON Schema:
//!
//! - Markdown fences and prose around the object are dropped
//! - an object that echoes the schema (`{"properties": {...}}`) is unwrapped
//! - `"8"`, `8.0` and `"8/10"` become `8`
//! - a lone string edit becomes a one-element list; `null` becomes empty
//! - missing fields take their defaults
//!
//! Anything still off is a [`MalformedEvaluation`] carrying the raw text.

use crate::error::{CoachError, MalformedEvaluation};
use crate::oracle::{Oracle, OracleRequest};
use crate::simulation::Transcript;
use crate::{json_schema_for, strip_code_fences};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::LazyLock;
use tracing::debug;

/// Scores and advice for one simulated call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EvaluationRecord {
    /// How well the call moved toward settling the overdue balance (0-10).
    #[serde(default)]
    #[schemars(range(max = 10))]
    pub resolution_score: u32,
    /// Adherence to debt-collection rules and the script (0-10).
    #[serde(default)]
    #[schemars(range(max = 10))]
    pub compliance_score: u32,
    /// Tone and acknowledgement of the customer's situation (0-10).
    #[serde(default)]
    #[schemars(range(max = 10))]
    pub empathy_score: u32,
    /// Effectiveness at securing a payment commitment (0-10).
    #[serde(default)]
    #[schemars(range(max = 10))]
    pub persuasion_score: u32,
    /// Number of customer objections the agent addressed.
    #[serde(default)]
    pub objections_handled: u32,
    /// Concrete changes to make to the agent's system prompt.
    #[serde(default)]
    pub recommended_prompt_edits: Vec<String>,
    /// Free-form observations.
    #[serde(default)]
    pub notes: String,
}

const SCORE_FIELDS: [&str; 5] = [
    "resolution_score",
    "compliance_score",
    "empathy_score",
    "persuasion_score",
    "objections_handled",
];

static RECORD_SCHEMA: LazyLock<Value> = LazyLock::new(json_schema_for::<EvaluationRecord>);

/// The evaluator instruction for `transcript`.
pub fn evaluation_prompt(transcript: &Transcript) -> String {
    let schema = serde_json::to_string_pretty(&*RECORD_SCHEMA).unwrap_or_default();
    format!(
        "You are an evaluator. Analyze the following debt-collection call transcript \
         and return a structured evaluation.\n\n\
         Respond with a single JSON object only, without any additional text.\n\
         The object must conform to the JSON schema below. Return the field values \
         themselves; do not repeat the \"properties\", \"required\" or \"description\" \
         keys of the schema.\n\n\
         Transcript:\n{transcript}\n\n\
         JSON schema:\n{schema}\n"
    )
}

/// Grade `transcript` with the oracle in JSON output mode.
///
/// Oracle failures surface as [`CoachError::ModelUnavailable`], unusable
/// output as [`CoachError::MalformedEvaluation`]. The caller decides
/// whether the latter is fatal.
pub async fn evaluate_conversation(
    oracle: &dyn Oracle,
    transcript: &Transcript,
) -> Result<EvaluationRecord, CoachError> {
    let request = OracleRequest::new(evaluation_prompt(transcript)).with_json_output();
    let raw = oracle.complete(request).await?;
    debug!("Evaluator output: {} chars", raw.len());
    Ok(parse_evaluation(&raw)?)
}

/// Turn evaluator output into a record. Total: never panics.
pub fn parse_evaluation(raw: &str) -> Result<EvaluationRecord, MalformedEvaluation> {
    let candidate =
        outermost_object(raw).ok_or_else(|| MalformedEvaluation::new("no JSON object found", raw))?;

    let value: Value = serde_json::from_str(candidate)
        .map_err(|e| MalformedEvaluation::new(format!("invalid JSON: {e}"), raw))?;
    let Value::Object(mut fields) = value else {
        return Err(MalformedEvaluation::new("expected a JSON object", raw));
    };

    unwrap_schema_echo(&mut fields);
    normalize_fields(&mut fields);

    let value = Value::Object(fields);
    let validator = jsonschema::validator_for(&RECORD_SCHEMA)
        .map_err(|e| MalformedEvaluation::new(format!("evaluation schema unusable: {e}"), raw))?;
    let errors: Vec<String> = validator
        .iter_errors(&value)
        .map(|e| format!("{}: {e}", e.instance_path()))
        .collect();
    if !errors.is_empty() {
        return Err(MalformedEvaluation::new(
            format!("schema violations: {}", errors.join("; ")),
            raw,
        ));
    }

    serde_json::from_value(value).map_err(|e| MalformedEvaluation::new(e.to_string(), raw))
}

/// The slice from the first `{` to the last `}` after dropping code fences.
fn outermost_object(raw: &str) -> Option<&str> {
    let text = strip_code_fences(raw);
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    text.get(start..=end)
}

/// `{"properties": {...}}` with none of the record's own keys is a model
/// echoing the schema with values filled in.
fn unwrap_schema_echo(fields: &mut Map<String, Value>) {
    let has_own_keys = SCORE_FIELDS
        .iter()
        .chain(["recommended_prompt_edits", "notes"].iter())
        .any(|key| fields.contains_key(*key));
    if has_own_keys {
        return;
    }
    if let Some(Value::Object(inner)) = fields.remove("properties") {
        *fields = inner;
    }
}

fn normalize_fields(fields: &mut Map<String, Value>) {
    for key in SCORE_FIELDS {
        let coerced = match fields.get(key) {
            None | Some(Value::Null) => Some(Value::from(0u32)),
            Some(other) => coerce_integer(other),
        };
        if let Some(v) = coerced {
            fields.insert(key.to_string(), v);
        }
    }

    let edits = match fields.remove("recommended_prompt_edits") {
        None | Some(Value::Null) => Value::Array(Vec::new()),
        Some(Value::String(s)) if s.trim().is_empty() => Value::Array(Vec::new()),
        Some(Value::String(s)) => Value::Array(vec![Value::String(s)]),
        Some(other) => other,
    };
    fields.insert("recommended_prompt_edits".into(), edits);

    match fields.get("notes") {
        None | Some(Value::Null) => {
            fields.insert("notes".into(), Value::String(String::new()));
        }
        _ => {}
    }
}

/// Integer form of a score, or `None` to leave the value for validation
/// to reject.
fn coerce_integer(value: &Value) -> Option<Value> {
    let number = match value {
        Value::Number(n) if n.is_u64() || n.is_i64() => return None,
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let s = s.trim();
            let s = s.split_once('/').map_or(s, |(score, _)| score.trim());
            s.parse::<f64>().ok()?
        }
        _ => return None,
    };
    if !number.is_finite() || number < 0.0 || number > f64::from(u32::MAX) {
        return None;
    }
    Some(Value::from(number.round() as u32))
}
