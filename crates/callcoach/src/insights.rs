//! Payment-risk classification of finished call transcripts.

use crate::error::{CoachError, MalformedEvaluation};
use crate::oracle::{Oracle, OracleRequest};
use crate::strip_code_fences;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

const MISSING_JUSTIFICATION: &str = "Model did not provide a justification.";

/// Likelihood that the customer misses the payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskCategory {
    High,
    Medium,
    Low,
}

impl fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RiskCategory::High => "HIGH",
            RiskCategory::Medium => "MEDIUM",
            RiskCategory::Low => "LOW",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub category: RiskCategory,
    pub justification: String,
}

fn risk_prompt(transcript_text: &str) -> String {
    format!(
        "Analyze the following customer call transcript to assess the risk that the customer \
         will not repay their credit card dues on time. Base the assessment only on the \
         transcript.\n\n\
         Respond with a JSON object with exactly two keys:\n\
         1. \"category\": one of \"HIGH\", \"MEDIUM\" or \"LOW\".\n\
         2. \"justification\": one sentence explaining the classification, quoting key \
         phrases from the transcript where possible.\n\n\
         Example:\n\
         {{\"category\": \"HIGH\", \"justification\": \"The customer mentioned a recent job \
         loss and doubts about the next payment.\"}}\n\n\
         Transcript:\n---\n{transcript_text}\n---\n"
    )
}

/// Classify `transcript_text` as HIGH, MEDIUM or LOW payment risk.
pub async fn assess_risk(
    oracle: &dyn Oracle,
    transcript_text: &str,
) -> Result<RiskAssessment, CoachError> {
    let raw = oracle
        .complete(OracleRequest::new(risk_prompt(transcript_text)).with_json_output())
        .await?;
    debug!("Risk classifier output: {} chars", raw.len());
    Ok(parse_risk_assessment(&raw)?)
}

/// Parse classifier output. The category is matched after trimming and
/// upper-casing; a missing justification gets a stock sentence.
pub fn parse_risk_assessment(raw: &str) -> Result<RiskAssessment, MalformedEvaluation> {
    #[derive(Deserialize)]
    struct Loose {
        category: Option<String>,
        justification: Option<String>,
    }

    let loose: Loose = serde_json::from_str(strip_code_fences(raw))
        .map_err(|e| MalformedEvaluation::new(format!("invalid JSON: {e}"), raw))?;

    let category = loose.category.unwrap_or_default().trim().to_uppercase();
    let category = match category.as_str() {
        "HIGH" => RiskCategory::High,
        "MEDIUM" => RiskCategory::Medium,
        "LOW" => RiskCategory::Low,
        other => {
            return Err(MalformedEvaluation::new(
                format!("unexpected risk category {other:?}"),
                raw,
            ));
        }
    };

    let justification = loose
        .justification
        .map(|j| j.trim().to_string())
        .filter(|j| !j.is_empty())
        .unwrap_or_else(|| MISSING_JUSTIFICATION.to_string());

    Ok(RiskAssessment {
        category,
        justification,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::oracle::FnOracle;

    #[test]
    fn parses_and_normalizes_category() {
        let a = parse_risk_assessment(r#"{"category": " medium ", "justification": "Unsure."}"#)
            .unwrap();
        assert_eq!(a.category, RiskCategory::Medium);
        assert_eq!(a.justification, "Unsure.");
    }

    #[test]
    fn missing_justification_gets_default() {
        let a = parse_risk_assessment(r#"{"category": "LOW"}"#).unwrap();
        assert_eq!(a.justification, MISSING_JUSTIFICATION);
    }

    #[test]
    fn unknown_category_is_malformed() {
        let err = parse_risk_assessment(r#"{"category": "SEVERE"}"#).unwrap_err();
        assert!(err.reason.contains("SEVERE"));
        let err = parse_risk_assessment(r#"{"justification": "x"}"#).unwrap_err();
        assert!(err.reason.contains("unexpected risk category"));
    }

    #[test]
    fn non_json_is_malformed() {
        let err = parse_risk_assessment("HIGH risk").unwrap_err();
        assert_eq!(err.raw, "HIGH risk");
    }

    #[test]
    fn category_serializes_uppercase() {
        let a = RiskAssessment {
            category: RiskCategory::High,
            justification: "j".into(),
        };
        assert_eq!(serde_json::to_value(&a).unwrap()["category"], "HIGH");
        assert_eq!(RiskCategory::Low.to_string(), "LOW");
    }

    #[tokio::test]
    async fn assess_uses_json_mode_and_transcript() {
        let oracle = FnOracle::from_fn(|req| {
            assert!(req.json_output);
            assert!(req.prompt.contains("I lost my job"));
            Ok("```json\n{\"category\": \"HIGH\", \"justification\": \"Job loss.\"}\n```".into())
        });
        let a = assess_risk(&oracle, "PERSONA: I lost my job").await.unwrap();
        assert_eq!(a.category, RiskCategory::High);

        let bad = FnOracle::constant("{\"category\": \"maybe\"}");
        let err = assess_risk(&bad, "x").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedEvaluation);
    }
}
