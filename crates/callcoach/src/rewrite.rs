//! Prompt rewriting and merging.

use crate::error::CoachError;
use crate::oracle::{Oracle, OracleRequest};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A base prompt, the edits applied to it, and the result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptRevision {
    pub base_prompt: String,
    pub edits: Vec<String>,
    pub improved_prompt: String,
}

fn rewrite_request(base_prompt: &str, edits: &[&str]) -> String {
    let edits = edits
        .iter()
        .map(|e| format!("- {e}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Rewrite the following base agent prompt:\n\n{base_prompt}\n\n\
         Incorporating these improvements:\n{edits}\n\n\
         Return a single coherent, concise, professional, empathetic, and legally \
         compliant prompt."
    )
}

fn combine_request(base_prompt: &str, improved_prompts: &[String]) -> String {
    let candidates = improved_prompts
        .iter()
        .enumerate()
        .map(|(i, p)| format!("### Candidate {}\n{}", i + 1, p.trim()))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "The base agent prompt below was improved separately against several customer \
         personas. Merge the candidate improvements into one final agent prompt.\n\n\
         Base prompt:\n{base_prompt}\n\n\
         {candidates}\n\n\
         Keep every improvement that does not contradict another; where candidates \
         conflict, choose the more compliant and empathetic option. Return only the \
         final prompt."
    )
}

/// Rewrite `base_prompt` to incorporate `edits`.
///
/// Blank edits are ignored. With no edits left the base prompt comes back
/// unchanged and the oracle is not called; otherwise the oracle's answer is
/// returned verbatim.
pub async fn rewrite_prompt_text(
    oracle: &dyn Oracle,
    base_prompt: &str,
    edits: &[String],
) -> Result<String, CoachError> {
    let edits: Vec<&str> = edits
        .iter()
        .map(|e| e.trim())
        .filter(|e| !e.is_empty())
        .collect();
    if edits.is_empty() {
        return Ok(base_prompt.to_string());
    }

    debug!("Rewriting prompt with {} edit(s)", edits.len());
    let request = OracleRequest::new(rewrite_request(base_prompt, &edits));
    Ok(oracle.complete(request).await?)
}

/// [`rewrite_prompt_text`] packaged as a [`PromptRevision`].
pub async fn revise(
    oracle: &dyn Oracle,
    base_prompt: &str,
    edits: Vec<String>,
) -> Result<PromptRevision, CoachError> {
    let improved_prompt = rewrite_prompt_text(oracle, base_prompt, &edits).await?;
    Ok(PromptRevision {
        base_prompt: base_prompt.to_string(),
        edits,
        improved_prompt,
    })
}

/// Merge per-persona improved prompts into one.
///
/// No prompts: `base_prompt` verbatim. One prompt: that prompt verbatim.
/// Otherwise a single oracle call reconciles them.
pub async fn combine_prompt_revisions(
    oracle: &dyn Oracle,
    base_prompt: &str,
    improved_prompts: &[String],
) -> Result<String, CoachError> {
    match improved_prompts {
        [] => Ok(base_prompt.to_string()),
        [only] => Ok(only.clone()),
        many => {
            debug!("Combining {} improved prompts", many.len());
            let request = OracleRequest::new(combine_request(base_prompt, many));
            Ok(oracle.complete(request).await?)
        }
    }
}
