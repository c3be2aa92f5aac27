//! Synthetic customers and oracle-backed persona generation.

use crate::error::CoachError;
use crate::oracle::{Oracle, OracleRequest};
use crate::strip_code_fences;
use futures::{StreamExt, TryStreamExt, stream};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Persona descriptions generated at once.
const GENERATION_CONCURRENCY: usize = 4;

/// A simulated customer: a label and the instructions that make the model
/// play them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    pub name: String,
    pub persona_prompt: String,
}

impl Persona {
    pub fn new(name: impl Into<String>, persona_prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            persona_prompt: persona_prompt.into(),
        }
    }

    /// Both fields must contain something other than whitespace.
    pub fn validate(&self) -> Result<(), CoachError> {
        if self.name.trim().is_empty() {
            return Err(CoachError::invalid("persona name must not be empty"));
        }
        if self.persona_prompt.trim().is_empty() {
            return Err(CoachError::invalid(format!(
                "persona {:?} has an empty prompt",
                self.name
            )));
        }
        Ok(())
    }
}

fn generation_prompt(name: &str) -> String {
    format!(
        "Write role-play instructions for a language model that will play a customer \
         receiving a phone call from a bank agent about an overdue credit card payment.\n\n\
         Customer type: {name}\n\n\
         Address the model in the second person (\"You are ...\"). Describe the customer's \
         situation, mood and typical objections, and tell them to answer in one or two \
         short spoken sentences and to stay in character. Keep it under 120 words and \
         return only the instructions."
    )
}

/// Used when the oracle answers with nothing usable.
pub fn fallback_persona_prompt(name: &str) -> String {
    format!(
        "You are a customer receiving a call from your bank about an overdue credit card \
         payment. Play this kind of customer: {name}. Stay in character, answer in one or \
         two short sentences, and only commit to paying if the agent genuinely convinces you."
    )
}

/// Expand a persona name such as "angry customer" into a full persona.
pub async fn generate_persona(oracle: &dyn Oracle, name: &str) -> Result<Persona, CoachError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CoachError::invalid("persona name must not be empty"));
    }

    let raw = oracle
        .complete(OracleRequest::new(generation_prompt(name)))
        .await?;
    let prompt = strip_code_fences(&raw);
    let prompt = if prompt.is_empty() {
        warn!("Persona generator returned nothing for {name:?}; using template");
        fallback_persona_prompt(name)
    } else {
        prompt.to_string()
    };
    debug!("Generated persona {name:?}: {} chars", prompt.len());
    Ok(Persona::new(name, prompt))
}

/// Reject an empty list or any blank name before spending oracle calls.
pub fn validate_persona_names(names: &[String]) -> Result<(), CoachError> {
    if names.is_empty() {
        return Err(CoachError::EmptyPersonaSet);
    }
    if let Some(i) = names.iter().position(|n| n.trim().is_empty()) {
        return Err(CoachError::invalid(format!("persona name {i} is empty")));
    }
    Ok(())
}

/// Generate every persona, keeping input order. The error carries the index
/// of the first name that failed.
pub(crate) async fn generate_indexed(
    oracle: &dyn Oracle,
    names: &[String],
) -> Result<Vec<Persona>, (usize, CoachError)> {
    stream::iter(0..names.len())
        .map(|i| {
            let name = &names[i];
            async move { generate_persona(oracle, name).await.map_err(|e| (i, e)) }
        })
        .buffered(GENERATION_CONCURRENCY)
        .try_collect()
        .await
}

/// Generate one persona per name, in order.
pub async fn generate_personas(
    oracle: &dyn Oracle,
    names: &[String],
) -> Result<Vec<Persona>, CoachError> {
    validate_persona_names(names)?;
    generate_indexed(oracle, names).await.map_err(|(_, e)| e)
}
