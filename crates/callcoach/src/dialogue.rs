//! A single chat participant with its own running memory.
//!
//! [`DialogueEngine`] is one side of a simulated call. It keeps the exchange
//! so far and replays it to the oracle on every turn in a plain
//! `Human:` / `Assistant:` transcript format:
//!
//! ```text
//! Human: Hello Dana! I'm Alex...
//! Assistant: Who is this?
//!
//! Human: I'm calling about your credit card account.
//! Assistant:
//! ```

use crate::error::CoachError;
use crate::oracle::{Oracle, OracleRequest};
use tracing::trace;

#[derive(Debug, Clone)]
struct Exchange {
    incoming: String,
    outgoing: String,
}

/// One conversational actor: fixed instructions plus private memory.
///
/// `respond` takes `&mut self`, so an engine is driven by one caller at a
/// time; two engines sharing one oracle are independent.
pub struct DialogueEngine<'a> {
    oracle: &'a dyn Oracle,
    instructions: String,
    memory: Vec<Exchange>,
}

impl<'a> DialogueEngine<'a> {
    pub fn new(oracle: &'a dyn Oracle, instructions: impl Into<String>) -> Self {
        Self {
            oracle,
            instructions: instructions.into(),
            memory: Vec::new(),
        }
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    /// Completed exchanges so far.
    pub fn len(&self) -> usize {
        self.memory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    /// Prior exchanges rendered as `Human:` / `Assistant:` lines.
    pub fn history(&self) -> String {
        self.memory
            .iter()
            .map(|ex| format!("Human: {}\nAssistant: {}", ex.incoming, ex.outgoing))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn prompt_for(&self, input: &str) -> String {
        format!("{}\n\nHuman: {input}\nAssistant:", self.history())
    }

    /// Answer `input` in character.
    ///
    /// The reply is recorded and returned exactly as the oracle delivered it,
    /// empty text included. The exchange is remembered only if the oracle
    /// answers; on failure the memory is exactly as before the call.
    pub async fn respond(&mut self, input: &str) -> Result<String, CoachError> {
        let request = OracleRequest::new(self.prompt_for(input)).with_system(&self.instructions);
        trace!("Dialogue turn {} prompt: {} chars", self.memory.len() + 1, request.prompt.len());

        let reply = self.oracle.complete(request).await?;
        self.memory.push(Exchange {
            incoming: input.to_string(),
            outgoing: reply.clone(),
        });
        Ok(reply)
    }
}
