//! Agent-versus-persona call simulation.
//!
//! Two [`DialogueEngine`]s take turns: the agent opens by answering the
//! stock greeting, then the persona and the agent alternate until the
//! persona agrees to pay or the turn limit is reached.

use crate::dialogue::DialogueEngine;
use crate::error::CoachError;
use crate::events::{EventHandler, NoopHandler, TrainingEvent};
use crate::oracle::Oracle;
use crate::prompts::{
    CallContext, DEFAULT_AGENT_INSTRUCTIONS, DEFAULT_INITIAL_GREETING, render_with,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Persona turns per simulation when the caller does not say.
pub const DEFAULT_MAX_TURNS: u32 = 8;

/// Phrases that end a simulation when the persona says them.
pub const STOP_KEYWORDS: &[&str] = &[
    "i'll pay",
    "i will pay",
    "i agree",
    "schedule payment",
    "pay today",
    "make a payment",
    "pay now",
    "i can pay",
];

/// Whether `text` commits to paying. Case-insensitive; typographic
/// apostrophes count as plain ones.
pub fn is_payment_agreement(text: &str) -> bool {
    let normalized = text.to_lowercase().replace('\u{2019}', "'");
    STOP_KEYWORDS.iter().any(|kw| normalized.contains(kw))
}

// ── Transcript ─────────────────────────────────────────────────────

/// Which side of the call spoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Agent,
    Persona,
}

impl Role {
    /// Upper-case label used when rendering transcripts for the evaluator.
    pub fn label(self) -> &'static str {
        match self {
            Role::Agent => "AGENT",
            Role::Persona => "PERSONA",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }
}

/// Ordered turns of one simulated call, starting with the agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// True when turns alternate strictly, beginning with the agent.
    pub fn is_alternating(&self) -> bool {
        self.turns.iter().enumerate().all(|(i, turn)| {
            let expected = if i % 2 == 0 { Role::Agent } else { Role::Persona };
            turn.role == expected
        })
    }

    /// True when the call ended on a persona turn that agrees to pay.
    pub fn ended_with_agreement(&self) -> bool {
        self.last()
            .is_some_and(|t| t.role == Role::Persona && is_payment_agreement(&t.text))
    }

    /// `ROLE: text` lines, one per turn.
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Transcript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, turn) in self.turns.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}: {}", turn.role.label(), turn.text)?;
        }
        Ok(())
    }
}

impl From<Vec<Turn>> for Transcript {
    fn from(turns: Vec<Turn>) -> Self {
        Self { turns }
    }
}

// ── Simulator ──────────────────────────────────────────────────────

/// Runs simulated calls against one oracle.
pub struct Simulator<'a> {
    oracle: &'a dyn Oracle,
    context: Option<&'a CallContext>,
    events: &'a dyn EventHandler,
    persona_index: usize,
}

impl<'a> Simulator<'a> {
    pub fn new(oracle: &'a dyn Oracle) -> Self {
        Self {
            oracle,
            context: None,
            events: &NoopHandler,
            persona_index: 0,
        }
    }

    /// Fill the agent template placeholders from `context`.
    pub fn with_context(mut self, context: Option<&'a CallContext>) -> Self {
        self.context = context;
        self
    }

    /// Report turns to `events`, tagged with `persona_index`.
    pub fn with_events(mut self, events: &'a dyn EventHandler, persona_index: usize) -> Self {
        self.events = events;
        self.persona_index = persona_index;
        self
    }

    /// Simulate one call.
    ///
    /// A missing or blank `base_agent_prompt` uses
    /// [`DEFAULT_AGENT_INSTRUCTIONS`]. The transcript holds between 2 and
    /// `2 * max_turns + 1` turns.
    pub async fn run(
        &self,
        base_agent_prompt: Option<&str>,
        persona_prompt: &str,
        max_turns: u32,
    ) -> Result<Transcript, CoachError> {
        if max_turns == 0 {
            return Err(CoachError::invalid("max_turns must be at least 1"));
        }
        if persona_prompt.trim().is_empty() {
            return Err(CoachError::invalid("persona prompt must not be empty"));
        }

        let agent_template = base_agent_prompt
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(DEFAULT_AGENT_INSTRUCTIONS);
        let agent_instructions = render_with(self.context, agent_template);
        let greeting = render_with(self.context, DEFAULT_INITIAL_GREETING);

        let mut agent = DialogueEngine::new(self.oracle, agent_instructions);
        let mut persona = DialogueEngine::new(self.oracle, persona_prompt);
        let mut transcript = Transcript::new();

        let mut agent_msg = agent.respond(&greeting).await?;
        self.record(&mut transcript, Turn::new(Role::Agent, agent_msg.clone()));

        let mut agreed = false;
        for round in 1..=max_turns {
            let persona_msg = persona.respond(&agent_msg).await?;
            self.record(&mut transcript, Turn::new(Role::Persona, persona_msg.clone()));

            if is_payment_agreement(&persona_msg) {
                debug!(
                    "[persona {}] stop keyword in persona turn {round}",
                    self.persona_index
                );
                agreed = true;
                break;
            }

            agent_msg = agent.respond(&persona_msg).await?;
            self.record(&mut transcript, Turn::new(Role::Agent, agent_msg.clone()));
        }

        self.events.on_event(&TrainingEvent::SimulationFinished {
            index: self.persona_index,
            turns: transcript.len(),
            agreed_to_pay: agreed,
        });
        Ok(transcript)
    }

    fn record(&self, transcript: &mut Transcript, turn: Turn) {
        self.events.on_event(&TrainingEvent::TurnRecorded {
            index: self.persona_index,
            turn: &turn,
        });
        transcript.push(turn);
    }
}

/// Simulate one call with no template context and no event reporting.
pub async fn run_simulation(
    oracle: &dyn Oracle,
    base_agent_prompt: Option<&str>,
    persona_prompt: &str,
    max_turns: u32,
) -> Result<Transcript, CoachError> {
    Simulator::new(oracle)
        .run(base_agent_prompt, persona_prompt, max_turns)
        .await
}
