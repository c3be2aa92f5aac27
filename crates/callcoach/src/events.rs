//! Progress events for training runs.
//!
//! The [`Trainer`](crate::train::Trainer) reports what it is doing through
//! [`TrainingEvent`] values. Persona pipelines run concurrently, so events
//! from different personas interleave; every per-persona event carries the
//! persona's input index.
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Default; tests and fire-and-forget runs |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`FnEventHandler`] | Quick closures, e.g. collecting events in tests |

use crate::error::{CoachError, MalformedEvaluation};
use crate::evaluation::EvaluationRecord;
use crate::preview;
use crate::simulation::Turn;
use tracing::{debug, info};

/// Events emitted during a training or improvement run.
#[derive(Debug)]
pub enum TrainingEvent<'a> {
    RunStarted {
        run_id: &'a str,
        personas: usize,
        max_turns: u32,
    },
    /// A persona pipeline acquired its concurrency slot.
    PersonaStarted { index: usize, name: &'a str },
    /// A turn was appended to a persona's transcript.
    TurnRecorded { index: usize, turn: &'a Turn },
    SimulationFinished {
        index: usize,
        turns: usize,
        /// The persona used a payment phrase before the turn limit.
        agreed_to_pay: bool,
    },
    Evaluated {
        index: usize,
        record: &'a EvaluationRecord,
    },
    /// The evaluator's output was unusable and an empty record was used.
    EvaluationDegraded {
        index: usize,
        error: &'a MalformedEvaluation,
    },
    PromptRewritten { index: usize, edits: usize },
    PersonaFailed {
        index: usize,
        error: &'a CoachError,
    },
    /// Per-persona prompts were merged into the final prompt.
    Aggregated { prompts: usize },
    RunFinished {
        run_id: &'a str,
        completed: usize,
        elapsed_secs: f64,
    },
}

/// Observer for [`TrainingEvent`]s.
///
/// Called from persona tasks, possibly from several threads at once; keep
/// handlers quick and non-blocking.
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &TrainingEvent<'_>) {
        let _ = event;
    }
}

/// Ignores every event.
pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// Wraps a `Fn(&TrainingEvent)` closure.
pub struct FnEventHandler<F>(F)
where
    F: Fn(&TrainingEvent<'_>) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&TrainingEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&TrainingEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &TrainingEvent<'_>) {
        (self.0)(event)
    }
}

/// Logs events with `tracing`: run and persona milestones at `info`,
/// turns and rewrites at `debug`. Failures and degraded evaluations are
/// already logged at `warn` by the trainer itself.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &TrainingEvent<'_>) {
        match event {
            TrainingEvent::RunStarted {
                run_id,
                personas,
                max_turns,
            } => {
                info!("Training run started: run_id={run_id}, personas={personas}, max_turns={max_turns}");
            }
            TrainingEvent::PersonaStarted { index, name } => {
                info!("[persona {index}] simulating conversation with {name:?}");
            }
            TrainingEvent::TurnRecorded { index, turn } => {
                debug!(
                    "[persona {index}] {}: {}",
                    turn.role.label(),
                    preview(&turn.text, 160)
                );
            }
            TrainingEvent::SimulationFinished {
                index,
                turns,
                agreed_to_pay,
            } => {
                if *agreed_to_pay {
                    info!("[persona {index}] persona agreed to pay after {turns} turns");
                } else {
                    info!("[persona {index}] conversation ended after {turns} turns");
                }
            }
            TrainingEvent::Evaluated { index, record } => {
                info!(
                    "[persona {index}] scores: resolution={}, compliance={}, empathy={}, persuasion={}, edits={}",
                    record.resolution_score,
                    record.compliance_score,
                    record.empathy_score,
                    record.persuasion_score,
                    record.recommended_prompt_edits.len(),
                );
            }
            TrainingEvent::EvaluationDegraded { index, error } => {
                debug!("[persona {index}] degraded evaluation: {}", error.reason);
            }
            TrainingEvent::PromptRewritten { index, edits } => {
                debug!("[persona {index}] prompt rewritten from {edits} edit(s)");
            }
            TrainingEvent::PersonaFailed { index, error } => {
                debug!("[persona {index}] failure kind: {}", error.kind());
            }
            TrainingEvent::Aggregated { prompts } => {
                info!("Merged {prompts} improved prompt(s) into the final prompt");
            }
            TrainingEvent::RunFinished {
                run_id,
                completed,
                elapsed_secs,
            } => {
                info!("Training run finished: run_id={run_id}, completed={completed}, elapsed={elapsed_secs:.1}s");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::Role;
    use std::sync::Mutex;

    #[test]
    fn fn_handler_receives_events() {
        let seen = Mutex::new(Vec::new());
        let handler = FnEventHandler::new(|event| {
            if let TrainingEvent::TurnRecorded { index, turn } = event {
                seen.lock().unwrap().push((*index, turn.role));
            }
        });

        let turn = Turn::new(Role::Agent, "Hello");
        handler.on_event(&TrainingEvent::TurnRecorded {
            index: 3,
            turn: &turn,
        });
        handler.on_event(&TrainingEvent::Aggregated { prompts: 2 });

        assert_eq!(*seen.lock().unwrap(), vec![(3, Role::Agent)]);
    }

    #[test]
    fn builtin_handlers_accept_every_event() {
        let record = EvaluationRecord::default();
        let malformed = MalformedEvaluation::new("not JSON", "meh");
        let error = CoachError::Cancelled;
        let turn = Turn::new(Role::Persona, "I can pay now");
        let events = [
            TrainingEvent::RunStarted {
                run_id: "run-x",
                personas: 1,
                max_turns: 2,
            },
            TrainingEvent::PersonaStarted { index: 0, name: "p" },
            TrainingEvent::TurnRecorded { index: 0, turn: &turn },
            TrainingEvent::SimulationFinished {
                index: 0,
                turns: 2,
                agreed_to_pay: true,
            },
            TrainingEvent::Evaluated {
                index: 0,
                record: &record,
            },
            TrainingEvent::EvaluationDegraded {
                index: 0,
                error: &malformed,
            },
            TrainingEvent::PromptRewritten { index: 0, edits: 0 },
            TrainingEvent::PersonaFailed {
                index: 0,
                error: &error,
            },
            TrainingEvent::Aggregated { prompts: 1 },
            TrainingEvent::RunFinished {
                run_id: "run-x",
                completed: 1,
                elapsed_secs: 0.2,
            },
        ];
        for event in &events {
            NoopHandler.on_event(event);
            LoggingHandler.on_event(event);
        }
    }
}
