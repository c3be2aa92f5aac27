//! Training runs: simulate, grade, rewrite, merge.
//!
//! A [`Trainer`] owns an `Arc<dyn Oracle>` and a [`TrainerConfig`]. Each
//! persona gets its own pipeline:
//!
//! ```text
//! Simulator ──► evaluate_conversation ──► rewrite_prompt_text
//! ```
//!
//! Pipelines run concurrently on a [`JoinSet`], at most
//! [`TrainerConfig::concurrency`] at a time, and their results are put back
//! in input order before the per-persona prompts are merged with
//! [`combine_prompt_revisions`].
//!
//! Evaluation failures are handled differently by the two entry points:
//! [`Trainer::improve`] reports unusable evaluator output as an error, while
//! multi-persona training continues with an empty [`EvaluationRecord`] and
//! lists the persona in [`TrainingRun::degraded_evaluations`].
//!
//! ```ignore
//! let trainer = Trainer::new(oracle, TrainerConfig::default().with_concurrency(2));
//! let run = trainer
//!     .train_with_generated_personas("Collect payment politely.", names, Some(4))
//!     .await?;
//! for (name, metrics) in run.personas.iter().zip(&run.metrics) {
//!     println!("{name}: empathy {}", metrics.empathy_score);
//! }
//! ```

use crate::api::tracing::{generate_persona_span_id, generate_run_id};
use crate::config::{FailurePolicy, TrainerConfig};
use crate::error::{CoachError, ErrorKind, TrainingFailure};
use crate::evaluation::{EvaluationRecord, evaluate_conversation};
use crate::events::{EventHandler, NoopHandler, TrainingEvent};
use crate::oracle::Oracle;
use crate::persona::{Persona, generate_indexed, validate_persona_names};
use crate::prompts::{CallContext, DEFAULT_AGENT_INSTRUCTIONS};
use crate::rewrite::{PromptRevision, combine_prompt_revisions, revise};
use crate::simulation::{Simulator, Transcript};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::{Pin, pin};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{Instrument, info, info_span, warn};

// ── Results ────────────────────────────────────────────────────────

/// Everything one persona pipeline produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaResult {
    pub persona: Persona,
    pub transcript: Transcript,
    pub metrics: EvaluationRecord,
    /// `metrics` is an empty stand-in for unusable evaluator output.
    pub evaluation_degraded: bool,
    pub revision: PromptRevision,
}

/// Where a persona's pipeline ended up when a run did not complete.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PersonaOutcome {
    Completed(Box<PersonaResult>),
    Failed {
        persona: String,
        error: ErrorKind,
        message: String,
    },
    /// Stopped or never started because the run was aborted.
    Cancelled { persona: String },
}

impl PersonaOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, PersonaOutcome::Completed(_))
    }
}

/// Result of [`Trainer::improve`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImproveResult {
    pub run_id: String,
    pub transcript: Transcript,
    pub metrics: EvaluationRecord,
    pub improved_prompt: String,
}

/// Result of a multi-persona training run. All vectors are index-aligned
/// with the input personas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingRun {
    pub run_id: String,
    pub personas: Vec<String>,
    pub transcripts: Vec<Transcript>,
    pub metrics: Vec<EvaluationRecord>,
    pub improved_prompts: Vec<String>,
    pub final_improved_prompt: String,
    /// Indices whose evaluation fell back to an empty record.
    pub degraded_evaluations: Vec<usize>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

// ── Pipeline ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EvaluationPolicy {
    /// Unusable evaluator output fails the pipeline.
    Strict,
    /// Unusable evaluator output becomes an empty record.
    Degrade,
}

/// Owned inputs shared by every persona pipeline of one run.
#[derive(Clone)]
struct Pipeline {
    oracle: Arc<dyn Oracle>,
    events: Arc<dyn EventHandler>,
    base_prompt: Arc<str>,
    max_turns: u32,
    context: Option<CallContext>,
}

impl Pipeline {
    async fn run(
        self,
        index: usize,
        persona: Persona,
        policy: EvaluationPolicy,
    ) -> Result<PersonaResult, CoachError> {
        let oracle = &*self.oracle;
        let events = &*self.events;
        events.on_event(&TrainingEvent::PersonaStarted {
            index,
            name: &persona.name,
        });

        let transcript = Simulator::new(oracle)
            .with_context(self.context.as_ref())
            .with_events(events, index)
            .run(
                Some(&*self.base_prompt),
                &persona.persona_prompt,
                self.max_turns,
            )
            .await?;

        let (metrics, evaluation_degraded) = match evaluate_conversation(oracle, &transcript).await {
            Ok(record) => (record, false),
            Err(CoachError::MalformedEvaluation(malformed)) if policy == EvaluationPolicy::Degrade => {
                warn!(
                    "[persona {index}] evaluation unusable ({}); continuing with empty record. Raw: {}",
                    malformed.reason, malformed.raw
                );
                events.on_event(&TrainingEvent::EvaluationDegraded {
                    index,
                    error: &malformed,
                });
                (EvaluationRecord::default(), true)
            }
            Err(e) => return Err(e),
        };
        if !evaluation_degraded {
            events.on_event(&TrainingEvent::Evaluated {
                index,
                record: &metrics,
            });
        }

        let revision = revise(
            oracle,
            &self.base_prompt,
            metrics.recommended_prompt_edits.clone(),
        )
        .await?;
        events.on_event(&TrainingEvent::PromptRewritten {
            index,
            edits: revision.edits.len(),
        });

        Ok(PersonaResult {
            persona,
            transcript,
            metrics,
            evaluation_degraded,
            revision,
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

// ── Trainer ────────────────────────────────────────────────────────

/// Runs single- and multi-persona prompt training against one oracle.
///
/// Cheap to share behind an `Arc`; each call is an independent run.
pub struct Trainer {
    oracle: Arc<dyn Oracle>,
    config: TrainerConfig,
    events: Arc<dyn EventHandler>,
}

impl Trainer {
    pub fn new(oracle: Arc<dyn Oracle>, config: TrainerConfig) -> Self {
        Self {
            oracle,
            config,
            events: Arc::new(NoopHandler),
        }
    }

    pub fn with_event_handler(mut self, events: Arc<dyn EventHandler>) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn oracle(&self) -> &Arc<dyn Oracle> {
        &self.oracle
    }

    fn resolve_max_turns(&self, max_turns: Option<u32>) -> Result<u32, CoachError> {
        match max_turns.unwrap_or(self.config.max_turns) {
            0 => Err(CoachError::invalid("max_turns must be at least 1")),
            n => Ok(n),
        }
    }

    /// A blank base prompt means the stock instructions, for simulation and
    /// rewriting alike.
    fn pipeline(&self, base_prompt: &str, max_turns: u32) -> Pipeline {
        let base_prompt = if base_prompt.trim().is_empty() {
            DEFAULT_AGENT_INSTRUCTIONS
        } else {
            base_prompt
        };
        Pipeline {
            oracle: Arc::clone(&self.oracle),
            events: Arc::clone(&self.events),
            base_prompt: Arc::from(base_prompt),
            max_turns,
            context: self.config.call_context.clone(),
        }
    }

    /// Simulate, grade and rewrite against a single persona.
    ///
    /// Unusable evaluator output is an error here
    /// ([`CoachError::MalformedEvaluation`] with the raw text).
    pub async fn improve(
        &self,
        base_prompt: &str,
        persona: &Persona,
        max_turns: Option<u32>,
    ) -> Result<ImproveResult, CoachError> {
        persona.validate()?;
        let max_turns = self.resolve_max_turns(max_turns)?;
        let run_id = generate_run_id();
        let started = Instant::now();

        info!(
            "Improve run started: run_id={run_id}, persona={:?}, max_turns={max_turns}",
            persona.name
        );
        self.events.on_event(&TrainingEvent::RunStarted {
            run_id: &run_id,
            personas: 1,
            max_turns,
        });

        let span = info_span!("persona", run_id = %run_id, index = 0, name = %persona.name);
        let result = self
            .pipeline(base_prompt, max_turns)
            .run(0, persona.clone(), EvaluationPolicy::Strict)
            .instrument(span)
            .await;
        let result = match result {
            Ok(r) => r,
            Err(error) => {
                warn!("[persona 0] pipeline failed: {error}");
                self.events
                    .on_event(&TrainingEvent::PersonaFailed { index: 0, error: &error });
                self.events.on_event(&TrainingEvent::RunFinished {
                    run_id: &run_id,
                    completed: 0,
                    elapsed_secs: started.elapsed().as_secs_f64(),
                });
                return Err(error);
            }
        };

        self.events.on_event(&TrainingEvent::RunFinished {
            run_id: &run_id,
            completed: 1,
            elapsed_secs: started.elapsed().as_secs_f64(),
        });
        Ok(ImproveResult {
            run_id,
            transcript: result.transcript,
            metrics: result.metrics,
            improved_prompt: result.revision.improved_prompt,
        })
    }

    /// Train against caller-supplied personas.
    pub async fn train_with_named_personas(
        &self,
        base_prompt: &str,
        personas: Vec<Persona>,
        max_turns: Option<u32>,
    ) -> Result<TrainingRun, TrainingFailure> {
        self.train_with_named_personas_until(base_prompt, personas, max_turns, std::future::pending())
            .await
    }

    /// [`train_with_named_personas`](Self::train_with_named_personas) that
    /// stops when `cancel` completes.
    pub async fn train_with_named_personas_until<C>(
        &self,
        base_prompt: &str,
        personas: Vec<Persona>,
        max_turns: Option<u32>,
        cancel: C,
    ) -> Result<TrainingRun, TrainingFailure>
    where
        C: Future<Output = ()> + Send,
    {
        if personas.is_empty() {
            return Err(CoachError::EmptyPersonaSet.into());
        }
        for (index, persona) in personas.iter().enumerate() {
            persona
                .validate()
                .map_err(|e| TrainingFailure::new(e).at_persona(index))?;
        }
        let max_turns = self.resolve_max_turns(max_turns)?;

        let cancel = pin!(cancel);
        self.run_training(generate_run_id(), Utc::now(), base_prompt, personas, max_turns, cancel)
            .await
    }

    /// Train against personas generated from short names such as
    /// `"angry customer"`.
    pub async fn train_with_generated_personas(
        &self,
        base_prompt: &str,
        persona_names: Vec<String>,
        max_turns: Option<u32>,
    ) -> Result<TrainingRun, TrainingFailure> {
        self.train_with_generated_personas_until(
            base_prompt,
            persona_names,
            max_turns,
            std::future::pending(),
        )
        .await
    }

    /// [`train_with_generated_personas`](Self::train_with_generated_personas)
    /// that stops when `cancel` completes.
    pub async fn train_with_generated_personas_until<C>(
        &self,
        base_prompt: &str,
        persona_names: Vec<String>,
        max_turns: Option<u32>,
        cancel: C,
    ) -> Result<TrainingRun, TrainingFailure>
    where
        C: Future<Output = ()> + Send,
    {
        validate_persona_names(&persona_names)?;
        let max_turns = self.resolve_max_turns(max_turns)?;
        let started_at = Utc::now();
        let run_id = generate_run_id();
        let mut cancel = pin!(cancel);

        info!(
            "Generating {} persona(s) for run_id={run_id}",
            persona_names.len()
        );
        let personas = tokio::select! {
            generated = generate_indexed(&*self.oracle, &persona_names) => {
                generated.map_err(|(index, error)| {
                    warn!("Persona generation failed for {:?}: {error}", persona_names[index]);
                    TrainingFailure::new(error).at_persona(index)
                })?
            }
            () = cancel.as_mut() => {
                info!("Training run cancelled during persona generation: run_id={run_id}");
                return Err(CoachError::Cancelled.into());
            }
        };

        self.run_training(run_id, started_at, base_prompt, personas, max_turns, cancel)
            .await
    }

    async fn run_training<C>(
        &self,
        run_id: String,
        started_at: DateTime<Utc>,
        base_prompt: &str,
        personas: Vec<Persona>,
        max_turns: u32,
        cancel: Pin<&mut C>,
    ) -> Result<TrainingRun, TrainingFailure>
    where
        C: Future<Output = ()> + Send,
    {
        let started = Instant::now();
        let pipeline = self.pipeline(base_prompt, max_turns);
        info!(
            "Training run started: run_id={run_id}, personas={}, max_turns={max_turns}, concurrency={}",
            personas.len(),
            self.config.concurrency
        );
        self.events.on_event(&TrainingEvent::RunStarted {
            run_id: &run_id,
            personas: personas.len(),
            max_turns,
        });

        let outcome = self
            .run_and_merge(&run_id, started_at, &pipeline, personas, cancel)
            .await;

        let elapsed_secs = started.elapsed().as_secs_f64();
        let completed = match &outcome {
            Ok(run) => {
                info!(
                    "Training run finished: run_id={run_id}, personas={}, degraded={}, elapsed={elapsed_secs:.1}s",
                    run.personas.len(),
                    run.degraded_evaluations.len()
                );
                run.personas.len()
            }
            Err(failure) => failure.partial.iter().filter(|o| o.is_completed()).count(),
        };
        self.events.on_event(&TrainingEvent::RunFinished {
            run_id: &run_id,
            completed,
            elapsed_secs,
        });
        outcome
    }

    /// Pipelines then aggregation; the caller reports the run's start and end.
    async fn run_and_merge<C>(
        &self,
        run_id: &str,
        started_at: DateTime<Utc>,
        pipeline: &Pipeline,
        personas: Vec<Persona>,
        mut cancel: Pin<&mut C>,
    ) -> Result<TrainingRun, TrainingFailure>
    where
        C: Future<Output = ()> + Send,
    {
        let results = self
            .run_pipelines(run_id, pipeline, personas, cancel.as_mut())
            .await?;

        let improved_prompts: Vec<String> = results
            .iter()
            .map(|r| r.revision.improved_prompt.clone())
            .collect();
        let completed = || -> Vec<PersonaOutcome> {
            results
                .iter()
                .map(|r| PersonaOutcome::Completed(Box::new(r.clone())))
                .collect()
        };

        let final_improved_prompt = tokio::select! {
            merged = combine_prompt_revisions(&*self.oracle, &pipeline.base_prompt, &improved_prompts) => {
                merged.map_err(|error| {
                    warn!("Merging improved prompts failed: run_id={run_id}: {error}");
                    TrainingFailure::new(error).with_partial(completed())
                })?
            }
            () = cancel.as_mut() => {
                info!("Training run cancelled during aggregation: run_id={run_id}");
                return Err(TrainingFailure::new(CoachError::Cancelled).with_partial(completed()));
            }
        };
        self.events.on_event(&TrainingEvent::Aggregated {
            prompts: improved_prompts.len(),
        });

        let mut run = TrainingRun {
            run_id: run_id.to_string(),
            personas: Vec::with_capacity(results.len()),
            transcripts: Vec::with_capacity(results.len()),
            metrics: Vec::with_capacity(results.len()),
            improved_prompts,
            final_improved_prompt,
            degraded_evaluations: Vec::new(),
            started_at,
            finished_at: Utc::now(),
        };
        for (index, result) in results.into_iter().enumerate() {
            if result.evaluation_degraded {
                run.degraded_evaluations.push(index);
            }
            run.personas.push(result.persona.name);
            run.transcripts.push(result.transcript);
            run.metrics.push(result.metrics);
        }
        Ok(run)
    }

    /// Run every persona pipeline and return results in input order.
    async fn run_pipelines<C>(
        &self,
        run_id: &str,
        pipeline: &Pipeline,
        personas: Vec<Persona>,
        mut cancel: Pin<&mut C>,
    ) -> Result<Vec<PersonaResult>, TrainingFailure>
    where
        C: Future<Output = ()> + Send,
    {
        let total = personas.len();
        let names: Vec<String> = personas.iter().map(|p| p.name.clone()).collect();
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut js: JoinSet<(usize, Result<PersonaResult, CoachError>)> = JoinSet::new();

        for (index, persona) in personas.into_iter().enumerate() {
            let pipeline = pipeline.clone();
            let semaphore = Arc::clone(&semaphore);
            let span = info_span!(
                "persona",
                span_id = %generate_persona_span_id(run_id, index),
                name = %persona.name,
            );
            js.spawn(
                async move {
                    // The permit is acquired inside the task so all pipelines
                    // are spawned up front and queue for a slot.
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return (index, Err(CoachError::Internal("concurrency limiter closed".into())));
                    };
                    let outcome = AssertUnwindSafe(pipeline.run(index, persona, EvaluationPolicy::Degrade))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|payload| {
                            Err(CoachError::Internal(format!(
                                "persona pipeline panicked: {}",
                                panic_message(payload.as_ref())
                            )))
                        });
                    (index, outcome)
                }
                .instrument(span),
            );
        }

        let abort_on_failure = self.config.failure_policy == FailurePolicy::AbortRun;
        let mut slots: Vec<Option<PersonaOutcome>> = (0..total).map(|_| None).collect();
        let mut results: Vec<Option<PersonaResult>> = (0..total).map(|_| None).collect();
        let mut first_failure: Option<(usize, CoachError)> = None;
        let mut cancelled = false;

        loop {
            let draining = cancelled || (abort_on_failure && first_failure.is_some());
            let joined = if draining {
                js.join_next().await
            } else {
                tokio::select! {
                    joined = js.join_next() => joined,
                    () = cancel.as_mut() => {
                        info!("Training run cancelled: run_id={run_id}, aborting {} pipeline(s)", js.len());
                        cancelled = true;
                        js.abort_all();
                        continue;
                    }
                }
            };
            let Some(joined) = joined else { break };

            match joined {
                Ok((index, Ok(result))) => {
                    info!(
                        "Persona {index} ({:?}) done ({}/{total})",
                        result.persona.name,
                        results.iter().filter(|r| r.is_some()).count() + 1
                    );
                    slots[index] = Some(PersonaOutcome::Completed(Box::new(result.clone())));
                    results[index] = Some(result);
                }
                Ok((index, Err(error))) => {
                    warn!("[persona {index}] pipeline failed: {error}");
                    self.events
                        .on_event(&TrainingEvent::PersonaFailed { index, error: &error });
                    slots[index] = Some(PersonaOutcome::Failed {
                        persona: names[index].clone(),
                        error: error.kind(),
                        message: error.to_string(),
                    });
                    if first_failure.is_none() {
                        if abort_on_failure && !js.is_empty() {
                            info!("Aborting {} sibling pipeline(s) after failure of persona {index}", js.len());
                            js.abort_all();
                        }
                        first_failure = Some((index, error));
                    }
                }
                // Aborted tasks leave their slot empty and are reported as cancelled.
                Err(e) if e.is_cancelled() => {}
                Err(e) => warn!("Persona task could not be joined: {e}"),
            }
        }

        let partial = || -> Vec<PersonaOutcome> {
            slots
                .iter()
                .zip(&names)
                .map(|(slot, name)| {
                    slot.clone().unwrap_or_else(|| PersonaOutcome::Cancelled {
                        persona: name.clone(),
                    })
                })
                .collect()
        };

        if let Some((index, error)) = first_failure {
            return Err(TrainingFailure::new(error)
                .at_persona(index)
                .with_partial(partial()));
        }
        if cancelled {
            return Err(TrainingFailure::new(CoachError::Cancelled).with_partial(partial()));
        }

        let mut ordered = Vec::with_capacity(total);
        for (index, result) in results.into_iter().enumerate() {
            match result {
                Some(r) => ordered.push(r),
                None => {
                    return Err(TrainingFailure::new(CoachError::Internal(format!(
                        "persona {index} produced no result"
                    )))
                    .at_persona(index)
                    .with_partial(partial()));
                }
            }
        }
        Ok(ordered)
    }
}
