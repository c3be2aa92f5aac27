//! End-to-end training runs against a scripted oracle.
//!
//! The oracle recognises each kind of request the way a real model would see
//! it: persona turns by their system prompt, evaluations by JSON mode,
//! rewrites and merges by their opening text. Persona behaviour is chosen by
//! name:
//!
//! | Name | Behaviour |
//! |------|-----------|
//! | `agreeable` | agrees to pay on the first turn |
//! | `failing` | the model is unavailable for its turns |
//! | `garbled` | its call gets an unparseable evaluation |
//! | `slow` | hangs for 30s per turn |
//! | `lagging` | answers after 50ms |
//! | anything else | insists it already paid |

use callcoach::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const BASE: &str = "Collect payment politely.";

fn persona_prompt(name: &str) -> String {
    format!("You are {name}. Stay in character.")
}

fn persona_name(system: &str) -> Option<&str> {
    system
        .strip_prefix("You are ")?
        .strip_suffix(". Stay in character.")
}

fn persona(name: &str) -> Persona {
    Persona::new(name, persona_prompt(name))
}

async fn persona_reply(name: &str) -> Result<String, OracleError> {
    match name {
        "agreeable" => Ok("[agreeable] Fine, I'll pay today.".into()),
        "failing" => Err(OracleError::Unavailable("OpenRouter API HTTP 503".into())),
        "slow" => {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("[slow] Sorry, what?".into())
        }
        "lagging" => {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok("[lagging] I need to think about it.".into())
        }
        other => Ok(format!("[{other}] I already paid last week.")),
    }
}

fn evaluation_for(prompt: &str) -> String {
    if prompt.contains("[garbled]") {
        return "The call went fine, no scores.".into();
    }
    let name = prompt
        .split("PERSONA: [")
        .nth(1)
        .and_then(|rest| rest.split(']').next())
        .unwrap_or("nobody");
    serde_json::json!({
        "resolution_score": 6,
        "compliance_score": 9,
        "empathy_score": "7/10",
        "persuasion_score": 5.6,
        "objections_handled": 1,
        "recommended_prompt_edits": [format!("Acknowledge {name}")],
        "notes": "ok"
    })
    .to_string()
}

async fn answer(req: OracleRequest) -> Result<String, OracleError> {
    if let Some(name) = req.system.as_deref().and_then(persona_name) {
        return persona_reply(name).await;
    }
    if req.json_output {
        return Ok(evaluation_for(&req.prompt));
    }
    if req.prompt.starts_with("Rewrite the following") {
        let name = req
            .prompt
            .split("Acknowledge ")
            .nth(1)
            .and_then(|rest| rest.split_whitespace().next())
            .unwrap_or("nobody");
        return Ok(format!("Improved for {name}"));
    }
    if req.prompt.contains("### Candidate") {
        let candidates = req.prompt.matches("### Candidate").count();
        return Ok(format!("Merged {candidates} candidates"));
    }
    if let Some(name) = req
        .prompt
        .lines()
        .find_map(|l| l.strip_prefix("Customer type: "))
    {
        if name == "unreachable" {
            return Err(OracleError::Timeout(Duration::from_secs(60)));
        }
        return Ok(persona_prompt(name));
    }
    Ok("Hello, this is Alex from Foresight Bank.".into())
}

fn trainer(config: TrainerConfig) -> Trainer {
    Trainer::new(Arc::new(FnOracle::new(answer)), config)
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn statuses(partial: &[PersonaOutcome]) -> Vec<&'static str> {
    partial
        .iter()
        .map(|o| match o {
            PersonaOutcome::Completed(_) => "completed",
            PersonaOutcome::Failed { .. } => "failed",
            PersonaOutcome::Cancelled { .. } => "cancelled",
        })
        .collect()
}

// ── Single persona ─────────────────────────────────────────────────

#[tokio::test]
async fn improve_runs_full_turn_budget_when_persona_never_agrees() {
    let result = trainer(TrainerConfig::default())
        .improve(BASE, &persona("already-paid"), Some(3))
        .await
        .unwrap();

    let transcript = &result.transcript;
    assert_eq!(transcript.len(), 7);
    assert!(transcript.is_alternating());
    assert_eq!(transcript.turns()[0].role, Role::Agent);
    assert_eq!(
        transcript.turns()[1].text,
        "[already-paid] I already paid last week."
    );
    assert!(!transcript.ended_with_agreement());

    assert_eq!(result.metrics.resolution_score, 6);
    assert_eq!(result.metrics.empathy_score, 7);
    assert_eq!(result.metrics.persuasion_score, 6);
    assert_eq!(
        result.metrics.recommended_prompt_edits,
        ["Acknowledge already-paid"]
    );
    assert_eq!(result.improved_prompt, "Improved for already-paid");
    assert!(result.run_id.starts_with("run-"));
}

#[tokio::test]
async fn improve_stops_when_persona_agrees() {
    let result = trainer(TrainerConfig::default())
        .improve(BASE, &persona("agreeable"), Some(5))
        .await
        .unwrap();
    assert_eq!(result.transcript.len(), 2);
    assert!(result.transcript.ended_with_agreement());
}

#[tokio::test]
async fn improve_reports_malformed_evaluation_with_raw_text() {
    let err = trainer(TrainerConfig::default())
        .improve(BASE, &persona("garbled"), Some(2))
        .await
        .unwrap_err();
    match err {
        CoachError::MalformedEvaluation(m) => {
            assert_eq!(m.raw, "The call went fine, no scores.");
        }
        other => panic!("expected malformed evaluation, got {other:?}"),
    }
}

#[tokio::test]
async fn improve_rejects_zero_turns() {
    let err = trainer(TrainerConfig::default())
        .improve(BASE, &persona("calm"), Some(0))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
}

// ── Named personas ─────────────────────────────────────────────────

#[tokio::test]
async fn training_results_are_index_aligned() {
    let personas = vec![persona("angry"), persona("agreeable"), persona("lagging")];
    let run = trainer(TrainerConfig::default().with_max_turns(2))
        .train_with_named_personas(BASE, personas, None)
        .await
        .unwrap();

    assert_eq!(run.personas, ["angry", "agreeable", "lagging"]);
    assert_eq!(run.transcripts.len(), 3);
    assert_eq!(run.metrics.len(), 3);
    assert_eq!(run.improved_prompts.len(), 3);
    for (i, name) in run.personas.iter().enumerate() {
        let first_reply = &run.transcripts[i].turns()[1].text;
        assert!(first_reply.starts_with(&format!("[{name}]")), "{first_reply}");
        assert_eq!(run.improved_prompts[i], format!("Improved for {name}"));
    }
    assert_eq!(run.transcripts[0].len(), 5);
    assert_eq!(run.transcripts[1].len(), 2);
    assert_eq!(run.final_improved_prompt, "Merged 3 candidates");
    assert!(run.degraded_evaluations.is_empty());
    assert!(run.finished_at >= run.started_at);
}

#[tokio::test]
async fn single_persona_prompt_is_not_merged_again() {
    let run = trainer(TrainerConfig::default())
        .train_with_named_personas(BASE, vec![persona("calm")], Some(1))
        .await
        .unwrap();
    assert_eq!(run.final_improved_prompt, "Improved for calm");
}

#[tokio::test]
async fn empty_persona_list_is_rejected() {
    let failure = trainer(TrainerConfig::default())
        .train_with_named_personas(BASE, Vec::new(), None)
        .await
        .unwrap_err();
    assert_eq!(failure.kind(), ErrorKind::EmptyPersonaSet);
    assert_eq!(failure.persona_index, None);
    assert!(failure.partial.is_empty());
}

#[tokio::test]
async fn invalid_persona_reports_its_index() {
    let personas = vec![persona("calm"), Persona::new("blank", "   ")];
    let failure = trainer(TrainerConfig::default())
        .train_with_named_personas(BASE, personas, None)
        .await
        .unwrap_err();
    assert_eq!(failure.kind(), ErrorKind::InvalidConfiguration);
    assert_eq!(failure.persona_index, Some(1));
}

#[tokio::test]
async fn unusable_evaluation_degrades_instead_of_failing() {
    let personas = vec![persona("calm"), persona("garbled"), persona("angry")];
    let run = trainer(TrainerConfig::default())
        .train_with_named_personas(BASE, personas, Some(1))
        .await
        .unwrap();

    assert_eq!(run.degraded_evaluations, [1]);
    assert_eq!(run.metrics[1], EvaluationRecord::default());
    assert_eq!(run.improved_prompts[1], BASE);
    assert_eq!(run.metrics[0].compliance_score, 9);
    assert_eq!(run.final_improved_prompt, "Merged 3 candidates");
}

// ── Failure policies and cancellation ──────────────────────────────

#[tokio::test]
async fn abort_run_cancels_siblings_on_first_failure() {
    let personas = vec![persona("calm"), persona("failing"), persona("slow")];
    let failure = trainer(TrainerConfig::default().with_failure_policy(FailurePolicy::AbortRun))
        .train_with_named_personas(BASE, personas, Some(1))
        .await
        .unwrap_err();

    assert_eq!(failure.kind(), ErrorKind::ModelUnavailable);
    assert_eq!(failure.persona_index, Some(1));
    assert_eq!(statuses(&failure.partial), ["completed", "failed", "cancelled"]);
    match &failure.partial[1] {
        PersonaOutcome::Failed {
            persona, message, ..
        } => {
            assert_eq!(persona, "failing");
            assert!(message.contains("HTTP 503"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn finish_siblings_keeps_other_results() {
    let personas = vec![persona("lagging"), persona("failing"), persona("calm")];
    let failure = trainer(
        TrainerConfig::default().with_failure_policy(FailurePolicy::FinishSiblings),
    )
    .train_with_named_personas(BASE, personas, Some(1))
    .await
    .unwrap_err();

    assert_eq!(failure.persona_index, Some(1));
    assert_eq!(statuses(&failure.partial), ["completed", "failed", "completed"]);
    let PersonaOutcome::Completed(result) = &failure.partial[0] else {
        panic!("lagging persona should have finished");
    };
    assert_eq!(result.revision.improved_prompt, "Improved for lagging");
}

#[tokio::test]
async fn cancellation_marks_unfinished_personas() {
    let personas = vec![persona("slow"), persona("slow"), persona("slow")];
    let failure = trainer(TrainerConfig::default())
        .train_with_named_personas_until(
            BASE,
            personas,
            Some(1),
            tokio::time::sleep(Duration::from_millis(50)),
        )
        .await
        .unwrap_err();

    assert_eq!(failure.kind(), ErrorKind::Cancelled);
    assert_eq!(failure.persona_index, None);
    assert_eq!(statuses(&failure.partial), ["cancelled"; 3]);
}

// ── Generated personas ─────────────────────────────────────────────

#[tokio::test]
async fn generated_personas_keep_input_names() {
    let run = trainer(TrainerConfig::default())
        .train_with_generated_personas(BASE, names(&["angry", "confused"]), Some(1))
        .await
        .unwrap();
    assert_eq!(run.personas, ["angry", "confused"]);
    assert_eq!(
        run.transcripts[1].turns()[1].text,
        "[confused] I already paid last week."
    );
    assert_eq!(run.final_improved_prompt, "Merged 2 candidates");
}

#[tokio::test]
async fn generation_failure_reports_persona_index() {
    let failure = trainer(TrainerConfig::default())
        .train_with_generated_personas(BASE, names(&["angry", "unreachable"]), Some(1))
        .await
        .unwrap_err();
    assert_eq!(failure.kind(), ErrorKind::ModelUnavailable);
    assert_eq!(failure.persona_index, Some(1));
}

#[tokio::test]
async fn generated_personas_reject_empty_names() {
    let failure = trainer(TrainerConfig::default())
        .train_with_generated_personas(BASE, Vec::new(), None)
        .await
        .unwrap_err();
    assert_eq!(failure.kind(), ErrorKind::EmptyPersonaSet);
}

// ── Concurrency and events ─────────────────────────────────────────

#[tokio::test]
async fn concurrency_limit_bounds_simultaneous_calls() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let oracle = {
        let active = Arc::clone(&active);
        let peak = Arc::clone(&peak);
        FnOracle::new(move |req: OracleRequest| {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                answer(req).await
            }
        })
    };
    let trainer = Trainer::new(Arc::new(oracle), TrainerConfig::default().with_concurrency(2));
    let personas = ["a", "b", "c", "d", "e"].map(persona).to_vec();

    let run = trainer
        .train_with_named_personas(BASE, personas, Some(1))
        .await
        .unwrap();

    assert_eq!(run.personas.len(), 5);
    assert_eq!(peak.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn events_follow_run_lifecycle() {
    let log = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = Arc::clone(&log);
    let handler = FnEventHandler::new(move |event| {
        let entry = match event {
            TrainingEvent::RunStarted { personas, .. } => format!("start {personas}"),
            TrainingEvent::SimulationFinished {
                index,
                agreed_to_pay,
                ..
            } => format!("sim {index} {agreed_to_pay}"),
            TrainingEvent::Aggregated { prompts } => format!("merge {prompts}"),
            TrainingEvent::RunFinished { completed, .. } => format!("finish {completed}"),
            _ => return,
        };
        sink.lock().unwrap().push(entry);
    });
    let trainer = trainer(TrainerConfig::default()).with_event_handler(Arc::new(handler));

    trainer
        .train_with_named_personas(BASE, vec![persona("calm"), persona("agreeable")], Some(2))
        .await
        .unwrap();

    let log = log.lock().unwrap();
    assert_eq!(log.first().map(String::as_str), Some("start 2"));
    assert_eq!(log.last().map(String::as_str), Some("finish 2"));
    assert!(log.contains(&"sim 0 false".to_string()));
    assert!(log.contains(&"sim 1 true".to_string()));
    assert!(log.contains(&"merge 2".to_string()));
}

#[tokio::test]
async fn failed_run_still_reports_finish() {
    let log = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = Arc::clone(&log);
    let handler = FnEventHandler::new(move |event| {
        let entry = match event {
            TrainingEvent::RunStarted { personas, .. } => format!("start {personas}"),
            TrainingEvent::RunFinished { completed, .. } => format!("finish {completed}"),
            _ => return,
        };
        sink.lock().unwrap().push(entry);
    });
    let trainer = trainer(TrainerConfig::default().with_failure_policy(FailurePolicy::FinishSiblings))
        .with_event_handler(Arc::new(handler));

    let failure = trainer
        .train_with_named_personas(BASE, vec![persona("calm"), persona("failing")], Some(1))
        .await
        .unwrap_err();
    assert_eq!(failure.persona_index, Some(1));

    let log = log.lock().unwrap();
    assert_eq!(*log, ["start 2", "finish 1"]);
}
