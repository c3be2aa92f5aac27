//! Run prompt-training jobs from the command line.
//!
//! Reads the API key from the `OPENROUTER_KEY` environment variable. Results
//! are printed to stdout as pretty JSON; logs go to stderr (`RUST_LOG`
//! overrides the default `callcoach=info`).
//!
//! # Examples
//!
//! ```sh
//! # One persona, inline
//! callcoach improve --base-prompt "Collect payment politely." \
//!   --persona "already-paid=You insist you already paid last week." --max-turns 3
//!
//! # Several personas from a JSON file ([{"name": ..., "persona_prompt": ...}])
//! callcoach train --base-prompt-file agent.txt --personas-file personas.json
//!
//! # Let the model write the personas
//! callcoach train-auto --base-prompt-file agent.txt angry "already paid" confused
//!
//! # Payment-risk classification of a finished call
//! callcoach insights call-0193.txt
//! ```

use callcoach::api::RetryConfig;
use callcoach::config::{FailurePolicy, OracleConfig, TrainerConfig};
use callcoach::insights::assess_risk;
use callcoach::oracle::{OpenRouterOracle, Oracle};
use callcoach::persona::Persona;
use callcoach::prompts::CallContext;
use callcoach::train::Trainer;
use callcoach::{CoachError, TrainingFailure};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Tune a debt-collection agent prompt against simulated customers.
///
/// Reads the API key from the OPENROUTER_KEY environment variable.
#[derive(Parser, Debug)]
#[command(name = "callcoach", version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    // ── Oracle ─────────────────────────────────────────────────
    /// Model identifier (overrides CALLCOACH_MODEL)
    #[arg(long, global = true)]
    model: Option<String>,

    /// Sampling temperature (overrides CALLCOACH_TEMPERATURE)
    #[arg(long, global = true)]
    temperature: Option<f32>,

    /// Maximum tokens per completion
    #[arg(long, global = true)]
    max_tokens: Option<u32>,

    /// Per-call timeout in seconds (overrides CALLCOACH_TIMEOUT_SECS)
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    /// Retries for transient API failures (overrides CALLCOACH_MAX_RETRIES)
    #[arg(long, global = true)]
    retries: Option<u32>,

    // ── Training ───────────────────────────────────────────────
    /// Persona pipelines running at once
    #[arg(long, global = true, default_value_t = 4)]
    concurrency: usize,

    /// What to do with other personas when one fails: abort-run or finish-siblings
    #[arg(long, global = true, default_value_t = FailurePolicy::AbortRun)]
    failure_policy: FailurePolicy,

    // ── Template context ───────────────────────────────────────
    /// Customer name substituted into the agent instructions and greeting
    #[arg(long, global = true, requires = "amount_due", requires = "card_ending")]
    customer_name: Option<String>,

    /// Overdue amount substituted into the agent instructions
    #[arg(long, global = true, requires = "customer_name")]
    amount_due: Option<String>,

    /// Last digits of the card substituted into the agent instructions
    #[arg(long, global = true, requires = "customer_name")]
    card_ending: Option<String>,
}

#[derive(Args, Debug)]
struct BasePromptArgs {
    /// Agent system prompt to improve (the stock instructions when omitted)
    #[arg(long, conflicts_with = "base_prompt_file")]
    base_prompt: Option<String>,

    /// Read the agent system prompt from a file
    #[arg(long)]
    base_prompt_file: Option<PathBuf>,

    /// Persona turns per simulated call
    #[arg(long)]
    max_turns: Option<u32>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Simulate one persona, grade the call, and rewrite the prompt
    Improve {
        #[command(flatten)]
        base: BasePromptArgs,

        /// Persona as NAME=PROMPT
        #[arg(long, value_parser = parse_persona_arg)]
        persona: Persona,
    },
    /// Train against several personas and merge the rewrites
    Train {
        #[command(flatten)]
        base: BasePromptArgs,

        /// Persona as NAME=PROMPT (repeatable)
        #[arg(long = "persona", value_parser = parse_persona_arg)]
        personas: Vec<Persona>,

        /// JSON file with [{"name": ..., "persona_prompt": ...}, ...]
        #[arg(long)]
        personas_file: Option<PathBuf>,
    },
    /// Generate personas from short names, then train against them
    TrainAuto {
        #[command(flatten)]
        base: BasePromptArgs,

        /// Persona names such as "angry customer"
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Classify a call transcript as HIGH, MEDIUM or LOW payment risk
    Insights {
        /// Transcript text file
        transcript: PathBuf,
    },
}

// ── Argument helpers ──────────────────────────────────────────────

fn parse_persona_arg(raw: &str) -> Result<Persona, String> {
    let (name, prompt) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=PROMPT, got {raw:?}"))?;
    let persona = Persona::new(name.trim(), prompt.trim());
    persona.validate().map_err(|e| e.to_string())?;
    Ok(persona)
}

fn read_personas_file(path: &Path) -> Result<Vec<Persona>, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
    serde_json::from_str(&text).map_err(|e| format!("failed to parse {}: {e}", path.display()))
}

fn resolve_base_prompt(args: &BasePromptArgs) -> Result<String, String> {
    match (&args.base_prompt, &args.base_prompt_file) {
        (Some(prompt), _) => Ok(prompt.clone()),
        (None, Some(path)) => std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {e}", path.display())),
        (None, None) => Ok(String::new()),
    }
}

fn oracle_config(global: &GlobalArgs, mut config: OracleConfig) -> Result<OracleConfig, String> {
    if let Some(model) = &global.model {
        config = config.with_model(model.clone());
    }
    if let Some(temperature) = global.temperature {
        config = config.with_temperature(temperature);
    }
    if let Some(max_tokens) = global.max_tokens {
        config = config.with_max_tokens(max_tokens);
    }
    if let Some(secs) = global.timeout_secs {
        config = config.with_timeout(Duration::from_secs(secs));
    }
    if let Some(retries) = global.retries {
        config = config.with_retry(RetryConfig::with_retries(retries));
    }
    config.validate()?;
    Ok(config)
}

fn trainer_config(global: &GlobalArgs) -> TrainerConfig {
    let mut config = TrainerConfig::default()
        .with_concurrency(global.concurrency)
        .with_failure_policy(global.failure_policy);
    if let (Some(name), Some(amount), Some(card)) =
        (&global.customer_name, &global.amount_due, &global.card_ending)
    {
        config = config.with_call_context(CallContext::new(name, amount, card));
    }
    config
}

// ── Output ─────────────────────────────────────────────────────────

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let json = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{json}");
    Ok(())
}

/// Print whatever the failed run finished, then return its message.
fn report_failure(failure: TrainingFailure) -> String {
    if !failure.partial.is_empty() {
        let body = serde_json::json!({
            "error": failure.kind(),
            "message": failure.error.to_string(),
            "persona_index": failure.persona_index,
            "partial": failure.partial,
        });
        if let Err(e) = print_json(&body) {
            warn!("Could not print partial results: {e}");
        }
    }
    failure.to_string()
}

fn report_error(error: CoachError) -> String {
    if let CoachError::MalformedEvaluation(m) = &error {
        warn!("Raw evaluator output:\n{}", m.raw);
    }
    error.to_string()
}

async fn ctrl_c() {
    if tokio::signal::ctrl_c().await.is_ok() {
        warn!("Interrupted; cancelling run");
    } else {
        std::future::pending::<()>().await;
    }
}

// ── Main ───────────────────────────────────────────────────────────

async fn run(cli: Cli) -> Result<(), String> {
    let oracle = Arc::new(OpenRouterOracle::from_env(oracle_config(
        &cli.global,
        OracleConfig::from_env()?,
    )?)?);
    info!(
        "Using model {} (temperature={}, timeout={:?})",
        oracle.config().model,
        oracle.config().temperature,
        oracle.config().timeout
    );
    let shared: Arc<dyn Oracle> = oracle.clone();
    let trainer = Trainer::new(shared, trainer_config(&cli.global))
        .with_event_handler(Arc::new(callcoach::events::LoggingHandler));

    let outcome = match cli.command {
        Command::Improve { base, persona } => {
            let base_prompt = resolve_base_prompt(&base)?;
            let result = tokio::select! {
                r = trainer.improve(&base_prompt, &persona, base.max_turns) => r.map_err(report_error)?,
                () = ctrl_c() => return Err(CoachError::Cancelled.to_string()),
            };
            print_json(&result)
        }
        Command::Train {
            base,
            mut personas,
            personas_file,
        } => {
            let base_prompt = resolve_base_prompt(&base)?;
            if let Some(path) = personas_file {
                personas.extend(read_personas_file(&path)?);
            }
            let run = trainer
                .train_with_named_personas_until(&base_prompt, personas, base.max_turns, ctrl_c())
                .await
                .map_err(report_failure)?;
            print_json(&run)
        }
        Command::TrainAuto { base, names } => {
            let base_prompt = resolve_base_prompt(&base)?;
            let run = trainer
                .train_with_generated_personas_until(&base_prompt, names, base.max_turns, ctrl_c())
                .await
                .map_err(report_failure)?;
            print_json(&run)
        }
        Command::Insights { transcript } => {
            let text = std::fs::read_to_string(&transcript)
                .map_err(|e| format!("failed to read {}: {e}", transcript.display()))?;
            let assessment = assess_risk(&*oracle, &text).await.map_err(report_error)?;
            print_json(&assessment)
        }
    };

    info!("Oracle usage: {}", oracle.usage_summary());
    outcome
}

#[tokio::main]
async fn main() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("callcoach=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
