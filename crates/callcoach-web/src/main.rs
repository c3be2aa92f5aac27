//! Prompt-training HTTP service.
//!
//! # Usage
//!
//! ```bash
//! OPENROUTER_KEY=sk-... cargo run -p callcoach-web
//! OPENROUTER_KEY=sk-... cargo run -p callcoach-web -- --port 9000 --concurrency 2
//! ```
//!
//! Then, for example:
//!
//! ```bash
//! curl -X POST localhost:8000/testing/train/auto \
//!   -H 'content-type: application/json' \
//!   -d '{"base_agent_prompt": "Collect payment politely.", "persona_names": ["angry", "confused"]}'
//! ```

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use callcoach::prelude::*;
use callcoach_web::{WebConfig, spawn_web};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Prompt-training HTTP service.
#[derive(Parser)]
#[command(about = "Serve callcoach training runs over HTTP")]
struct Args {
    /// Interface to bind.
    #[arg(long, env = "CALLCOACH_HOST", default_value = "127.0.0.1")]
    host: IpAddr,

    /// Port to listen on.
    #[arg(long, env = "CALLCOACH_PORT", default_value_t = 8000)]
    port: u16,

    /// Model identifier (overrides CALLCOACH_MODEL).
    #[arg(long)]
    model: Option<String>,

    /// Per-call timeout in seconds (overrides CALLCOACH_TIMEOUT_SECS).
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Persona pipelines running at once within one request.
    #[arg(long, default_value_t = 4)]
    concurrency: usize,

    /// Default persona turns when a request omits max_turns.
    #[arg(long, default_value_t = callcoach::simulation::DEFAULT_MAX_TURNS)]
    max_turns: u32,

    /// abort-run or finish-siblings.
    #[arg(long, default_value_t = FailurePolicy::AbortRun)]
    failure_policy: FailurePolicy,
}

#[tokio::main]
async fn main() -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("callcoach=info,callcoach_web=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let mut oracle_config = OracleConfig::from_env()?;
    if let Some(model) = args.model {
        oracle_config = oracle_config.with_model(model);
    }
    if let Some(secs) = args.timeout_secs {
        oracle_config = oracle_config.with_timeout(Duration::from_secs(secs));
    }
    oracle_config.validate()?;
    let oracle = Arc::new(OpenRouterOracle::from_env(oracle_config)?);
    info!("Using model {}", oracle.config().model);

    let trainer_config = TrainerConfig::default()
        .with_max_turns(args.max_turns)
        .with_concurrency(args.concurrency)
        .with_failure_policy(args.failure_policy);
    let shared: Arc<dyn Oracle> = oracle.clone();
    let trainer = Trainer::new(shared, trainer_config).with_event_handler(Arc::new(LoggingHandler));

    let config = WebConfig {
        bind_addr: (args.host, args.port).into(),
    };
    let addr = spawn_web(Arc::new(trainer), config)
        .await
        .map_err(|e| format!("failed to bind {}:{}: {e}", args.host, args.port))?;
    println!("callcoach-web: http://{addr}");

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("failed to listen for Ctrl-C: {e}"))?;
    info!("Shutting down. Oracle usage: {}", oracle.usage_summary());
    Ok(())
}
