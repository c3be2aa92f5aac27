//! HTTP front end for the callcoach prompt-training engine.
//!
//! `callcoach-web` wraps a shared [`Trainer`] in an axum router. Each request
//! is an independent training run; dropping the connection drops the run and
//! aborts its persona pipelines.
//!
//! # Quick start
//!
//! ```ignore
//! use callcoach::prelude::*;
//! use callcoach_web::{WebConfig, spawn_web};
//! use std::sync::Arc;
//!
//! let oracle = Arc::new(OpenRouterOracle::from_env(OracleConfig::from_env()?)?);
//! let trainer = Arc::new(Trainer::new(oracle, TrainerConfig::default()));
//!
//! let addr = spawn_web(trainer, WebConfig::default()).await?;
//! println!("Listening on http://{addr}");
//! ```
//!
//! # Routes
//!
//! | Method | Path | Body | Response |
//! |--------|------|------|----------|
//! | GET | `/` | | liveness message |
//! | POST | `/testing/improve/prompt` | [`ImproveRequest`] | `ImproveResult` |
//! | POST | `/testing/train` | [`TrainRequest`] | `TrainingRun` |
//! | POST | `/testing/train/auto` | [`TrainAutoRequest`] | `TrainingRun` |
//!
//! Failures are returned as [`ApiError`] bodies.

mod api;
mod server;

pub use api::{ApiError, ImproveRequest, TrainAutoRequest, TrainRequest};
pub use server::{build_router, start_server};

use callcoach::train::Trainer;
use std::net::SocketAddr;
use std::sync::Arc;

/// Configuration for the web server.
pub struct WebConfig {
    /// Address to bind to. Default: `127.0.0.1:8000`.
    pub bind_addr: SocketAddr,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
        }
    }
}

/// Spawn the web server on a Tokio task and return the bound address.
///
/// The server runs until the Tokio runtime shuts down.
pub async fn spawn_web(trainer: Arc<Trainer>, config: WebConfig) -> std::io::Result<SocketAddr> {
    let router = build_router(trainer);
    start_server(router, config.bind_addr).await
}
