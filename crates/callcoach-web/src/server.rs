//! Axum server setup and router construction.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use callcoach::train::Trainer;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::api::{self, AppState};

/// Build the router for a shared trainer.
pub fn build_router(trainer: Arc<Trainer>) -> Router {
    let state = AppState { trainer };

    // Browser tools on other origins call the API directly.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(api::root))
        .route("/testing/improve/prompt", post(api::post_improve))
        .route("/testing/train", post(api::post_train))
        .route("/testing/train/auto", post(api::post_train_auto))
        .with_state(state)
        .layer(cors)
}

/// Bind `bind_addr`, serve `router` on a background task, and return the
/// bound address (useful with port 0).
pub async fn start_server(router: Router, bind_addr: SocketAddr) -> std::io::Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    let addr = listener.local_addr()?;
    info!("HTTP server listening: addr={addr}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            error!("HTTP server stopped: {e}");
        }
    });

    Ok(addr)
}
