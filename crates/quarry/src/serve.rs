// SPDX-FileCopyrightText: 2026 Quarry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `serve` task: a minimal HTTP front over the access layer.
//!
//! Only a health endpoint exists today. It performs a real read through the
//! read pool so a wedged database shows up as an unhealthy process.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use quarry_core::QuarryError;
use quarry_storage::{Database, QueryContext};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::tasks::TaskContext;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(2);

pub fn router(db: Arc<Database>) -> Router {
    Router::new().route("/healthz", get(healthz)).with_state(db)
}

async fn healthz(State(db): State<Arc<Database>>) -> (StatusCode, Json<HealthBody>) {
    let ctx = QueryContext::background().with_timeout(HEALTH_TIMEOUT);
    match db
        .query_row(&ctx, "SELECT 1", (), |row| row.get::<_, i64>(0))
        .await
    {
        Ok(_) => (StatusCode::OK, Json(HealthBody::ok())),
        Err(e) => {
            warn!(error = %e, "health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthBody::error(e.to_string())),
            )
        }
    }
}

#[derive(Debug, serde::Serialize)]
struct HealthBody {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl HealthBody {
    fn ok() -> Self {
        Self {
            status: "ok",
            error: None,
        }
    }

    fn error(message: String) -> Self {
        Self {
            status: "unavailable",
            error: Some(message),
        }
    }
}

/// Serve until SIGINT or SIGTERM.
pub async fn run(ctx: &TaskContext) -> Result<(), QuarryError> {
    let addr = &ctx.config.server.listen_addr;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| QuarryError::Internal(format!("failed to bind {addr}: {e}")))?;
    info!(addr = %addr, "serving");

    let cancel = install_signal_handler();
    axum::serve(listener, router(Arc::clone(&ctx.db)))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| QuarryError::Internal(format!("server error: {e}")))?;

    info!("serve shutdown complete");
    Ok(())
}

/// Cancel the returned token on Ctrl+C, or SIGTERM on unix.
fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => info!("received SIGINT (Ctrl+C), shutting down"),
                        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
                    }
                }
                Err(e) => {
                    warn!(error = %e, "failed to install SIGTERM handler");
                    let _ = ctrl_c.await;
                    info!("received SIGINT (Ctrl+C), shutting down");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("received Ctrl+C, shutting down");
        }

        trigger.cancel();
        debug!("shutdown signal handler completed");
    });

    token
}
