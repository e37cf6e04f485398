use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use slackbot_agent::backend::ResolvedBackend;
use slackbot_agent::AgentRuntime;
use tracing::{error, info};

#[derive(Clone)]
pub struct HealthState {
    backend: Arc<ResolvedBackend>,
    runtime: Arc<AgentRuntime>,
    max_sessions: usize,
}

impl HealthState {
    pub fn new(backend: Arc<ResolvedBackend>, runtime: Arc<AgentRuntime>, max_sessions: usize) -> Self {
        Self { backend, runtime, max_sessions }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SessionsCheck {
    pub active: usize,
    pub capacity: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub backend: HealthCheck,
    pub sessions: SessionsCheck,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

pub async fn spawn(bind_address: &str, port: u16, state: HealthState) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.health.start",
        correlation_id = "bootstrap",
        bind_address = %address,
        "health endpoint started"
    );

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router(state)).await {
            error!(
                event_name = "system.health.error",
                correlation_id = "bootstrap",
                error = %error,
                "health endpoint server terminated unexpectedly"
            );
        }
    });

    Ok(())
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let active = state.runtime.active_sessions().await;
    let backend = HealthCheck {
        status: "ready",
        detail: format!(
            "mode={} model={} tracing={}",
            state.backend.config.mode.label(),
            state.backend.model(),
            state.backend.tracing_enabled()
        ),
    };

    let payload = HealthResponse {
        status: "ready",
        service: HealthCheck {
            status: "ready",
            detail: "slackbot-server runtime initialized".to_string(),
        },
        backend,
        sessions: SessionsCheck { active, capacity: state.max_sessions },
        checked_at: Utc::now().to_rfc3339(),
    };

    (StatusCode::OK, Json(payload))
}
