//! Inbound delegation endpoint.
//!
//! Serves `POST /a2a/tasks` for peer agents. The receiver side of the
//! state machine runs here: a pending message is accepted and executed,
//! or rejected when the capability is unknown. Replies for already-seen
//! task ids come from a processed-message record, so a network retry of
//! the same task never executes twice.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use skilld_core::a2a::{DelegationMessage, DelegationStatus};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Executes a delegated task on the local agent.
#[async_trait]
pub trait DelegationHandler: Send + Sync {
    /// Whether this agent can serve the capability at all.
    fn can_handle(&self, capability: &str) -> bool;

    /// Run the task; `Err` becomes a `failed` terminal state.
    async fn handle(&self, message: &DelegationMessage) -> Result<String, String>;
}

/// Shared state for HTTP handlers.
pub struct AppState {
    pub handler: Arc<dyn DelegationHandler>,
    pub agent_id: String,
    pub auth_token: Option<String>,
    /// Terminal replies keyed by task id, for idempotent replay.
    processed: Mutex<HashMap<Uuid, DelegationMessage>>,
}

impl AppState {
    pub fn new(
        handler: Arc<dyn DelegationHandler>,
        agent_id: impl Into<String>,
        auth_token: Option<String>,
    ) -> Self {
        Self {
            handler,
            agent_id: agent_id.into(),
            auth_token,
            processed: Mutex::new(HashMap::new()),
        }
    }

    fn recorded_reply(&self, task_id: Uuid) -> Option<DelegationMessage> {
        lock_unpoisoned(&self.processed).get(&task_id).cloned()
    }

    fn record_reply(&self, message: DelegationMessage) {
        lock_unpoisoned(&self.processed).insert(message.task_id, message);
    }
}

fn lock_unpoisoned<'a, T>(mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Create the HTTP router with all endpoints.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/a2a/tasks", post(submit_task))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server, bound to localhost only.
pub async fn start_server(
    state: Arc<AppState>,
    port: u16,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let router = create_router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("a2a server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

/// Validate auth token if configured.
fn check_auth(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<(), (StatusCode, Json<ErrorResponse>)> {
    if let Some(expected) = &state.auth_token {
        let provided = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.strip_prefix("Bearer ").unwrap_or(s));

        match provided {
            Some(token) if token == expected => Ok(()),
            Some(_) => Err((
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "invalid auth token".to_string(),
                }),
            )),
            None => Err((
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "missing auth token".to_string(),
                }),
            )),
        }
    } else {
        Ok(())
    }
}

/// POST /a2a/tasks - accept, execute, and reply with a terminal message.
async fn submit_task(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(mut message): Json<DelegationMessage>,
) -> Result<Json<DelegationMessage>, (StatusCode, Json<ErrorResponse>)> {
    check_auth(&state, &headers)?;

    // A retry of a processed task replays the recorded reply unchanged.
    if let Some(reply) = state.recorded_reply(message.task_id) {
        info!(task_id = %message.task_id, "replaying recorded delegation reply");
        return Ok(Json(reply));
    }

    if message.status != DelegationStatus::Pending {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: format!(
                    "delegation must arrive pending, got '{}'",
                    message.status
                ),
            }),
        ));
    }

    if !state.handler.can_handle(&message.capability_required) {
        let reason = format!("no capability: {}", message.capability_required);
        warn!(
            task_id = %message.task_id,
            capability = %message.capability_required,
            "delegation rejected"
        );
        apply(&mut message, |m| m.reject(reason.clone()))?;
        state.record_reply(message.clone());
        return Ok(Json(message));
    }

    apply(&mut message, |m| {
        m.transition(DelegationStatus::Accepted)
    })?;
    info!(
        task_id = %message.task_id,
        capability = %message.capability_required,
        sender = %message.sender_id,
        "delegation accepted"
    );

    match state.handler.handle(&message).await {
        Ok(result) => apply(&mut message, |m| m.complete(result.clone()))?,
        Err(reason) => {
            warn!(task_id = %message.task_id, %reason, "delegated task failed");
            apply(&mut message, |m| m.fail(reason.clone()))?;
        }
    }

    state.record_reply(message.clone());
    Ok(Json(message))
}

/// GET /health
async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "agent_id": state.agent_id,
    }))
}

fn apply<F>(
    message: &mut DelegationMessage,
    f: F,
) -> Result<(), (StatusCode, Json<ErrorResponse>)>
where
    F: FnOnce(&mut DelegationMessage) -> Result<(), skilld_core::a2a::InvalidTransition>,
{
    f(message).map_err(|e| {
        error!(task_id = %message.task_id, error = %e, "delegation transition error");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
    })
}
