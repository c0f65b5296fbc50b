//! HTTP API for health checks and status

use crate::config::ApiConfig;
use crate::error::{SentryError, SentryResult};
use crate::nonce::NonceStore;
use crate::sentry::SessionManager;

use axum::http::StatusCode;
use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SessionManager>,
    pub store: Arc<dyn NonceStore>,
}

/// Run the HTTP API server
pub async fn run_server(
    config: ApiConfig,
    manager: Arc<SessionManager>,
    store: Arc<dyn NonceStore>,
) -> SentryResult<()> {
    let app = router(AppState { manager, store });

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| SentryError::Internal(e.to_string()))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| SentryError::Internal(e.to_string()))?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/status", get(get_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Readiness check - verify the nonce store backend
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(ReadinessResponse {
                ready: true,
                store: true,
            }),
        ),
        Err(err) => {
            warn!(%err, "nonce store failed readiness check");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadinessResponse {
                    ready: false,
                    store: false,
                }),
            )
        }
    }
}

/// Sentry status: how many retry sessions are ticking right now
async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        active_sessions: state.manager.active_sessions(),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    store: bool,
}

#[derive(Serialize)]
struct StatusResponse {
    version: &'static str,
    active_sessions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nonce::store::MockNonceStore;
    use crate::nonce::MemoryNonceStore;
    use crate::scheduler::{MockSchedulerClient, SchedulerClient};
    use crate::sentry::{BackoffPolicy, RetrySessionJob};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn state(store: Arc<dyn NonceStore>) -> AppState {
        let client: Arc<dyn SchedulerClient> = Arc::new(MockSchedulerClient::new());
        let retry_job = Arc::new(RetrySessionJob::new(client.clone()));
        let (manager, _completions) = SessionManager::new(
            client,
            retry_job,
            BackoffPolicy {
                initial: Duration::from_millis(10),
                max: Duration::from_millis(50),
                max_attempts: 1,
            },
            CancellationToken::new(),
        );

        AppState {
            manager: Arc::new(manager),
            store,
        }
    }

    #[tokio::test]
    async fn ready_when_store_is_healthy() {
        let store = Arc::new(MemoryNonceStore::new(Duration::from_secs(60)));
        let response = readiness_check(State(state(store))).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn not_ready_when_store_is_down() {
        let mut store = MockNonceStore::new();
        store
            .expect_health_check()
            .returning(|| Err(SentryError::Store("connection refused".to_string())));

        let response = readiness_check(State(state(Arc::new(store))))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn status_reports_active_sessions() {
        let store = Arc::new(MemoryNonceStore::new(Duration::from_secs(60)));
        let response = get_status(State(state(store))).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
