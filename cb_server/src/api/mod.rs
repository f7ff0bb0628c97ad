//! HTTP API for the settlement engine.
//!
//! # Endpoints Overview
//!
//! ```text
//! GET  /health                           - Health check (public)
//! POST /webhooks/{gateway}               - Gateway callbacks (signed body)
//! POST /api/v1/settlement/run            - Settlement trigger (cron secret)
//! GET  /api/v1/security/events           - Recent security events (cron secret)
//! POST /api/v1/payments/process          - Start a payment (auth required)
//! POST /api/v1/invites/{token}/accept    - Accept an invite (auth optional)
//! ```
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use cb_server::api::{AppState, create_router};
//! use courtbook::{ContextConfig, SettlementContext};
//! use courtbook::auth::TokenVerifier;
//! use courtbook::db::InMemoryStore;
//! use courtbook::notifications::NotificationQueue;
//! # use courtbook::payments::PaymentGateway;
//! # use std::sync::Arc;
//! # async fn example(gateway: Arc<dyn PaymentGateway>) -> Result<(), Box<dyn std::error::Error>> {
//!
//! let context = SettlementContext::new(
//!     Arc::new(InMemoryStore::new()),
//!     gateway,
//!     NotificationQueue::disabled(),
//!     ContextConfig::new("webhook-secret-value"),
//! );
//! let tokens = TokenVerifier::new("a-jwt-secret-of-at-least-32-chars".to_string())?;
//! let state = AppState::new(context, tokens, "cron-secret-value".to_string(), None);
//!
//! let app = create_router(state);
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # CORS
//!
//! CORS is configured permissively. Restrict origins in front of the server
//! when exposing it publicly.

pub mod invites;
pub mod middleware;
pub mod payments;
pub mod request_id;
pub mod settlement;
pub mod webhooks;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
};
use courtbook::{SettlementContext, auth::TokenVerifier, db::Database};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Application state shared across all HTTP handlers.
///
/// Cloned for each request; every field is reference counted.
#[derive(Clone)]
pub struct AppState {
    /// Settlement components
    pub context: SettlementContext,
    /// Access token verification
    pub tokens: Arc<TokenVerifier>,
    /// Bearer secret of the cron-only endpoints
    pub cron_secret: Arc<str>,
    /// Connection pool when running against PostgreSQL
    pub database: Option<Database>,
}

impl AppState {
    pub fn new(
        context: SettlementContext,
        tokens: TokenVerifier,
        cron_secret: String,
        database: Option<Database>,
    ) -> Self {
        Self {
            context,
            tokens: Arc::new(tokens),
            cron_secret: Arc::from(cron_secret),
            database,
        }
    }
}

/// JSON body of every error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

/// Error half of every handler result
pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// Build an error response
pub fn api_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
            code,
        }),
    )
}

/// Create the complete API router with all endpoints and middleware.
pub fn create_router(state: AppState) -> Router {
    let v1_routes = create_v1_router(state.clone());

    let root_routes = Router::new()
        .route("/health", get(health_check))
        .route("/webhooks/{gateway}", post(webhooks::receive_webhook));

    Router::new()
        .merge(root_routes)
        .nest("/api/v1", v1_routes)
        .layer(axum::middleware::from_fn(request_id::request_id_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Create API v1 router with all versioned endpoints.
fn create_v1_router(state: AppState) -> Router<AppState> {
    // Authenticated by the cron secret inside the handlers
    let cron_routes = Router::new()
        .route("/settlement/run", post(settlement::run_settlement))
        .route("/security/events", get(settlement::security_events));

    let protected_routes = Router::new()
        .route("/payments/process", post(payments::process_payment))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    let guest_routes = Router::new()
        .route("/invites/{token}/accept", post(invites::accept_invite))
        .layer(axum::middleware::from_fn_with_state(
            state,
            middleware::optional_auth_middleware,
        ));

    Router::new()
        .merge(cron_routes)
        .merge(protected_routes)
        .merge(guest_routes)
}

/// Health check endpoint for monitoring and load balancers.
///
/// Returns `200 OK` when the database answers (or no database is configured),
/// `503 Service Unavailable` otherwise.
///
/// ```bash
/// curl http://localhost:8080/health
/// # {"status":"healthy","database":true,"gateway":"asaas","timestamp":"2026-03-02T10:30:00Z"}
/// ```
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let db_healthy = match &state.database {
        Some(database) => database.health_check().await.is_ok(),
        None => true,
    };

    let status_code = if db_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = json!({
        "status": if db_healthy { "healthy" } else { "unhealthy" },
        "version": env!("CARGO_PKG_VERSION"),
        "database": db_healthy,
        "gateway": state.context.adapter.gateway_name(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    (status_code, Json(response))
}
