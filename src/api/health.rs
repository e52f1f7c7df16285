/// Health check endpoints for liveness and readiness checks
///
/// Provides detailed health status including:
/// - Database connectivity
/// - Presence of each published config document
///
/// Supports two types of checks:
/// - Liveness: Is the application alive? (restart if not)
/// - Readiness: Can the application serve traffic? (database reachable)

use crate::{
    context::AppContext,
    db::{
        self,
        account::{Protocol, ProtocolFamily},
    },
    error::VeilResult,
    metrics,
};
use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Health status response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Overall status: "healthy", "degraded", or "unhealthy"
    pub status: String,

    /// Application version
    pub version: String,

    /// Individual component checks
    pub checks: Vec<ComponentHealth>,

    /// Optional message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Health status of individual component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// Component name
    pub name: String,

    /// Status: "healthy", "degraded", or "unhealthy"
    pub status: String,

    /// Response time in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,

    /// Optional error message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Build health check routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/health", get(health_basic))
        .route("/health/live", get(liveness_check))
        .route("/health/ready", get(readiness_check))
        .route("/health/detailed", get(health_detailed))
        .route("/metrics", get(metrics_text))
}

/// Basic health check
pub async fn health_basic() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Liveness check
///
/// If we can respond, we're alive.
pub async fn liveness_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "alive",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Readiness check - 200 when the account database answers, 503 otherwise
pub async fn readiness_check(
    State(ctx): State<AppContext>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if let Err(e) = check_database(&ctx).await {
        tracing::warn!(error = %e, "readiness_check_failed: database check failed");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    Ok(Json(serde_json::json!({
        "status": "ready",
        "version": env!("CARGO_PKG_VERSION")
    })))
}

/// Detailed health check with all component statuses
pub async fn health_detailed(State(ctx): State<AppContext>) -> (StatusCode, Json<HealthStatus>) {
    let mut checks = vec![check_database_detailed(&ctx).await];
    for family in ProtocolFamily::ALL {
        checks.push(check_document_detailed(&ctx, family).await);
    }

    let status = determine_overall_status(&checks);
    let code = if status == "unhealthy" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        code,
        Json(HealthStatus {
            status,
            version: ctx.config.service.version.clone(),
            checks,
            message: None,
        }),
    )
}

/// Prometheus metrics in text format
pub async fn metrics_text() -> String {
    metrics::render_metrics()
}

async fn check_database(ctx: &AppContext) -> VeilResult<()> {
    db::test_connection(&ctx.db).await
}

async fn check_database_detailed(ctx: &AppContext) -> ComponentHealth {
    let start = Instant::now();
    let result = check_database(ctx).await;
    let response_time_ms = Some(start.elapsed().as_millis() as u64);

    match result {
        Ok(()) => ComponentHealth {
            name: "database".to_string(),
            status: "healthy".to_string(),
            response_time_ms,
            error: None,
            details: account_details(ctx).await.ok(),
        },
        Err(e) => ComponentHealth {
            name: "database".to_string(),
            status: "unhealthy".to_string(),
            response_time_ms,
            error: Some(e.to_string()),
            details: None,
        },
    }
}

/// Account counts overall and per protocol
async fn account_details(ctx: &AppContext) -> VeilResult<serde_json::Value> {
    let now = ctx.clock.utc();
    let summary = ctx.account_store.summary(now).await?;

    let mut protocols = serde_json::Map::new();
    for protocol in Protocol::ALL {
        let accounts = ctx.account_store.find_all_by_protocol(protocol).await?;
        let active = accounts.iter().filter(|a| a.is_active(now)).count();
        protocols.insert(
            protocol.to_string(),
            serde_json::json!({ "total": accounts.len(), "active": active }),
        );
    }

    Ok(serde_json::json!({
        "active": summary.active,
        "expired": summary.expired,
        "protocols": protocols,
    }))
}

/// A missing document only degrades: the next change or sweep publishes it
async fn check_document_detailed(ctx: &AppContext, family: ProtocolFamily) -> ComponentHealth {
    let path = ctx.config_sync.publisher().location(family);
    let name = format!("{}_config", family);

    match tokio::fs::metadata(path).await {
        Ok(meta) => ComponentHealth {
            name,
            status: "healthy".to_string(),
            response_time_ms: None,
            error: None,
            details: Some(serde_json::json!({
                "path": path.display().to_string(),
                "bytes": meta.len(),
            })),
        },
        Err(e) => ComponentHealth {
            name,
            status: "degraded".to_string(),
            response_time_ms: None,
            error: Some(format!("{}: {}", path.display(), e)),
            details: None,
        },
    }
}

/// Determine overall status from component checks
fn determine_overall_status(checks: &[ComponentHealth]) -> String {
    if checks.iter().any(|c| c.status == "unhealthy") {
        "unhealthy".to_string()
    } else if checks.iter().any(|c| c.status == "degraded") {
        "degraded".to_string()
    } else {
        "healthy".to_string()
    }
}
