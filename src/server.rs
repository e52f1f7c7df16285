/// HTTP server setup and routing
use crate::{
    auth::SENDER_HEADER,
    context::AppContext,
    error::{VeilError, VeilResult},
};
use axum::{
    http::{header, HeaderName, Method, StatusCode},
    response::Json,
    Router,
};
use serde_json::json;
use std::future::Future;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

/// Build the main application router
/// Returns Router<()> because state is already provided
pub fn build_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(SENDER_HEADER)]);

    Router::new()
        .merge(crate::api::routes())
        .with_state(ctx)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .fallback(not_found)
}

/// 404 handler
async fn not_found() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "NotFound",
            "message": "Endpoint not found"
        })),
    )
}

/// Start the HTTP server, returning once `shutdown` resolves and in-flight requests finish
pub async fn serve<F>(ctx: AppContext, shutdown: F) -> VeilResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = ctx.config.bind_address();

    info!("Veilgate listening on {}", addr);
    info!("   Domain: {}", ctx.settings.domain);
    info!("   Service URL: {}", ctx.service_url());

    let app = build_router(ctx);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| VeilError::Internal(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| VeilError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}
