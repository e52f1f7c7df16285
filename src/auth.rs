/// Operator authorization and the auth-failure audit log
use crate::{
    clock::SharedClock,
    context::AppContext,
    error::{VeilError, VeilResult},
    metrics,
};
use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::{fs::OpenOptions, io::AsyncWriteExt};

/// Header carrying the caller identity on management endpoints
pub const SENDER_HEADER: &str = "x-veilgate-sender";

/// Decides whether a transport identity may operate the service
#[derive(Debug, Clone, Copy)]
pub struct Authorizer {
    admin_id: i64,
}

impl Authorizer {
    pub fn new(admin_id: i64) -> Self {
        Self { admin_id }
    }

    pub fn is_authorized(&self, identity: i64) -> bool {
        identity == self.admin_id
    }
}

/// Sink for rejected-caller records
#[async_trait]
pub trait AuthAuditSink: Send + Sync {
    async fn log_auth_failure(&self, message: &str) -> VeilResult<()>;
}

/// Shared audit sink handle
pub type SharedAuditSink = Arc<dyn AuthAuditSink>;

/// Appends `[<RFC3339>] [AUTH_FAIL] <message>` lines to a file
pub struct FileAuthAuditLog {
    path: PathBuf,
    clock: SharedClock,
}

impl FileAuthAuditLog {
    pub fn new(path: PathBuf, clock: SharedClock) -> Self {
        Self { path, clock }
    }
}

#[async_trait]
impl AuthAuditSink for FileAuthAuditLog {
    async fn log_auth_failure(&self, message: &str) -> VeilResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let line = format!(
            "[{}] [AUTH_FAIL] {}\n",
            self.clock.utc().to_rfc3339(),
            message
        );

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Count, log and audit a rejected caller. Audit failures never fail the request.
pub async fn report_auth_failure(sink: &dyn AuthAuditSink, message: &str) {
    metrics::record_auth_failure();
    tracing::warn!("Unauthorized access attempt: {}", message);

    if let Err(e) = sink.log_auth_failure(message).await {
        tracing::warn!("Failed to write auth audit record: {}", e);
    }
}

/// Authorized operator on a management request, taken from `x-veilgate-sender`
#[derive(Debug, Clone, Copy)]
pub struct OperatorAuth {
    pub sender: i64,
}

#[async_trait]
impl FromRequestParts<AppContext> for OperatorAuth {
    type Rejection = VeilError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let sender = parts
            .headers
            .get(SENDER_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<i64>().ok());

        match sender {
            Some(sender) if state.authorizer.is_authorized(sender) => Ok(OperatorAuth { sender }),
            Some(sender) => {
                let message = format!("unauthorized management request from {}", sender);
                report_auth_failure(state.audit.as_ref(), &message).await;
                Err(VeilError::Unauthorized(message))
            }
            None => {
                report_auth_failure(state.audit.as_ref(), "management request without sender").await;
                Err(VeilError::Unauthorized("Missing sender".to_string()))
            }
        }
    }
}

/// Audit sink that keeps records in memory
#[cfg(test)]
#[derive(Default)]
pub struct MemoryAuditSink {
    pub records: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
#[async_trait]
impl AuthAuditSink for MemoryAuditSink {
    async fn log_auth_failure(&self, message: &str) -> VeilResult<()> {
        self.records.lock().unwrap().push(message.to_string());
        Ok(())
    }
}
