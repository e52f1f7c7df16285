/// Application context and dependency injection
use crate::{
    account::{AccountStore, SettingsStore},
    auth::{Authorizer, FileAuthAuditLog, SharedAuditSink},
    clock::{system_clock, SharedClock},
    config::ServerConfig,
    conversation::{InMemorySessionStore, Provisioner},
    credentials::CredentialFactory,
    db::{self, account::Settings},
    error::{VeilError, VeilResult},
    jobs::ExpirationSweeper,
    publish::{ConfigPublisher, ConfigSync},
};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    pub settings: Settings,
    pub clock: SharedClock,
    pub account_store: Arc<AccountStore>,
    pub config_sync: Arc<ConfigSync>,
    pub provisioner: Arc<Provisioner>,
    pub sweeper: Arc<ExpirationSweeper>,
    pub authorizer: Authorizer,
    pub audit: SharedAuditSink,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> VeilResult<Self> {
        config.validate()?;

        Self::ensure_directories(&config).await?;

        let db = db::create_pool(&config.storage.account_db, db::DatabaseOptions::default()).await?;
        db::run_migrations(&db).await?;
        db::test_connection(&db).await?;

        Self::with_pool(config, db, system_clock()).await
    }

    /// Wire every service on top of an already migrated pool
    pub async fn with_pool(
        config: ServerConfig,
        db: SqlitePool,
        clock: SharedClock,
    ) -> VeilResult<Self> {
        let settings = SettingsStore::new(db.clone())
            .ensure(
                config.operator.admin_id,
                &config.operator.bot_token,
                &config.operator.domain,
                clock.utc(),
            )
            .await?;
        if settings.admin_id != config.operator.admin_id {
            tracing::warn!(
                "Settings for {} keep admin id {}; configured id {} is ignored",
                settings.domain,
                settings.admin_id,
                config.operator.admin_id
            );
        }

        let op_timeout = Duration::from_secs(config.jobs.operation_timeout_secs);
        let account_store = Arc::new(AccountStore::new(db.clone(), op_timeout));

        let publisher = ConfigPublisher::new(
            config.publish.xray_config_path.clone(),
            config.publish.hysteria_config_path.clone(),
        );
        let config_sync = Arc::new(ConfigSync::new(
            account_store.clone(),
            publisher,
            clock.clone(),
            settings.domain.clone(),
            op_timeout,
        ));

        let authorizer = Authorizer::new(settings.admin_id);
        let audit: SharedAuditSink = Arc::new(FileAuthAuditLog::new(
            config.audit.auth_log_path.clone(),
            clock.clone(),
        ));

        let provisioner = Arc::new(Provisioner::new(
            account_store.clone(),
            config_sync.clone(),
            Arc::new(InMemorySessionStore::new()),
            CredentialFactory,
            authorizer,
            audit.clone(),
            clock.clone(),
            settings.domain.clone(),
        ));

        let sweeper = Arc::new(ExpirationSweeper::new(
            account_store.clone(),
            config_sync.clone(),
            clock.clone(),
        ));

        Ok(Self {
            config: Arc::new(config),
            db,
            settings,
            clock,
            account_store,
            config_sync,
            provisioner,
            sweeper,
            authorizer,
            audit,
        })
    }

    /// Ensure required directories exist
    async fn ensure_directories(config: &ServerConfig) -> VeilResult<()> {
        let dir = &config.storage.data_directory;
        if !dir.exists() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                VeilError::Internal(format!("Failed to create directory {:?}: {}", dir, e))
            })?;
        }

        Ok(())
    }

    /// Get service URL
    pub fn service_url(&self) -> String {
        format!("http://{}", self.config.bind_address())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::{clock::testing::ManualClock, db::test_pool};
    use chrono::Utc;
    use std::collections::HashMap;
    use tempfile::TempDir;

    pub const ADMIN_ID: i64 = 4242;

    /// Context on an in-memory database with documents under `dir`
    pub async fn test_context(dir: &TempDir) -> (AppContext, Arc<ManualClock>) {
        let vars: HashMap<&str, String> = HashMap::from([
            ("VEILGATE_DOMAIN", "vpn.example.com".to_string()),
            ("VEILGATE_ADMIN_ID", ADMIN_ID.to_string()),
            ("VEILGATE_BOT_TOKEN", "test-token".to_string()),
            (
                "VEILGATE_DATA_DIRECTORY",
                dir.path().display().to_string(),
            ),
            (
                "VEILGATE_XRAY_CONFIG_PATH",
                dir.path().join("xray/config.json").display().to_string(),
            ),
            (
                "VEILGATE_HYSTERIA_CONFIG_PATH",
                dir.path().join("hysteria/config.yaml").display().to_string(),
            ),
            (
                "VEILGATE_AUTH_LOG_PATH",
                dir.path().join("auth.log").display().to_string(),
            ),
        ]);
        let config = ServerConfig::from_lookup(|key| vars.get(key).cloned()).unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));

        let ctx = AppContext::with_pool(config, test_pool().await, clock.clone())
            .await
            .unwrap();
        (ctx, clock)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{test_context, ADMIN_ID};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_context_persists_settings() {
        let dir = tempdir().unwrap();
        let (ctx, _clock) = test_context(&dir).await;

        assert_eq!(ctx.settings.domain, "vpn.example.com");
        assert_eq!(ctx.settings.admin_id, ADMIN_ID);
        assert!(ctx.authorizer.is_authorized(ADMIN_ID));
        assert_eq!(ctx.service_url(), "http://127.0.0.1:8087");
    }
}
