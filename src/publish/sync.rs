/// Store → synthesize → publish for one protocol family
use super::ConfigPublisher;
use crate::{
    account::AccountStore,
    clock::SharedClock,
    db::account::ProtocolFamily,
    error::{VeilError, VeilResult},
    metrics,
    synthesis::synthesize,
};
use serde::Serialize;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tracing::{error, info};

/// Result of one family refresh
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FamilyRefresh {
    pub family: ProtocolFamily,
    pub path: PathBuf,
    pub clients: usize,
    pub digest: String,
}

/// Regenerates family documents from the current store.
///
/// Refreshes of the same family run one at a time and each takes its snapshot
/// inside the lock, so the last publish always reflects the latest commit.
pub struct ConfigSync {
    store: Arc<AccountStore>,
    publisher: ConfigPublisher,
    clock: SharedClock,
    domain: String,
    xray_lock: Arc<Mutex<()>>,
    hysteria_lock: Arc<Mutex<()>>,
    op_timeout: Duration,
}

impl ConfigSync {
    pub fn new(
        store: Arc<AccountStore>,
        publisher: ConfigPublisher,
        clock: SharedClock,
        domain: String,
        op_timeout: Duration,
    ) -> Self {
        Self {
            store,
            publisher,
            clock,
            domain,
            xray_lock: Arc::new(Mutex::new(())),
            hysteria_lock: Arc::new(Mutex::new(())),
            op_timeout,
        }
    }

    pub fn publisher(&self) -> &ConfigPublisher {
        &self.publisher
    }

    fn lock_for(&self, family: ProtocolFamily) -> Arc<Mutex<()>> {
        match family {
            ProtocolFamily::Xray => Arc::clone(&self.xray_lock),
            ProtocolFamily::Hysteria => Arc::clone(&self.hysteria_lock),
        }
    }

    /// Rebuild and publish the document for `family`
    pub async fn on_accounts_changed(&self, family: ProtocolFamily) -> VeilResult<FamilyRefresh> {
        let result = self.refresh(family).await;
        metrics::record_config_publish(family.as_str(), result.is_ok());

        match &result {
            Ok(refresh) => info!(
                family = %refresh.family,
                clients = refresh.clients,
                digest = %refresh.digest,
                path = %refresh.path.display(),
                "Published config document"
            ),
            Err(e) => error!(family = %family, "Failed to publish config document: {}", e),
        }

        result
    }

    async fn refresh(&self, family: ProtocolFamily) -> VeilResult<FamilyRefresh> {
        let guard = tokio::time::timeout(self.op_timeout, self.lock_for(family).lock_owned())
            .await
            .map_err(|_| VeilError::Timeout("config lock"))?;

        let now = self.clock.utc();
        let accounts = self.store.find_active_by_family(family, now).await?;
        let document = synthesize(family, &accounts, &self.domain)?;
        let clients = document.clients;
        let digest = document.digest();

        // The write owns the family lock, so a publish abandoned on timeout still
        // completes before the next refresh of the family starts.
        let publisher = self.publisher.clone();
        let write = tokio::spawn(async move {
            let _guard = guard;
            publisher.publish(&document).await
        });

        let path = tokio::time::timeout(self.op_timeout, write)
            .await
            .map_err(|_| VeilError::Timeout("config publish"))?
            .map_err(|e| VeilError::Internal(format!("Publish task failed: {}", e)))??;

        Ok(FamilyRefresh {
            family,
            path,
            clients,
            digest,
        })
    }

    /// Refresh every family, logging failures instead of returning them
    pub async fn refresh_all(&self) -> Vec<FamilyRefresh> {
        let mut refreshed = Vec::new();
        for family in ProtocolFamily::ALL {
            if let Ok(refresh) = self.on_accounts_changed(family).await {
                refreshed.push(refresh);
            }
        }
        refreshed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::testing::ManualClock,
        db::{
            account::{NewAccount, Protocol},
            test_pool,
        },
    };
    use chrono::{TimeDelta, Utc};
    use tempfile::{tempdir, TempDir};

    async fn setup() -> (Arc<AccountStore>, ConfigSync, Arc<ManualClock>, TempDir) {
        let pool = test_pool().await;
        let store = Arc::new(AccountStore::new(pool, Duration::from_secs(5)));
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let sync = ConfigSync::new(
            store.clone(),
            ConfigPublisher::new(
                dir.path().join("xray/config.json"),
                dir.path().join("hysteria/config.yaml"),
            ),
            clock.clone(),
            "vpn.example.com".to_string(),
            Duration::from_secs(5),
        );
        (store, sync, clock, dir)
    }

    fn new_account(username: &str, protocol: Protocol, expires_in: TimeDelta) -> NewAccount {
        NewAccount {
            username: username.to_string(),
            protocol,
            identifier: uuid::Uuid::new_v4().to_string(),
            secret: hex::encode(uuid::Uuid::new_v4().as_bytes()),
            expires_at: Utc::now() + expires_in,
        }
    }

    #[tokio::test]
    async fn test_refresh_publishes_active_accounts_only() {
        let (store, sync, _clock, dir) = setup().await;
        let now = Utc::now();
        store
            .insert(new_account("alice", Protocol::Vless, TimeDelta::days(1)), now)
            .await
            .unwrap();
        store
            .insert(new_account("old", Protocol::Trojan, TimeDelta::days(-1)), now)
            .await
            .unwrap();

        let refresh = sync.on_accounts_changed(ProtocolFamily::Xray).await.unwrap();
        assert_eq!(refresh.clients, 1);

        let body = std::fs::read_to_string(dir.path().join("xray/config.json")).unwrap();
        assert!(body.contains("\"alice\""));
        assert!(!body.contains("\"old\""));
    }

    #[tokio::test]
    async fn test_refresh_is_idempotent() {
        let (store, sync, _clock, _dir) = setup().await;
        store
            .insert(
                new_account("dan", Protocol::Hysteria2, TimeDelta::days(3)),
                Utc::now(),
            )
            .await
            .unwrap();

        let first = sync.on_accounts_changed(ProtocolFamily::Hysteria).await.unwrap();
        let second = sync.on_accounts_changed(ProtocolFamily::Hysteria).await.unwrap();
        assert_eq!(first.digest, second.digest);
    }

    #[tokio::test]
    async fn test_refresh_uses_clock_for_activity() {
        let (store, sync, clock, dir) = setup().await;
        store
            .insert(
                new_account("eve", Protocol::Hysteria2, TimeDelta::hours(1)),
                Utc::now(),
            )
            .await
            .unwrap();

        clock.advance(TimeDelta::hours(2));
        let refresh = sync.on_accounts_changed(ProtocolFamily::Hysteria).await.unwrap();

        assert_eq!(refresh.clients, 0);
        let body = std::fs::read_to_string(dir.path().join("hysteria/config.yaml")).unwrap();
        assert!(!body.contains("eve"));
    }

    #[tokio::test]
    async fn test_refresh_times_out_while_family_is_busy() {
        let (store, _sync, clock, dir) = setup().await;
        let sync = ConfigSync::new(
            store,
            ConfigPublisher::new(
                dir.path().join("xray/config.json"),
                dir.path().join("hysteria/config.yaml"),
            ),
            clock,
            "vpn.example.com".to_string(),
            Duration::from_millis(50),
        );

        let busy = sync.lock_for(ProtocolFamily::Xray).lock_owned().await;
        let result = sync.on_accounts_changed(ProtocolFamily::Xray).await;
        assert!(matches!(result, Err(VeilError::Timeout(_))));
        assert!(!dir.path().join("xray").exists());

        drop(busy);
        sync.on_accounts_changed(ProtocolFamily::Xray).await.unwrap();
        let entries: Vec<String> = std::fs::read_dir(dir.path().join("xray"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec!["config.json".to_string()]);
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_end_with_latest_state() {
        let (store, sync, _clock, dir) = setup().await;
        let sync = Arc::new(sync);

        let mut handles = Vec::new();
        for i in 0..5 {
            let store = store.clone();
            let sync = sync.clone();
            handles.push(tokio::spawn(async move {
                store
                    .insert(
                        new_account(&format!("user{}", i), Protocol::Vmess, TimeDelta::days(1)),
                        Utc::now(),
                    )
                    .await
                    .unwrap();
                sync.on_accounts_changed(ProtocolFamily::Xray).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let body = std::fs::read_to_string(dir.path().join("xray/config.json")).unwrap();
        for i in 0..5 {
            assert!(body.contains(&format!("\"user{}\"", i)));
        }
    }
}
