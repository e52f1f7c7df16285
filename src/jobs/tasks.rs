/// Background task implementations
use crate::{
    account::AccountStore,
    clock::SharedClock,
    db::account::ProtocolFamily,
    error::VeilResult,
    metrics,
    publish::ConfigSync,
};
use std::collections::BTreeSet;
use std::sync::Arc;

/// What one sweep tick did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired accounts found at the start of the tick
    pub expired: usize,
    pub removed: Vec<String>,
    /// Accounts whose removal failed; retried on the next tick
    pub failed: Vec<String>,
    pub refreshed: Vec<ProtocolFamily>,
}

/// Removes expired accounts and republishes the families they belonged to
pub struct ExpirationSweeper {
    store: Arc<AccountStore>,
    sync: Arc<ConfigSync>,
    clock: SharedClock,
}

impl ExpirationSweeper {
    pub fn new(store: Arc<AccountStore>, sync: Arc<ConfigSync>, clock: SharedClock) -> Self {
        Self { store, sync, clock }
    }

    /// Run one sweep at the clock's current time.
    ///
    /// A failure on one account is logged and the rest are still processed. Each
    /// affected family is republished once, after all removals.
    pub async fn run_once(&self) -> VeilResult<SweepReport> {
        let now = self.clock.utc();
        let expired = self.store.find_expired(now).await?;

        let mut report = SweepReport {
            expired: expired.len(),
            ..SweepReport::default()
        };
        if expired.is_empty() {
            return Ok(report);
        }

        let mut families = BTreeSet::new();
        for account in &expired {
            match self.store.delete_if_expired(account, now).await {
                Ok(true) => {
                    metrics::record_account_removed("expired");
                    tracing::info!(
                        "Removed expired account: {} ({}, expired {})",
                        account.username,
                        account.protocol,
                        account.expires_at
                    );
                    families.insert(account.protocol.family());
                    report.removed.push(account.username.clone());
                }
                Ok(false) => {
                    tracing::info!(
                        "Skipping {}: deleted or extended since the sweep started",
                        account.username
                    );
                }
                Err(e) => {
                    tracing::warn!("Failed to remove expired account {}: {}", account.username, e);
                    report.failed.push(account.username.clone());
                }
            }
        }

        for family in families {
            // ConfigSync logs the failure; the next change or tick retries it
            if self.sync.on_accounts_changed(family).await.is_ok() {
                report.refreshed.push(family);
            }
        }

        Ok(report)
    }
}

/// Health check - verify the account database answers
pub async fn health_check(store: &AccountStore, clock: &SharedClock) -> VeilResult<()> {
    store.count_active(clock.utc()).await?;
    Ok(())
}
