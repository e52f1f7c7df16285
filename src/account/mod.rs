/// Account management
///
/// Durable storage for provisioned proxy accounts and the operator settings row.

mod settings;
mod store;

pub use settings::SettingsStore;
pub use store::AccountStore;

use crate::error::VeilResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Active/expired account counts reported by the user summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    pub active: i64,
    pub expired: i64,
}

impl AccountStore {
    /// Count active and expired accounts at `now`
    pub async fn summary(&self, now: DateTime<Utc>) -> VeilResult<AccountSummary> {
        Ok(AccountSummary {
            active: self.count_active(now).await?,
            expired: self.count_expired(now).await?,
        })
    }
}
