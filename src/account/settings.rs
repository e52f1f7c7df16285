/// Operator settings, created once at bootstrap and read-only afterwards
use crate::{
    account::store::millis_to_utc,
    db::account::Settings,
    error::{VeilError, VeilResult},
};
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

/// Settings store
#[derive(Clone)]
pub struct SettingsStore {
    db: SqlitePool,
}

impl SettingsStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Return the settings row for `domain`, creating it on first boot.
    ///
    /// An existing row is returned unchanged.
    pub async fn ensure(
        &self,
        admin_id: i64,
        bot_token: &str,
        domain: &str,
        now: DateTime<Utc>,
    ) -> VeilResult<Settings> {
        sqlx::query(
            "INSERT INTO settings (admin_id, bot_token, domain, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(domain) DO NOTHING",
        )
        .bind(admin_id)
        .bind(bot_token)
        .bind(domain)
        .bind(now.timestamp_millis())
        .execute(&self.db)
        .await?;

        self.get(domain).await
    }

    /// Get settings for a domain
    pub async fn get(&self, domain: &str) -> VeilResult<Settings> {
        let row = sqlx::query(
            "SELECT id, admin_id, bot_token, domain, created_at, updated_at
             FROM settings WHERE domain = ?1",
        )
        .bind(domain)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| VeilError::NotFound(format!("No settings for domain {}", domain)))?;

        settings_from_row(&row)
    }
}

fn settings_from_row(row: &SqliteRow) -> VeilResult<Settings> {
    Ok(Settings {
        id: row.try_get("id")?,
        admin_id: row.try_get("admin_id")?,
        bot_token: row.try_get("bot_token")?,
        domain: row.try_get("domain")?,
        created_at: millis_to_utc(row.try_get("created_at")?)?,
        updated_at: millis_to_utc(row.try_get("updated_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[tokio::test]
    async fn test_ensure_is_first_or_create() {
        let store = SettingsStore::new(test_pool().await);
        let now = Utc::now();

        let first = store.ensure(42, "token-a", "vpn.example.com", now).await.unwrap();
        let second = store.ensure(99, "token-b", "vpn.example.com", now).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(second.admin_id, 42);
        assert_eq!(second.bot_token, "token-a");
    }

    #[tokio::test]
    async fn test_get_missing_domain() {
        let store = SettingsStore::new(test_pool().await);
        assert!(matches!(
            store.get("nowhere.example.com").await,
            Err(VeilError::NotFound(_))
        ));
    }
}
