/// Account store backed by SQLite
///
/// Uses sqlx runtime queries so no DATABASE_URL is needed at compile time.
/// Every mutation runs under a single-writer lock and inside a transaction, so a
/// create/delete race or two concurrent extends never lose an update, and a
/// delete is never undone by a later update.
use crate::{
    clock::truncate_millis,
    db::account::{Account, NewAccount, Protocol, ProtocolFamily},
    error::{VeilError, VeilResult},
};
use chrono::{DateTime, TimeDelta, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection, SqlitePool};
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;

const ACCOUNT_COLUMNS: &str = "id, username, protocol, identifier, secret, expires_at, \
                               device_limit, banned, created_at, updated_at";

/// Durable CRUD over account records
pub struct AccountStore {
    db: SqlitePool,
    write_lock: Mutex<()>,
    op_timeout: Duration,
}

impl AccountStore {
    /// Create a new account store; every operation is bounded by `op_timeout`
    pub fn new(db: SqlitePool, op_timeout: Duration) -> Self {
        Self {
            db,
            write_lock: Mutex::new(()),
            op_timeout,
        }
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> VeilResult<T>
    where
        F: Future<Output = VeilResult<T>>,
    {
        tokio::time::timeout(self.op_timeout, fut)
            .await
            .map_err(|_| VeilError::Timeout(op))?
    }

    /// Insert a new account. Fails with `Duplicate` when the username is taken.
    pub async fn insert(&self, new: NewAccount, now: DateTime<Utc>) -> VeilResult<Account> {
        self.bounded("account insert", async {
            let _guard = self.write_lock.lock().await;

            let now = truncate_millis(now);
            let expires_at = truncate_millis(new.expires_at);

            let result = sqlx::query(
                "INSERT INTO account (username, protocol, identifier, secret, expires_at, device_limit, banned, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, 0, ?6, ?6)",
            )
            .bind(&new.username)
            .bind(new.protocol.as_str())
            .bind(&new.identifier)
            .bind(&new.secret)
            .bind(expires_at.timestamp_millis())
            .bind(now.timestamp_millis())
            .execute(&self.db)
            .await
            .map_err(|e| VeilError::from_insert(e, &new.username))?;

            Ok(Account {
                id: result.last_insert_rowid(),
                username: new.username,
                protocol: new.protocol,
                identifier: new.identifier,
                secret: new.secret,
                expires_at,
                device_limit: 0,
                banned: false,
                created_at: now,
                updated_at: now,
            })
        })
        .await
    }

    /// Get account by username
    pub async fn find_by_username(&self, username: &str) -> VeilResult<Account> {
        self.bounded("account lookup", async {
            let mut conn = self.db.acquire().await?;
            Self::fetch_by_username(&mut conn, username).await
        })
        .await
    }

    /// Persist the mutable fields of an existing account.
    ///
    /// Returns `NotFound` if the row no longer exists; a vanished row is never re-created.
    pub async fn update(&self, account: &Account) -> VeilResult<()> {
        self.bounded("account update", async {
            let _guard = self.write_lock.lock().await;
            let mut conn = self.db.acquire().await?;
            Self::write_row(&mut conn, account).await
        })
        .await
    }

    /// Add `days` to an account's expiry in one read-modify-write transaction
    pub async fn extend(
        &self,
        username: &str,
        days: i64,
        now: DateTime<Utc>,
    ) -> VeilResult<Account> {
        if days <= 0 {
            return Err(VeilError::Validation(
                "Days must be a positive integer".to_string(),
            ));
        }

        self.bounded("account extend", async {
            let _guard = self.write_lock.lock().await;
            let mut tx = self.db.begin().await?;

            let mut account = Self::fetch_by_username(&mut tx, username).await?;
            account.expires_at = TimeDelta::try_days(days)
                .and_then(|delta| account.expires_at.checked_add_signed(delta))
                .ok_or_else(|| VeilError::Validation("Days out of range".to_string()))?;
            account.updated_at = truncate_millis(now);
            Self::write_row(&mut tx, &account).await?;

            tx.commit().await?;
            Ok(account)
        })
        .await
    }

    /// Remove an account record
    pub async fn delete(&self, account: &Account) -> VeilResult<()> {
        self.bounded("account delete", async {
            let _guard = self.write_lock.lock().await;
            let mut conn = self.db.acquire().await?;
            Self::delete_row(&mut conn, account).await
        })
        .await
    }

    /// Remove `account` only if it is still expired at `now`.
    ///
    /// Returns false when the row is gone or was extended since it was read.
    pub async fn delete_if_expired(&self, account: &Account, now: DateTime<Utc>) -> VeilResult<bool> {
        self.bounded("account expire", async {
            let _guard = self.write_lock.lock().await;
            let result = sqlx::query(
                "DELETE FROM account WHERE id = ?1 AND username = ?2 AND expires_at < ?3",
            )
            .bind(account.id)
            .bind(&account.username)
            .bind(now.timestamp_millis())
            .execute(&self.db)
            .await?;

            Ok(result.rows_affected() > 0)
        })
        .await
    }

    /// Look up and remove an account atomically, returning the removed record
    pub async fn delete_by_username(&self, username: &str) -> VeilResult<Account> {
        self.bounded("account delete", async {
            let _guard = self.write_lock.lock().await;
            let mut tx = self.db.begin().await?;

            let account = Self::fetch_by_username(&mut tx, username).await?;
            Self::delete_row(&mut tx, &account).await?;

            tx.commit().await?;
            Ok(account)
        })
        .await
    }

    /// All accounts on one protocol, ordered by username
    pub async fn find_all_by_protocol(&self, protocol: Protocol) -> VeilResult<Vec<Account>> {
        self.bounded("account list", async {
            let sql = format!(
                "SELECT {} FROM account WHERE protocol = ?1 ORDER BY username",
                ACCOUNT_COLUMNS
            );
            let rows = sqlx::query(&sql)
                .bind(protocol.as_str())
                .fetch_all(&self.db)
                .await?;

            rows.iter().map(account_from_row).collect()
        })
        .await
    }

    /// Non-expired accounts of a protocol family, ordered by username
    pub async fn find_active_by_family(
        &self,
        family: ProtocolFamily,
        now: DateTime<Utc>,
    ) -> VeilResult<Vec<Account>> {
        self.bounded("account list", async {
            let protocols = family.protocols();
            let placeholders = (0..protocols.len())
                .map(|i| format!("?{}", i + 2))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "SELECT {} FROM account WHERE expires_at >= ?1 AND protocol IN ({}) ORDER BY username",
                ACCOUNT_COLUMNS, placeholders
            );

            let mut query = sqlx::query(&sql).bind(now.timestamp_millis());
            for protocol in protocols {
                query = query.bind(protocol.as_str());
            }
            let rows = query.fetch_all(&self.db).await?;

            rows.iter().map(account_from_row).collect()
        })
        .await
    }

    /// Accounts whose expiry is strictly before `now`
    pub async fn find_expired(&self, now: DateTime<Utc>) -> VeilResult<Vec<Account>> {
        self.bounded("expired lookup", async {
            let sql = format!(
                "SELECT {} FROM account WHERE expires_at < ?1 ORDER BY expires_at, username",
                ACCOUNT_COLUMNS
            );
            let rows = sqlx::query(&sql)
                .bind(now.timestamp_millis())
                .fetch_all(&self.db)
                .await?;

            rows.iter().map(account_from_row).collect()
        })
        .await
    }

    pub async fn count_active(&self, now: DateTime<Utc>) -> VeilResult<i64> {
        self.count_where("expires_at >= ?1", now).await
    }

    pub async fn count_expired(&self, now: DateTime<Utc>) -> VeilResult<i64> {
        self.count_where("expires_at < ?1", now).await
    }

    async fn count_where(&self, predicate: &str, now: DateTime<Utc>) -> VeilResult<i64> {
        self.bounded("account count", async {
            let sql = format!("SELECT COUNT(*) FROM account WHERE {}", predicate);
            let count: i64 = sqlx::query_scalar(&sql)
                .bind(now.timestamp_millis())
                .fetch_one(&self.db)
                .await?;
            Ok(count)
        })
        .await
    }

    async fn fetch_by_username(
        conn: &mut SqliteConnection,
        username: &str,
    ) -> VeilResult<Account> {
        let sql = format!("SELECT {} FROM account WHERE username = ?1", ACCOUNT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(username)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| VeilError::NotFound(format!("Account {} not found", username)))?;

        account_from_row(&row)
    }

    async fn write_row(conn: &mut SqliteConnection, account: &Account) -> VeilResult<()> {
        let result = sqlx::query(
            "UPDATE account SET expires_at = ?1, device_limit = ?2, banned = ?3, updated_at = ?4
             WHERE id = ?5 AND username = ?6",
        )
        .bind(account.expires_at.timestamp_millis())
        .bind(account.device_limit)
        .bind(account.banned)
        .bind(account.updated_at.timestamp_millis())
        .bind(account.id)
        .bind(&account.username)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(VeilError::NotFound(format!(
                "Account {} not found",
                account.username
            )));
        }
        Ok(())
    }

    async fn delete_row(conn: &mut SqliteConnection, account: &Account) -> VeilResult<()> {
        let result = sqlx::query("DELETE FROM account WHERE id = ?1 AND username = ?2")
            .bind(account.id)
            .bind(&account.username)
            .execute(&mut *conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(VeilError::NotFound(format!(
                "Account {} not found",
                account.username
            )));
        }
        Ok(())
    }
}

fn account_from_row(row: &SqliteRow) -> VeilResult<Account> {
    let tag: String = row.try_get("protocol")?;
    let protocol = Protocol::from_str(&tag)
        .map_err(|_| VeilError::Internal(format!("Unknown protocol tag in store: {}", tag)))?;

    Ok(Account {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        protocol,
        identifier: row.try_get("identifier")?,
        secret: row.try_get("secret")?,
        expires_at: millis_to_utc(row.try_get("expires_at")?)?,
        device_limit: row.try_get("device_limit")?,
        banned: row.try_get("banned")?,
        created_at: millis_to_utc(row.try_get("created_at")?)?,
        updated_at: millis_to_utc(row.try_get("updated_at")?)?,
    })
}

pub(crate) fn millis_to_utc(ms: i64) -> VeilResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| VeilError::Internal(format!("Timestamp out of range: {}", ms)))
}
