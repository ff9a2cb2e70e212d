//! Account table access.

use crate::error::{StoreError, StoreResult};
use alpha_core::{Account, LoginStatus};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::collections::HashMap;
use tracing::{debug, info};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id            INTEGER PRIMARY KEY,
    name          TEXT NOT NULL DEFAULT '',
    email         TEXT NOT NULL DEFAULT '',
    headers_json  TEXT NOT NULL DEFAULT '{}',
    cookies_json  TEXT,
    score         INTEGER NOT NULL DEFAULT 0,
    login_status  TEXT NOT NULL DEFAULT 'unknown',
    updated_at    TEXT NOT NULL DEFAULT (datetime('now'))
)
"#;

/// SQLite store for managed accounts.
pub struct AccountStore {
    pool: SqlitePool,
}

impl AccountStore {
    /// Open (and bootstrap) the store at the given sqlite URL.
    pub async fn open(url: &str) -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;
        sqlx::query(SCHEMA).execute(&pool).await?;
        info!(%url, "account store opened");
        Ok(Self { pool })
    }

    pub async fn account(&self, id: i64) -> StoreResult<Option<Account>> {
        let row = sqlx::query("SELECT * FROM accounts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_account).transpose()
    }

    /// Accounts with valid credentials, best score first.
    pub async fn valid_accounts(&self) -> StoreResult<Vec<Account>> {
        let rows = sqlx::query(
            "SELECT * FROM accounts WHERE login_status = 'valid' \
             ORDER BY score DESC, updated_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        let accounts: Vec<Account> = rows
            .into_iter()
            .map(row_to_account)
            .collect::<StoreResult<_>>()?;
        debug!(count = accounts.len(), "loaded valid accounts");
        Ok(accounts)
    }

    pub async fn all_ids(&self) -> StoreResult<Vec<i64>> {
        let rows = sqlx::query("SELECT id FROM accounts ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get::<i64, _>("id")).collect())
    }

    /// Persist a login-status transition (e.g. 401 ⇒ invalid).
    pub async fn set_login_status(&self, id: i64, status: LoginStatus) -> StoreResult<()> {
        sqlx::query(
            "UPDATE accounts SET login_status = ?, updated_at = datetime('now') WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;
        info!(account_id = id, status = %status, "login status updated");
        Ok(())
    }

    /// Insert or replace an account row. Used by seeding and tests; the
    /// production updater writes through its own pipeline.
    pub async fn upsert(&self, account: &Account) -> StoreResult<()> {
        let headers = serde_json::to_string(&account.auth_headers).map_err(|e| {
            StoreError::Corrupt {
                id: account.id,
                reason: e.to_string(),
            }
        })?;
        let cookies = account
            .auth_cookies
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::Corrupt {
                id: account.id,
                reason: e.to_string(),
            })?;
        sqlx::query(
            "INSERT OR REPLACE INTO accounts \
             (id, name, email, headers_json, cookies_json, score, login_status, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
        )
        .bind(account.id)
        .bind(&account.name)
        .bind(&account.email)
        .bind(headers)
        .bind(cookies)
        .bind(account.score)
        .bind(account.login_status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn row_to_account(row: SqliteRow) -> StoreResult<Account> {
    let id: i64 = row.get("id");
    let headers_json: String = row.get("headers_json");
    let cookies_json: Option<String> = row.get("cookies_json");
    let status_text: String = row.get("login_status");

    let auth_headers: HashMap<String, String> =
        serde_json::from_str(&headers_json).map_err(|e| StoreError::Corrupt {
            id,
            reason: format!("headers_json: {e}"),
        })?;
    let auth_cookies = cookies_json
        .map(|json| serde_json::from_str(&json))
        .transpose()
        .map_err(|e| StoreError::Corrupt {
            id,
            reason: format!("cookies_json: {e}"),
        })?;
    let login_status = status_text
        .parse::<LoginStatus>()
        .unwrap_or(LoginStatus::Unknown);

    Ok(Account {
        id,
        name: row.get("name"),
        email: row.get("email"),
        auth_headers,
        auth_cookies,
        score: row.get("score"),
        login_status,
    })
}
