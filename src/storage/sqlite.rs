use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{
    Account, AccountId, Credential, Transaction, TransactionId, TransactionType, User, UserId,
};

use super::{MIGRATION_001_INITIAL, Store, WriteBatch, WriteOp};

const USER_COLUMNS: &str =
    "id, name, credential_salt, credential_digest, account_count, max_accounts, created_at";
const ACCOUNT_COLUMNS: &str = "id, owner_id, balance, created_at";
const TRANSACTION_COLUMNS: &str = "id, sequence, account_id, recipient_id, amount, kind, timestamp";

/// Persistent store backed by SQLite.
///
/// Every [`WriteBatch`] runs inside one SQL transaction, so a failed batch is
/// rolled back by the database. Batches from this process are committed one
/// at a time; SQLite allows a single writer anyway.
pub struct SqliteStore {
    pool: SqlitePool,
    write_lock: Mutex<()>,
}

impl SqliteStore {
    /// Create a new store with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_lock: Mutex::new(()),
        }
    }

    /// Connect to a SQLite database URL.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Run database migrations. Safe to run more than once.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(database_url: &str) -> Result<Self> {
        let store = Self::connect(database_url).await?;
        store.migrate().await?;
        Ok(store)
    }

    /// Open a database file, creating it when missing.
    pub async fn open(path: &str) -> Result<Self> {
        Self::init(&format!("sqlite:{}?mode=rwc", path)).await
    }

    async fn write_op(
        conn: &mut sqlx::SqliteConnection,
        op: WriteOp,
        appended: &mut Vec<Transaction>,
    ) -> Result<()> {
        match op {
            WriteOp::PutUser(user) => {
                sqlx::query(
                    r#"
                    INSERT INTO users (id, name, credential_salt, credential_digest, account_count, max_accounts, created_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(id) DO UPDATE SET
                        name = excluded.name,
                        credential_salt = excluded.credential_salt,
                        credential_digest = excluded.credential_digest,
                        account_count = excluded.account_count,
                        max_accounts = excluded.max_accounts
                    "#,
                )
                .bind(user.id.to_string())
                .bind(&user.name)
                .bind(user.credential.salt())
                .bind(user.credential.digest())
                .bind(i64::from(user.account_count))
                .bind(i64::from(user.max_accounts))
                .bind(user.created_at.to_rfc3339())
                .execute(&mut *conn)
                .await
                .context("Failed to save user")?;
            }
            WriteOp::PutAccount(account) => {
                sqlx::query(
                    r#"
                    INSERT INTO accounts (id, owner_id, balance, created_at)
                    VALUES (?, ?, ?, ?)
                    ON CONFLICT(id) DO UPDATE SET balance = excluded.balance
                    "#,
                )
                .bind(account.id.to_string())
                .bind(account.owner.to_string())
                .bind(account.balance.to_string())
                .bind(account.created_at.to_rfc3339())
                .execute(&mut *conn)
                .await
                .context("Failed to save account")?;
            }
            WriteOp::DeleteUser(id) => {
                sqlx::query("DELETE FROM users WHERE id = ?")
                    .bind(id.to_string())
                    .execute(&mut *conn)
                    .await
                    .context("Failed to delete user")?;
            }
            WriteOp::DeleteAccount(id) => {
                sqlx::query("DELETE FROM accounts WHERE id = ?")
                    .bind(id.to_string())
                    .execute(&mut *conn)
                    .await
                    .context("Failed to delete account")?;
            }
            WriteOp::AppendTransaction(mut tx) => {
                tx.sequence = Self::next_sequence(&mut *conn).await?;
                sqlx::query(
                    r#"
                    INSERT INTO transactions (id, sequence, account_id, recipient_id, amount, kind, timestamp)
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(tx.id.to_string())
                .bind(tx.sequence)
                .bind(tx.account.to_string())
                .bind(tx.recipient.map(|id| id.to_string()))
                .bind(tx.amount.to_string())
                .bind(tx.kind.as_str())
                .bind(tx.timestamp.to_rfc3339())
                .execute(&mut *conn)
                .await
                .context("Failed to append transaction")?;
                appended.push(tx);
            }
        }
        Ok(())
    }

    /// Get the next sequence number and increment the counter.
    async fn next_sequence(conn: &mut sqlx::SqliteConnection) -> Result<i64> {
        let row = sqlx::query(
            r#"
            UPDATE sequence_counter
            SET value = value + 1
            WHERE name = 'transaction_sequence'
            RETURNING value
            "#,
        )
        .fetch_one(conn)
        .await
        .context("Failed to get next sequence number")?;

        Ok(row.get("value"))
    }

    async fn fetch_users(&self, sql: &str, bind: Option<String>) -> Result<Vec<User>> {
        let mut query = sqlx::query::<Sqlite>(sql);
        if let Some(value) = bind {
            query = query.bind(value);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch users")?;
        rows.iter().map(Self::row_to_user).collect()
    }

    async fn fetch_accounts(&self, sql: &str, bind: Option<String>) -> Result<Vec<Account>> {
        let mut query = sqlx::query::<Sqlite>(sql);
        if let Some(value) = bind {
            query = query.bind(value);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch accounts")?;
        rows.iter().map(Self::row_to_account).collect()
    }

    async fn fetch_transactions(&self, sql: &str, bind: Option<String>) -> Result<Vec<Transaction>> {
        let mut query = sqlx::query::<Sqlite>(sql);
        if let Some(value) = bind {
            query = query.bind(value);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch transactions")?;
        rows.iter().map(Self::row_to_transaction).collect()
    }

    fn row_to_user(row: &SqliteRow) -> Result<User> {
        let id_str: String = row.get("id");
        let salt: String = row.get("credential_salt");
        let digest: String = row.get("credential_digest");
        let account_count: i64 = row.get("account_count");
        let max_accounts: i64 = row.get("max_accounts");

        Ok(User {
            id: Uuid::parse_str(&id_str).context("Invalid user ID")?,
            name: row.get("name"),
            credential: Credential::from_parts(salt, digest),
            account_count: u32::try_from(account_count).context("Invalid account_count")?,
            max_accounts: u32::try_from(max_accounts).context("Invalid max_accounts")?,
            created_at: parse_timestamp(row.get("created_at"))?,
        })
    }

    fn row_to_account(row: &SqliteRow) -> Result<Account> {
        let id_str: String = row.get("id");
        let owner_str: String = row.get("owner_id");
        let balance_str: String = row.get("balance");

        Ok(Account {
            id: Uuid::parse_str(&id_str).context("Invalid account ID")?,
            owner: Uuid::parse_str(&owner_str).context("Invalid owner ID")?,
            balance: Decimal::from_str(&balance_str).context("Invalid balance")?,
            created_at: parse_timestamp(row.get("created_at"))?,
        })
    }

    fn row_to_transaction(row: &SqliteRow) -> Result<Transaction> {
        let id_str: String = row.get("id");
        let account_str: String = row.get("account_id");
        let recipient_str: Option<String> = row.get("recipient_id");
        let amount_str: String = row.get("amount");
        let kind_str: String = row.get("kind");

        Ok(Transaction {
            id: Uuid::parse_str(&id_str).context("Invalid transaction ID")?,
            sequence: row.get("sequence"),
            account: Uuid::parse_str(&account_str).context("Invalid account ID")?,
            recipient: recipient_str
                .map(|s| Uuid::parse_str(&s))
                .transpose()
                .context("Invalid recipient ID")?,
            amount: Decimal::from_str(&amount_str).context("Invalid amount")?,
            kind: TransactionType::from_str(&kind_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid transaction kind: {}", kind_str))?,
            timestamp: parse_timestamp(row.get("timestamp"))?,
        })
    }
}

fn parse_timestamp(value: String) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(&value)
        .context("Invalid timestamp")?
        .with_timezone(&Utc))
}

#[async_trait]
impl Store for SqliteStore {
    async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS);
        Ok(self
            .fetch_users(&sql, Some(id.to_string()))
            .await?
            .into_iter()
            .next())
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let sql = format!("SELECT {} FROM users ORDER BY created_at, id", USER_COLUMNS);
        self.fetch_users(&sql, None).await
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        let sql = format!("SELECT {} FROM accounts WHERE id = ?", ACCOUNT_COLUMNS);
        Ok(self
            .fetch_accounts(&sql, Some(id.to_string()))
            .await?
            .into_iter()
            .next())
    }

    async fn list_accounts(&self) -> Result<Vec<Account>> {
        let sql = format!(
            "SELECT {} FROM accounts ORDER BY created_at, id",
            ACCOUNT_COLUMNS
        );
        self.fetch_accounts(&sql, None).await
    }

    async fn list_accounts_by_owner(&self, owner: UserId) -> Result<Vec<Account>> {
        let sql = format!(
            "SELECT {} FROM accounts WHERE owner_id = ? ORDER BY created_at, id",
            ACCOUNT_COLUMNS
        );
        self.fetch_accounts(&sql, Some(owner.to_string())).await
    }

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>> {
        let sql = format!(
            "SELECT {} FROM transactions WHERE id = ?",
            TRANSACTION_COLUMNS
        );
        Ok(self
            .fetch_transactions(&sql, Some(id.to_string()))
            .await?
            .into_iter()
            .next())
    }

    async fn list_transactions(&self) -> Result<Vec<Transaction>> {
        let sql = format!(
            "SELECT {} FROM transactions ORDER BY sequence",
            TRANSACTION_COLUMNS
        );
        self.fetch_transactions(&sql, None).await
    }

    async fn list_transactions_by_account(&self, account: AccountId) -> Result<Vec<Transaction>> {
        let sql = format!(
            "SELECT {} FROM transactions WHERE account_id = ? ORDER BY sequence",
            TRANSACTION_COLUMNS
        );
        self.fetch_transactions(&sql, Some(account.to_string()))
            .await
    }

    async fn apply(&self, batch: WriteBatch) -> Result<Vec<Transaction>> {
        let _writer = self.write_lock.lock().await;
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;
        let mut appended = Vec::new();

        for op in batch.into_ops() {
            // Dropping `tx` on error rolls the whole batch back.
            Self::write_op(&mut *tx, op, &mut appended).await?;
        }

        tx.commit().await.context("Failed to commit batch")?;
        Ok(appended)
    }
}
