// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use coffer::application::{Ledger, LedgerConfig};
use coffer::domain::{Account, AccountId, Amount, Transaction, TransactionId, User, UserId};
use coffer::storage::{MemoryStore, Store, WriteBatch};
use rust_decimal::Decimal;
use tempfile::TempDir;

/// Parse a decimal literal like "100.50"
pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

/// Helper to create a ledger over a fresh in-memory store
pub fn memory_ledger() -> Ledger {
    Ledger::in_memory(LedgerConfig::default())
}

/// Helper to create a ledger with a temporary SQLite database
pub async fn sqlite_ledger() -> Result<(Ledger, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let ledger = Ledger::open(db_path.to_str().unwrap(), LedgerConfig::default()).await?;
    Ok((ledger, temp_dir))
}

/// Create a user owning one account that holds `balance`.
pub async fn funded_account(ledger: &Ledger, balance: &str) -> Result<(User, Account)> {
    let user = ledger.create_user("owner", "secret", 5).await?;
    let account = ledger.create_account(user.id).await?;
    let amount = dec(balance);
    if amount > Decimal::ZERO {
        ledger.deposit(account.id, amount).await?;
    }
    Ok((user, account))
}

/// Test fixture: one user holding two accounts, X and Y
pub struct TwoAccounts {
    pub user: User,
    pub x: Account,
    pub y: Account,
}

impl TwoAccounts {
    pub async fn create(ledger: &Ledger, x_balance: &str, y_balance: &str) -> Result<Self> {
        let user = ledger.create_user("pair", "secret", 2).await?;
        let x = ledger.create_account(user.id).await?;
        let y = ledger.create_account(user.id).await?;
        for (account, balance) in [(&x, x_balance), (&y, y_balance)] {
            let amount = dec(balance);
            if amount > Decimal::ZERO {
                ledger.deposit(account.id, amount).await?;
            }
        }
        Ok(Self { user, x, y })
    }
}

/// Balance read through the store, leaving no audit record.
pub async fn balance_of(ledger: &Ledger, id: AccountId) -> Result<Amount> {
    Ok(ledger.peek_balance(id).await?)
}

/// Store wrapper that can be told to fail or stall its writes.
///
/// Reads always go straight to the inner [`MemoryStore`].
#[derive(Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    fail_writes: AtomicBool,
    write_delay_ms: AtomicU64,
}

impl FaultyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn delay_writes(&self, delay: Duration) {
        self.write_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }
}

#[async_trait]
impl Store for FaultyStore {
    async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        self.inner.get_user(id).await
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        self.inner.list_users().await
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        self.inner.get_account(id).await
    }

    async fn list_accounts(&self) -> Result<Vec<Account>> {
        self.inner.list_accounts().await
    }

    async fn list_accounts_by_owner(&self, owner: UserId) -> Result<Vec<Account>> {
        self.inner.list_accounts_by_owner(owner).await
    }

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>> {
        self.inner.get_transaction(id).await
    }

    async fn list_transactions(&self) -> Result<Vec<Transaction>> {
        self.inner.list_transactions().await
    }

    async fn list_transactions_by_account(&self, account: AccountId) -> Result<Vec<Transaction>> {
        self.inner.list_transactions_by_account(account).await
    }

    async fn apply(&self, batch: WriteBatch) -> Result<Vec<Transaction>> {
        let delay = self.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("injected write failure ({} ops dropped)", batch.len());
        }
        self.inner.apply(batch).await
    }
}

/// Ledger over a [`FaultyStore`], returning both so tests can flip faults on.
pub fn faulty_ledger(config: LedgerConfig) -> (Ledger, Arc<FaultyStore>) {
    let store = FaultyStore::new();
    let ledger = Ledger::new(store.clone(), config);
    (ledger, store)
}
