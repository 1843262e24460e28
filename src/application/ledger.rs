use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::domain::{
    Account, AccountId, Amount, IntegrityReport, Transaction, TransactionId, User, UserId,
    build_integrity_report,
};
use crate::storage::{MemoryStore, SqliteStore, Store};

use super::{
    AccountService, LedgerConfig, LedgerResult, LockRegistry, TransactionService, UserChanges,
    UserService,
};

/// Single entry point for clients (CLI, tests, embedding code).
///
/// The three services share one store and one lock registry. The facade
/// adds no validation of its own.
pub struct Ledger {
    store: Arc<dyn Store>,
    config: LedgerConfig,
    accounts: AccountService,
    transactions: TransactionService,
    users: UserService,
}

impl Ledger {
    pub fn new(store: Arc<dyn Store>, config: LedgerConfig) -> Self {
        let locks = Arc::new(LockRegistry::new());
        Self {
            accounts: AccountService::new(Arc::clone(&store), Arc::clone(&locks), config),
            transactions: TransactionService::new(Arc::clone(&store), Arc::clone(&locks), config),
            users: UserService::new(Arc::clone(&store), locks, config),
            store,
            config,
        }
    }

    /// Ledger over a fresh in-memory store.
    pub fn in_memory(config: LedgerConfig) -> Self {
        Self::new(Arc::new(MemoryStore::new()), config)
    }

    /// Open (creating if needed) a SQLite database file.
    pub async fn open(database_path: &str, config: LedgerConfig) -> LedgerResult<Self> {
        let store = SqliteStore::open(database_path).await?;
        Ok(Self::new(Arc::new(store), config))
    }

    /// Connect to an existing SQLite database file.
    pub async fn connect(database_path: &str, config: LedgerConfig) -> LedgerResult<Self> {
        let store = SqliteStore::connect(&format!("sqlite:{}", database_path)).await?;
        Ok(Self::new(Arc::new(store), config))
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    // ========================
    // User operations
    // ========================

    pub async fn create_user(&self, name: &str, secret: &str, max_accounts: u32) -> LedgerResult<User> {
        self.users.create_user(name, secret, max_accounts).await
    }

    pub async fn get_user(&self, id: UserId) -> LedgerResult<User> {
        self.users.get_user(id).await
    }

    pub async fn update_user(
        &self,
        id: UserId,
        changes: UserChanges,
        secret: &str,
    ) -> LedgerResult<User> {
        self.users.update(id, changes, secret).await
    }

    pub async fn change_password(
        &self,
        id: UserId,
        old_secret: &str,
        new_secret: &str,
    ) -> LedgerResult<()> {
        self.users.change_password(id, old_secret, new_secret).await
    }

    /// Delete a user and every account it owns. Returns the removed accounts.
    pub async fn delete_user(&self, id: UserId) -> LedgerResult<Vec<Account>> {
        self.users.delete(id).await
    }

    pub async fn accounts_of(&self, id: UserId) -> LedgerResult<Vec<Account>> {
        self.users.accounts_of(id).await
    }

    // ========================
    // Account operations
    // ========================

    pub async fn create_account(&self, owner: UserId) -> LedgerResult<Account> {
        self.accounts.create_account(owner).await
    }

    pub async fn get_account(&self, id: AccountId) -> LedgerResult<Account> {
        self.accounts.get_account(id).await
    }

    pub async fn delete_account(&self, id: AccountId) -> LedgerResult<Account> {
        self.accounts.delete_account(id).await
    }

    pub async fn account_exists(&self, id: AccountId) -> LedgerResult<bool> {
        self.accounts.exists(id).await
    }

    /// Balance without an audit record.
    pub async fn peek_balance(&self, id: AccountId) -> LedgerResult<Amount> {
        self.accounts.get_balance(id).await
    }

    // ========================
    // Transaction operations
    // ========================

    pub async fn deposit(&self, account: AccountId, amount: Amount) -> LedgerResult<Transaction> {
        self.transactions.deposit(account, amount).await
    }

    pub async fn withdraw(&self, account: AccountId, amount: Amount) -> LedgerResult<Transaction> {
        self.transactions.withdraw(account, amount).await
    }

    pub async fn transfer(
        &self,
        source: AccountId,
        recipient: AccountId,
        amount: Amount,
    ) -> LedgerResult<Transaction> {
        self.transactions.transfer(source, recipient, amount).await
    }

    pub async fn transfer_within(
        &self,
        source: AccountId,
        recipient: AccountId,
        amount: Amount,
        wait: Duration,
    ) -> LedgerResult<Transaction> {
        self.transactions
            .transfer_within(source, recipient, amount, wait)
            .await
    }

    /// Balance read that appends a BALANCE_QUERY record.
    pub async fn get_balance(&self, account: AccountId) -> LedgerResult<Amount> {
        self.transactions.get_balance(account).await
    }

    pub async fn account_history(&self, account: AccountId) -> LedgerResult<Vec<Transaction>> {
        self.transactions.account_transactions(account).await
    }

    pub async fn full_history(&self) -> LedgerResult<Vec<Transaction>> {
        self.transactions.all_transactions().await
    }

    pub async fn get_transaction(&self, id: TransactionId) -> LedgerResult<Transaction> {
        self.transactions.get_transaction(id).await
    }

    // ========================
    // Integrity
    // ========================

    /// Replay the log and compare it with stored balances and quotas.
    pub async fn check_integrity(&self) -> LedgerResult<IntegrityReport> {
        let users = self.store.list_users().await?;
        let accounts = self.store.list_accounts().await?;
        let transactions = self.store.list_transactions().await?;

        let report = build_integrity_report(&users, &accounts, &transactions);
        if report.is_healthy() {
            info!(
                users = report.user_count,
                accounts = report.account_count,
                transactions = report.transaction_count,
                "integrity check passed"
            );
        } else {
            warn!(issues = report.issues.len(), "integrity check found issues");
        }
        Ok(report)
    }
}
