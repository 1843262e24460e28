//! Store port: persistence contract consumed by the ledger services.

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::{Account, AccountId, Transaction, TransactionId, User, UserId};

/// One write inside a [`WriteBatch`].
#[derive(Debug, Clone)]
pub enum WriteOp {
    PutUser(User),
    PutAccount(Account),
    DeleteUser(UserId),
    DeleteAccount(AccountId),
    /// Append a record to the log. The store assigns its sequence number.
    AppendTransaction(Transaction),
}

/// A set of writes committed all together or not at all.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_user(mut self, user: User) -> Self {
        self.ops.push(WriteOp::PutUser(user));
        self
    }

    pub fn put_account(mut self, account: Account) -> Self {
        self.ops.push(WriteOp::PutAccount(account));
        self
    }

    pub fn delete_user(mut self, id: UserId) -> Self {
        self.ops.push(WriteOp::DeleteUser(id));
        self
    }

    pub fn delete_account(mut self, id: AccountId) -> Self {
        self.ops.push(WriteOp::DeleteAccount(id));
        self
    }

    pub fn append_transaction(mut self, tx: Transaction) -> Self {
        self.ops.push(WriteOp::AppendTransaction(tx));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// Key-value persistence for users, accounts and the transaction log.
///
/// Implementations hold no business rules. The only guarantee the ledger
/// relies on beyond plain reads and writes is that [`Store::apply`] is
/// atomic: after it returns an error, none of the batch is visible.
#[async_trait]
pub trait Store: Send + Sync {
    // === Users ===

    async fn get_user(&self, id: UserId) -> Result<Option<User>>;

    async fn list_users(&self) -> Result<Vec<User>>;

    async fn user_exists(&self, id: UserId) -> Result<bool> {
        Ok(self.get_user(id).await?.is_some())
    }

    // === Accounts ===

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>>;

    async fn list_accounts(&self) -> Result<Vec<Account>>;

    async fn list_accounts_by_owner(&self, owner: UserId) -> Result<Vec<Account>>;

    async fn account_exists(&self, id: AccountId) -> Result<bool> {
        Ok(self.get_account(id).await?.is_some())
    }

    // === Transactions ===

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>>;

    /// The whole log, ordered by sequence.
    async fn list_transactions(&self) -> Result<Vec<Transaction>>;

    /// Records whose source is `account`, ordered by sequence.
    async fn list_transactions_by_account(&self, account: AccountId) -> Result<Vec<Transaction>>;

    // === Writes ===

    /// Commit `batch` atomically. Returns the appended transaction records
    /// with their sequence numbers, in batch order.
    async fn apply(&self, batch: WriteBatch) -> Result<Vec<Transaction>>;

    async fn put_user(&self, user: &User) -> Result<()> {
        self.apply(WriteBatch::new().put_user(user.clone())).await?;
        Ok(())
    }

    async fn put_account(&self, account: &Account) -> Result<()> {
        self.apply(WriteBatch::new().put_account(account.clone()))
            .await?;
        Ok(())
    }

    async fn delete_user(&self, id: UserId) -> Result<()> {
        self.apply(WriteBatch::new().delete_user(id)).await?;
        Ok(())
    }

    async fn delete_account(&self, id: AccountId) -> Result<()> {
        self.apply(WriteBatch::new().delete_account(id)).await?;
        Ok(())
    }
}
