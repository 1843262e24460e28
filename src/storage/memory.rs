use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{Result, anyhow};
use async_trait::async_trait;

use crate::domain::{Account, AccountId, Transaction, TransactionId, User, UserId};

use super::{Store, WriteBatch, WriteOp};

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<UserId, User>,
    accounts: HashMap<AccountId, Account>,
    /// Append-only log; index + 1 is the sequence number
    transactions: Vec<Transaction>,
    transaction_index: HashMap<TransactionId, usize>,
}

/// In-memory reference store.
///
/// All tables sit behind one `RwLock`, so a batch applied under the write
/// guard is atomic with respect to every reader. Guards are never held
/// across an `.await`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.read()?.users.get(&id).cloned())
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let mut users: Vec<User> = self.read()?.users.values().cloned().collect();
        users.sort_by_key(|u| (u.created_at, u.id));
        Ok(users)
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        Ok(self.read()?.accounts.get(&id).cloned())
    }

    async fn list_accounts(&self) -> Result<Vec<Account>> {
        let mut accounts: Vec<Account> = self.read()?.accounts.values().cloned().collect();
        accounts.sort_by_key(|a| (a.created_at, a.id));
        Ok(accounts)
    }

    async fn list_accounts_by_owner(&self, owner: UserId) -> Result<Vec<Account>> {
        let mut accounts: Vec<Account> = self
            .read()?
            .accounts
            .values()
            .filter(|a| a.owner == owner)
            .cloned()
            .collect();
        accounts.sort_by_key(|a| (a.created_at, a.id));
        Ok(accounts)
    }

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>> {
        let tables = self.read()?;
        Ok(tables
            .transaction_index
            .get(&id)
            .map(|&i| tables.transactions[i].clone()))
    }

    async fn list_transactions(&self) -> Result<Vec<Transaction>> {
        Ok(self.read()?.transactions.clone())
    }

    async fn list_transactions_by_account(&self, account: AccountId) -> Result<Vec<Transaction>> {
        Ok(self
            .read()?
            .transactions
            .iter()
            .filter(|tx| tx.is_from(account))
            .cloned()
            .collect())
    }

    async fn apply(&self, batch: WriteBatch) -> Result<Vec<Transaction>> {
        let mut tables = self.write()?;
        let mut appended = Vec::new();

        // Nothing below can fail, so the batch lands whole.
        for op in batch.into_ops() {
            match op {
                WriteOp::PutUser(user) => {
                    tables.users.insert(user.id, user);
                }
                WriteOp::PutAccount(account) => {
                    tables.accounts.insert(account.id, account);
                }
                WriteOp::DeleteUser(id) => {
                    tables.users.remove(&id);
                }
                WriteOp::DeleteAccount(id) => {
                    tables.accounts.remove(&id);
                }
                WriteOp::AppendTransaction(mut tx) => {
                    let index = tables.transactions.len();
                    tx.sequence = index as i64 + 1;
                    tables.transaction_index.insert(tx.id, index);
                    tables.transactions.push(tx.clone());
                    appended.push(tx);
                }
            }
        }

        Ok(appended)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;

    #[tokio::test]
    async fn test_apply_assigns_increasing_sequences() {
        let store = MemoryStore::new();
        let account = Account::new(UserId::new_v4());

        let first = store
            .apply(
                WriteBatch::new()
                    .append_transaction(Transaction::deposit(account.id, Decimal::ONE))
                    .append_transaction(Transaction::withdrawal(account.id, Decimal::ONE)),
            )
            .await
            .unwrap();
        let second = store
            .apply(
                WriteBatch::new()
                    .append_transaction(Transaction::balance_query(account.id, Decimal::ZERO)),
            )
            .await
            .unwrap();

        assert_eq!(first.iter().map(|t| t.sequence).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(second[0].sequence, 3);

        let stored = store.get_transaction(second[0].id).await.unwrap().unwrap();
        assert_eq!(stored.sequence, 3);
    }

    #[tokio::test]
    async fn test_put_get_delete_account() {
        let store = MemoryStore::new();
        let account = Account::new(UserId::new_v4());

        store.put_account(&account).await.unwrap();
        assert!(store.account_exists(account.id).await.unwrap());
        assert_eq!(store.get_account(account.id).await.unwrap(), Some(account.clone()));

        store.delete_account(account.id).await.unwrap();
        assert!(!store.account_exists(account.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_accounts_by_owner_filters() {
        let store = MemoryStore::new();
        let owner = UserId::new_v4();
        let mine = Account::new(owner);
        let other = Account::new(UserId::new_v4());

        store
            .apply(
                WriteBatch::new()
                    .put_account(mine.clone())
                    .put_account(other),
            )
            .await
            .unwrap();

        let listed = store.list_accounts_by_owner(owner).await.unwrap();
        assert_eq!(listed, vec![mine]);
    }

    #[tokio::test]
    async fn test_history_by_account_excludes_recipient_side() {
        let store = MemoryStore::new();
        let (a, b) = (AccountId::new_v4(), AccountId::new_v4());

        store
            .apply(
                WriteBatch::new()
                    .append_transaction(Transaction::deposit(a, Decimal::TEN))
                    .append_transaction(Transaction::transfer(a, b, Decimal::ONE)),
            )
            .await
            .unwrap();

        assert_eq!(store.list_transactions_by_account(a).await.unwrap().len(), 2);
        assert!(store.list_transactions_by_account(b).await.unwrap().is_empty());
        assert_eq!(store.list_transactions().await.unwrap().len(), 2);
    }
}
