use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::domain::{Account, AccountId, Amount, UserId};
use crate::storage::{Store, WriteBatch};

use super::{LedgerConfig, LedgerError, LedgerResult, LockRegistry};

/// Account lifecycle: creation under the owner's quota, lookup and deletion.
pub struct AccountService {
    store: Arc<dyn Store>,
    locks: Arc<LockRegistry>,
    config: LedgerConfig,
}

impl AccountService {
    pub fn new(store: Arc<dyn Store>, locks: Arc<LockRegistry>, config: LedgerConfig) -> Self {
        Self {
            store,
            locks,
            config,
        }
    }

    /// Open a zero-balance account for `user_id`.
    ///
    /// The owner's lock is held across the quota check and the commit, so
    /// concurrent creations cannot push `account_count` past the quota.
    #[instrument(skip(self))]
    pub async fn create_account(&self, user_id: UserId) -> LedgerResult<Account> {
        let _user_lock = self
            .locks
            .users
            .acquire(user_id, self.config.lock_timeout)
            .await?;

        let mut user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or(LedgerError::UserNotFound(user_id))?;

        if let Err(quota) = user.register_account() {
            warn!(user = %user_id, max_accounts = quota.max_accounts, "account quota reached");
            return Err(LedgerError::QuotaExceeded {
                user: user_id,
                max_accounts: quota.max_accounts,
            });
        }

        let account = Account::new(user_id);
        self.store
            .apply(
                WriteBatch::new()
                    .put_account(account.clone())
                    .put_user(user.clone()),
            )
            .await?;

        info!(
            account = %account.id,
            user = %user_id,
            account_count = user.account_count,
            "account created"
        );
        Ok(account)
    }

    pub async fn get_account(&self, id: AccountId) -> LedgerResult<Account> {
        self.store
            .get_account(id)
            .await?
            .ok_or(LedgerError::AccountNotFound(id))
    }

    /// Remove an account and release its slot in the owner's quota.
    /// The account's transaction history stays in the log.
    #[instrument(skip(self))]
    pub async fn delete_account(&self, id: AccountId) -> LedgerResult<Account> {
        // Owners never change, so the owner read before locking is stable.
        let owner = self.get_account(id).await?.owner;

        let _user_lock = self
            .locks
            .users
            .acquire(owner, self.config.lock_timeout)
            .await?;
        let _account_lock = self
            .locks
            .accounts
            .acquire(id, self.config.lock_timeout)
            .await?;

        let account = self.get_account(id).await?;
        let mut batch = WriteBatch::new().delete_account(id);
        if let Some(mut user) = self.store.get_user(owner).await? {
            user.release_account();
            batch = batch.put_user(user);
        }
        self.store.apply(batch).await?;

        info!(account = %id, user = %owner, balance = %account.balance, "account deleted");
        Ok(account)
    }

    pub async fn exists(&self, id: AccountId) -> LedgerResult<bool> {
        Ok(self.store.account_exists(id).await?)
    }

    /// Current balance from the last committed state. Records nothing.
    pub async fn get_balance(&self, id: AccountId) -> LedgerResult<Amount> {
        let account = self.get_account(id).await?;
        debug!(account = %id, balance = %account.balance, "balance read");
        Ok(account.balance)
    }

    pub async fn accounts_of(&self, user_id: UserId) -> LedgerResult<Vec<Account>> {
        if !self.store.user_exists(user_id).await? {
            return Err(LedgerError::UserNotFound(user_id));
        }
        Ok(self.store.list_accounts_by_owner(user_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;
    use crate::domain::User;
    use crate::storage::MemoryStore;

    async fn setup(max_accounts: u32) -> (AccountService, Arc<dyn Store>, User) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let user = User::new("kate", "pw", max_accounts);
        store.put_user(&user).await.unwrap();
        let service = AccountService::new(
            Arc::clone(&store),
            Arc::new(LockRegistry::new()),
            LedgerConfig::default(),
        );
        (service, store, user)
    }

    #[tokio::test]
    async fn test_create_account_counts_against_quota() {
        let (service, store, user) = setup(1).await;

        let account = service.create_account(user.id).await.unwrap();
        assert_eq!(account.balance, Decimal::ZERO);
        assert_eq!(account.owner, user.id);

        let err = service.create_account(user.id).await.unwrap_err();
        assert!(matches!(err, LedgerError::QuotaExceeded { max_accounts: 1, .. }));

        let stored = store.get_user(user.id).await.unwrap().unwrap();
        assert_eq!(stored.account_count, 1);
    }

    #[tokio::test]
    async fn test_create_account_unknown_user() {
        let (service, _, _) = setup(1).await;
        let err = service.create_account(UserId::new_v4()).await.unwrap_err();
        assert!(matches!(err, LedgerError::UserNotFound(_)));
        assert!(service.locks.users.is_empty());
    }

    #[tokio::test]
    async fn test_delete_releases_lock_slots() {
        let (service, _, user) = setup(1).await;
        let account = service.create_account(user.id).await.unwrap();

        service.delete_account(account.id).await.unwrap();
        assert!(service.delete_account(account.id).await.is_err());

        assert!(service.locks.users.is_empty());
        assert!(service.locks.accounts.is_empty());
    }

    #[tokio::test]
    async fn test_delete_account_frees_quota_slot() {
        let (service, store, user) = setup(1).await;

        let account = service.create_account(user.id).await.unwrap();
        service.delete_account(account.id).await.unwrap();

        assert!(!service.exists(account.id).await.unwrap());
        let stored = store.get_user(user.id).await.unwrap().unwrap();
        assert_eq!(stored.account_count, 0);
        assert!(service.create_account(user.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_get_balance_records_nothing() {
        let (service, store, user) = setup(1).await;
        let account = service.create_account(user.id).await.unwrap();

        assert_eq!(service.get_balance(account.id).await.unwrap(), Decimal::ZERO);
        assert!(store.list_transactions().await.unwrap().is_empty());
    }
}
