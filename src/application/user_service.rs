use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::domain::{Account, Credential, User, UserId};
use crate::storage::{Store, WriteBatch};

use super::{LedgerConfig, LedgerError, LedgerResult, LockRegistry};

/// Profile fields a user may change. `None` leaves a field as it is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserChanges {
    pub name: Option<String>,
    pub max_accounts: Option<u32>,
}

impl UserChanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_max_accounts(mut self, max_accounts: u32) -> Self {
        self.max_accounts = Some(max_accounts);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.max_accounts.is_none()
    }
}

/// User lifecycle. Profile changes are gated by the user's credential.
pub struct UserService {
    store: Arc<dyn Store>,
    locks: Arc<LockRegistry>,
    config: LedgerConfig,
}

impl UserService {
    pub fn new(store: Arc<dyn Store>, locks: Arc<LockRegistry>, config: LedgerConfig) -> Self {
        Self {
            store,
            locks,
            config,
        }
    }

    #[instrument(skip(self, secret))]
    pub async fn create_user(
        &self,
        name: &str,
        secret: &str,
        max_accounts: u32,
    ) -> LedgerResult<User> {
        let user = User::new(name, secret, max_accounts);
        self.store.put_user(&user).await?;

        info!(user = %user.id, name = %user.name, max_accounts, "user created");
        Ok(user)
    }

    pub async fn get_user(&self, id: UserId) -> LedgerResult<User> {
        self.store
            .get_user(id)
            .await?
            .ok_or(LedgerError::UserNotFound(id))
    }

    /// Apply `changes` if `secret` matches the stored credential.
    #[instrument(skip(self, secret))]
    pub async fn update(
        &self,
        id: UserId,
        changes: UserChanges,
        secret: &str,
    ) -> LedgerResult<User> {
        let _lock = self.locks.users.acquire(id, self.config.lock_timeout).await?;
        let mut user = self.authenticate(id, secret).await?;

        if let Some(max_accounts) = changes.max_accounts {
            if max_accounts < user.account_count {
                warn!(
                    user = %id,
                    requested = max_accounts,
                    in_use = user.account_count,
                    "quota below accounts in use"
                );
                return Err(LedgerError::InvalidQuota {
                    user: id,
                    requested: max_accounts,
                    in_use: user.account_count,
                });
            }
            user.max_accounts = max_accounts;
        }
        if let Some(name) = changes.name {
            user.name = name;
        }

        self.store.put_user(&user).await?;
        info!(user = %id, name = %user.name, max_accounts = user.max_accounts, "user updated");
        Ok(user)
    }

    /// Replace the credential after checking the current one.
    #[instrument(skip(self, old_secret, new_secret))]
    pub async fn change_password(
        &self,
        id: UserId,
        old_secret: &str,
        new_secret: &str,
    ) -> LedgerResult<()> {
        let _lock = self.locks.users.acquire(id, self.config.lock_timeout).await?;
        let mut user = self.authenticate(id, old_secret).await?;

        user.credential = Credential::new(new_secret);
        self.store.put_user(&user).await?;

        info!(user = %id, "credential changed");
        Ok(())
    }

    /// Remove a user together with every account it owns, in one batch.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: UserId) -> LedgerResult<Vec<Account>> {
        let _user_lock = self.locks.users.acquire(id, self.config.lock_timeout).await?;
        self.get_user(id).await?;

        // No account can be created for this user while its lock is held,
        // so the owned set is fixed from here on.
        let owned = self.store.list_accounts_by_owner(id).await?;
        let ids: Vec<_> = owned.iter().map(|a| a.id).collect();
        let _account_locks = self
            .locks
            .accounts
            .acquire_many(&ids, self.config.lock_timeout)
            .await?;

        // Reload so the returned balances are the ones being removed.
        let owned = self.store.list_accounts_by_owner(id).await?;
        let batch = owned
            .iter()
            .fold(WriteBatch::new(), |batch, account| {
                batch.delete_account(account.id)
            })
            .delete_user(id);
        self.store.apply(batch).await?;

        info!(user = %id, accounts = owned.len(), "user deleted");
        Ok(owned)
    }

    pub async fn accounts_of(&self, id: UserId) -> LedgerResult<Vec<Account>> {
        self.get_user(id).await?;
        Ok(self.store.list_accounts_by_owner(id).await?)
    }

    async fn authenticate(&self, id: UserId, secret: &str) -> LedgerResult<User> {
        let user = self.get_user(id).await?;
        if !user.is_credential_correct(secret) {
            warn!(user = %id, "credential mismatch");
            return Err(LedgerError::InvalidCredential(id));
        }
        debug!(user = %id, "credential accepted");
        Ok(user)
    }
}
