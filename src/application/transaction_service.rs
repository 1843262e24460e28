use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use tracing::{debug, info, instrument, warn};

use crate::domain::{
    Account, AccountId, Amount, BalanceOverflow, InsufficientFunds, Transaction, TransactionId,
    is_valid_amount,
};
use crate::storage::{Store, WriteBatch};

use super::{LedgerConfig, LedgerError, LedgerResult, LockRegistry};

/// Balance-changing operations and the audit log.
///
/// Every operation that touches a balance holds the account lock(s) from
/// the load through the commit, and commits the record together with the
/// updated account(s) in one batch.
pub struct TransactionService {
    store: Arc<dyn Store>,
    locks: Arc<LockRegistry>,
    config: LedgerConfig,
}

impl TransactionService {
    pub fn new(store: Arc<dyn Store>, locks: Arc<LockRegistry>, config: LedgerConfig) -> Self {
        Self {
            store,
            locks,
            config,
        }
    }

    // ========================
    // Mutations
    // ========================

    #[instrument(skip(self))]
    pub async fn deposit(&self, account_id: AccountId, amount: Amount) -> LedgerResult<Transaction> {
        ensure_positive(amount)?;
        let _lock = self
            .locks
            .accounts
            .acquire(account_id, self.config.lock_timeout)
            .await?;

        let mut account = self.load(account_id).await?;
        account
            .deposit(amount)
            .map_err(|e| balance_overflow(account_id, e))?;

        let record = self
            .commit(Transaction::deposit(account_id, amount), vec![account.clone()])
            .await?;

        info!(
            account = %account_id,
            amount = %amount,
            balance = %account.balance,
            sequence = record.sequence,
            "deposit recorded"
        );
        Ok(record)
    }

    #[instrument(skip(self))]
    pub async fn withdraw(&self, account_id: AccountId, amount: Amount) -> LedgerResult<Transaction> {
        ensure_positive(amount)?;
        let _lock = self
            .locks
            .accounts
            .acquire(account_id, self.config.lock_timeout)
            .await?;

        let mut account = self.load(account_id).await?;
        account
            .withdraw(amount)
            .map_err(|e| not_enough_funds(account_id, e))?;

        let record = self
            .commit(Transaction::withdrawal(account_id, amount), vec![account.clone()])
            .await?;

        info!(
            account = %account_id,
            amount = %amount,
            balance = %account.balance,
            sequence = record.sequence,
            "withdrawal recorded"
        );
        Ok(record)
    }

    /// Move `amount` from `source` to `recipient`, waiting at most the
    /// configured lock timeout.
    pub async fn transfer(
        &self,
        source: AccountId,
        recipient: AccountId,
        amount: Amount,
    ) -> LedgerResult<Transaction> {
        self.transfer_within(source, recipient, amount, self.config.lock_timeout)
            .await
    }

    /// Move `amount` from `source` to `recipient` as one TRANSFER record.
    ///
    /// Both account locks are taken in ascending id order and must be
    /// acquired within `wait`, otherwise the transfer fails with
    /// [`LedgerError::Busy`] and nothing is written.
    #[instrument(skip(self))]
    pub async fn transfer_within(
        &self,
        source: AccountId,
        recipient: AccountId,
        amount: Amount,
        wait: Duration,
    ) -> LedgerResult<Transaction> {
        ensure_positive(amount)?;
        if source == recipient {
            warn!(account = %source, "transfer to the same account rejected");
            return Err(LedgerError::SelfTransfer(source));
        }

        let _locks = self
            .locks
            .accounts
            .acquire_many(&[source, recipient], wait)
            .await?;

        let mut from = self.load(source).await?;
        let mut to = self.load(recipient).await?;

        from.withdraw(amount)
            .map_err(|e| not_enough_funds(source, e))?;
        to.deposit(amount)
            .map_err(|e| balance_overflow(recipient, e))?;

        let record = self
            .commit(
                Transaction::transfer(source, recipient, amount),
                vec![from, to],
            )
            .await?;

        info!(
            from = %source,
            to = %recipient,
            amount = %amount,
            sequence = record.sequence,
            "transfer recorded"
        );
        Ok(record)
    }

    // ========================
    // Queries
    // ========================

    /// Audited balance read: appends a BALANCE_QUERY record carrying the
    /// balance observed under the account lock.
    #[instrument(skip(self))]
    pub async fn get_balance(&self, account_id: AccountId) -> LedgerResult<Amount> {
        let _lock = self
            .locks
            .accounts
            .acquire(account_id, self.config.lock_timeout)
            .await?;

        let account = self.load(account_id).await?;
        let record = self
            .commit(Transaction::balance_query(account_id, account.balance), vec![])
            .await?;

        debug!(
            account = %account_id,
            balance = %account.balance,
            sequence = record.sequence,
            "balance queried"
        );
        Ok(account.balance)
    }

    /// Records whose source is `account_id`, in log order.
    ///
    /// History outlives the account: a deleted account's records are still
    /// returned. An id with neither an account nor any records is unknown.
    pub async fn account_transactions(&self, account_id: AccountId) -> LedgerResult<Vec<Transaction>> {
        let records = self.store.list_transactions_by_account(account_id).await?;
        if records.is_empty() && !self.store.account_exists(account_id).await? {
            return Err(LedgerError::AccountNotFound(account_id));
        }
        Ok(records)
    }

    pub async fn all_transactions(&self) -> LedgerResult<Vec<Transaction>> {
        Ok(self.store.list_transactions().await?)
    }

    pub async fn get_transaction(&self, id: TransactionId) -> LedgerResult<Transaction> {
        self.store
            .get_transaction(id)
            .await?
            .ok_or(LedgerError::TransactionNotFound(id))
    }

    // ========================
    // Helpers
    // ========================

    async fn load(&self, id: AccountId) -> LedgerResult<Account> {
        self.store
            .get_account(id)
            .await?
            .ok_or(LedgerError::AccountNotFound(id))
    }

    /// Append `record` and write back `accounts` in a single batch.
    async fn commit(&self, record: Transaction, accounts: Vec<Account>) -> LedgerResult<Transaction> {
        let batch = accounts
            .into_iter()
            .fold(WriteBatch::new().append_transaction(record), |batch, account| {
                batch.put_account(account)
            });

        let mut appended = self.store.apply(batch).await?;
        if appended.is_empty() {
            return Err(anyhow!("store committed the batch but returned no transaction record").into());
        }
        Ok(appended.swap_remove(0))
    }
}

fn ensure_positive(amount: Amount) -> LedgerResult<()> {
    if !is_valid_amount(amount) {
        warn!(amount = %amount, "non-positive amount rejected");
        return Err(LedgerError::InvalidAmount(amount));
    }
    Ok(())
}

fn not_enough_funds(account: AccountId, err: InsufficientFunds) -> LedgerError {
    warn!(
        account = %account,
        balance = %err.balance,
        requested = %err.requested,
        "insufficient funds"
    );
    LedgerError::NotEnoughFunds {
        account,
        balance: err.balance,
        requested: err.requested,
    }
}

fn balance_overflow(account: AccountId, err: BalanceOverflow) -> LedgerError {
    warn!(
        account = %account,
        balance = %err.balance,
        amount = %err.amount,
        "deposit would overflow balance"
    );
    LedgerError::BalanceOverflow {
        account,
        balance: err.balance,
        amount: err.amount,
    }
}
