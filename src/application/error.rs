use thiserror::Error;

use crate::domain::{AccountId, Amount, TransactionId, UserId};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("User {user} already holds the maximum of {max_accounts} accounts")]
    QuotaExceeded { user: UserId, max_accounts: u32 },

    #[error("Not enough funds in account {account}: balance {balance}, requested {requested}")]
    NotEnoughFunds {
        account: AccountId,
        balance: Amount,
        requested: Amount,
    },

    #[error("Balance of account {account} would overflow: {balance} + {amount}")]
    BalanceOverflow {
        account: AccountId,
        balance: Amount,
        amount: Amount,
    },

    #[error("User not found: {0}")]
    UserNotFound(UserId),

    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    #[error("Invalid amount: {0} (must be greater than zero)")]
    InvalidAmount(Amount),

    #[error("Invalid credential for user {0}")]
    InvalidCredential(UserId),

    #[error("Cannot lower quota of user {user} to {requested}: {in_use} accounts in use")]
    InvalidQuota {
        user: UserId,
        requested: u32,
        in_use: u32,
    },

    #[error("Cannot transfer from account {0} to itself")]
    SelfTransfer(AccountId),

    #[error("Timed out waiting for {0}")]
    Busy(String),

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl LedgerError {
    /// True for the unknown user, account and transaction cases.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            LedgerError::UserNotFound(_)
                | LedgerError::AccountNotFound(_)
                | LedgerError::TransactionNotFound(_)
        )
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
