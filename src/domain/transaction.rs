use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AccountId, Amount};

pub type TransactionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    Transfer,
    /// A balance read; the amount is a snapshot, not a delta
    BalanceQuery,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "DEPOSIT",
            TransactionType::Withdrawal => "WITHDRAWAL",
            TransactionType::Transfer => "TRANSFER",
            TransactionType::BalanceQuery => "BALANCE_QUERY",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "DEPOSIT" => Some(TransactionType::Deposit),
            "WITHDRAWAL" => Some(TransactionType::Withdrawal),
            "TRANSFER" => Some(TransactionType::Transfer),
            "BALANCE_QUERY" => Some(TransactionType::BalanceQuery),
            _ => None,
        }
    }

    /// Returns true if records of this type move money
    pub fn changes_balance(&self) -> bool {
        !matches!(self, TransactionType::BalanceQuery)
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An immutable audit entry. Records are appended to the log and never
/// updated or removed; accounts are referenced by id so deleting an account
/// leaves its history readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    /// Position in the log, assigned by the store on append
    pub sequence: i64,
    /// Source account
    pub account: AccountId,
    /// Destination account, set only for transfers
    pub recipient: Option<AccountId>,
    pub amount: Amount,
    pub kind: TransactionType,
    pub timestamp: DateTime<Utc>,
}

impl Transaction {
    fn new(
        account: AccountId,
        recipient: Option<AccountId>,
        amount: Amount,
        kind: TransactionType,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence: 0, // Will be set by the store
            account,
            recipient,
            amount,
            kind,
            timestamp: Utc::now(),
        }
    }

    pub fn deposit(account: AccountId, amount: Amount) -> Self {
        Self::new(account, None, amount, TransactionType::Deposit)
    }

    pub fn withdrawal(account: AccountId, amount: Amount) -> Self {
        Self::new(account, None, amount, TransactionType::Withdrawal)
    }

    pub fn transfer(source: AccountId, recipient: AccountId, amount: Amount) -> Self {
        Self::new(source, Some(recipient), amount, TransactionType::Transfer)
    }

    pub fn balance_query(account: AccountId, balance: Amount) -> Self {
        Self::new(account, None, balance, TransactionType::BalanceQuery)
    }

    /// True if `account` is the source of this record.
    pub fn is_from(&self, account: AccountId) -> bool {
        self.account == account
    }
}
