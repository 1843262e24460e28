use std::collections::HashMap;
use std::fmt;

use rust_decimal::Decimal;

use super::{Account, AccountId, Amount, Transaction, TransactionType, User, UserId};

/// Replay the whole log and compute every balance it mentions.
///
/// Deposits credit, withdrawals debit, transfers debit the source and credit
/// the recipient, balance queries are skipped. An account maps to `None` once
/// its running balance leaves the range of [`Amount`].
pub fn replay_all_balances(transactions: &[Transaction]) -> HashMap<AccountId, Option<Amount>> {
    let mut balances: HashMap<AccountId, Option<Amount>> = HashMap::new();

    for tx in transactions.iter().filter(|tx| tx.kind.changes_balance()) {
        match (tx.kind, tx.recipient) {
            (TransactionType::Deposit, _) => credit(&mut balances, tx.account, tx.amount),
            (TransactionType::Transfer, Some(recipient)) => {
                debit(&mut balances, tx.account, tx.amount);
                credit(&mut balances, recipient, tx.amount);
            }
            _ => debit(&mut balances, tx.account, tx.amount),
        }
    }

    balances
}

fn credit(balances: &mut HashMap<AccountId, Option<Amount>>, account: AccountId, amount: Amount) {
    let entry = balances.entry(account).or_insert(Some(Decimal::ZERO));
    *entry = entry.and_then(|balance| balance.checked_add(amount));
}

fn debit(balances: &mut HashMap<AccountId, Option<Amount>>, account: AccountId, amount: Amount) {
    let entry = balances.entry(account).or_insert(Some(Decimal::ZERO));
    *entry = entry.and_then(|balance| balance.checked_sub(amount));
}

/// A single inconsistency found while checking the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityIssue {
    BalanceMismatch {
        account: AccountId,
        stored: Amount,
        replayed: Amount,
    },
    NegativeBalance {
        account: AccountId,
        balance: Amount,
    },
    AccountCountMismatch {
        user: UserId,
        recorded: u32,
        actual: u32,
    },
    QuotaExceeded {
        user: UserId,
        account_count: u32,
        max_accounts: u32,
    },
    OrphanAccount {
        account: AccountId,
        owner: UserId,
    },
    SequenceGap {
        expected: i64,
        found: i64,
    },
    /// Replaying the account's history left the decimal range
    ReplayOverflow {
        account: AccountId,
    },
}

impl fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityIssue::BalanceMismatch {
                account,
                stored,
                replayed,
            } => write!(
                f,
                "account {} stores balance {} but its history adds up to {}",
                account, stored, replayed
            ),
            IntegrityIssue::NegativeBalance { account, balance } => {
                write!(f, "account {} has negative balance {}", account, balance)
            }
            IntegrityIssue::AccountCountMismatch {
                user,
                recorded,
                actual,
            } => write!(
                f,
                "user {} records {} accounts but owns {}",
                user, recorded, actual
            ),
            IntegrityIssue::QuotaExceeded {
                user,
                account_count,
                max_accounts,
            } => write!(
                f,
                "user {} holds {} accounts, above the quota of {}",
                user, account_count, max_accounts
            ),
            IntegrityIssue::OrphanAccount { account, owner } => {
                write!(f, "account {} belongs to missing user {}", account, owner)
            }
            IntegrityIssue::ReplayOverflow { account } => {
                write!(f, "history of account {} overflows when replayed", account)
            }
            IntegrityIssue::SequenceGap { expected, found } => write!(
                f,
                "transaction log sequence jumps from {} to {}",
                expected - 1,
                found
            ),
        }
    }
}

/// Result of checking the ledger's invariants.
#[derive(Debug, Clone, Default)]
pub struct IntegrityReport {
    pub user_count: usize,
    pub account_count: usize,
    pub transaction_count: usize,
    /// Sum of all stored account balances; `None` if it exceeds [`Amount`]
    pub total_balance: Option<Amount>,
    pub issues: Vec<IntegrityIssue>,
}

impl IntegrityReport {
    pub fn is_healthy(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Check stored state against the log.
///
/// Accounts that were deleted are absent from `accounts`, so only live
/// accounts are compared with their replayed history.
pub fn build_integrity_report(
    users: &[User],
    accounts: &[Account],
    transactions: &[Transaction],
) -> IntegrityReport {
    let mut issues = Vec::new();
    let replayed = replay_all_balances(transactions);

    let mut owned: HashMap<UserId, u32> = HashMap::new();
    for account in accounts {
        *owned.entry(account.owner).or_insert(0) += 1;

        match replayed.get(&account.id).copied().unwrap_or(Some(Decimal::ZERO)) {
            Some(expected) if expected != account.balance => {
                issues.push(IntegrityIssue::BalanceMismatch {
                    account: account.id,
                    stored: account.balance,
                    replayed: expected,
                });
            }
            Some(_) => {}
            None => issues.push(IntegrityIssue::ReplayOverflow { account: account.id }),
        }
        if account.balance < Decimal::ZERO {
            issues.push(IntegrityIssue::NegativeBalance {
                account: account.id,
                balance: account.balance,
            });
        }
        if !users.iter().any(|u| u.id == account.owner) {
            issues.push(IntegrityIssue::OrphanAccount {
                account: account.id,
                owner: account.owner,
            });
        }
    }

    for user in users {
        let actual = owned.get(&user.id).copied().unwrap_or(0);
        if actual != user.account_count {
            issues.push(IntegrityIssue::AccountCountMismatch {
                user: user.id,
                recorded: user.account_count,
                actual,
            });
        }
        if user.account_count > user.max_accounts {
            issues.push(IntegrityIssue::QuotaExceeded {
                user: user.id,
                account_count: user.account_count,
                max_accounts: user.max_accounts,
            });
        }
    }

    // Sequences start at 1 and grow by one per appended record
    let mut expected = 1;
    for tx in transactions {
        if tx.sequence != expected {
            issues.push(IntegrityIssue::SequenceGap {
                expected,
                found: tx.sequence,
            });
        }
        expected = tx.sequence + 1;
    }

    IntegrityReport {
        user_count: users.len(),
        account_count: accounts.len(),
        transaction_count: transactions.len(),
        total_balance: accounts
            .iter()
            .try_fold(Decimal::ZERO, |total, a| total.checked_add(a.balance)),
        issues,
    }
}
