use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Amount, UserId};

pub type AccountId = Uuid;

/// A balance holder owned by exactly one user. The owner is referenced by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub owner: UserId,
    /// Never negative
    pub balance: Amount,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(owner: UserId) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner,
            balance: Decimal::ZERO,
            created_at: Utc::now(),
        }
    }

    pub fn has_funds(&self, amount: Amount) -> bool {
        self.balance >= amount
    }

    /// Credit the account. Leaves the balance untouched if the sum does not
    /// fit in an [`Amount`].
    pub fn deposit(&mut self, amount: Amount) -> Result<(), BalanceOverflow> {
        self.balance = self
            .balance
            .checked_add(amount)
            .ok_or(BalanceOverflow {
                balance: self.balance,
                amount,
            })?;
        Ok(())
    }

    /// Debit the account. Leaves the balance untouched on failure.
    pub fn withdraw(&mut self, amount: Amount) -> Result<(), InsufficientFunds> {
        if !self.has_funds(amount) {
            return Err(InsufficientFunds {
                balance: self.balance,
                requested: amount,
            });
        }
        self.balance -= amount;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsufficientFunds {
    pub balance: Amount,
    pub requested: Amount,
}

impl fmt::Display for InsufficientFunds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "not enough funds: balance {}, requested {}",
            self.balance, self.requested
        )
    }
}

impl std::error::Error for InsufficientFunds {}

/// Returned when a credit would push a balance past [`Decimal::MAX`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceOverflow {
    pub balance: Amount,
    pub amount: Amount,
}

impl fmt::Display for BalanceOverflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "balance overflow: {} + {} exceeds the largest representable amount",
            self.balance, self.amount
        )
    }
}

impl std::error::Error for BalanceOverflow {}
