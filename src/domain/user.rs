use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub type UserId = Uuid;

/// A salted SHA-256 digest of a user's secret.
/// The secret itself is never stored, and `Debug` output is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    salt: String,
    digest: String,
}

impl Credential {
    pub fn new(secret: &str) -> Self {
        let salt = Uuid::new_v4().simple().to_string();
        let digest = Self::hash(&salt, secret);
        Self { salt, digest }
    }

    /// Rebuild a credential from its persisted parts.
    pub fn from_parts(salt: impl Into<String>, digest: impl Into<String>) -> Self {
        Self {
            salt: salt.into(),
            digest: digest.into(),
        }
    }

    pub fn salt(&self) -> &str {
        &self.salt
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn matches(&self, secret: &str) -> bool {
        let candidate = Self::hash(&self.salt, secret);
        // Compare every byte so timing doesn't reveal the matching prefix.
        candidate.len() == self.digest.len()
            && candidate
                .bytes()
                .zip(self.digest.bytes())
                .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                == 0
    }

    fn hash(salt: &str, secret: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(salt.as_bytes());
        hasher.update(secret.as_bytes());
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Serialize-only: the credential never leaves the store, so a serialized
/// user cannot be read back into one.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    #[serde(skip)]
    pub credential: Credential,
    /// Number of accounts currently held
    pub account_count: u32,
    /// Quota: account_count never exceeds this
    pub max_accounts: u32,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(name: impl Into<String>, secret: &str, max_accounts: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            credential: Credential::new(secret),
            account_count: 0,
            max_accounts,
            created_at: Utc::now(),
        }
    }

    pub fn can_open_account(&self) -> bool {
        self.account_count < self.max_accounts
    }

    /// Reserve a slot for a new account.
    pub fn register_account(&mut self) -> Result<(), QuotaReached> {
        if !self.can_open_account() {
            return Err(QuotaReached {
                max_accounts: self.max_accounts,
            });
        }
        self.account_count += 1;
        Ok(())
    }

    /// Release the slot held by a deleted account.
    pub fn release_account(&mut self) {
        self.account_count = self.account_count.saturating_sub(1);
    }

    pub fn is_credential_correct(&self, secret: &str) -> bool {
        self.credential.matches(secret)
    }
}

/// Returned when a user already holds `max_accounts` accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaReached {
    pub max_accounts: u32,
}

impl fmt::Display for QuotaReached {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "maximum number of accounts reached (max allowed: {})",
            self.max_accounts
        )
    }
}

impl std::error::Error for QuotaReached {}
