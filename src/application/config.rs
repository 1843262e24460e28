use std::time::Duration;

/// Default bound on how long an operation waits for its locks.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Default account quota for users created without an explicit one.
pub const DEFAULT_MAX_ACCOUNTS: u32 = 5;

/// Runtime settings shared by the ledger services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerConfig {
    pub lock_timeout: Duration,
    pub default_max_accounts: u32,
}

impl LedgerConfig {
    pub fn new() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            default_max_accounts: DEFAULT_MAX_ACCOUNTS,
        }
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn with_default_max_accounts(mut self, max_accounts: u32) -> Self {
        self.default_max_accounts = max_accounts;
        self
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self::new()
    }
}
