mod common;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use coffer::application::{LedgerConfig, LedgerError};
use common::{TwoAccounts, balance_of, dec, faulty_ledger, funded_account, memory_ledger};
use rust_decimal::Decimal;
use tokio::task::JoinSet;
use tokio::time::timeout;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_deposits_sum_exactly() -> Result<()> {
    let ledger = Arc::new(memory_ledger());
    let (_, account) = funded_account(&ledger, "0").await?;

    let mut tasks = JoinSet::new();
    for _ in 0..100 {
        let ledger = Arc::clone(&ledger);
        tasks.spawn(async move { ledger.deposit(account.id, dec("1.01")).await });
    }
    while let Some(result) = tasks.join_next().await {
        result??;
    }

    assert_eq!(balance_of(&ledger, account.id).await?, dec("101.00"));
    assert_eq!(ledger.account_history(account.id).await?.len(), 100);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_withdrawals_never_overdraw() -> Result<()> {
    let ledger = Arc::new(memory_ledger());
    let (_, account) = funded_account(&ledger, "10").await?;

    let mut tasks = JoinSet::new();
    for _ in 0..40 {
        let ledger = Arc::clone(&ledger);
        tasks.spawn(async move { ledger.withdraw(account.id, Decimal::ONE).await });
    }

    let mut succeeded = 0;
    while let Some(result) = tasks.join_next().await {
        match result? {
            Ok(_) => succeeded += 1,
            Err(LedgerError::NotEnoughFunds { .. }) => {}
            Err(other) => return Err(other.into()),
        }
    }

    assert_eq!(succeeded, 10);
    assert_eq!(balance_of(&ledger, account.id).await?, Decimal::ZERO);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_opposite_transfers_do_not_deadlock() -> Result<()> {
    let ledger = Arc::new(memory_ledger());
    let pair = TwoAccounts::create(&ledger, "1000", "1000").await?;
    let (x, y) = (pair.x.id, pair.y.id);

    let mut tasks = JoinSet::new();
    for i in 0..200 {
        let ledger = Arc::clone(&ledger);
        let (from, to) = if i % 2 == 0 { (x, y) } else { (y, x) };
        tasks.spawn(async move { ledger.transfer(from, to, dec("3")).await });
    }

    timeout(Duration::from_secs(10), async {
        while let Some(result) = tasks.join_next().await {
            result??;
        }
        Ok::<_, anyhow::Error>(())
    })
    .await??;

    let total = balance_of(&ledger, x).await? + balance_of(&ledger, y).await?;
    assert_eq!(total, dec("2000"));
    assert_eq!(balance_of(&ledger, x).await?, dec("1000"));
    assert_eq!(ledger.full_history().await?.len(), 202);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_account_creation_respects_quota() -> Result<()> {
    let ledger = Arc::new(memory_ledger());
    let user = ledger.create_user("kate", "pw", 3).await?;

    let mut tasks = JoinSet::new();
    for _ in 0..20 {
        let ledger = Arc::clone(&ledger);
        tasks.spawn(async move { ledger.create_account(user.id).await });
    }

    let mut opened = 0;
    while let Some(result) = tasks.join_next().await {
        match result? {
            Ok(_) => opened += 1,
            Err(LedgerError::QuotaExceeded { .. }) => {}
            Err(other) => return Err(other.into()),
        }
    }

    assert_eq!(opened, 3);
    assert_eq!(ledger.get_user(user.id).await?.account_count, 3);
    assert_eq!(ledger.accounts_of(user.id).await?.len(), 3);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_transfer_gives_up_while_accounts_are_locked() -> Result<()> {
    let (ledger, store) = faulty_ledger(LedgerConfig::default());
    let ledger = Arc::new(ledger);
    let pair = TwoAccounts::create(&ledger, "100", "100").await?;
    let (x, y) = (pair.x.id, pair.y.id);

    // A slow commit keeps both account locks held for a while.
    store.delay_writes(Duration::from_millis(500));
    let slow = {
        let ledger = Arc::clone(&ledger);
        tokio::spawn(async move { ledger.transfer(x, y, dec("10")).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let err = ledger
        .transfer_within(y, x, dec("5"), Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Busy(_)));

    slow.await??;
    store.delay_writes(Duration::ZERO);

    assert_eq!(balance_of(&ledger, x).await?, dec("90"));
    assert_eq!(balance_of(&ledger, y).await?, dec("110"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_lock_timeout_from_config_applies_to_deposits() -> Result<()> {
    let config = LedgerConfig::default().with_lock_timeout(Duration::from_millis(50));
    let (ledger, store) = faulty_ledger(config);
    let ledger = Arc::new(ledger);
    let (_, account) = funded_account(&ledger, "1").await?;

    store.delay_writes(Duration::from_millis(500));
    let slow = {
        let ledger = Arc::clone(&ledger);
        tokio::spawn(async move { ledger.deposit(account.id, dec("1")).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(matches!(
        ledger.withdraw(account.id, dec("1")).await,
        Err(LedgerError::Busy(_))
    ));

    slow.await??;
    assert_eq!(balance_of(&ledger, account.id).await?, dec("2"));
    Ok(())
}
