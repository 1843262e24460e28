use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::application::{Ledger, LedgerConfig, UserChanges};
use crate::domain::{Transaction, parse_amount};

/// Coffer - account ledger with an audited transaction log
#[derive(Parser)]
#[command(name = "coffer")]
#[command(about = "Users, quota-bound accounts and an append-only transaction log")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, env = "COFFER_DATABASE", default_value = "coffer.db")]
    pub database: String,

    /// How long to wait for account locks, in milliseconds
    #[arg(long, env = "COFFER_LOCK_TIMEOUT_MS")]
    pub lock_timeout_ms: Option<u64>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// User management commands
    #[command(subcommand)]
    User(UserCommands),

    /// Account management commands
    #[command(subcommand)]
    Account(AccountCommands),

    /// Deposit money into an account
    Deposit {
        /// Account ID
        account: String,

        /// Amount to deposit (e.g., "50.00" or "50")
        amount: String,
    },

    /// Withdraw money from an account
    Withdraw {
        /// Account ID
        account: String,

        /// Amount to withdraw
        amount: String,
    },

    /// Move money between two accounts
    Transfer {
        /// Amount to transfer
        amount: String,

        /// Source account ID
        #[arg(long)]
        from: String,

        /// Destination account ID
        #[arg(long)]
        to: String,

        /// Give up if the accounts stay locked longer than this (milliseconds)
        #[arg(long)]
        wait_ms: Option<u64>,
    },

    /// Show an account balance (recorded in the log unless --peek)
    Balance {
        /// Account ID
        account: String,

        /// Read the balance without recording a query
        #[arg(long)]
        peek: bool,
    },

    /// List transactions
    History {
        /// Only transactions originating from this account
        #[arg(long)]
        account: Option<String>,
    },

    /// Show a single transaction
    Show {
        /// Transaction ID
        id: String,
    },

    /// Verify ledger integrity
    Check,

    /// Export data to CSV or JSON
    Export {
        /// What to export: transactions, balances, full
        export_type: String,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// Create a new user
    Create {
        /// Display name
        name: String,

        /// Secret used to authorize profile changes
        #[arg(long, env = "COFFER_PASSWORD")]
        password: String,

        /// Maximum number of accounts (defaults to the configured quota)
        #[arg(long)]
        max_accounts: Option<u32>,
    },

    /// Show user details
    Show {
        /// User ID
        id: String,
    },

    /// Change name and/or quota
    Update {
        /// User ID
        id: String,

        /// Current secret
        #[arg(long, env = "COFFER_PASSWORD")]
        password: String,

        /// New display name
        #[arg(long)]
        name: Option<String>,

        /// New maximum number of accounts
        #[arg(long)]
        max_accounts: Option<u32>,
    },

    /// Replace the user's secret
    Passwd {
        /// User ID
        id: String,

        /// Current secret
        #[arg(long)]
        old: String,

        /// New secret
        #[arg(long)]
        new: String,
    },

    /// Delete a user and all of its accounts
    Delete {
        /// User ID
        id: String,
    },

    /// List the accounts a user owns
    Accounts {
        /// User ID
        id: String,
    },
}

#[derive(Subcommand)]
pub enum AccountCommands {
    /// Open a new account for a user
    Create {
        /// Owner user ID
        #[arg(long)]
        owner: String,
    },

    /// Show account details
    Show {
        /// Account ID
        id: String,
    },

    /// Delete an account (its history is kept)
    Delete {
        /// Account ID
        id: String,
    },
}

impl Cli {
    fn config(&self) -> LedgerConfig {
        let config = LedgerConfig::default();
        match self.lock_timeout_ms {
            Some(ms) => config.with_lock_timeout(Duration::from_millis(ms)),
            None => config,
        }
    }

    pub async fn run(self) -> Result<()> {
        let config = self.config();

        if matches!(self.command, Commands::Init) {
            Ledger::open(&self.database, config).await?;
            println!("Database initialized: {}", self.database);
            return Ok(());
        }

        let ledger = Ledger::connect(&self.database, config)
            .await
            .with_context(|| {
                format!(
                    "Failed to open {}. Run `coffer init` to create it",
                    self.database
                )
            })?;

        match self.command {
            Commands::Init => {}

            Commands::User(user_cmd) => run_user_command(&ledger, user_cmd).await?,

            Commands::Account(account_cmd) => run_account_command(&ledger, account_cmd).await?,

            Commands::Deposit { account, amount } => {
                let account = parse_id(&account)?;
                let amount =
                    parse_amount(&amount).context("Invalid amount format. Use '50.00' or '50'")?;
                let tx = ledger.deposit(account, amount).await?;
                let balance = ledger.peek_balance(account).await?;
                println!("Deposited {} (#{}), balance: {}", tx.amount, tx.sequence, balance);
            }

            Commands::Withdraw { account, amount } => {
                let account = parse_id(&account)?;
                let amount =
                    parse_amount(&amount).context("Invalid amount format. Use '50.00' or '50'")?;
                let tx = ledger.withdraw(account, amount).await?;
                let balance = ledger.peek_balance(account).await?;
                println!("Withdrew {} (#{}), balance: {}", tx.amount, tx.sequence, balance);
            }

            Commands::Transfer {
                amount,
                from,
                to,
                wait_ms,
            } => {
                let from = parse_id(&from)?;
                let to = parse_id(&to)?;
                let amount =
                    parse_amount(&amount).context("Invalid amount format. Use '50.00' or '50'")?;

                let tx = match wait_ms {
                    Some(ms) => {
                        ledger
                            .transfer_within(from, to, amount, Duration::from_millis(ms))
                            .await?
                    }
                    None => ledger.transfer(from, to, amount).await?,
                };
                println!("Transfer recorded: {}", tx.id);
                println!("  {} -> {}: {}", from, to, tx.amount);
            }

            Commands::Balance { account, peek } => {
                let account = parse_id(&account)?;
                let balance = if peek {
                    ledger.peek_balance(account).await?
                } else {
                    ledger.get_balance(account).await?
                };
                println!("{}: {}", account, balance);
            }

            Commands::History { account } => {
                let transactions = match account {
                    Some(id) => ledger.account_history(parse_id(&id)?).await?,
                    None => ledger.full_history().await?,
                };
                print_transactions(&transactions);
            }

            Commands::Show { id } => {
                let tx = ledger.get_transaction(parse_id(&id)?).await?;
                println!("Transaction: {}", tx.id);
                println!("  Sequence:  {}", tx.sequence);
                println!("  Type:      {}", tx.kind);
                println!("  Account:   {}", tx.account);
                if let Some(recipient) = tx.recipient {
                    println!("  Recipient: {}", recipient);
                }
                println!("  Amount:    {}", tx.amount);
                println!("  Time:      {}", tx.timestamp.format("%Y-%m-%d %H:%M:%S"));
            }

            Commands::Check => run_check_command(&ledger).await?,

            Commands::Export {
                export_type,
                output,
            } => run_export_command(&ledger, &export_type, output.as_deref()).await?,
        }

        Ok(())
    }
}

async fn run_user_command(ledger: &Ledger, cmd: UserCommands) -> Result<()> {
    match cmd {
        UserCommands::Create {
            name,
            password,
            max_accounts,
        } => {
            let max_accounts = max_accounts.unwrap_or(ledger.config().default_max_accounts);
            let user = ledger.create_user(&name, &password, max_accounts).await?;
            println!("Created user: {} ({})", user.name, user.id);
        }

        UserCommands::Show { id } => {
            let user = ledger.get_user(parse_id(&id)?).await?;
            println!("User: {}", user.name);
            println!("  ID:        {}", user.id);
            println!("  Accounts:  {} of {}", user.account_count, user.max_accounts);
            println!(
                "  Created:   {}",
                user.created_at.format("%Y-%m-%d %H:%M:%S")
            );
        }

        UserCommands::Update {
            id,
            password,
            name,
            max_accounts,
        } => {
            let changes = UserChanges {
                name,
                max_accounts,
            };
            if changes.is_empty() {
                anyhow::bail!("Nothing to update. Pass --name and/or --max-accounts");
            }
            let user = ledger.update_user(parse_id(&id)?, changes, &password).await?;
            println!(
                "Updated user: {} (max accounts: {})",
                user.name, user.max_accounts
            );
        }

        UserCommands::Passwd { id, old, new } => {
            let id = parse_id(&id)?;
            ledger.change_password(id, &old, &new).await?;
            println!("Password changed for user {}", id);
        }

        UserCommands::Delete { id } => {
            let id = parse_id(&id)?;
            let removed = ledger.delete_user(id).await?;
            println!("Deleted user {} and {} account(s)", id, removed.len());
        }

        UserCommands::Accounts { id } => {
            let accounts = ledger.accounts_of(parse_id(&id)?).await?;
            if accounts.is_empty() {
                println!("No accounts found.");
            } else {
                println!("{:<38} {:>14}", "ACCOUNT", "BALANCE");
                println!("{}", "-".repeat(53));
                for account in accounts {
                    println!("{:<38} {:>14}", account.id, account.balance);
                }
            }
        }
    }
    Ok(())
}

async fn run_account_command(ledger: &Ledger, cmd: AccountCommands) -> Result<()> {
    match cmd {
        AccountCommands::Create { owner } => {
            let account = ledger.create_account(parse_id(&owner)?).await?;
            println!("Created account: {}", account.id);
        }

        AccountCommands::Show { id } => {
            let account = ledger.get_account(parse_id(&id)?).await?;
            println!("Account: {}", account.id);
            println!("  Owner:    {}", account.owner);
            println!("  Balance:  {}", account.balance);
            println!(
                "  Created:  {}",
                account.created_at.format("%Y-%m-%d %H:%M:%S")
            );
        }

        AccountCommands::Delete { id } => {
            let account = ledger.delete_account(parse_id(&id)?).await?;
            println!(
                "Deleted account {} (final balance: {})",
                account.id, account.balance
            );
        }
    }
    Ok(())
}

async fn run_check_command(ledger: &Ledger) -> Result<()> {
    println!("Checking ledger integrity...\n");

    let report = ledger.check_integrity().await?;

    println!("Users:        {}", report.user_count);
    println!("Accounts:     {}", report.account_count);
    println!("Transactions: {}", report.transaction_count);
    match report.total_balance {
        Some(total) => println!("Total:        {}", total),
        None => println!("Total:        exceeds the largest representable amount"),
    }
    println!();

    if report.is_healthy() {
        println!("Ledger is consistent.");
    } else {
        println!("Issues found:");
        for issue in &report.issues {
            println!("  - {}", issue);
        }
        anyhow::bail!("Ledger integrity check failed");
    }

    Ok(())
}

async fn run_export_command(ledger: &Ledger, export_type: &str, output: Option<&str>) -> Result<()> {
    use crate::io::Exporter;
    use std::fs::File;
    use std::io::{Write, stdout};

    let exporter = Exporter::new(ledger);

    let writer: Box<dyn Write> = match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path))?;
            Box::new(file)
        }
        None => Box::new(stdout()),
    };

    match export_type {
        "transactions" => {
            let count = exporter.export_transactions_csv(writer).await?;
            if output.is_some() {
                eprintln!("Exported {} transactions", count);
            }
        }
        "balances" => {
            let count = exporter.export_balances_csv(writer).await?;
            if output.is_some() {
                eprintln!("Exported {} balances", count);
            }
        }
        "full" => {
            let snapshot = exporter.export_full_json(writer).await?;
            if output.is_some() {
                eprintln!(
                    "Exported full ledger: {} users, {} accounts, {} transactions",
                    snapshot.users.len(),
                    snapshot.accounts.len(),
                    snapshot.transactions.len()
                );
            }
        }
        _ => {
            anyhow::bail!(
                "Invalid export type '{}'. Valid types: transactions, balances, full",
                export_type
            );
        }
    }

    Ok(())
}

fn print_transactions(transactions: &[Transaction]) {
    if transactions.is_empty() {
        println!("No transactions found.");
        return;
    }

    println!(
        "{:>6} {:<20} {:<14} {:>14} {:<10} {:<10}",
        "SEQ", "TIME", "TYPE", "AMOUNT", "ACCOUNT", "RECIPIENT"
    );
    println!("{}", "-".repeat(79));
    for tx in transactions {
        println!(
            "{:>6} {:<20} {:<14} {:>14} {:<10} {:<10}",
            tx.sequence,
            tx.timestamp.format("%Y-%m-%d %H:%M:%S"),
            tx.kind.as_str(),
            tx.amount.to_string(),
            short_id(tx.account),
            tx.recipient.map(short_id).unwrap_or_default()
        );
    }
}

fn short_id(id: Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}

fn parse_id(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s.trim()).with_context(|| format!("Invalid ID: {}", s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_transfer() {
        let cli = Cli::try_parse_from([
            "coffer",
            "--database",
            "test.db",
            "transfer",
            "12.50",
            "--from",
            "6f1c1a4e-8a39-4c59-9f3f-0a8a3e2f5b10",
            "--to",
            "1d2e3f40-5a6b-4c7d-8e9f-a0b1c2d3e4f5",
            "--wait-ms",
            "100",
        ])
        .unwrap();

        assert_eq!(cli.database, "test.db");
        match cli.command {
            Commands::Transfer { amount, wait_ms, .. } => {
                assert_eq!(amount, "12.50");
                assert_eq!(wait_ms, Some(100));
            }
            _ => panic!("expected transfer command"),
        }
    }

    #[test]
    fn test_lock_timeout_flag_sets_config() {
        let cli =
            Cli::try_parse_from(["coffer", "--lock-timeout-ms", "250", "check"]).unwrap();
        assert_eq!(cli.config().lock_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_parse_id_rejects_garbage() {
        assert!(parse_id("not-a-uuid").is_err());
        assert!(parse_id(" 6f1c1a4e-8a39-4c59-9f3f-0a8a3e2f5b10 ").is_ok());
    }
}
