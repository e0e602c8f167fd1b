// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use wallet_ledger_rs::{
    InitializeWalletRequest, LedgerStore, MemoryStore, OwnerId, SettlementConfig,
    SettlementHandle, TransactionRequest, TransactionStatus, WalletError, WalletService,
};

/// Wallet Ledger - Replay wallet command CSV files
///
/// Reads wallet commands from a CSV file, runs them through the wallet service
/// and its settlement pool, then outputs the final wallet states to stdout.
#[derive(Parser, Debug)]
#[command(name = "wallet-ledger-rs")]
#[command(about = "Replays wallet commands and prints the settled wallets", long_about = None)]
struct Args {
    /// Path to CSV file with wallet commands
    ///
    /// Expected format: op,owner,amount,reference
    /// Example: cargo run -- commands.csv > wallets.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Settlement lag applied before each balance update, in milliseconds
    #[arg(long, env = "WALLET_SETTLEMENT_DELAY_MS", default_value_t = 0)]
    delay_ms: u64,

    /// Maximum number of settlements running at once
    #[arg(long, env = "WALLET_MAX_IN_FLIGHT", default_value_t = SettlementConfig::DEFAULT_MAX_IN_FLIGHT)]
    max_in_flight: usize,

    /// Period of the reconciliation pass in seconds (0 disables it)
    #[arg(long, env = "WALLET_RECONCILE_INTERVAL_SECS", default_value_t = SettlementConfig::DEFAULT_RECONCILE_INTERVAL.as_secs())]
    reconcile_interval_secs: u64,

    /// Wait for each deposit/withdrawal to settle before the next row
    #[arg(long)]
    sequential: bool,
}

impl Args {
    fn settlement_config(&self) -> SettlementConfig {
        SettlementConfig::default()
            .with_delay(Duration::from_millis(self.delay_ms))
            .with_max_in_flight(self.max_in_flight)
            .with_reconcile_interval(Some(Duration::from_secs(self.reconcile_interval_secs)))
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    // Parse command line arguments
    let args = Args::parse();

    // Open input file
    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    let store = Arc::new(MemoryStore::new());
    let (wallets, settlement) = WalletService::start(Arc::clone(&store), args.settlement_config());

    // Replay commands from CSV
    if let Err(e) =
        process_commands(BufReader::new(file), &wallets, &settlement, args.sequential).await
    {
        eprintln!("Error processing commands: {}", e);
        process::exit(1);
    }

    // Let every admitted settlement finish before reporting
    settlement.shutdown().await;

    // Write results to stdout
    if let Err(e) = write_wallets(&store, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

/// Raw CSV record matching the input format.
///
/// Fields: `op, owner, amount, reference`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    op: String,
    owner: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    amount: Option<i64>,
    #[serde(default)]
    reference: Option<String>,
}

/// A wallet command parsed from one CSV row.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Init,
    Enable,
    Disable,
    Deposit(TransactionRequest),
    Withdraw(TransactionRequest),
}

impl CsvRecord {
    /// Converts the CSV record to a command.
    ///
    /// Returns `None` for unknown operations or a missing amount. Amount and
    /// reference values themselves are validated by the wallet service.
    fn into_command(self) -> Option<(OwnerId, Command)> {
        let owner_id = OwnerId(self.owner);
        let reference = self.reference.unwrap_or_default();

        let command = match self.op.to_lowercase().as_str() {
            "init" => Command::Init,
            "enable" => Command::Enable,
            "disable" => Command::Disable,
            "deposit" => Command::Deposit(TransactionRequest::new(self.amount?, reference)),
            "withdraw" | "withdrawal" => {
                Command::Withdraw(TransactionRequest::new(self.amount?, reference))
            }
            _ => return None,
        };
        Some((owner_id, command))
    }
}

fn apply<S: LedgerStore>(
    wallets: &WalletService<S>,
    owner_id: &OwnerId,
    command: &Command,
) -> Result<(), WalletError> {
    match command {
        Command::Init => {
            wallets.initialize_wallet(&InitializeWalletRequest::new(owner_id.as_str()))?;
        }
        Command::Enable => {
            wallets.enable_wallet(owner_id)?;
        }
        Command::Disable => {
            wallets.disable_wallet(owner_id)?;
        }
        Command::Deposit(request) => {
            wallets.deposit(owner_id, request)?;
        }
        Command::Withdraw(request) => {
            wallets.withdraw(owner_id, request)?;
        }
    }
    Ok(())
}

/// Replay wallet commands from a CSV reader.
///
/// Malformed rows and rejected commands are logged and skipped.
///
/// # CSV Format
///
/// Expected columns: `op, owner, amount, reference`
/// - `op`: init, enable, disable, deposit, withdraw
/// - `owner`: Owner identifier
/// - `amount`: Integer amount (deposit/withdraw only)
/// - `reference`: Caller reference (deposit/withdraw only)
///
/// # Example
///
/// ```csv
/// op,owner,amount,reference
/// init,cust-1,,
/// enable,cust-1,,
/// deposit,cust-1,1000,ref-1
/// ```
///
/// # Errors
///
/// Returns a CSV error only if the reader itself fails.
async fn process_commands<R: Read, S: LedgerStore>(
    reader: R,
    wallets: &WalletService<S>,
    settlement: &SettlementHandle<S>,
    sequential: bool,
) -> Result<(), csv::Error> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All) // Handle whitespace in fields like " deposit "
        .flexible(true) // Allow missing amount/reference fields
        .has_headers(true)
        .from_reader(reader);

    for (index, result) in rdr.deserialize::<CsvRecord>().enumerate() {
        let row = index + 1;
        let record = match result {
            Ok(record) => record,
            Err(e) if e.is_io_error() => return Err(e),
            Err(e) => {
                warn!(row, reason = %e, "skipping malformed row");
                continue;
            }
        };

        let Some((owner_id, command)) = record.into_command() else {
            warn!(row, "skipping invalid command");
            continue;
        };

        if let Err(e) = apply(wallets, &owner_id, &command) {
            warn!(row, owner = %owner_id, reason = %e, "command rejected");
            continue;
        }

        if sequential && matches!(command, Command::Deposit(_) | Command::Withdraw(_)) {
            settlement.wait_idle().await;
        }
    }

    Ok(())
}

/// Final state of one wallet.
#[derive(Debug, Serialize)]
struct WalletRow {
    owner: String,
    wallet: String,
    status: String,
    balance: i64,
    pending: usize,
    success: usize,
    failed: usize,
}

/// Write wallet states to a CSV writer, ordered by owner.
///
/// # CSV Format
///
/// Columns: `owner, wallet, status, balance, pending, success, failed`
///
/// # Errors
///
/// Returns a CSV error if writing fails.
fn write_wallets<W: Write>(store: &MemoryStore, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    let mut wallets = store.wallets();
    wallets.sort_by(|a, b| a.owner_id.as_str().cmp(b.owner_id.as_str()));

    for wallet in wallets {
        let transactions = store.list_transactions(&wallet.id).unwrap_or_default();
        let count = |status: TransactionStatus| {
            transactions.iter().filter(|tx| tx.status == status).count()
        };
        wtr.serialize(WalletRow {
            owner: wallet.owner_id.to_string(),
            wallet: wallet.id.to_string(),
            status: wallet.status.to_string(),
            balance: wallet.balance,
            pending: count(TransactionStatus::Pending),
            success: count(TransactionStatus::Success),
            failed: count(TransactionStatus::Failed),
        })?;
    }

    // Flush to ensure all data is written
    wtr.flush()?;
    Ok(())
}
