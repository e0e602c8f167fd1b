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

//! # Wallet Ledger
//!
//! This library provides a digital wallet backend: owners initialize a wallet,
//! enable or disable it, deposit and withdraw funds and query their balance
//! and transaction history.
//!
//! Deposits and withdrawals settle eventually. They are admitted and recorded
//! as `pending` synchronously, then a background pool applies them to the
//! balance with an optimistic compare-and-swap and marks them `success` or
//! `failed`.
//!
//! ## Core Components
//!
//! - [`WalletService`]: Entry point for every wallet operation
//! - [`SettlementEngine`]: Admission and background settlement of deposits/withdrawals
//! - [`SettlementHandle`]: Drains, reconciles and shuts down the settlement pool
//! - [`LedgerStore`]: Persistence seam; [`MemoryStore`] is the in-memory implementation
//! - [`WalletError`]: Error types for wallet operations
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use wallet_ledger_rs::{
//!     InitializeWalletRequest, MemoryStore, OwnerId, SettlementConfig, TransactionRequest,
//!     TransactionStatus, WalletError, WalletService,
//! };
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let (wallets, settlement) =
//!     WalletService::start(Arc::new(MemoryStore::new()), SettlementConfig::immediate());
//! let owner = OwnerId::from("cust-1");
//!
//! wallets.initialize_wallet(&InitializeWalletRequest::new("cust-1")).unwrap();
//! wallets.enable_wallet(&owner).unwrap();
//! wallets.deposit(&owner, &TransactionRequest::new(500, "ref-1")).unwrap();
//! settlement.wait_idle().await;
//!
//! // Withdrawals above the balance are rejected up front
//! let result = wallets.withdraw(&owner, &TransactionRequest::new(1000, "ref-2"));
//! assert!(matches!(result, Err(WalletError::InsufficientFunds { balance: 500, .. })));
//!
//! let history = wallets.list_transactions(&owner).unwrap();
//! assert_eq!(history.len(), 1);
//! assert_eq!(history[0].status, TransactionStatus::Success);
//! # });
//! ```
//!
//! ## Thread Safety
//!
//! Wallet rows are individually locked inside the store, and the balance only
//! moves through a compare-and-swap. Concurrent settlements on the same wallet
//! may fail, but a stale one is never applied.

mod base;
pub mod config;
pub mod error;
pub mod outbox;
mod service;
mod settlement;
pub mod store;
mod transaction;
mod transaction_log;
pub mod validation;
mod wallet;

pub use base::{Clock, IdGenerator, OwnerId, SystemClock, TransactionId, UuidGenerator, WalletId};
pub use config::SettlementConfig;
pub use error::{ErrorKind, StoreError, StoreOperation, WalletError};
pub use outbox::{ReconcileReport, StrandedSettlement};
pub use service::{Collaborators, WalletService};
pub use settlement::{SettlementEngine, SettlementHandle};
pub use store::{LedgerStore, MemoryStore};
pub use transaction::{Receipt, Transaction, TransactionKind, TransactionStatus};
pub use validation::{InitializeWalletRequest, TransactionRequest, Validator};
pub use wallet::{Wallet, WalletStatus};
