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

//! Error types for wallet operations and the ledger store.

use crate::base::{OwnerId, TransactionId, WalletId};
use crate::validation::FieldError;
use thiserror::Error;

/// Coarse classification of [`WalletError`], used by callers to pick a
/// response (e.g. an HTTP status) without matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Forbidden,
    InsufficientFunds,
    Persistence,
    Unavailable,
}

/// Operations the ledger store commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    CreateWallet,
    UpdateWalletStatus,
    CompareAndSwapBalance,
    InsertTransaction,
    UpdateTransactionStatus,
}

/// Ledger store failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Unique constraint on the wallet owner
    #[error("a wallet already exists for owner {0}")]
    DuplicateOwner(OwnerId),

    /// Unique constraint on the wallet id
    #[error("duplicate wallet id {0}")]
    DuplicateWallet(WalletId),

    /// Unique constraint on the transaction id
    #[error("duplicate transaction id {0}")]
    DuplicateTransaction(TransactionId),

    #[error("transaction {0} not found")]
    TransactionNotFound(TransactionId),

    /// Terminal transactions are immutable
    #[error("transaction {0} is already finalized")]
    AlreadyFinalized(TransactionId),

    /// Finalization target must be `success` or `failed`
    #[error("transaction {0} can only move to a terminal status")]
    NonTerminalStatus(TransactionId),

    /// The write could not be committed; nothing was applied
    #[error("commit failed for {0:?}")]
    CommitFailed(StoreOperation),
}

/// Wallet operation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    /// One or more request fields violate their constraints
    #[error("invalid request: {}", join(.0))]
    Validation(Vec<FieldError>),

    #[error("wallet not found for owner {0}")]
    NotFound(OwnerId),

    #[error("a wallet already exists for owner {0}")]
    AlreadyInitialized(OwnerId),

    #[error("wallet of owner {0} is already enabled")]
    AlreadyEnabled(OwnerId),

    #[error("wallet of owner {0} is disabled")]
    Disabled(OwnerId),

    /// Withdrawal exceeds the balance observed at admission
    #[error("insufficient balance: available {balance}, requested {requested}")]
    InsufficientFunds { balance: i64, requested: i64 },

    #[error("ledger store failure: {0}")]
    Persistence(#[from] StoreError),

    /// The settlement pool has shut down
    #[error("settlement is unavailable")]
    SettlementUnavailable,
}

impl WalletError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WalletError::Validation(_) => ErrorKind::Validation,
            WalletError::NotFound(_) => ErrorKind::NotFound,
            WalletError::AlreadyInitialized(_) | WalletError::AlreadyEnabled(_) => {
                ErrorKind::Conflict
            }
            WalletError::Disabled(_) => ErrorKind::Forbidden,
            WalletError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            WalletError::Persistence(_) => ErrorKind::Persistence,
            WalletError::SettlementUnavailable => ErrorKind::Unavailable,
        }
    }
}

fn join(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
