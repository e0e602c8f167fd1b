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

//! Thread-safe transaction log with deduplication.
//!
//! Stores transaction rows by ID and keeps, per wallet, the order in which
//! rows were inserted so history can be listed by creation time.

use crate::base::{TransactionId, WalletId};
use crate::error::StoreError;
use crate::transaction::{Transaction, TransactionStatus};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// A thread-safe transaction log with duplicate detection.
///
/// Combines a [`DashMap`] of rows for O(1) lookups with a per-wallet index
/// preserving insertion order. A row is locked before the wallet index and
/// never after, so [`TransactionLog::list`] drops the index guard before
/// reading rows.
#[derive(Debug, Default)]
pub(crate) struct TransactionLog {
    /// Rows indexed by transaction ID.
    transactions: DashMap<TransactionId, Transaction>,

    /// Transaction IDs per wallet, in insertion order.
    by_wallet: DashMap<WalletId, Vec<TransactionId>>,
}

impl TransactionLog {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Appends a transaction.
    ///
    /// `commit` runs once the ID is known to be unique and before anything is
    /// written.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateTransaction`] if the ID is already
    /// logged, or the error from `commit`.
    pub(crate) fn push(
        &self,
        transaction: Transaction,
        commit: impl FnOnce() -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let wallet_id = transaction.wallet_id.clone();
        let transaction_id = transaction.id.clone();

        match self.transactions.entry(transaction_id.clone()) {
            Entry::Occupied(_) => Err(StoreError::DuplicateTransaction(transaction_id)),
            Entry::Vacant(entry) => {
                commit()?;
                // Row guard stays held until the index lists it.
                let _row = entry.insert(transaction);
                self.by_wallet
                    .entry(wallet_id)
                    .or_default()
                    .push(transaction_id);
                Ok(())
            }
        }
    }

    pub(crate) fn get(&self, transaction_id: &TransactionId) -> Option<Transaction> {
        self.transactions
            .get(transaction_id)
            .map(|entry| entry.value().clone())
    }

    /// Transactions of a wallet ordered by creation time, ties broken by
    /// insertion order.
    pub(crate) fn list(&self, wallet_id: &WalletId) -> Vec<Transaction> {
        let ids = match self.by_wallet.get(wallet_id) {
            Some(ids) => ids.value().clone(),
            None => return Vec::new(),
        };

        let mut transactions: Vec<Transaction> =
            ids.iter().filter_map(|id| self.get(id)).collect();
        transactions.sort_by_key(|tx| tx.created_at);
        transactions
    }

    /// Moves a pending transaction to a terminal status.
    ///
    /// # Errors
    ///
    /// - [`StoreError::TransactionNotFound`] - Unknown ID.
    /// - [`StoreError::NonTerminalStatus`] - `status` is `pending`.
    /// - [`StoreError::AlreadyFinalized`] - The transaction left `pending`.
    /// - Any error from `commit`, in which case nothing is written.
    pub(crate) fn finalize(
        &self,
        transaction_id: &TransactionId,
        status: TransactionStatus,
        now: DateTime<Utc>,
        commit: impl FnOnce() -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        if !status.is_terminal() {
            return Err(StoreError::NonTerminalStatus(transaction_id.clone()));
        }
        let mut entry = self
            .transactions
            .get_mut(transaction_id)
            .ok_or_else(|| StoreError::TransactionNotFound(transaction_id.clone()))?;

        if entry.status.is_terminal() {
            return Err(StoreError::AlreadyFinalized(transaction_id.clone()));
        }
        commit()?;
        entry.finalize(status, now);
        Ok(())
    }

    /// Transactions still pending that were created before `cutoff`.
    pub(crate) fn pending_before(&self, cutoff: DateTime<Utc>) -> Vec<Transaction> {
        let mut pending: Vec<Transaction> = self
            .transactions
            .iter()
            .filter(|entry| {
                entry.status == TransactionStatus::Pending && entry.created_at < cutoff
            })
            .map(|entry| entry.value().clone())
            .collect();
        pending.sort_by_key(|tx| tx.created_at);
        pending
    }
}
