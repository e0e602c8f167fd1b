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

//! Ledger store: sole owner of wallet and transaction state.
//!
//! [`LedgerStore`] is the persistence seam consumed by the settlement engine
//! and the wallet service. Every write goes through a commit step; a failed
//! commit surfaces as an error and leaves no partial state behind. The only
//! conditional write is [`LedgerStore::compare_and_swap_balance`].
//!
//! [`MemoryStore`] is the in-process implementation.
//!
//! # Thread Safety
//!
//! Wallet rows live in a [`DashMap`], each guarded by its own lock, so writes
//! to different wallets never contend. The owner index is only ever locked
//! before the wallet map, never after. Inside the transaction log, rows are
//! locked before the per-wallet index.

use crate::base::{OwnerId, TransactionId, WalletId};
use crate::error::{StoreError, StoreOperation};
use crate::transaction::{Transaction, TransactionStatus};
use crate::transaction_log::TransactionLog;
use crate::wallet::{Wallet, WalletCell, WalletStatus};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

/// Persistence primitives for wallets and transactions.
pub trait LedgerStore: Send + Sync + 'static {
    /// Inserts a new wallet.
    ///
    /// Fails with [`StoreError::DuplicateOwner`] if the owner already has one,
    /// or [`StoreError::DuplicateWallet`] if the wallet ID is taken.
    fn create_wallet(&self, wallet: Wallet) -> Result<(), StoreError>;

    fn get_wallet(&self, owner_id: &OwnerId) -> Result<Option<Wallet>, StoreError>;

    /// Unconditionally sets status and `enabled_at` for the owner's wallet.
    ///
    /// Returns `false` if the owner has no wallet.
    fn update_wallet_status(
        &self,
        owner_id: &OwnerId,
        status: WalletStatus,
        enabled_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Sets the balance of `wallet_id` to `new` only if it currently equals
    /// `expected` (`WHERE id = ? AND balance = ?`).
    ///
    /// Returns whether a row was updated.
    fn compare_and_swap_balance(
        &self,
        wallet_id: &WalletId,
        expected: i64,
        new: i64,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    fn insert_transaction(&self, transaction: Transaction) -> Result<(), StoreError>;

    fn get_transaction(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Option<Transaction>, StoreError>;

    /// Transactions of a wallet ordered by creation time, ascending.
    fn list_transactions(&self, wallet_id: &WalletId) -> Result<Vec<Transaction>, StoreError>;

    /// Moves a pending transaction to `status`.
    ///
    /// Fails with [`StoreError::AlreadyFinalized`] if it already left
    /// `pending`, or [`StoreError::NonTerminalStatus`] if `status` is
    /// `pending`.
    fn update_transaction_status(
        &self,
        transaction_id: &TransactionId,
        status: TransactionStatus,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Transactions still pending that were created before `cutoff`.
    fn pending_transactions(&self, cutoff: DateTime<Utc>) -> Result<Vec<Transaction>, StoreError>;
}

/// In-memory [`LedgerStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// Wallet rows indexed by wallet ID.
    wallets: DashMap<WalletId, WalletCell>,
    /// Unique owner index.
    owners: DashMap<OwnerId, WalletId>,
    transactions: TransactionLog,
    /// Armed commit failures, remaining count per operation.
    faults: DashMap<StoreOperation, usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            wallets: DashMap::new(),
            owners: DashMap::new(),
            transactions: TransactionLog::new(),
            faults: DashMap::new(),
        }
    }

    /// Makes the next `times` commits of `operation` fail with
    /// [`StoreError::CommitFailed`].
    pub fn inject_failure(&self, operation: StoreOperation, times: usize) {
        if times == 0 {
            return;
        }
        *self.faults.entry(operation).or_insert(0) += times;
    }

    /// Number of wallets stored.
    pub fn wallet_count(&self) -> usize {
        self.wallets.len()
    }

    /// Snapshots of every wallet, in no particular order.
    pub fn wallets(&self) -> Vec<Wallet> {
        self.wallets.iter().map(|cell| cell.snapshot()).collect()
    }

    fn commit(&self, operation: StoreOperation) -> Result<(), StoreError> {
        if let Entry::Occupied(mut armed) = self.faults.entry(operation) {
            *armed.get_mut() -= 1;
            if *armed.get() == 0 {
                armed.remove();
            }
            debug!(?operation, "injected commit failure");
            return Err(StoreError::CommitFailed(operation));
        }
        Ok(())
    }

    fn wallet_id_of(&self, owner_id: &OwnerId) -> Option<WalletId> {
        self.owners.get(owner_id).map(|id| id.value().clone())
    }
}

impl LedgerStore for MemoryStore {
    fn create_wallet(&self, wallet: Wallet) -> Result<(), StoreError> {
        match self.owners.entry(wallet.owner_id.clone()) {
            Entry::Occupied(_) => Err(StoreError::DuplicateOwner(wallet.owner_id)),
            Entry::Vacant(owner) => match self.wallets.entry(wallet.id.clone()) {
                Entry::Occupied(_) => Err(StoreError::DuplicateWallet(wallet.id)),
                Entry::Vacant(row) => {
                    self.commit(StoreOperation::CreateWallet)?;
                    let wallet_id = wallet.id.clone();
                    let _row = row.insert(WalletCell::new(wallet));
                    owner.insert(wallet_id);
                    Ok(())
                }
            },
        }
    }

    fn get_wallet(&self, owner_id: &OwnerId) -> Result<Option<Wallet>, StoreError> {
        let Some(wallet_id) = self.wallet_id_of(owner_id) else {
            return Ok(None);
        };
        Ok(self.wallets.get(&wallet_id).map(|cell| cell.snapshot()))
    }

    fn update_wallet_status(
        &self,
        owner_id: &OwnerId,
        status: WalletStatus,
        enabled_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let Some(wallet_id) = self.wallet_id_of(owner_id) else {
            return Ok(false);
        };
        let Some(cell) = self.wallets.get(&wallet_id) else {
            return Ok(false);
        };
        cell.set_status(status, enabled_at, now, || {
            self.commit(StoreOperation::UpdateWalletStatus)
        })?;
        Ok(true)
    }

    fn compare_and_swap_balance(
        &self,
        wallet_id: &WalletId,
        expected: i64,
        new: i64,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let Some(cell) = self.wallets.get(wallet_id) else {
            return Ok(false);
        };
        cell.compare_and_swap_balance(expected, new, now, || {
            self.commit(StoreOperation::CompareAndSwapBalance)
        })
    }

    fn insert_transaction(&self, transaction: Transaction) -> Result<(), StoreError> {
        self.transactions
            .push(transaction, || self.commit(StoreOperation::InsertTransaction))
    }

    fn get_transaction(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Option<Transaction>, StoreError> {
        Ok(self.transactions.get(transaction_id))
    }

    fn list_transactions(&self, wallet_id: &WalletId) -> Result<Vec<Transaction>, StoreError> {
        Ok(self.transactions.list(wallet_id))
    }

    fn update_transaction_status(
        &self,
        transaction_id: &TransactionId,
        status: TransactionStatus,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.transactions.finalize(transaction_id, status, now, || {
            self.commit(StoreOperation::UpdateTransactionStatus)
        })
    }

    fn pending_transactions(&self, cutoff: DateTime<Utc>) -> Result<Vec<Transaction>, StoreError> {
        Ok(self.transactions.pending_before(cutoff))
    }
}
