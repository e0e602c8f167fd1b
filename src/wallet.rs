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

//! Wallet records.
//!
//! A wallet starts disabled and must be enabled before it can transact:
//!
//! ```text
//!  Disabled ──enable──► Enabled (enabled_at = now)
//!     ▲                    │
//!     └──────disable───────┘  (enabled_at cleared, idempotent)
//! ```
//!
//! The balance is never written directly: it only moves through
//! [`WalletCell::compare_and_swap_balance`], which the ledger store exposes as
//! its single conditional write.

use crate::base::{OwnerId, WalletId};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletStatus {
    Enabled,
    Disabled,
}

impl fmt::Display for WalletStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalletStatus::Enabled => write!(f, "enabled"),
            WalletStatus::Disabled => write!(f, "disabled"),
        }
    }
}

/// Snapshot of a wallet row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Wallet {
    pub id: WalletId,
    #[serde(rename = "owned_by")]
    pub owner_id: OwnerId,
    pub status: WalletStatus,
    pub enabled_at: Option<DateTime<Utc>>,
    pub balance: i64,
    #[serde(skip_serializing)]
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// A freshly initialized wallet: disabled, empty.
    pub fn new(id: WalletId, owner_id: OwnerId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            owner_id,
            status: WalletStatus::Disabled,
            enabled_at: None,
            balance: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.status == WalletStatus::Enabled
    }
}

/// A stored wallet row guarded by its own lock.
///
/// Each method runs its whole read-check-write under one lock acquisition, so
/// a compare-and-swap can never interleave with another write to the same row.
#[derive(Debug)]
pub(crate) struct WalletCell {
    inner: Mutex<Wallet>,
}

impl WalletCell {
    pub(crate) fn new(wallet: Wallet) -> Self {
        Self {
            inner: Mutex::new(wallet),
        }
    }

    pub(crate) fn snapshot(&self) -> Wallet {
        self.inner.lock().clone()
    }

    /// Sets the status, stamping or clearing `enabled_at`.
    ///
    /// `commit` runs after validation and before the write; if it fails the
    /// row is left untouched.
    pub(crate) fn set_status<E>(
        &self,
        status: WalletStatus,
        enabled_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        commit: impl FnOnce() -> Result<(), E>,
    ) -> Result<(), E> {
        let mut wallet = self.inner.lock();
        commit()?;
        wallet.status = status;
        wallet.enabled_at = enabled_at;
        wallet.updated_at = now;
        Ok(())
    }

    /// Replaces the balance with `new` only if it still equals `expected`.
    ///
    /// Returns `Ok(false)` when the balance has moved since the caller's
    /// snapshot, or when `new` would be negative.
    pub(crate) fn compare_and_swap_balance<E>(
        &self,
        expected: i64,
        new: i64,
        now: DateTime<Utc>,
        commit: impl FnOnce() -> Result<(), E>,
    ) -> Result<bool, E> {
        let mut wallet = self.inner.lock();
        if wallet.balance != expected || new < 0 {
            return Ok(false);
        }
        commit()?;
        wallet.balance = new;
        wallet.updated_at = now;
        Self::assert_invariants(&wallet);
        Ok(true)
    }

    fn assert_invariants(wallet: &Wallet) {
        debug_assert!(
            wallet.balance >= 0,
            "Invariant violated: wallet balance went negative: {}",
            wallet.balance
        );
    }
}
