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

//! Transaction records.
//!
//! Transactions follow a one-shot state machine:
//! - [`Pending`](TransactionStatus::Pending) → [`Success`](TransactionStatus::Success)
//!   (the balance compare-and-swap applied)
//! - [`Pending`](TransactionStatus::Pending) → [`Failed`](TransactionStatus::Failed)
//!   (the balance moved since admission, or the swap errored)
//!
//! Terminal transactions are immutable.

use crate::base::{OwnerId, TransactionId, WalletId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of a balance mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    /// Credit
    Deposit,
    /// Debit
    Withdrawal,
}

impl TransactionKind {
    /// Balance after applying `amount` to `balance`, or `None` on overflow
    /// or when a debit would go negative.
    pub fn apply(self, balance: i64, amount: i64) -> Option<i64> {
        match self {
            TransactionKind::Deposit => balance.checked_add(amount),
            TransactionKind::Withdrawal => balance.checked_sub(amount).filter(|b| *b >= 0),
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionKind::Deposit => write!(f, "deposit"),
            TransactionKind::Withdrawal => write!(f, "withdrawal"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
}

impl TransactionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionStatus::Pending => write!(f, "pending"),
            TransactionStatus::Success => write!(f, "success"),
            TransactionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A transaction row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub id: TransactionId,
    pub wallet_id: WalletId,
    pub owner_id: OwnerId,
    pub kind: TransactionKind,
    pub amount: i64,
    pub reference_id: String,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn pending(
        id: TransactionId,
        wallet_id: WalletId,
        owner_id: OwnerId,
        kind: TransactionKind,
        amount: i64,
        reference_id: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            wallet_id,
            owner_id,
            kind,
            amount,
            reference_id,
            status: TransactionStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Moves a pending transaction to a terminal status.
    ///
    /// Returns `false` (and changes nothing) if the transaction is already
    /// terminal or `status` is not terminal.
    pub fn finalize(&mut self, status: TransactionStatus, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.updated_at = now;
        true
    }

    /// The caller-facing projection of this transaction.
    pub fn receipt(&self) -> Receipt {
        Receipt {
            id: self.id.clone(),
            owned_by: self.owner_id.clone(),
            kind: self.kind,
            status: self.status,
            transacted_at: self.created_at,
            amount: self.amount,
            reference_id: self.reference_id.clone(),
        }
    }
}

/// Projection returned by deposits and withdrawals and listed in a wallet's
/// history.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Receipt {
    pub id: TransactionId,
    pub owned_by: OwnerId,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub transacted_at: DateTime<Utc>,
    pub amount: i64,
    pub reference_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(kind: TransactionKind) -> Transaction {
        Transaction::pending(
            TransactionId("t-1".into()),
            WalletId("w-1".into()),
            OwnerId::from("cust-1"),
            kind,
            1000,
            "ref-1".into(),
            Utc::now(),
        )
    }

    #[test]
    fn pending_to_success() {
        let mut tx = pending(TransactionKind::Deposit);
        assert!(tx.finalize(TransactionStatus::Success, Utc::now()));
        assert_eq!(tx.status, TransactionStatus::Success);
    }

    #[test]
    fn pending_to_failed() {
        let mut tx = pending(TransactionKind::Withdrawal);
        assert!(tx.finalize(TransactionStatus::Failed, Utc::now()));
        assert_eq!(tx.status, TransactionStatus::Failed);
    }

    #[test]
    fn terminal_transactions_are_immutable() {
        let mut tx = pending(TransactionKind::Deposit);
        tx.finalize(TransactionStatus::Success, Utc::now());
        let before = tx.clone();

        assert!(!tx.finalize(TransactionStatus::Failed, Utc::now()));
        assert!(!tx.finalize(TransactionStatus::Pending, Utc::now()));
        assert_eq!(tx, before);
    }

    #[test]
    fn cannot_finalize_to_pending() {
        let mut tx = pending(TransactionKind::Deposit);
        assert!(!tx.finalize(TransactionStatus::Pending, Utc::now()));
    }

    #[test]
    fn kind_apply() {
        assert_eq!(TransactionKind::Deposit.apply(500, 1000), Some(1500));
        assert_eq!(TransactionKind::Withdrawal.apply(1500, 1000), Some(500));
        assert_eq!(TransactionKind::Withdrawal.apply(500, 1000), None);
        assert_eq!(TransactionKind::Deposit.apply(i64::MAX, 1), None);
    }

    #[test]
    fn receipt_serializes_type_field() {
        let receipt = pending(TransactionKind::Withdrawal).receipt();
        let parsed: serde_json::Value = serde_json::to_value(&receipt).unwrap();

        assert_eq!(parsed["type"], "withdrawal");
        assert_eq!(parsed["status"], "pending");
        assert_eq!(parsed["owned_by"], "cust-1");
        assert_eq!(parsed["amount"], 1000);
        assert_eq!(parsed["reference_id"], "ref-1");
    }
}
