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

//! Outbox for settlements whose final status write failed.
//!
//! After the balance compare-and-swap the outcome is known, but recording it
//! on the transaction can still fail. Such settlements are parked here with
//! their decided status, and a reconciliation pass retries the write until it
//! lands, so no transaction stays `pending` once its balance effect is
//! settled.

use crate::base::{Clock, TransactionId, WalletId};
use crate::error::StoreError;
use crate::store::LedgerStore;
use crate::transaction::TransactionStatus;
use crossbeam::queue::SegQueue;
use tracing::{debug, info, warn};

/// A settled transaction whose terminal status is not yet recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrandedSettlement {
    pub transaction_id: TransactionId,
    pub wallet_id: WalletId,
    /// Outcome decided by the balance compare-and-swap.
    pub status: TransactionStatus,
    /// Finalization attempts so far.
    pub attempts: u32,
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Status written.
    pub finalized: usize,
    /// Write failed again; back in the outbox.
    pub requeued: usize,
    /// Nothing left to do (already terminal or unknown).
    pub dropped: usize,
}

/// Lock-free queue of [`StrandedSettlement`]s.
#[derive(Debug, Default)]
pub struct Outbox {
    queue: SegQueue<StrandedSettlement>,
}

impl Outbox {
    pub fn new() -> Self {
        Self {
            queue: SegQueue::new(),
        }
    }

    pub fn push(&self, stranded: StrandedSettlement) {
        self.queue.push(stranded);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Retries the status write of every entry queued when the pass starts.
    pub fn reconcile<S: LedgerStore + ?Sized>(
        &self,
        store: &S,
        clock: &dyn Clock,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        // Entries requeued during this pass wait for the next one.
        for _ in 0..self.queue.len() {
            let Some(mut stranded) = self.queue.pop() else {
                break;
            };
            stranded.attempts += 1;

            match store.update_transaction_status(
                &stranded.transaction_id,
                stranded.status,
                clock.now(),
            ) {
                Ok(()) => {
                    info!(
                        tx = %stranded.transaction_id,
                        wallet = %stranded.wallet_id,
                        status = %stranded.status,
                        attempts = stranded.attempts,
                        "stranded settlement finalized"
                    );
                    report.finalized += 1;
                }
                Err(
                    StoreError::AlreadyFinalized(_)
                    | StoreError::NonTerminalStatus(_)
                    | StoreError::TransactionNotFound(_),
                ) => {
                    debug!(tx = %stranded.transaction_id, "stranded settlement already resolved");
                    report.dropped += 1;
                }
                Err(e) => {
                    warn!(
                        tx = %stranded.transaction_id,
                        attempts = stranded.attempts,
                        reason = %e,
                        "stranded settlement still unresolved"
                    );
                    self.queue.push(stranded);
                    report.requeued += 1;
                }
            }
        }

        report
    }
}
