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

//! Settlement engine.
//!
//! The [`SettlementEngine`] admits deposits and withdrawals synchronously and
//! settles them in the background.
//!
//! # Settlement lifecycle
//!
//! 1. **Admission**: validate the request, load the wallet snapshot, reject
//!    disabled wallets and withdrawals above the snapshot balance.
//! 2. **Record**: persist a `pending` transaction. A store failure aborts the
//!    whole operation and nothing is scheduled.
//! 3. **Return**: the pending transaction goes back to the caller at once.
//! 4. **Settle**: a pool task waits for the configured delay, then
//!    compare-and-swaps the balance from the admission snapshot to
//!    `snapshot ± amount`.
//! 5. **Finalize**: the transaction becomes `success` if the swap applied and
//!    `failed` otherwise. If that write fails the settlement is parked in the
//!    [`Outbox`] for reconciliation.
//!
//! # Concurrency
//!
//! Settlements on the same wallet are not ordered. Two settlements admitted
//! against the same balance race to the swap and at most one of them applies;
//! the other resolves to `failed` and is not retried.
//!
//! Jobs are handed to the pool over an unbounded channel, so the background
//! phase is owned by the pool and outlives the caller. [`SettlementHandle`]
//! drains the pool on shutdown.

use crate::base::{Clock, IdGenerator, OwnerId, TransactionId, WalletId};
use crate::config::SettlementConfig;
use crate::error::{StoreError, WalletError};
use crate::outbox::{Outbox, ReconcileReport, StrandedSettlement};
use crate::store::LedgerStore;
use crate::transaction::{Transaction, TransactionKind, TransactionStatus};
use crate::validation::{TransactionRequest, Validate, Validator};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Everything the background phase needs to settle one admitted transaction.
#[derive(Debug, Clone)]
struct SettlementJob {
    transaction_id: TransactionId,
    wallet_id: WalletId,
    owner_id: OwnerId,
    kind: TransactionKind,
    amount: i64,
    /// Wallet balance observed at admission.
    snapshot_balance: i64,
}

/// State shared by the engine, the pool tasks and the handle.
struct Shared<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    outbox: Outbox,
    /// Settlements dispatched and not yet finished.
    in_flight: watch::Sender<usize>,
    delay: Duration,
}

/// Decrements the in-flight count when a settlement finishes, panics included.
struct InFlightGuard<'a>(&'a watch::Sender<usize>);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.send_modify(|count| *count = count.saturating_sub(1));
    }
}

impl<S: LedgerStore> Shared<S> {
    async fn settle(&self, job: SettlementJob) {
        let _in_flight = InFlightGuard(&self.in_flight);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let status = self.apply(&job);
        self.finalize(&job, status);
    }

    /// Compare-and-swaps the balance; the returned status is the outcome.
    fn apply(&self, job: &SettlementJob) -> TransactionStatus {
        let Some(target) = job.kind.apply(job.snapshot_balance, job.amount) else {
            warn!(
                tx = %job.transaction_id,
                wallet = %job.wallet_id,
                balance = job.snapshot_balance,
                amount = job.amount,
                "{} cannot be applied to balance", job.kind
            );
            return TransactionStatus::Failed;
        };

        match self.store.compare_and_swap_balance(
            &job.wallet_id,
            job.snapshot_balance,
            target,
            self.clock.now(),
        ) {
            Ok(true) => {
                info!(
                    owner = %job.owner_id,
                    tx = %job.transaction_id,
                    amount = job.amount,
                    balance = target,
                    "{} settled", job.kind
                );
                TransactionStatus::Success
            }
            Ok(false) => {
                warn!(
                    owner = %job.owner_id,
                    tx = %job.transaction_id,
                    expected = job.snapshot_balance,
                    "{} lost the balance race", job.kind
                );
                TransactionStatus::Failed
            }
            Err(e) => {
                error!(
                    owner = %job.owner_id,
                    tx = %job.transaction_id,
                    reason = %e,
                    "error updating wallet balance"
                );
                TransactionStatus::Failed
            }
        }
    }

    fn finalize(&self, job: &SettlementJob, status: TransactionStatus) {
        if let Err(e) =
            self.store
                .update_transaction_status(&job.transaction_id, status, self.clock.now())
        {
            error!(
                tx = %job.transaction_id,
                status = %status,
                reason = %e,
                "error updating transaction status, parked for reconciliation"
            );
            self.outbox.push(StrandedSettlement {
                transaction_id: job.transaction_id.clone(),
                wallet_id: job.wallet_id.clone(),
                status,
                attempts: 1,
            });
        }
    }

    fn reconcile(&self) -> ReconcileReport {
        let report = self.outbox.reconcile(self.store.as_ref(), self.clock.as_ref());
        if report != ReconcileReport::default() {
            info!(
                finalized = report.finalized,
                requeued = report.requeued,
                dropped = report.dropped,
                "reconciliation pass"
            );
        }
        report
    }
}

/// Admits deposits and withdrawals and hands them to the settlement pool.
pub struct SettlementEngine<S> {
    shared: Arc<Shared<S>>,
    ids: Arc<dyn IdGenerator>,
    validator: Arc<dyn Validator>,
    jobs: mpsc::UnboundedSender<SettlementJob>,
}

impl<S: LedgerStore> SettlementEngine<S> {
    /// Creates the engine and spawns its settlement pool on the current
    /// Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start(
        store: Arc<S>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
        validator: Arc<dyn Validator>,
        config: SettlementConfig,
    ) -> (Self, SettlementHandle<S>) {
        let (in_flight, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            store,
            clock,
            outbox: Outbox::new(),
            in_flight,
            delay: config.delay,
        });
        let (jobs, receiver) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let dispatcher = tokio::spawn(run_pool(
            Arc::clone(&shared),
            receiver,
            shutdown_rx,
            config,
        ));

        let engine = Self {
            shared: Arc::clone(&shared),
            ids,
            validator,
            jobs,
        };
        let handle = SettlementHandle {
            shared,
            shutdown,
            dispatcher,
        };
        (engine, handle)
    }

    /// Admits a deposit or withdrawal and schedules its settlement.
    ///
    /// Returns the transaction in its `pending` state; the balance changes
    /// later, in the background.
    ///
    /// # Errors
    ///
    /// - [`WalletError::Validation`] - Non-positive amount or empty reference.
    /// - [`WalletError::NotFound`] - The owner has no wallet.
    /// - [`WalletError::Disabled`] - The wallet is not enabled.
    /// - [`WalletError::InsufficientFunds`] - Withdrawal above the balance.
    /// - [`WalletError::Persistence`] - The pending record was not stored.
    /// - [`WalletError::SettlementUnavailable`] - The pool has shut down.
    pub fn settle(
        &self,
        owner_id: &OwnerId,
        request: &TransactionRequest,
        kind: TransactionKind,
    ) -> Result<Transaction, WalletError> {
        let errors = self.validator.validate(&request.fields());
        if !errors.is_empty() {
            return Err(WalletError::Validation(errors));
        }
        if self.jobs.is_closed() {
            return Err(WalletError::SettlementUnavailable);
        }

        let store = &self.shared.store;
        let wallet = store
            .get_wallet(owner_id)?
            .ok_or_else(|| WalletError::NotFound(owner_id.clone()))?;

        if !wallet.is_enabled() {
            return Err(WalletError::Disabled(owner_id.clone()));
        }
        if kind == TransactionKind::Withdrawal && request.amount > wallet.balance {
            return Err(WalletError::InsufficientFunds {
                balance: wallet.balance,
                requested: request.amount,
            });
        }

        let transaction = Transaction::pending(
            TransactionId(self.ids.next_id()),
            wallet.id.clone(),
            wallet.owner_id.clone(),
            kind,
            request.amount,
            request.reference_id.clone(),
            self.shared.clock.now(),
        );
        store.insert_transaction(transaction.clone())?;

        info!(
            owner = %owner_id,
            tx = %transaction.id,
            amount = request.amount,
            reference = %request.reference_id,
            "{kind} admitted"
        );

        self.dispatch(SettlementJob {
            transaction_id: transaction.id.clone(),
            wallet_id: wallet.id,
            owner_id: owner_id.clone(),
            kind,
            amount: request.amount,
            snapshot_balance: wallet.balance,
        })?;

        Ok(transaction)
    }

    fn dispatch(&self, job: SettlementJob) -> Result<(), WalletError> {
        let transaction_id = job.transaction_id.clone();
        self.shared.in_flight.send_modify(|count| *count += 1);

        if let Err(mpsc::error::SendError(job)) = self.jobs.send(job) {
            self.shared
                .in_flight
                .send_modify(|count| *count = count.saturating_sub(1));

            // The pool closed after admission: close the record instead of
            // leaving it pending.
            warn!(tx = %job.transaction_id, "settlement pool closed, failing transaction");
            if let Err(e) = self.shared.store.update_transaction_status(
                &job.transaction_id,
                TransactionStatus::Failed,
                self.shared.clock.now(),
            ) {
                self.park_unsent(&job, e);
            }
            return Err(WalletError::SettlementUnavailable);
        }

        debug!(tx = %transaction_id, "settlement dispatched");
        Ok(())
    }

    fn park_unsent(&self, job: &SettlementJob, reason: StoreError) {
        error!(
            tx = %job.transaction_id,
            reason = %reason,
            "error failing undispatched transaction, parked for reconciliation"
        );
        self.shared.outbox.push(StrandedSettlement {
            transaction_id: job.transaction_id.clone(),
            wallet_id: job.wallet_id.clone(),
            status: TransactionStatus::Failed,
            attempts: 1,
        });
    }
}

/// Control over a running settlement pool.
pub struct SettlementHandle<S> {
    shared: Arc<Shared<S>>,
    shutdown: watch::Sender<bool>,
    dispatcher: JoinHandle<()>,
}

impl<S: LedgerStore> SettlementHandle<S> {
    /// Settlements dispatched and not yet finished.
    pub fn in_flight(&self) -> usize {
        *self.shared.in_flight.borrow()
    }

    /// Resolves once no settlement is in flight.
    pub async fn wait_idle(&self) {
        let mut in_flight = self.shared.in_flight.subscribe();
        // The sender lives in `shared`, so this cannot observe a closed channel.
        let _ = in_flight.wait_for(|count| *count == 0).await;
    }

    /// Settlements whose final status write is still outstanding.
    pub fn stranded(&self) -> usize {
        self.shared.outbox.len()
    }

    /// Retries every outstanding final status write once.
    pub fn reconcile(&self) -> ReconcileReport {
        self.shared.reconcile()
    }

    /// Transactions pending for longer than `age`.
    pub fn overdue(&self, age: chrono::Duration) -> Result<Vec<Transaction>, StoreError> {
        let cutoff = self.shared.clock.now() - age;
        self.shared.store.pending_transactions(cutoff)
    }

    /// Stops accepting settlements, runs everything already dispatched to
    /// completion and makes a last reconciliation pass.
    pub async fn shutdown(self) {
        self.shutdown.send_replace(true);
        if let Err(e) = self.dispatcher.await {
            error!(reason = %e, "settlement pool terminated abnormally");
        }
        info!(stranded = self.shared.outbox.len(), "settlement pool stopped");
    }
}

async fn run_pool<S: LedgerStore>(
    shared: Arc<Shared<S>>,
    mut jobs: mpsc::UnboundedReceiver<SettlementJob>,
    mut shutdown: watch::Receiver<bool>,
    config: SettlementConfig,
) {
    let permits = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
    let mut running = JoinSet::new();
    let mut sweep = config.reconcile_interval.map(|period| {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    loop {
        tokio::select! {
            job = jobs.recv() => match job {
                Some(job) => spawn_settlement(&shared, &permits, &mut running, job).await,
                None => break,
            },
            Some(result) = running.join_next(), if !running.is_empty() => {
                log_join(result);
            }
            _ = next_tick(&mut sweep) => {
                shared.reconcile();
            }
            _ = shutdown_requested(&mut shutdown) => break,
        }
    }

    // Drain: refuse new jobs, then finish everything already accepted.
    jobs.close();
    while let Some(job) = jobs.recv().await {
        spawn_settlement(&shared, &permits, &mut running, job).await;
    }
    while let Some(result) = running.join_next().await {
        log_join(result);
    }
    shared.reconcile();
}

async fn spawn_settlement<S: LedgerStore>(
    shared: &Arc<Shared<S>>,
    permits: &Arc<Semaphore>,
    running: &mut JoinSet<()>,
    job: SettlementJob,
) {
    // The semaphore is never closed, so a permit is always granted.
    let permit = Arc::clone(permits).acquire_owned().await.ok();
    let shared = Arc::clone(shared);
    running.spawn(async move {
        shared.settle(job).await;
        drop(permit);
    });
}

fn log_join(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        error!(reason = %e, "settlement task panicked");
    }
}

async fn next_tick(sweep: &mut Option<Interval>) {
    match sweep {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    // A dropped handle never requests shutdown; the pool then stops when the
    // engine is dropped.
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
