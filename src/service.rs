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

//! Wallet service.
//!
//! [`WalletService`] is the entry point for every wallet operation. Wallet
//! lifecycle changes and queries run synchronously against the ledger store;
//! deposits and withdrawals are delegated to the [`SettlementEngine`].
//!
//! The owner is passed explicitly to every call.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use wallet_ledger_rs::{
//!     InitializeWalletRequest, MemoryStore, OwnerId, SettlementConfig, TransactionRequest,
//!     TransactionStatus, WalletService,
//! };
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let (wallets, settlement) =
//!     WalletService::start(Arc::new(MemoryStore::new()), SettlementConfig::immediate());
//!
//! let owner = OwnerId::from("cust-1");
//! wallets.initialize_wallet(&InitializeWalletRequest::new("cust-1")).unwrap();
//! wallets.enable_wallet(&owner).unwrap();
//!
//! let deposit = wallets.deposit(&owner, &TransactionRequest::new(1000, "ref-1")).unwrap();
//! assert_eq!(deposit.status, TransactionStatus::Pending);
//!
//! settlement.wait_idle().await;
//! assert_eq!(wallets.get_balance(&owner).unwrap().balance, 1000);
//! # });
//! ```

use crate::base::{Clock, IdGenerator, OwnerId, SystemClock, UuidGenerator, WalletId};
use crate::config::SettlementConfig;
use crate::error::{StoreError, WalletError};
use crate::settlement::{SettlementEngine, SettlementHandle};
use crate::store::LedgerStore;
use crate::transaction::{Transaction, TransactionKind};
use crate::validation::{
    ConstraintValidator, InitializeWalletRequest, TransactionRequest, Validate, Validator,
};
use crate::wallet::{Wallet, WalletStatus};
use std::sync::Arc;
use tracing::info;

/// Replaceable collaborators of the wallet service.
#[derive(Clone)]
pub struct Collaborators {
    pub ids: Arc<dyn IdGenerator>,
    pub clock: Arc<dyn Clock>,
    pub validator: Arc<dyn Validator>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            ids: Arc::new(UuidGenerator),
            clock: Arc::new(SystemClock),
            validator: Arc::new(ConstraintValidator),
        }
    }
}

/// Wallet lifecycle, queries and settlement admission.
pub struct WalletService<S> {
    store: Arc<S>,
    collaborators: Collaborators,
    settlement: SettlementEngine<S>,
}

impl<S: LedgerStore> WalletService<S> {
    /// Creates the service with default collaborators and spawns its
    /// settlement pool on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start(store: Arc<S>, config: SettlementConfig) -> (Self, SettlementHandle<S>) {
        Self::with_collaborators(store, Collaborators::default(), config)
    }

    /// Like [`WalletService::start`], with explicit collaborators.
    pub fn with_collaborators(
        store: Arc<S>,
        collaborators: Collaborators,
        config: SettlementConfig,
    ) -> (Self, SettlementHandle<S>) {
        let (settlement, handle) = SettlementEngine::start(
            Arc::clone(&store),
            Arc::clone(&collaborators.ids),
            Arc::clone(&collaborators.clock),
            Arc::clone(&collaborators.validator),
            config,
        );
        let service = Self {
            store,
            collaborators,
            settlement,
        };
        (service, handle)
    }

    /// Creates a disabled, empty wallet for the requested owner.
    ///
    /// # Errors
    ///
    /// - [`WalletError::Validation`] - Owner ID empty or longer than 36 characters.
    /// - [`WalletError::AlreadyInitialized`] - The owner already has a wallet.
    /// - [`WalletError::Persistence`] - The wallet could not be stored.
    pub fn initialize_wallet(&self, request: &InitializeWalletRequest) -> Result<Wallet, WalletError> {
        let errors = self.collaborators.validator.validate(&request.fields());
        if !errors.is_empty() {
            return Err(WalletError::Validation(errors));
        }

        let owner_id = OwnerId(request.owner_id.clone());
        let wallet = Wallet::new(
            WalletId(self.collaborators.ids.next_id()),
            owner_id.clone(),
            self.collaborators.clock.now(),
        );

        self.store
            .create_wallet(wallet.clone())
            .map_err(|e| match e {
                StoreError::DuplicateOwner(owner) => WalletError::AlreadyInitialized(owner),
                other => WalletError::Persistence(other),
            })?;

        info!(owner = %owner_id, wallet = %wallet.id, "wallet initialized");
        Ok(wallet)
    }

    /// Current snapshot of the owner's wallet.
    pub fn get_balance(&self, owner_id: &OwnerId) -> Result<Wallet, WalletError> {
        self.store
            .get_wallet(owner_id)?
            .ok_or_else(|| WalletError::NotFound(owner_id.clone()))
    }

    /// Enables the wallet and stamps `enabled_at`.
    ///
    /// # Errors
    ///
    /// - [`WalletError::NotFound`] - The owner has no wallet.
    /// - [`WalletError::AlreadyEnabled`] - Nothing is written.
    pub fn enable_wallet(&self, owner_id: &OwnerId) -> Result<Wallet, WalletError> {
        let wallet = self.get_balance(owner_id)?;
        if wallet.is_enabled() {
            return Err(WalletError::AlreadyEnabled(owner_id.clone()));
        }

        let now = self.collaborators.clock.now();
        self.set_status(owner_id, WalletStatus::Enabled, Some(now))?;
        info!(owner = %owner_id, wallet = %wallet.id, "wallet enabled");

        self.get_balance(owner_id)
    }

    /// Disables the wallet and clears `enabled_at`. Disabling a disabled
    /// wallet succeeds.
    pub fn disable_wallet(&self, owner_id: &OwnerId) -> Result<Wallet, WalletError> {
        self.set_status(owner_id, WalletStatus::Disabled, None)?;
        info!(owner = %owner_id, "wallet disabled");

        self.get_balance(owner_id)
    }

    /// The wallet's transactions, oldest first.
    ///
    /// # Errors
    ///
    /// - [`WalletError::NotFound`] - The owner has no wallet.
    /// - [`WalletError::Disabled`] - History is hidden while disabled.
    pub fn list_transactions(&self, owner_id: &OwnerId) -> Result<Vec<Transaction>, WalletError> {
        let wallet = self.get_balance(owner_id)?;
        if !wallet.is_enabled() {
            return Err(WalletError::Disabled(owner_id.clone()));
        }

        Ok(self.store.list_transactions(&wallet.id)?)
    }

    /// Admits a deposit; see [`SettlementEngine::settle`].
    pub fn deposit(
        &self,
        owner_id: &OwnerId,
        request: &TransactionRequest,
    ) -> Result<Transaction, WalletError> {
        self.settlement
            .settle(owner_id, request, TransactionKind::Deposit)
    }

    /// Admits a withdrawal; see [`SettlementEngine::settle`].
    pub fn withdraw(
        &self,
        owner_id: &OwnerId,
        request: &TransactionRequest,
    ) -> Result<Transaction, WalletError> {
        self.settlement
            .settle(owner_id, request, TransactionKind::Withdrawal)
    }

    fn set_status(
        &self,
        owner_id: &OwnerId,
        status: WalletStatus,
        enabled_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<(), WalletError> {
        let now = self.collaborators.clock.now();
        if self
            .store
            .update_wallet_status(owner_id, status, enabled_at, now)?
        {
            Ok(())
        } else {
            Err(WalletError::NotFound(owner_id.clone()))
        }
    }
}
