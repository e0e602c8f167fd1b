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

//! Settlement pool configuration.

use std::time::Duration;

/// Tuning for the background settlement pool, fixed at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementConfig {
    /// Lag between admission and the balance compare-and-swap.
    pub delay: Duration,
    /// Upper bound on settlements running at once (at least 1).
    pub max_in_flight: usize,
    /// Period of the reconciliation pass over stranded settlements.
    /// `None` disables the periodic pass; it still runs on shutdown.
    pub reconcile_interval: Option<Duration>,
}

impl SettlementConfig {
    pub const DEFAULT_DELAY: Duration = Duration::from_secs(5);
    pub const DEFAULT_MAX_IN_FLIGHT: usize = 64;
    pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(30);

    /// Settles as soon as a job is picked up, without periodic reconciliation.
    pub fn immediate() -> Self {
        Self {
            delay: Duration::ZERO,
            reconcile_interval: None,
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    pub fn with_reconcile_interval(mut self, interval: Option<Duration>) -> Self {
        self.reconcile_interval = interval.filter(|period| !period.is_zero());
        self
    }
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            delay: Self::DEFAULT_DELAY,
            max_in_flight: Self::DEFAULT_MAX_IN_FLIGHT,
            reconcile_interval: Some(Self::DEFAULT_RECONCILE_INTERVAL),
        }
    }
}
