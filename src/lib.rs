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

//! # Kiosk Ledger
//!
//! This library is the transactional core of a prepaid water kiosk: users
//! authenticate with a QR code, hold an integer-unit wallet, and request
//! metered dispenses that are debited only once the hardware confirms the
//! pour.
//!
//! ## Core Components
//!
//! - [`DispenseCoordinator`]: Orchestrates the start/complete dispense lifecycle
//! - [`LedgerStore`]: Wallet balances plus the append-only transaction log
//! - [`DispenseRegistry`]: Dispense request rows and their single-exit state machine
//! - [`PricingPolicy`]: Pure quantity-to-cost mapping
//! - [`SessionProvider`]: QR login and bearer-token resolution (identity adapter)
//! - [`DispenseError`]: Typed failure kinds for the adapter to translate
//!
//! ## Example
//!
//! ```
//! use kiosk_ledger_rs::{
//!     DispenseCoordinator, DispenseRegistry, DispenseStatus, LedgerStore, PricingPolicy, UserId,
//! };
//! use std::sync::Arc;
//!
//! let ledger = Arc::new(LedgerStore::new());
//! let registry = Arc::new(DispenseRegistry::new());
//! let coordinator =
//!     DispenseCoordinator::new(PricingPolicy::default(), Arc::clone(&ledger), Arc::clone(&registry));
//!
//! let user = UserId::new();
//! ledger.ensure_wallet(user).unwrap();
//! ledger.credit(&user, 100, "seed").unwrap();
//!
//! // Open a dispense for 500ml (costs 50 units at the default rate)
//! let ticket = coordinator.start_dispense(user, 500).unwrap();
//! assert_eq!(ticket.cost, 50);
//!
//! // The hardware reports a successful pour; the wallet is debited once
//! let completion = coordinator
//!     .complete_dispense(user, ticket.request_id, "COMPLETED")
//!     .unwrap();
//! assert_eq!(completion.status(), DispenseStatus::Completed);
//! assert_eq!(completion.wallet_balance(), 50);
//! ```
//!
//! ## Thread Safety
//!
//! All state lives in the stores, which are the sole synchronization
//! points: per-wallet locks serialize debits for a user, and the request
//! registry guarantees exactly one completer transitions a request out of
//! `PENDING`. Handlers are stateless and safe to run from any number of
//! threads.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod ledger;
pub mod pricing;
pub mod registry;
pub mod session;
pub mod user;

mod base;

pub use base::{RequestId, UserId};
pub use config::{ConfigError, KioskConfig};
pub use coordinator::{
    Completion, DispenseCoordinator, DispenseTicket, HardwareInstruction, RetryPolicy,
};
pub use error::{DispenseError, SessionError};
pub use ledger::{LedgerEntry, LedgerStore, TransactionLog};
pub use pricing::PricingPolicy;
pub use registry::{DispenseRegistry, DispenseRequest, DispenseStatus};
pub use session::{LoginGrant, Session, SessionProvider};
pub use user::{User, UserDirectory};
