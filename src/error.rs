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

//! Error types for the dispense subsystem.

use thiserror::Error;

/// Dispense processing errors.
///
/// Business-rule failures (`InvalidQuantity`, `InsufficientFunds`,
/// `InvalidStatus`) are terminal and never retried. `StorageTimeout` is the
/// only transient class; the coordinator retries it with backoff.
///
/// A repeated completion of an already-terminal request is *not* an error:
/// it surfaces as [`Completion::AlreadyFinalized`](crate::Completion).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispenseError {
    /// Requested quantity is not in the configured allowed set
    #[error("invalid quantity (not an allowed dispense size)")]
    InvalidQuantity,

    /// Debit would exceed the wallet balance
    #[error("insufficient wallet balance")]
    InsufficientFunds,

    /// No wallet exists for the user
    #[error("wallet not found")]
    WalletNotFound,

    /// Referenced dispense request does not exist
    #[error("dispense request not found")]
    RequestNotFound,

    /// Caller does not own the referenced dispense request
    #[error("caller does not own this dispense request")]
    Forbidden,

    /// Reported outcome is neither COMPLETED nor FAILED
    #[error("invalid outcome status (must be COMPLETED or FAILED)")]
    InvalidStatus,

    /// Request is no longer PENDING at the moment of update
    #[error("request already left the pending state")]
    InvalidTransition,

    /// Storage operation exceeded its configured timeout
    #[error("storage operation timed out")]
    StorageTimeout,

    /// Storage is unrecoverably unavailable
    #[error("storage unavailable")]
    StorageUnavailable,

    /// Wallet could not be created or loaded
    #[error("wallet unavailable")]
    WalletUnavailable,
}

impl DispenseError {
    /// Whether the coordinator may retry the failed operation.
    ///
    /// Only timeout-class failures are transient; business-rule failures
    /// are reported immediately.
    pub fn is_transient(&self) -> bool {
        matches!(self, DispenseError::StorageTimeout)
    }
}

/// Session resolution errors from the identity provider adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// QR code does not match a registered user
    #[error("invalid QR code")]
    InvalidQrCode,

    /// Missing, unknown, or expired credential
    #[error("invalid or expired session")]
    Unauthenticated,
}
