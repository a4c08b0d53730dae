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

//! Dispense orchestration.
//!
//! The [`DispenseCoordinator`] is the only writer of wallet debits and
//! request transitions. A dispense is split in two phases because the
//! physical pour happens on hardware this service does not control:
//!
//! 1. [`start_dispense`](DispenseCoordinator::start_dispense) validates the
//!    quantity, pre-checks the balance, and records a `PENDING` request.
//! 2. [`complete_dispense`](DispenseCoordinator::complete_dispense) takes
//!    the hardware-reported outcome and finalizes the request exactly once,
//!    debiting the wallet only for a confirmed pour.
//!
//! The charge is committed at confirmed completion so undelivered water is
//! never billed; duplicate completion reports from unreliable hardware
//! callbacks are absorbed as [`Completion::AlreadyFinalized`].
//!
//! The coordinator caches nothing between calls: every operation re-reads
//! the stores and commits under their locks, so handlers stay stateless
//! and horizontally replicable.

use crate::base::{RequestId, UserId};
use crate::error::DispenseError;
use crate::ledger::LedgerStore;
use crate::pricing::PricingPolicy;
use crate::registry::{DispenseRegistry, DispenseStatus};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

/// Payload handed to the out-of-scope hardware layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HardwareInstruction {
    pub action: String,
    pub quantity_ml: u32,
    pub request_id: RequestId,
}

/// Result of a successful [`start_dispense`](DispenseCoordinator::start_dispense).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispenseTicket {
    pub request_id: RequestId,
    pub quantity_ml: u32,
    pub cost: i64,
    pub instruction: HardwareInstruction,
}

/// Result of a [`complete_dispense`](DispenseCoordinator::complete_dispense) call.
///
/// `AlreadyFinalized` is a terminal observation, not an error: a repeated
/// completion call reports the existing outcome and balance with zero
/// additional deduction, identically on every retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Completion {
    Finalized {
        request_id: RequestId,
        status: DispenseStatus,
        wallet_balance: i64,
        amount_deducted: i64,
    },
    AlreadyFinalized {
        request_id: RequestId,
        status: DispenseStatus,
        wallet_balance: i64,
    },
}

impl Completion {
    pub fn status(&self) -> DispenseStatus {
        match self {
            Self::Finalized { status, .. } | Self::AlreadyFinalized { status, .. } => *status,
        }
    }

    pub fn wallet_balance(&self) -> i64 {
        match self {
            Self::Finalized { wallet_balance, .. }
            | Self::AlreadyFinalized { wallet_balance, .. } => *wallet_balance,
        }
    }

    /// Wallet units deducted by this call; always zero when already finalized.
    pub fn amount_deducted(&self) -> i64 {
        match self {
            Self::Finalized {
                amount_deducted, ..
            } => *amount_deducted,
            Self::AlreadyFinalized { .. } => 0,
        }
    }

    pub fn is_already_finalized(&self) -> bool {
        matches!(self, Self::AlreadyFinalized { .. })
    }
}

/// Bounded retry with exponential backoff for transient storage failures.
///
/// Business-rule failures are never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure.
    pub max_retries: u32,
    /// Delay before the first retry; doubles each attempt.
    pub base_backoff: Duration,
}

impl RetryPolicy {
    /// No retries at all.
    pub const NONE: RetryPolicy = RetryPolicy {
        max_retries: 0,
        base_backoff: Duration::ZERO,
    };

    /// Backoff before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_millis(50),
        }
    }
}

/// Orchestrates request creation, authorization, and atomic settlement.
///
/// # Invariants
///
/// - A request leaves `PENDING` at most once, toward exactly one terminal
///   state.
/// - A request is `COMPLETED` only together with its matching wallet
///   debit; a late balance shortfall flips the request to `FAILED`.
/// - The cost charged at completion is recomputed from the originally
///   requested quantity, never taken from the caller.
pub struct DispenseCoordinator {
    pricing: PricingPolicy,
    ledger: Arc<LedgerStore>,
    registry: Arc<DispenseRegistry>,
    retry: RetryPolicy,
}

impl DispenseCoordinator {
    pub fn new(
        pricing: PricingPolicy,
        ledger: Arc<LedgerStore>,
        registry: Arc<DispenseRegistry>,
    ) -> Self {
        Self::with_retry(pricing, ledger, registry, RetryPolicy::default())
    }

    pub fn with_retry(
        pricing: PricingPolicy,
        ledger: Arc<LedgerStore>,
        registry: Arc<DispenseRegistry>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            pricing,
            ledger,
            registry,
            retry,
        }
    }

    /// The policy this coordinator prices against.
    pub fn pricing(&self) -> &PricingPolicy {
        &self.pricing
    }

    /// Whether the quantity is a dispensable tier.
    pub fn is_allowed_to_dispense(&self, quantity_ml: u32) -> bool {
        self.pricing.is_allowed(quantity_ml)
    }

    /// Opens a dispense: validates, pre-checks funds, records a `PENDING`
    /// request, and returns the instruction for the hardware layer.
    ///
    /// The balance check here is advisory; the binding check happens again
    /// atomically at completion, closing the race window against
    /// concurrent debits.
    ///
    /// # Errors
    ///
    /// - [`DispenseError::InvalidQuantity`] - Quantity outside the allowed set; no request is created.
    /// - [`DispenseError::InsufficientFunds`] - Balance below cost; no request is created.
    /// - [`DispenseError::WalletUnavailable`] - Wallet could not be created.
    /// - [`DispenseError::StorageTimeout`] - Storage did not answer in time.
    pub fn start_dispense(
        &self,
        user_id: UserId,
        quantity_ml: u32,
    ) -> Result<DispenseTicket, DispenseError> {
        if !self.pricing.is_allowed(quantity_ml) {
            return Err(DispenseError::InvalidQuantity);
        }

        self.ledger
            .ensure_wallet(user_id)
            .map_err(|e| match e {
                DispenseError::StorageTimeout => DispenseError::StorageTimeout,
                _ => DispenseError::WalletUnavailable,
            })?;

        let cost = self.pricing.cost(quantity_ml);
        let balance = self.ledger.balance(&user_id)?;
        if balance < cost {
            return Err(DispenseError::InsufficientFunds);
        }

        let request = self.registry.create(user_id, quantity_ml);
        info!(
            user = %user_id,
            request = %request.id(),
            quantity_ml,
            cost,
            "dispense request created"
        );

        Ok(DispenseTicket {
            request_id: request.id(),
            quantity_ml,
            cost,
            instruction: HardwareInstruction {
                action: "start_dispense".to_string(),
                quantity_ml,
                request_id: request.id(),
            },
        })
    }

    /// Finalizes a dispense from the hardware-reported outcome.
    ///
    /// Transient storage timeouts during the settlement are retried a
    /// bounded number of times with backoff; every attempt re-reads the
    /// request, so a retry that finds it finalized by a concurrent caller
    /// observes `AlreadyFinalized` instead of double-charging.
    ///
    /// # Errors
    ///
    /// - [`DispenseError::RequestNotFound`] - Unknown request id.
    /// - [`DispenseError::Forbidden`] - Request owned by another user; nothing mutates.
    /// - [`DispenseError::InvalidStatus`] - Outcome is neither COMPLETED nor FAILED.
    /// - [`DispenseError::InsufficientFunds`] - Balance fell below cost since the
    ///   pre-check; the request is marked `FAILED`, never charged.
    /// - [`DispenseError::StorageTimeout`] - Storage kept timing out past the
    ///   retry budget; the request stays `PENDING`.
    pub fn complete_dispense(
        &self,
        user_id: UserId,
        request_id: RequestId,
        reported_outcome: &str,
    ) -> Result<Completion, DispenseError> {
        let mut attempt = 0;
        loop {
            match self.try_complete(user_id, request_id, reported_outcome) {
                Err(e) if e.is_transient() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    let backoff = self.retry.backoff(attempt);
                    warn!(
                        request = %request_id,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "transient storage failure during completion, retrying"
                    );
                    thread::sleep(backoff);
                }
                other => return other,
            }
        }
    }

    /// One settlement attempt under the exclusive request entry.
    fn try_complete(
        &self,
        user_id: UserId,
        request_id: RequestId,
        reported_outcome: &str,
    ) -> Result<Completion, DispenseError> {
        // Exclusive entry: concurrent completers for this request queue here,
        // and the transition below commits together with the debit before
        // the entry is released.
        let mut request = self
            .registry
            .entry_mut(&request_id)
            .ok_or(DispenseError::RequestNotFound)?;

        if request.user_id() != user_id {
            return Err(DispenseError::Forbidden);
        }

        // Terminal observation before outcome validation: a retried report,
        // however malformed, must keep seeing the settled result.
        if request.is_terminal() {
            let balance = self.ledger.balance(&user_id)?;
            return Ok(Completion::AlreadyFinalized {
                request_id,
                status: request.status(),
                wallet_balance: balance,
            });
        }

        let outcome = DispenseStatus::parse_outcome(reported_outcome)?;

        // Cost from the originally requested quantity, never caller input.
        let cost = self.pricing.cost(request.quantity_ml());
        let now = Utc::now();

        match outcome {
            DispenseStatus::Completed => {
                let description = format!("Water dispense: {}ml", request.quantity_ml());
                match self.ledger.debit(&user_id, cost, &description) {
                    Ok(balance) => {
                        request.transition(DispenseStatus::Completed, now)?;
                        info!(
                            user = %user_id,
                            request = %request_id,
                            cost,
                            balance,
                            "dispense completed and debited"
                        );
                        Ok(Completion::Finalized {
                            request_id,
                            status: DispenseStatus::Completed,
                            wallet_balance: balance,
                            amount_deducted: cost,
                        })
                    }
                    Err(DispenseError::InsufficientFunds) => {
                        // Balance moved since the pre-check. The request must
                        // not end up COMPLETED without a matching debit.
                        request.transition(DispenseStatus::Failed, now)?;
                        warn!(
                            user = %user_id,
                            request = %request_id,
                            cost,
                            "balance shortfall at completion, request failed"
                        );
                        Err(DispenseError::InsufficientFunds)
                    }
                    // Transient or unrecoverable storage failure: the request
                    // stays PENDING and the caller (or retry loop) tries again.
                    Err(e) => Err(e),
                }
            }
            DispenseStatus::Failed => {
                request.transition(DispenseStatus::Failed, now)?;
                let balance = self.ledger.balance(&user_id)?;
                info!(
                    user = %user_id,
                    request = %request_id,
                    "dispense reported failed, no charge"
                );
                Ok(Completion::Finalized {
                    request_id,
                    status: DispenseStatus::Failed,
                    wallet_balance: balance,
                    amount_deducted: 0,
                })
            }
            DispenseStatus::Pending => unreachable!("parse_outcome only yields terminal states"),
        }
    }
}
