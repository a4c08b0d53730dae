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

//! Coordinator public API integration tests.

use kiosk_ledger_rs::{
    Completion, DispenseCoordinator, DispenseError, DispenseRegistry, DispenseStatus, LedgerStore,
    PricingPolicy, UserId,
};
use std::sync::Arc;

struct Kiosk {
    ledger: Arc<LedgerStore>,
    registry: Arc<DispenseRegistry>,
    coordinator: DispenseCoordinator,
}

/// Default pricing: tiers {500, 1000, 2000}, 10 units per 100ml.
fn kiosk() -> Kiosk {
    let ledger = Arc::new(LedgerStore::new());
    let registry = Arc::new(DispenseRegistry::new());
    let coordinator = DispenseCoordinator::new(
        PricingPolicy::default(),
        Arc::clone(&ledger),
        Arc::clone(&registry),
    );
    Kiosk {
        ledger,
        registry,
        coordinator,
    }
}

fn funded_user(kiosk: &Kiosk, balance: i64) -> UserId {
    let user = UserId::new();
    kiosk.ledger.ensure_wallet(user).unwrap();
    if balance > 0 {
        kiosk.ledger.credit(&user, balance, "seed").unwrap();
    }
    user
}

#[test]
fn start_dispense_returns_ticket_and_instruction() {
    let kiosk = kiosk();
    let user = funded_user(&kiosk, 100);

    let ticket = kiosk.coordinator.start_dispense(user, 500).unwrap();
    assert_eq!(ticket.quantity_ml, 500);
    assert_eq!(ticket.cost, 50);
    assert_eq!(ticket.instruction.action, "start_dispense");
    assert_eq!(ticket.instruction.quantity_ml, 500);
    assert_eq!(ticket.instruction.request_id, ticket.request_id);

    let request = kiosk.registry.get(&ticket.request_id).unwrap();
    assert_eq!(request.status(), DispenseStatus::Pending);
    assert_eq!(request.user_id(), user);
}

#[test]
fn unknown_quantity_creates_no_request() {
    let kiosk = kiosk();
    let user = funded_user(&kiosk, 1000);

    let result = kiosk.coordinator.start_dispense(user, 750);
    assert_eq!(result, Err(DispenseError::InvalidQuantity));
    assert!(kiosk.registry.is_empty());
}

#[test]
fn insufficient_funds_fails_fast_before_any_request_row() {
    let kiosk = kiosk();
    let user = funded_user(&kiosk, 30);

    // cost(500) = 50 > 30
    let result = kiosk.coordinator.start_dispense(user, 500);
    assert_eq!(result, Err(DispenseError::InsufficientFunds));
    assert!(kiosk.registry.is_empty());
    assert_eq!(kiosk.ledger.balance(&user).unwrap(), 30);
}

#[test]
fn start_creates_wallet_lazily() {
    let kiosk = kiosk();
    let user = UserId::new();

    // No wallet yet; the pre-check finds a zero balance, not a missing row
    let result = kiosk.coordinator.start_dispense(user, 500);
    assert_eq!(result, Err(DispenseError::InsufficientFunds));
    assert_eq!(kiosk.ledger.balance(&user).unwrap(), 0);
}

#[test]
fn exact_balance_dispense_completes_to_zero() {
    let kiosk = kiosk();
    let user = funded_user(&kiosk, 50);

    let ticket = kiosk.coordinator.start_dispense(user, 500).unwrap();
    let completion = kiosk
        .coordinator
        .complete_dispense(user, ticket.request_id, "COMPLETED")
        .unwrap();

    assert_eq!(completion.status(), DispenseStatus::Completed);
    assert_eq!(completion.amount_deducted(), 50);
    assert_eq!(completion.wallet_balance(), 0);
    assert_eq!(kiosk.ledger.balance(&user).unwrap(), 0);
}

#[test]
fn repeated_completion_is_idempotent() {
    let kiosk = kiosk();
    let user = funded_user(&kiosk, 50);

    let ticket = kiosk.coordinator.start_dispense(user, 500).unwrap();
    let first = kiosk
        .coordinator
        .complete_dispense(user, ticket.request_id, "COMPLETED")
        .unwrap();
    let second = kiosk
        .coordinator
        .complete_dispense(user, ticket.request_id, "COMPLETED")
        .unwrap();
    let third = kiosk
        .coordinator
        .complete_dispense(user, ticket.request_id, "completed")
        .unwrap();

    assert!(!first.is_already_finalized());
    assert!(second.is_already_finalized());
    assert!(third.is_already_finalized());
    // Identical reported balance, zero additional deduction
    assert_eq!(first.wallet_balance(), 0);
    assert_eq!(second.wallet_balance(), 0);
    assert_eq!(third.wallet_balance(), 0);
    assert_eq!(second.amount_deducted(), 0);
    assert_eq!(kiosk.ledger.balance(&user).unwrap(), 0);
}

#[test]
fn failed_outcome_charges_nothing() {
    let kiosk = kiosk();
    let user = funded_user(&kiosk, 100);

    let ticket = kiosk.coordinator.start_dispense(user, 500).unwrap();
    let completion = kiosk
        .coordinator
        .complete_dispense(user, ticket.request_id, "FAILED")
        .unwrap();

    assert_eq!(completion.status(), DispenseStatus::Failed);
    assert_eq!(completion.amount_deducted(), 0);
    assert_eq!(completion.wallet_balance(), 100);
    // No transaction record for a failed pour
    assert_eq!(kiosk.ledger.log().entries_for(&user).len(), 1);
}

#[test]
fn outcome_is_parsed_case_insensitively() {
    let kiosk = kiosk();
    let user = funded_user(&kiosk, 200);

    let first = kiosk.coordinator.start_dispense(user, 500).unwrap();
    let second = kiosk.coordinator.start_dispense(user, 500).unwrap();

    let done = kiosk
        .coordinator
        .complete_dispense(user, first.request_id, "completed")
        .unwrap();
    assert_eq!(done.status(), DispenseStatus::Completed);

    let failed = kiosk
        .coordinator
        .complete_dispense(user, second.request_id, "Failed")
        .unwrap();
    assert_eq!(failed.status(), DispenseStatus::Failed);
}

#[test]
fn malformed_outcome_leaves_request_pending() {
    let kiosk = kiosk();
    let user = funded_user(&kiosk, 100);

    let ticket = kiosk.coordinator.start_dispense(user, 500).unwrap();
    let result = kiosk
        .coordinator
        .complete_dispense(user, ticket.request_id, "SPILLED");
    assert_eq!(result, Err(DispenseError::InvalidStatus));

    // The request is still completable
    let request = kiosk.registry.get(&ticket.request_id).unwrap();
    assert_eq!(request.status(), DispenseStatus::Pending);
    assert_eq!(kiosk.ledger.balance(&user).unwrap(), 100);

    let completion = kiosk
        .coordinator
        .complete_dispense(user, ticket.request_id, "COMPLETED")
        .unwrap();
    assert_eq!(completion.wallet_balance(), 50);
}

#[test]
fn completion_by_another_user_is_forbidden_and_mutates_nothing() {
    let kiosk = kiosk();
    let owner = funded_user(&kiosk, 100);
    let intruder = funded_user(&kiosk, 100);

    let ticket = kiosk.coordinator.start_dispense(owner, 500).unwrap();
    let result = kiosk
        .coordinator
        .complete_dispense(intruder, ticket.request_id, "COMPLETED");
    assert_eq!(result, Err(DispenseError::Forbidden));

    let request = kiosk.registry.get(&ticket.request_id).unwrap();
    assert_eq!(request.status(), DispenseStatus::Pending);
    assert_eq!(kiosk.ledger.balance(&owner).unwrap(), 100);
    assert_eq!(kiosk.ledger.balance(&intruder).unwrap(), 100);
}

#[test]
fn unknown_request_is_not_found() {
    let kiosk = kiosk();
    let user = funded_user(&kiosk, 100);
    let ticket = kiosk.coordinator.start_dispense(user, 500).unwrap();
    kiosk
        .coordinator
        .complete_dispense(user, ticket.request_id, "FAILED")
        .unwrap();

    let result = kiosk.coordinator.complete_dispense(
        user,
        kiosk_ledger_rs::RequestId::new(),
        "COMPLETED",
    );
    assert_eq!(result, Err(DispenseError::RequestNotFound));
}

#[test]
fn late_balance_shortfall_fails_the_request() {
    let kiosk = kiosk();
    let user = funded_user(&kiosk, 50);

    // Both pre-checks pass against the same 50-unit balance
    let first = kiosk.coordinator.start_dispense(user, 500).unwrap();
    let second = kiosk.coordinator.start_dispense(user, 500).unwrap();

    kiosk
        .coordinator
        .complete_dispense(user, first.request_id, "COMPLETED")
        .unwrap();
    assert_eq!(kiosk.ledger.balance(&user).unwrap(), 0);

    // The binding check at completion catches the stale pre-check
    let result = kiosk
        .coordinator
        .complete_dispense(user, second.request_id, "COMPLETED");
    assert_eq!(result, Err(DispenseError::InsufficientFunds));

    // Never COMPLETED without a matching debit: the request failed instead
    let request = kiosk.registry.get(&second.request_id).unwrap();
    assert_eq!(request.status(), DispenseStatus::Failed);
    assert_eq!(kiosk.ledger.balance(&user).unwrap(), 0);

    // Retrying the loser now observes the terminal state
    let retry = kiosk
        .coordinator
        .complete_dispense(user, second.request_id, "COMPLETED")
        .unwrap();
    assert!(matches!(retry, Completion::AlreadyFinalized { .. }));
    assert_eq!(retry.status(), DispenseStatus::Failed);
}

#[test]
fn cost_is_recomputed_from_the_stored_quantity() {
    let kiosk = kiosk();
    let user = funded_user(&kiosk, 300);

    let ticket = kiosk.coordinator.start_dispense(user, 2000).unwrap();
    assert_eq!(ticket.cost, 200);

    let completion = kiosk
        .coordinator
        .complete_dispense(user, ticket.request_id, "COMPLETED")
        .unwrap();
    // Debit matches the start-time quote exactly
    assert_eq!(completion.amount_deducted(), 200);
    assert_eq!(completion.wallet_balance(), 100);
}

#[test]
fn independent_requests_do_not_interfere() {
    let kiosk = kiosk();
    let user = funded_user(&kiosk, 500);

    let first = kiosk.coordinator.start_dispense(user, 500).unwrap();
    let second = kiosk.coordinator.start_dispense(user, 1000).unwrap();
    assert_ne!(first.request_id, second.request_id);

    kiosk
        .coordinator
        .complete_dispense(user, second.request_id, "COMPLETED")
        .unwrap();
    let request = kiosk.registry.get(&first.request_id).unwrap();
    assert_eq!(request.status(), DispenseStatus::Pending);

    kiosk
        .coordinator
        .complete_dispense(user, first.request_id, "COMPLETED")
        .unwrap();
    assert_eq!(kiosk.ledger.balance(&user).unwrap(), 350);
}

#[test]
fn ledger_reconciles_after_mixed_outcomes() {
    let kiosk = kiosk();
    let user = funded_user(&kiosk, 400);

    for (quantity, outcome) in [(500, "COMPLETED"), (1000, "FAILED"), (500, "COMPLETED")] {
        let ticket = kiosk.coordinator.start_dispense(user, quantity).unwrap();
        kiosk
            .coordinator
            .complete_dispense(user, ticket.request_id, outcome)
            .unwrap();
    }

    // balance == initial credit + sum of signed amounts
    assert_eq!(kiosk.ledger.balance(&user).unwrap(), 300);
    assert_eq!(kiosk.ledger.log().sum_for(&user), 300);
}

#[test]
fn is_allowed_to_dispense_matches_pricing() {
    let kiosk = kiosk();
    assert!(kiosk.coordinator.is_allowed_to_dispense(500));
    assert!(kiosk.coordinator.is_allowed_to_dispense(2000));
    assert!(!kiosk.coordinator.is_allowed_to_dispense(750));
    assert!(!kiosk.coordinator.is_allowed_to_dispense(0));
}
