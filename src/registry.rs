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

//! Dispense request storage and lifecycle tracking.
//!
//! Requests follow a state machine with a single exit from the pending
//! state:
//!
//! ```text
//! PENDING ──► COMPLETED
//!    │
//!    └──────► FAILED
//! ```
//!
//! Terminal states never transition again; a second completion attempt
//! fails the transition guard and is observed by the coordinator as an
//! already-finalized request.

use crate::base::{RequestId, UserId};
use crate::error::DispenseError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::one::RefMut;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a dispense request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DispenseStatus {
    Pending,
    Completed,
    Failed,
}

impl DispenseStatus {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(self) -> bool {
        !matches!(self, DispenseStatus::Pending)
    }

    /// Parses a hardware-reported outcome, case-insensitively.
    ///
    /// Only the two terminal states are valid outcomes; `PENDING` is not
    /// reportable.
    pub fn parse_outcome(reported: &str) -> Result<Self, DispenseError> {
        match reported.to_ascii_uppercase().as_str() {
            "COMPLETED" => Ok(DispenseStatus::Completed),
            "FAILED" => Ok(DispenseStatus::Failed),
            _ => Err(DispenseError::InvalidStatus),
        }
    }
}

impl fmt::Display for DispenseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DispenseStatus::Pending => "PENDING",
            DispenseStatus::Completed => "COMPLETED",
            DispenseStatus::Failed => "FAILED",
        };
        write!(f, "{s}")
    }
}

/// One user-initiated attempt to draw a fixed quantity of water.
///
/// Mutated exactly once, through [`transition`](Self::transition); all
/// other fields are fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispenseRequest {
    id: RequestId,
    user_id: UserId,
    quantity_ml: u32,
    status: DispenseStatus,
    created_at: DateTime<Utc>,
    /// Set only on the terminal transition.
    completed_at: Option<DateTime<Utc>>,
}

impl DispenseRequest {
    fn new(user_id: UserId, quantity_ml: u32) -> Self {
        debug_assert!(quantity_ml > 0, "quantity must be positive: {quantity_ml}");
        Self {
            id: RequestId::new(),
            user_id,
            quantity_ml,
            status: DispenseStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn quantity_ml(&self) -> u32 {
        self.quantity_ml
    }

    pub fn status(&self) -> DispenseStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Single permitted mutation: `PENDING` to a terminal status.
    ///
    /// # Errors
    ///
    /// [`DispenseError::InvalidTransition`] if the request is no longer
    /// pending at the moment of the attempt.
    pub(crate) fn transition(
        &mut self,
        to: DispenseStatus,
        at: DateTime<Utc>,
    ) -> Result<(), DispenseError> {
        debug_assert!(to.is_terminal(), "transition target must be terminal: {to}");
        if self.status != DispenseStatus::Pending {
            return Err(DispenseError::InvalidTransition);
        }
        self.status = to;
        self.completed_at = Some(at);
        Ok(())
    }
}

/// Durable storage for dispense requests, keyed by request id.
///
/// Rows are exclusively owned by the registry; callers get snapshots.
/// The coordinator takes the exclusive entry for a request while
/// finalizing it, which makes the terminal transition and the associated
/// wallet debit one atomic unit toward concurrent completers.
#[derive(Debug, Default)]
pub struct DispenseRegistry {
    requests: DashMap<RequestId, DispenseRequest>,
}

impl DispenseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new `PENDING` request and returns a snapshot of it.
    pub fn create(&self, user_id: UserId, quantity_ml: u32) -> DispenseRequest {
        let request = DispenseRequest::new(user_id, quantity_ml);
        let snapshot = request.clone();
        self.requests.insert(request.id, request);
        snapshot
    }

    /// Snapshot of a request by id.
    ///
    /// # Errors
    ///
    /// [`DispenseError::RequestNotFound`] if absent.
    pub fn get(&self, id: &RequestId) -> Result<DispenseRequest, DispenseError> {
        self.requests
            .get(id)
            .map(|r| r.clone())
            .ok_or(DispenseError::RequestNotFound)
    }

    /// Exclusive access to a stored request row.
    ///
    /// Holding the returned guard blocks every other completer for the
    /// same request; the coordinator keeps it across the ledger debit so
    /// the two commit as one unit.
    pub(crate) fn entry_mut(
        &self,
        id: &RequestId,
    ) -> Option<RefMut<'_, RequestId, DispenseRequest>> {
        self.requests.get_mut(id)
    }

    /// Guarded transition out of `PENDING`.
    ///
    /// # Errors
    ///
    /// - [`DispenseError::RequestNotFound`] - Unknown request id.
    /// - [`DispenseError::InvalidTransition`] - Stored status is already terminal.
    pub fn transition_to_terminal(
        &self,
        id: &RequestId,
        to: DispenseStatus,
        completed_at: DateTime<Utc>,
    ) -> Result<DispenseRequest, DispenseError> {
        let mut entry = self
            .requests
            .get_mut(id)
            .ok_or(DispenseError::RequestNotFound)?;
        entry.transition(to, completed_at)?;
        Ok(entry.clone())
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}
