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

//! Wallet balances and the append-only transaction log.
//!
//! The [`LedgerStore`] is the single synchronization point for money:
//! each wallet is guarded by its own mutex, so two concurrent debits for
//! the same user serialize and can never both pass the balance check
//! against the same stale balance. The transaction record is appended
//! inside the same critical section as the balance change, keeping
//! `balance == sum(transaction amounts)` observable at every instant.
//!
//! Wallet locks are acquired with a bounded wait; a lock that cannot be
//! taken within the configured timeout surfaces as
//! [`DispenseError::StorageTimeout`] instead of blocking indefinitely.

use crate::base::UserId;
use crate::error::DispenseError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// Immutable append-only ledger record.
///
/// Written exactly once per committed balance change; negative amounts
/// are debits. Never updated or deleted.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerEntry {
    /// Global append order, starting at 0.
    pub seq: u64,
    pub user_id: UserId,
    /// Signed wallet units; negative for a debit.
    pub amount: i64,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Thread-safe append-only transaction log.
///
/// Entries are keyed by a globally ordered sequence number and never
/// removed; reads reconstruct append order from the sequence.
#[derive(Debug, Default)]
pub struct TransactionLog {
    next_seq: AtomicU64,
    /// Entries indexed by sequence number.
    entries: DashMap<u64, Arc<LedgerEntry>>,
}

impl TransactionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record and returns it.
    fn append(&self, user_id: UserId, amount: i64, description: &str) -> Arc<LedgerEntry> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(LedgerEntry {
            seq,
            user_id,
            amount,
            description: description.to_string(),
            created_at: Utc::now(),
        });
        self.entries.insert(seq, Arc::clone(&entry));
        entry
    }

    /// All records for a user, in append order.
    pub fn entries_for(&self, user_id: &UserId) -> Vec<Arc<LedgerEntry>> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .filter(|e| e.user_id == *user_id)
            .map(|e| Arc::clone(e.value()))
            .collect();
        entries.sort_by_key(|e| e.seq);
        entries
    }

    /// Sum of signed amounts for a user.
    ///
    /// Reconciles against the wallet balance: for a wallet created at zero,
    /// the sum always equals the committed balance.
    pub fn sum_for(&self, user_id: &UserId) -> i64 {
        self.entries
            .iter()
            .filter(|e| e.user_id == *user_id)
            .map(|e| e.amount)
            .sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug)]
struct WalletData {
    user_id: UserId,
    balance: i64,
}

impl WalletData {
    fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            balance: 0,
        }
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.balance >= 0,
            "Invariant violated: wallet balance went negative for {}: {}",
            self.user_id,
            self.balance
        );
    }
}

/// Prepaid wallet guarded by a per-wallet mutex.
#[derive(Debug)]
struct Wallet {
    inner: Mutex<WalletData>,
}

impl Wallet {
    fn new(user_id: UserId) -> Self {
        Self {
            inner: Mutex::new(WalletData::new(user_id)),
        }
    }
}

/// Durable keyed storage for wallet balances and the transaction log.
///
/// Wallets are created lazily with a zero balance and mutated only under
/// their own lock. The store never exposes a read-modify-write window
/// across calls.
#[derive(Debug)]
pub struct LedgerStore {
    /// Wallets indexed by owning user id; at most one per user.
    wallets: DashMap<UserId, Wallet>,
    log: TransactionLog,
    /// Bounded wait for a wallet lock before reporting a storage timeout.
    lock_timeout: Duration,
}

impl LedgerStore {
    /// Default bounded wait for a wallet lock.
    pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(500);

    pub fn new() -> Self {
        Self::with_lock_timeout(Self::DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            wallets: DashMap::new(),
            log: TransactionLog::new(),
            lock_timeout,
        }
    }

    /// Idempotently creates a zero-balance wallet if absent.
    ///
    /// Safe to call concurrently for the same user: the entry API inserts
    /// atomically, and the losing creator is a no-op success.
    pub fn ensure_wallet(&self, user_id: UserId) -> Result<(), DispenseError> {
        self.wallets
            .entry(user_id)
            .or_insert_with(|| Wallet::new(user_id));
        Ok(())
    }

    /// Current committed balance.
    ///
    /// # Errors
    ///
    /// - [`DispenseError::WalletNotFound`] - No wallet exists for the user.
    /// - [`DispenseError::StorageTimeout`] - Wallet lock not acquired in time.
    pub fn balance(&self, user_id: &UserId) -> Result<i64, DispenseError> {
        let wallet = self
            .wallets
            .get(user_id)
            .ok_or(DispenseError::WalletNotFound)?;
        let data = wallet
            .inner
            .try_lock_for(self.lock_timeout)
            .ok_or(DispenseError::StorageTimeout)?;
        Ok(data.balance)
    }

    /// Atomically increments the balance and appends a positive record.
    ///
    /// Out-of-scope top-up flows and seeding land here; the dispense path
    /// itself never credits.
    pub fn credit(
        &self,
        user_id: &UserId,
        amount: i64,
        description: &str,
    ) -> Result<i64, DispenseError> {
        debug_assert!(amount > 0, "credit amount must be positive: {amount}");
        let wallet = self
            .wallets
            .get(user_id)
            .ok_or(DispenseError::WalletNotFound)?;
        let mut data = wallet
            .inner
            .try_lock_for(self.lock_timeout)
            .ok_or(DispenseError::StorageTimeout)?;

        data.balance += amount;
        self.log.append(*user_id, amount, description);
        data.assert_invariants();

        debug!(user = %user_id, amount, balance = data.balance, "wallet credited");
        Ok(data.balance)
    }

    /// Atomically checks, decrements, and records a debit.
    ///
    /// The balance check, decrement, and log append happen in one critical
    /// section under the wallet lock, so concurrent debits for the same
    /// user observe a total order.
    ///
    /// # Errors
    ///
    /// - [`DispenseError::WalletNotFound`] - No wallet exists for the user.
    /// - [`DispenseError::InsufficientFunds`] - `balance < amount`; nothing changes.
    /// - [`DispenseError::StorageTimeout`] - Wallet lock not acquired in time.
    pub fn debit(
        &self,
        user_id: &UserId,
        amount: i64,
        description: &str,
    ) -> Result<i64, DispenseError> {
        debug_assert!(amount > 0, "debit amount must be positive: {amount}");
        let wallet = self
            .wallets
            .get(user_id)
            .ok_or(DispenseError::WalletNotFound)?;
        let mut data = wallet
            .inner
            .try_lock_for(self.lock_timeout)
            .ok_or(DispenseError::StorageTimeout)?;

        if data.balance < amount {
            return Err(DispenseError::InsufficientFunds);
        }
        data.balance -= amount;
        self.log.append(*user_id, -amount, description);
        data.assert_invariants();

        debug!(user = %user_id, amount, balance = data.balance, "wallet debited");
        Ok(data.balance)
    }

    /// The append-only audit trail.
    pub fn log(&self) -> &TransactionLog {
        &self.log
    }

    /// Number of wallets in the store.
    pub fn wallet_count(&self) -> usize {
        self.wallets.len()
    }
}

impl Default for LedgerStore {
    fn default() -> Self {
        Self::new()
    }
}
