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

//! Pricing policy for metered dispenses.
//!
//! Pure and side-effect free: the coordinator calls [`PricingPolicy::cost`]
//! once before creating a request and again at completion, and both calls
//! must agree. Unknown quantities are rejected outright, never rounded to
//! the nearest tier.
//!
//! # Example
//!
//! ```
//! use kiosk_ledger_rs::PricingPolicy;
//!
//! let pricing = PricingPolicy::default();
//! assert!(pricing.is_allowed(500));
//! assert!(!pricing.is_allowed(750));
//! assert_eq!(pricing.cost(500), 50);
//! ```

use std::collections::BTreeSet;

/// Maps a requested quantity to an allowed/disallowed decision and a cost.
///
/// Quantities are resource units (milliliters); costs are integer wallet
/// units. The rate is expressed per 100 units and the cost is rounded up,
/// so partial hundreds are always charged in full.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricingPolicy {
    /// Finite set of dispensable quantities.
    allowed: BTreeSet<u32>,
    /// Wallet units charged per 100 resource units.
    rate_per_100: i64,
}

impl PricingPolicy {
    /// Default tier set: 500ml, 1l, 2l.
    pub const DEFAULT_QUANTITIES: [u32; 3] = [500, 1000, 2000];

    /// Default rate: 10 wallet units per 100ml.
    pub const DEFAULT_RATE_PER_100: i64 = 10;

    pub fn new(allowed: impl IntoIterator<Item = u32>, rate_per_100: i64) -> Self {
        debug_assert!(rate_per_100 > 0, "rate must be positive: {rate_per_100}");
        Self {
            allowed: allowed.into_iter().collect(),
            rate_per_100,
        }
    }

    /// Returns true iff `quantity` is a member of the configured set.
    pub fn is_allowed(&self, quantity: u32) -> bool {
        self.allowed.contains(&quantity)
    }

    /// Deterministic integer cost via ceiling division.
    ///
    /// Total over all of `u32`; validation is the caller's job via
    /// [`is_allowed`](Self::is_allowed) before any commit.
    pub fn cost(&self, quantity: u32) -> i64 {
        // Manual ceiling division; both operands are positive.
        (i64::from(quantity) * self.rate_per_100 + 99) / 100
    }

    /// The configured quantity tiers, ascending.
    pub fn allowed_quantities(&self) -> Vec<u32> {
        self.allowed.iter().copied().collect()
    }
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_QUANTITIES, Self::DEFAULT_RATE_PER_100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membership_is_exact() {
        let pricing = PricingPolicy::default();
        assert!(pricing.is_allowed(500));
        assert!(pricing.is_allowed(1000));
        assert!(pricing.is_allowed(2000));
        assert!(!pricing.is_allowed(750));
        assert!(!pricing.is_allowed(0));
        assert!(!pricing.is_allowed(499));
        assert!(!pricing.is_allowed(2001));
    }

    #[test]
    fn cost_scales_per_hundred_units() {
        let pricing = PricingPolicy::default();
        assert_eq!(pricing.cost(500), 50);
        assert_eq!(pricing.cost(1000), 100);
        assert_eq!(pricing.cost(2000), 200);
    }

    #[test]
    fn cost_rounds_partial_hundreds_up() {
        let pricing = PricingPolicy::new([250], 10);
        // 250ml at 10/100ml is exactly 25
        assert_eq!(pricing.cost(250), 25);
        // 330ml at 10/100ml is 33 exactly; 333 rounds 33.3 up to 34
        assert_eq!(pricing.cost(330), 33);
        assert_eq!(pricing.cost(333), 34);
        // 1ml is still charged one unit
        assert_eq!(pricing.cost(1), 1);

        // Odd rates round up too: 150ml at 7/100ml is 10.5, charged as 11
        let odd = PricingPolicy::new([150], 7);
        assert_eq!(odd.cost(150), 11);
        // Exact multiples are never inflated
        assert_eq!(odd.cost(200), 14);
    }

    #[test]
    fn cost_is_deterministic_across_calls() {
        let pricing = PricingPolicy::default();
        let first = pricing.cost(1000);
        let second = pricing.cost(1000);
        assert_eq!(first, second);
    }

    #[test]
    fn allowed_quantities_sorted_ascending() {
        let pricing = PricingPolicy::new([2000, 500, 1000], 10);
        assert_eq!(pricing.allowed_quantities(), vec![500, 1000, 2000]);
    }

    #[test]
    fn custom_rate() {
        let pricing = PricingPolicy::new([500, 1000], 25);
        assert_eq!(pricing.cost(500), 125);
        assert_eq!(pricing.cost(1000), 250);
    }
}
