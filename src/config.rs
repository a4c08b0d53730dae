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

//! Deployment configuration.
//!
//! Every knob has a default matching a small kiosk deployment; the
//! environment overrides them:
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `KIOSK_ALLOWED_QUANTITIES` | `500,1000,2000` | Dispensable tiers (ml) |
//! | `KIOSK_RATE_PER_100ML` | `10` | Wallet units per 100ml |
//! | `KIOSK_STORE_TIMEOUT_MS` | `500` | Wallet lock wait before `StorageTimeout` |
//! | `KIOSK_SESSION_TTL_DAYS` | `7` | Session lifetime |
//! | `KIOSK_MAX_RETRIES` | `3` | Retries for transient storage failures |
//! | `KIOSK_RETRY_BACKOFF_MS` | `50` | Base backoff, doubling per attempt |

use crate::coordinator::RetryPolicy;
use crate::pricing::PricingPolicy;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Configuration parsing errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Environment variable holds an unparseable value
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: String, value: String },
}

/// Deployment configuration for all kiosk components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KioskConfig {
    pub allowed_quantities: Vec<u32>,
    pub rate_per_100: i64,
    pub store_timeout: Duration,
    pub session_ttl_days: i64,
    pub retry: RetryPolicy,
}

impl Default for KioskConfig {
    fn default() -> Self {
        Self {
            allowed_quantities: PricingPolicy::DEFAULT_QUANTITIES.to_vec(),
            rate_per_100: PricingPolicy::DEFAULT_RATE_PER_100,
            store_timeout: Duration::from_millis(500),
            session_ttl_days: 7,
            retry: RetryPolicy::default(),
        }
    }
}

impl KioskConfig {
    /// Reads configuration from the environment, falling back to defaults
    /// for unset variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            allowed_quantities: match env::var("KIOSK_ALLOWED_QUANTITIES") {
                Ok(raw) => parse_quantities(&raw)?,
                Err(_) => defaults.allowed_quantities,
            },
            rate_per_100: parse_or("KIOSK_RATE_PER_100ML", defaults.rate_per_100)?,
            store_timeout: Duration::from_millis(parse_or(
                "KIOSK_STORE_TIMEOUT_MS",
                defaults.store_timeout.as_millis() as u64,
            )?),
            session_ttl_days: parse_or("KIOSK_SESSION_TTL_DAYS", defaults.session_ttl_days)?,
            retry: RetryPolicy {
                max_retries: parse_or("KIOSK_MAX_RETRIES", defaults.retry.max_retries)?,
                base_backoff: Duration::from_millis(parse_or(
                    "KIOSK_RETRY_BACKOFF_MS",
                    defaults.retry.base_backoff.as_millis() as u64,
                )?),
            },
        })
    }

    /// Pricing policy built from this configuration.
    pub fn pricing(&self) -> PricingPolicy {
        PricingPolicy::new(self.allowed_quantities.iter().copied(), self.rate_per_100)
    }

    /// Session lifetime as a chrono duration.
    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::days(self.session_ttl_days)
    }
}

/// Parses a comma-separated quantity list like `500,1000,2000`.
fn parse_quantities(raw: &str) -> Result<Vec<u32>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u32>().map_err(|_| ConfigError::Invalid {
                key: "KIOSK_ALLOWED_QUANTITIES".to_string(),
                value: raw.to_string(),
            })
        })
        .collect()
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
            key: key.to_string(),
            value: raw,
        }),
        Err(_) => Ok(default),
    }
}
