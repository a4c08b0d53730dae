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

//! Session issuance and bearer-token resolution.
//!
//! This is the thin identity adapter the core consumes: downstream code
//! only ever sees the resolved [`UserId`] from
//! [`SessionProvider::resolve`]. Tokens are opaque; their issuance
//! mechanics are deliberately not part of the transactional core.

use crate::base::UserId;
use crate::error::SessionError;
use crate::ledger::LedgerStore;
use crate::user::{User, UserDirectory};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// An issued session: opaque token maps to a user and an expiry instant.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: UserId,
    pub expires_at: DateTime<Utc>,
}

/// Successful QR login: the bearer token plus the resolved user.
#[derive(Debug, Clone)]
pub struct LoginGrant {
    pub token: String,
    pub user: User,
}

/// Resolves scanned QR codes into sessions and bearer tokens into users.
pub struct SessionProvider {
    directory: Arc<UserDirectory>,
    ledger: Arc<LedgerStore>,
    sessions: DashMap<String, Session>,
    ttl: Duration,
}

impl SessionProvider {
    /// Default session lifetime.
    pub const DEFAULT_TTL_DAYS: i64 = 7;

    pub fn new(directory: Arc<UserDirectory>, ledger: Arc<LedgerStore>) -> Self {
        Self::with_ttl(directory, ledger, Duration::days(Self::DEFAULT_TTL_DAYS))
    }

    pub fn with_ttl(
        directory: Arc<UserDirectory>,
        ledger: Arc<LedgerStore>,
        ttl: Duration,
    ) -> Self {
        Self {
            directory,
            ledger,
            sessions: DashMap::new(),
            ttl,
        }
    }

    /// Authenticates a scanned QR code and issues a session.
    ///
    /// The user's wallet is created lazily here on first authentication,
    /// with a zero balance.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidQrCode`] - Code matches no registered user.
    /// - [`SessionError::Unauthenticated`] - Wallet provisioning failed.
    pub fn scan_login(&self, qr_code: &str) -> Result<LoginGrant, SessionError> {
        let user = self
            .directory
            .find_by_qr(qr_code)
            .ok_or(SessionError::InvalidQrCode)?;

        self.ledger
            .ensure_wallet(user.id)
            .map_err(|_| SessionError::Unauthenticated)?;

        let token = Uuid::new_v4().to_string();
        let session = Session {
            user_id: user.id,
            expires_at: Utc::now() + self.ttl,
        };
        self.sessions.insert(token.clone(), session);

        info!(user = %user.id, "QR login, session issued");
        Ok(LoginGrant { token, user })
    }

    /// Resolves a bearer token to its user id.
    ///
    /// Expired sessions are evicted on the way out.
    ///
    /// # Errors
    ///
    /// [`SessionError::Unauthenticated`] on a missing, unknown, or expired
    /// token.
    pub fn resolve(&self, bearer: &str) -> Result<UserId, SessionError> {
        let session = self
            .sessions
            .get(bearer)
            .ok_or(SessionError::Unauthenticated)?;

        if session.expires_at < Utc::now() {
            drop(session);
            self.sessions.remove(bearer);
            return Err(SessionError::Unauthenticated);
        }

        Ok(session.user_id)
    }

    /// Revokes a session; returns whether one existed.
    pub fn logout(&self, token: &str) -> bool {
        self.sessions.remove(token).is_some()
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> (SessionProvider, Arc<UserDirectory>, Arc<LedgerStore>) {
        let directory = Arc::new(UserDirectory::new());
        let ledger = Arc::new(LedgerStore::new());
        let provider = SessionProvider::new(Arc::clone(&directory), Arc::clone(&ledger));
        (provider, directory, ledger)
    }

    #[test]
    fn scan_login_issues_resolvable_token() {
        let (provider, directory, _ledger) = provider();
        let user = directory.register("QR_USER_001", "John Doe", None);

        let grant = provider.scan_login("QR_USER_001").unwrap();
        assert_eq!(grant.user.id, user.id);
        assert_eq!(provider.resolve(&grant.token), Ok(user.id));
    }

    #[test]
    fn scan_login_unknown_qr_rejected() {
        let (provider, _directory, _ledger) = provider();
        assert_eq!(
            provider.scan_login("QR_NOBODY").unwrap_err(),
            SessionError::InvalidQrCode
        );
    }

    #[test]
    fn login_creates_wallet_lazily_and_once() {
        let (provider, directory, ledger) = provider();
        let user = directory.register("QR_USER_002", "Jane Smith", None);

        provider.scan_login("QR_USER_002").unwrap();
        assert_eq!(ledger.balance(&user.id), Ok(0));

        ledger.credit(&user.id, 250, "seed").unwrap();
        // A second login must not reset the wallet
        provider.scan_login("QR_USER_002").unwrap();
        assert_eq!(ledger.balance(&user.id), Ok(250));
    }

    #[test]
    fn unknown_token_is_unauthenticated() {
        let (provider, _directory, _ledger) = provider();
        assert_eq!(
            provider.resolve("not-a-token"),
            Err(SessionError::Unauthenticated)
        );
    }

    #[test]
    fn expired_session_is_rejected_and_evicted() {
        let directory = Arc::new(UserDirectory::new());
        let ledger = Arc::new(LedgerStore::new());
        directory.register("QR_USER_003", "Bob Johnson", None);
        let provider = SessionProvider::with_ttl(
            Arc::clone(&directory),
            Arc::clone(&ledger),
            Duration::milliseconds(-1),
        );

        let grant = provider.scan_login("QR_USER_003").unwrap();
        assert_eq!(
            provider.resolve(&grant.token),
            Err(SessionError::Unauthenticated)
        );
        assert_eq!(provider.active_sessions(), 0);
    }

    #[test]
    fn logout_revokes_session() {
        let (provider, directory, _ledger) = provider();
        directory.register("QR_USER_005", "Charlie Brown", None);

        let grant = provider.scan_login("QR_USER_005").unwrap();
        assert!(provider.logout(&grant.token));
        assert!(!provider.logout(&grant.token));
        assert_eq!(
            provider.resolve(&grant.token),
            Err(SessionError::Unauthenticated)
        );
    }
}
