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

//! Pre-registered users and their QR codes.
//!
//! Users are provisioned out of band (kiosk operators hand out printed QR
//! cards); the directory only resolves codes to identities. Name and
//! phone edits are out of scope here.

use crate::base::UserId;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;

/// Identity anchor for a wallet owner.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub phone: Option<String>,
    /// Printed credential scanned at the kiosk; unique per user.
    pub qr_code: String,
}

/// Registered users with a unique QR-code index.
#[derive(Debug, Default)]
pub struct UserDirectory {
    users: DashMap<UserId, User>,
    by_qr: DashMap<String, UserId>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a user, upserting on the QR code.
    ///
    /// A code that is already registered returns the existing user
    /// unchanged; the entry API makes concurrent registrations of the
    /// same code converge on one identity.
    pub fn register(&self, qr_code: &str, name: &str, phone: Option<&str>) -> User {
        match self.by_qr.entry(qr_code.to_string()) {
            // Rows are never removed, so the index always points at one.
            Entry::Occupied(existing) => self.users.get(existing.get()).unwrap().clone(),
            Entry::Vacant(vacant) => {
                let user = User {
                    id: UserId::new(),
                    name: name.to_string(),
                    phone: phone.map(str::to_string),
                    qr_code: qr_code.to_string(),
                };
                self.users.insert(user.id, user.clone());
                vacant.insert(user.id);
                user
            }
        }
    }

    /// Resolves a scanned QR code to its user.
    pub fn find_by_qr(&self, qr_code: &str) -> Option<User> {
        let id = *self.by_qr.get(qr_code)?;
        self.users.get(&id).map(|u| u.clone())
    }

    pub fn get(&self, id: &UserId) -> Option<User> {
        self.users.get(id).map(|u| u.clone())
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_find_by_qr() {
        let directory = UserDirectory::new();
        let user = directory.register("QR_USER_001", "John Doe", Some("+1234567890"));

        let found = directory.find_by_qr("QR_USER_001").unwrap();
        assert_eq!(found.id, user.id);
        assert_eq!(found.name, "John Doe");
        assert_eq!(found.phone.as_deref(), Some("+1234567890"));
    }

    #[test]
    fn register_is_upsert_on_qr_code() {
        let directory = UserDirectory::new();
        let first = directory.register("QR_USER_001", "John Doe", None);
        let second = directory.register("QR_USER_001", "Someone Else", Some("+1"));

        // Existing registration wins
        assert_eq!(first.id, second.id);
        assert_eq!(second.name, "John Doe");
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn unknown_qr_code_resolves_to_none() {
        let directory = UserDirectory::new();
        directory.register("QR_USER_001", "John Doe", None);
        assert!(directory.find_by_qr("QR_USER_999").is_none());
    }

    #[test]
    fn phone_is_optional() {
        let directory = UserDirectory::new();
        let user = directory.register("QR_USER_004", "Alice Williams", None);
        assert!(user.phone.is_none());
    }
}
