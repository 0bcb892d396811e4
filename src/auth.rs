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

//! Caller identity and payment-key verification.
//!
//! Session handling lives outside this crate; what reaches the engine is an
//! already-resolved [`RequestContext`] plus an [`Authenticator`] that can
//! answer "is this the user's payment key".

use crate::base::UserId;
use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Per-request state handed down by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestContext {
    pub user_id: UserId,
    /// Transactions opened for this request roll back once this passes.
    pub deadline: Option<Instant>,
}

impl RequestContext {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            deadline: None,
        }
    }

    pub fn with_timeout(user_id: UserId, timeout: Duration) -> Self {
        Self {
            user_id,
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn current_user_id(&self) -> UserId {
        self.user_id
    }
}

pub trait Authenticator: Send + Sync {
    fn verify_payment_key(&self, user: UserId, key: &str) -> bool;
}

/// In-memory payment keys.
#[derive(Debug, Default)]
pub struct PayKeyRegistry {
    keys: DashMap<UserId, String>,
}

impl PayKeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_key(&self, user: UserId, key: impl Into<String>) {
        self.keys.insert(user, key.into());
    }
}

impl Authenticator for PayKeyRegistry {
    fn verify_payment_key(&self, user: UserId, key: &str) -> bool {
        self.keys
            .get(&user)
            .is_some_and(|stored| !stored.is_empty() && stored.as_str() == key)
    }
}
