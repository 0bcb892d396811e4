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

//! Account balance rows.
//!
//! The engine only ever moves an account's available balance by a signed
//! delta; whether a debit fits is decided by [`Account::can_apply`] while
//! the store holds its commit lock.
//!
//! # Example
//!
//! ```
//! use rust_decimal_macros::dec;
//! use red_envelope_rs::{Account, UserId};
//!
//! let account = Account::new(UserId(1), "alice", dec!(25.00));
//! assert_eq!(account.available(), dec!(25.00));
//! ```

use crate::base::UserId;
use crate::money::round_money;
use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeStruct, Serializer};

/// Balance row of one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    user_id: UserId,
    username: String,
    available: Decimal,
}

impl Account {
    pub fn new(user_id: UserId, username: impl Into<String>, available: Decimal) -> Self {
        Self {
            user_id,
            username: username.into(),
            available,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn available(&self) -> Decimal {
        self.available
    }

    /// Whether `available + delta` stays non-negative.
    pub(crate) fn can_apply(&self, delta: Decimal) -> bool {
        self.available + delta >= Decimal::ZERO
    }

    /// Applies a delta already checked with [`can_apply`](Self::can_apply).
    pub(crate) fn apply(&mut self, delta: Decimal) {
        self.available += delta;
        self.assert_invariants();
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.available >= Decimal::ZERO,
            "Invariant violated: available balance went negative: {}",
            self.available
        );
    }
}

impl Serialize for Account {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("Account", 3)?;
        state.serialize_field("user", &self.user_id)?;
        state.serialize_field("username", &self.username)?;
        state.serialize_field("balance", &round_money(self.available))?;
        state.end()
    }
}
