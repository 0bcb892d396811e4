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

//! Envelope and claim rows.
//!
//! Envelopes follow a state machine:
//! - [`Active`] → [`Finished`] (last share claimed)
//! - [`Active`] → [`Expired`] (refunded by the sweeper)
//!
//! Both end states are terminal.
//!
//! [`Active`]: EnvelopeStatus::Active
//! [`Finished`]: EnvelopeStatus::Finished
//! [`Expired`]: EnvelopeStatus::Expired

use crate::base::{ClaimId, EnvelopeCode, EnvelopeId, UserId};
use crate::error::EnvelopeError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// How an envelope splits its pool.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    /// Every claimant gets `total / count`, the last one takes the remainder.
    Fixed,
    /// Shares drawn with the double-average method.
    Random,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeStatus {
    Active,
    Finished,
    Expired,
}

impl EnvelopeStatus {
    /// Checks `self -> next` against the transition table.
    pub fn transition(self, next: EnvelopeStatus) -> Result<EnvelopeStatus, EnvelopeError> {
        match (self, next) {
            (Self::Active, Self::Finished) | (Self::Active, Self::Expired) => Ok(next),
            (from, to) => Err(EnvelopeError::InvalidTransition { from, to }),
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }
}

/// A pool of money split into a bounded number of claimable shares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: EnvelopeId,
    pub code: EnvelopeCode,
    pub creator_id: UserId,
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    pub total_amount: Decimal,
    pub remaining_amount: Decimal,
    pub total_count: u32,
    pub remaining_count: u32,
    pub greeting: String,
    pub status: EnvelopeStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Envelope {
    /// True once `expires_at` is at or before `now`, whatever the status.
    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Records one claim of `share` and finishes the envelope when the last
    /// share is gone.
    pub(crate) fn record_claim(&mut self, share: Decimal) -> Result<(), EnvelopeError> {
        if self.remaining_count == 0 || share > self.remaining_amount {
            return Err(EnvelopeError::Finished);
        }
        self.remaining_count -= 1;
        self.remaining_amount -= share;
        if self.remaining_count == 0 {
            self.status = self.status.transition(EnvelopeStatus::Finished)?;
        }
        self.assert_invariants();
        Ok(())
    }

    /// Expires the envelope, zeroing what is left. Returns the refund.
    pub(crate) fn expire(&mut self) -> Result<Decimal, EnvelopeError> {
        self.status = self.status.transition(EnvelopeStatus::Expired)?;
        let refund = self.remaining_amount;
        self.remaining_amount = Decimal::ZERO;
        self.remaining_count = 0;
        self.assert_invariants();
        Ok(refund)
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.remaining_amount >= Decimal::ZERO && self.remaining_amount <= self.total_amount,
            "Invariant violated: remaining amount {} outside [0, {}]",
            self.remaining_amount,
            self.total_amount
        );
        debug_assert!(
            self.remaining_count <= self.total_count,
            "Invariant violated: remaining count {} above total {}",
            self.remaining_count,
            self.total_count
        );
        debug_assert!(
            self.remaining_count > 0 || self.status.is_terminal(),
            "Invariant violated: empty envelope still active"
        );
    }
}

/// One user's withdrawal from an envelope. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub id: ClaimId,
    pub envelope_id: EnvelopeId,
    pub user_id: UserId,
    pub amount: Decimal,
    pub claimed_at: DateTime<Utc>,
}
