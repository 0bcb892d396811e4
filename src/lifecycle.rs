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

//! Envelope lifecycle: create, claim, detail and list.
//!
//! Create and claim each run as one store transaction:
//!
//! | Operation | First lock (no-wait) | Writes |
//! |-----------|----------------------|--------|
//! | create | creator balance row | debit, envelope insert, `send` journal entry |
//! | claim | envelope row | claim insert, envelope update, credit, `receive` journal entry |
//!
//! Any error drops the transaction, which discards every staged write.
//! Detail and list read committed rows only and never lock.

use crate::allocation::compute_share;
use crate::api::{ClaimView, DetailResponse, EnvelopeView, ListDirection, ListResponse};
use crate::base::{EnvelopeCode, UserId};
use crate::clock::Clock;
use crate::envelope::{Claim, Envelope, EnvelopeKind, EnvelopeStatus};
use crate::error::EnvelopeError;
use crate::ledger::{JournalKind, Ledger, NewJournalEntry};
use crate::money::{MIN_UNIT, has_valid_scale};
use crate::store::MemoryStore;
use chrono::Duration;
use rand::Rng;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Longest greeting, in characters.
pub const MAX_GREETING_CHARS: usize = 100;

/// Rules the manager enforces beyond the fixed invariants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecyclePolicy {
    pub ttl: Duration,
    pub allow_self_claim: bool,
    pub max_page_size: usize,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::hours(24),
            allow_self_claim: true,
            max_page_size: 100,
        }
    }
}

/// Parameters of a new envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEnvelope {
    pub kind: EnvelopeKind,
    pub total_amount: Decimal,
    pub total_count: u32,
    pub greeting: String,
}

/// Result of a successful claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimOutcome {
    pub claim: Claim,
    /// Envelope state right after the claim.
    pub envelope: Envelope,
}

/// Owns envelope rows and every rule about them.
pub struct EnvelopeManager {
    store: Arc<MemoryStore>,
    clock: Arc<dyn Clock>,
    policy: LifecyclePolicy,
}

impl EnvelopeManager {
    pub fn new(store: Arc<MemoryStore>, clock: Arc<dyn Clock>, policy: LifecyclePolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    /// Request checks that need no store access.
    ///
    /// # Errors
    ///
    /// In evaluation order: [`InvalidCount`], [`GreetingTooLong`],
    /// [`InvalidAmount`], [`DecimalPlacesExceeded`], [`AmountTooSmall`].
    ///
    /// [`InvalidCount`]: EnvelopeError::InvalidCount
    /// [`GreetingTooLong`]: EnvelopeError::GreetingTooLong
    /// [`InvalidAmount`]: EnvelopeError::InvalidAmount
    /// [`DecimalPlacesExceeded`]: EnvelopeError::DecimalPlacesExceeded
    /// [`AmountTooSmall`]: EnvelopeError::AmountTooSmall
    pub fn validate(&self, new: &NewEnvelope) -> Result<(), EnvelopeError> {
        if new.total_count == 0 {
            return Err(EnvelopeError::InvalidCount);
        }
        if new.greeting.chars().count() > MAX_GREETING_CHARS {
            return Err(EnvelopeError::GreetingTooLong {
                max: MAX_GREETING_CHARS,
            });
        }
        if new.total_amount <= Decimal::ZERO {
            return Err(EnvelopeError::InvalidAmount);
        }
        if !has_valid_scale(new.total_amount) {
            return Err(EnvelopeError::DecimalPlacesExceeded);
        }
        if new.kind == EnvelopeKind::Fixed
            && new.total_amount / Decimal::from(new.total_count) < MIN_UNIT
        {
            return Err(EnvelopeError::AmountTooSmall);
        }
        Ok(())
    }

    /// Funds and persists a new envelope.
    ///
    /// # Errors
    ///
    /// - Any [`validate`](Self::validate) error.
    /// - [`EnvelopeError::PayKeyIncorrect`] - `pay_key_verified` is false.
    /// - [`EnvelopeError::Busy`] - the creator's balance row is locked.
    /// - [`EnvelopeError::InsufficientBalance`] - balance below the total.
    /// - [`EnvelopeError::Storage`] - the policy ttl overflows the calendar.
    pub fn create(
        &self,
        creator: UserId,
        new: NewEnvelope,
        pay_key_verified: bool,
        deadline: Option<Instant>,
    ) -> Result<Envelope, EnvelopeError> {
        self.validate(&new)?;
        if !pay_key_verified {
            return Err(EnvelopeError::PayKeyIncorrect);
        }

        let now = self.clock.now();
        let expires_at = now.checked_add_signed(self.policy.ttl).ok_or_else(|| {
            EnvelopeError::Storage(format!("expiry overflows from {now}"))
        })?;
        let mut tx = self.store.begin(now, deadline);

        let balance = tx.lock_and_read_balance(creator)?;
        if balance < new.total_amount {
            return Err(EnvelopeError::InsufficientBalance);
        }
        tx.adjust_balance(creator, -new.total_amount)?;

        let envelope = Envelope {
            id: tx.next_envelope_id(),
            code: EnvelopeCode::generate(),
            creator_id: creator,
            kind: new.kind,
            total_amount: new.total_amount,
            remaining_amount: new.total_amount,
            total_count: new.total_count,
            remaining_count: new.total_count,
            greeting: new.greeting,
            status: EnvelopeStatus::Active,
            created_at: now,
            expires_at,
        };
        tx.insert_envelope(envelope.clone());
        tx.append_journal_entry(NewJournalEntry {
            name: entry_name("Red envelope sent", &envelope.greeting),
            payer: creator,
            payee: creator,
            amount: envelope.total_amount,
            kind: JournalKind::RedEnvelopeSend,
            remark: format!("created red envelope with {} shares", envelope.total_count),
        })?;
        tx.commit()?;

        info!(
            envelope_id = %envelope.id,
            creator = %creator,
            kind = ?envelope.kind,
            amount = %envelope.total_amount,
            count = envelope.total_count,
            "red envelope created"
        );
        Ok(envelope)
    }

    /// Claims one share of the envelope identified by `code`.
    ///
    /// `rng` drives random shares; fixed shares ignore it.
    ///
    /// # Errors
    ///
    /// - [`EnvelopeError::Busy`] - another claim holds the envelope row.
    /// - [`EnvelopeError::NotFound`] - unknown code.
    /// - [`EnvelopeError::Expired`] - expired status or past `expires_at`.
    /// - [`EnvelopeError::Finished`] - no shares left.
    /// - [`EnvelopeError::CannotClaimOwn`] - creator claim with self-claim disabled.
    /// - [`EnvelopeError::AlreadyClaimed`] - the user already claimed.
    /// - [`EnvelopeError::AccountNotFound`] - claimer has no account.
    pub fn claim<R: Rng + ?Sized>(
        &self,
        code: &EnvelopeCode,
        user: UserId,
        deadline: Option<Instant>,
        rng: &mut R,
    ) -> Result<ClaimOutcome, EnvelopeError> {
        let now = self.clock.now();
        let mut tx = self.store.begin(now, deadline);

        let mut envelope = tx.lock_envelope_by_code(code)?;
        if envelope.status == EnvelopeStatus::Expired || envelope.is_past_expiry(now) {
            return Err(EnvelopeError::Expired);
        }
        if envelope.status == EnvelopeStatus::Finished || envelope.remaining_count == 0 {
            return Err(EnvelopeError::Finished);
        }
        if !self.policy.allow_self_claim && envelope.creator_id == user {
            return Err(EnvelopeError::CannotClaimOwn);
        }
        if tx.find_claim(envelope.id, user).is_some() {
            return Err(EnvelopeError::AlreadyClaimed);
        }

        let share = compute_share(&envelope, rng);
        let claim = tx.insert_claim(envelope.id, user, share);
        envelope.record_claim(share)?;
        tx.update_envelope(envelope.clone())?;

        tx.adjust_balance(user, share)?;
        tx.append_journal_entry(NewJournalEntry {
            name: entry_name("Red envelope received", &envelope.greeting),
            payer: envelope.creator_id,
            payee: user,
            amount: share,
            kind: JournalKind::RedEnvelopeReceive,
            remark: format!("claimed from creator {}", envelope.creator_id),
        })?;
        tx.commit()?;

        info!(
            envelope_id = %envelope.id,
            user = %user,
            amount = %share,
            remaining_count = envelope.remaining_count,
            "red envelope claimed"
        );
        Ok(ClaimOutcome { claim, envelope })
    }

    /// Envelope with every claim, newest first, and `caller`'s own claim.
    pub fn detail(
        &self,
        code: &EnvelopeCode,
        caller: Option<UserId>,
    ) -> Result<DetailResponse, EnvelopeError> {
        self.store.read_committed(|store| -> Result<DetailResponse, EnvelopeError> {
            let envelope = store.envelope_by_code(code).ok_or(EnvelopeError::NotFound)?;

            let mut claims = store.claims_for(envelope.id);
            claims.sort_by(|a, b| b.claimed_at.cmp(&a.claimed_at).then(b.id.cmp(&a.id)));
            let claims: Vec<ClaimView> = claims
                .into_iter()
                .map(|claim| ClaimView {
                    username: store.username(claim.user_id),
                    claim,
                })
                .collect();
            let user_claimed =
                caller.and_then(|user| claims.iter().find(|c| c.claim.user_id == user).cloned());

            Ok(DetailResponse {
                red_envelope: view(store, envelope),
                claims,
                user_claimed,
            })
        })
    }

    /// One page of the envelopes `caller` sent or received, newest first.
    ///
    /// # Errors
    ///
    /// [`EnvelopeError::InvalidPage`] unless `page >= 1` and
    /// `1 <= page_size <= max_page_size`.
    pub fn list(
        &self,
        caller: UserId,
        direction: ListDirection,
        page: usize,
        page_size: usize,
    ) -> Result<ListResponse, EnvelopeError> {
        let max_page_size = self.policy.max_page_size;
        if page == 0 || page_size == 0 || page_size > max_page_size {
            return Err(EnvelopeError::InvalidPage { max_page_size });
        }

        Ok(self.store.read_committed(|store| {
            let mut envelopes = match direction {
                ListDirection::Sent => store.envelopes_where(|e| e.creator_id == caller),
                ListDirection::Received => {
                    let claimed: HashSet<_> =
                        store.claimed_envelope_ids(caller).into_iter().collect();
                    store.envelopes_where(|e| claimed.contains(&e.id))
                }
            };
            envelopes.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

            let total = envelopes.len();
            let red_envelopes = envelopes
                .into_iter()
                .skip((page - 1).saturating_mul(page_size))
                .take(page_size)
                .map(|envelope| view(store, envelope))
                .collect();

            ListResponse {
                total,
                page,
                page_size,
                red_envelopes,
            }
        }))
    }
}

fn view(store: &MemoryStore, envelope: Envelope) -> EnvelopeView {
    EnvelopeView {
        creator_username: store.username(envelope.creator_id),
        envelope,
    }
}

/// `"{prefix} - {greeting}"`, or just the prefix for an empty greeting.
pub(crate) fn entry_name(prefix: &str, greeting: &str) -> String {
    if greeting.is_empty() {
        prefix.to_owned()
    } else {
        format!("{prefix} - {greeting}")
    }
}
