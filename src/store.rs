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

//! Transactional in-memory store.
//!
//! Models the guarantees the engine needs from a relational database:
//!
//! - **Rows**: every account and envelope is a row with a committed image
//!   (read lock-free by queries) and an exclusive row lock.
//! - **No-wait locks**: [`Transaction`] acquires row locks with `try_lock`;
//!   a held lock surfaces as [`EnvelopeError::Busy`] instead of blocking.
//! - **Staged writes**: inserts, updates, balance deltas and journal entries
//!   are buffered in the transaction and applied under a single commit lock,
//!   after every fallible check has passed.
//! - **Rollback**: dropping a transaction without committing discards its
//!   writes and releases its row locks.
//! - **Unique keys**: envelope codes and `(envelope, user)` claim pairs are
//!   re-checked at commit, so a racing duplicate is rejected even if a
//!   pre-check missed it.

use crate::account::Account;
use crate::base::{ClaimId, EntryId, EnvelopeCode, EnvelopeId, UserId};
use crate::envelope::{Claim, Envelope};
use crate::error::EnvelopeError;
use crate::ledger::{Journal, JournalEntry, Ledger, NewJournalEntry};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex, RwLock};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, warn};

type RowGuard = ArcMutexGuard<RawMutex, ()>;

#[derive(Debug)]
struct Row<T> {
    lock: Arc<Mutex<()>>,
    data: RwLock<T>,
}

impl<T: Clone> Row<T> {
    fn new(data: T) -> Arc<Self> {
        Arc::new(Self {
            lock: Arc::new(Mutex::new(())),
            data: RwLock::new(data),
        })
    }

    fn snapshot(&self) -> T {
        self.data.read().clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RowKey {
    Account(UserId),
    Envelope(EnvelopeId),
}

/// Accounts, envelopes, claims and the journal.
#[derive(Debug)]
pub struct MemoryStore {
    accounts: DashMap<UserId, Arc<Row<Account>>>,
    envelopes: DashMap<EnvelopeId, Arc<Row<Envelope>>>,
    /// Unique index on envelope code.
    codes: DashMap<EnvelopeCode, EnvelopeId>,
    /// Unique index on `(envelope, user)`.
    claim_index: DashMap<(EnvelopeId, UserId), ClaimId>,
    claims: DashMap<EnvelopeId, Vec<Claim>>,
    journal: Journal,
    commit_lock: Mutex<()>,
    next_envelope_id: AtomicU64,
    next_claim_id: AtomicU64,
    next_entry_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            accounts: DashMap::new(),
            envelopes: DashMap::new(),
            codes: DashMap::new(),
            claim_index: DashMap::new(),
            claims: DashMap::new(),
            journal: Journal::new(),
            commit_lock: Mutex::new(()),
            next_envelope_id: AtomicU64::new(1),
            next_claim_id: AtomicU64::new(1),
            next_entry_id: AtomicU64::new(1),
        }
    }

    /// Creates an account row.
    ///
    /// # Errors
    ///
    /// - [`EnvelopeError::InvalidAmount`] - negative opening balance.
    /// - [`EnvelopeError::Storage`] - the account already exists.
    pub fn open_account(
        &self,
        user: UserId,
        username: impl Into<String>,
        balance: Decimal,
    ) -> Result<(), EnvelopeError> {
        if balance < Decimal::ZERO {
            return Err(EnvelopeError::InvalidAmount);
        }
        let _commit = self.commit_lock.lock();
        match self.accounts.entry(user) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(EnvelopeError::Storage(format!(
                "account {user} already exists"
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Row::new(Account::new(user, username, balance)));
                Ok(())
            }
        }
    }

    pub fn account(&self, user: UserId) -> Option<Account> {
        let row = self.accounts.get(&user).map(|r| Arc::clone(r.value()))?;
        Some(row.snapshot())
    }

    /// All accounts ordered by user id.
    pub fn accounts(&self) -> Vec<Account> {
        let rows: Vec<_> = self.accounts.iter().map(|r| Arc::clone(r.value())).collect();
        let mut accounts: Vec<_> = rows.iter().map(|row| row.snapshot()).collect();
        accounts.sort_by_key(Account::user_id);
        accounts
    }

    pub fn username(&self, user: UserId) -> Option<String> {
        self.account(user).map(|a| a.username().to_owned())
    }

    pub fn envelope(&self, id: EnvelopeId) -> Option<Envelope> {
        let row = self.envelopes.get(&id).map(|r| Arc::clone(r.value()))?;
        Some(row.snapshot())
    }

    pub fn envelope_by_code(&self, code: &EnvelopeCode) -> Option<Envelope> {
        let id = self.codes.get(code).map(|r| *r.value())?;
        self.envelope(id)
    }

    /// Committed images of every envelope matching `filter`, by id.
    pub fn envelopes_where<F>(&self, filter: F) -> Vec<Envelope>
    where
        F: Fn(&Envelope) -> bool,
    {
        let rows: Vec<_> = self.envelopes.iter().map(|r| Arc::clone(r.value())).collect();
        let mut envelopes: Vec<_> = rows
            .iter()
            .map(|row| row.snapshot())
            .filter(|envelope| filter(envelope))
            .collect();
        envelopes.sort_by_key(|envelope| envelope.id);
        envelopes
    }

    /// Claims on one envelope in insertion order.
    pub fn claims_for(&self, envelope_id: EnvelopeId) -> Vec<Claim> {
        self.claims
            .get(&envelope_id)
            .map(|claims| claims.clone())
            .unwrap_or_default()
    }

    /// Envelopes `user` holds a claim on.
    pub fn claimed_envelope_ids(&self, user: UserId) -> Vec<EnvelopeId> {
        self.claim_index
            .iter()
            .filter(|entry| entry.key().1 == user)
            .map(|entry| entry.key().0)
            .collect()
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Runs `read` between commits, so every row it reads comes from the
    /// same committed state.
    ///
    /// `read` must not call [`money_supply`](Self::money_supply),
    /// [`open_account`](Self::open_account), `read_committed` itself, or
    /// commit a transaction: the commit lock is not reentrant.
    pub fn read_committed<T>(&self, read: impl FnOnce(&Self) -> T) -> T {
        let _commit = self.commit_lock.lock();
        read(self)
    }

    /// Sum of all balances plus every envelope's remaining amount, read
    /// between commits. Constant under create, claim and refund.
    pub fn money_supply(&self) -> Decimal {
        self.read_committed(|store| {
            let balances: Decimal = store.accounts().iter().map(Account::available).sum();
            let pooled: Decimal = store
                .envelopes_where(|_| true)
                .iter()
                .map(|envelope| envelope.remaining_amount)
                .sum();
            balances + pooled
        })
    }

    /// Opens a transaction. `now` stamps every row it writes.
    pub fn begin(&self, now: DateTime<Utc>, deadline: Option<Instant>) -> Transaction<'_> {
        Transaction {
            store: self,
            now,
            deadline,
            locks: HashMap::new(),
            envelope_writes: HashMap::new(),
            new_envelopes: Vec::new(),
            new_claims: Vec::new(),
            balance_deltas: HashMap::new(),
            journal: Vec::new(),
            committed: false,
        }
    }

    fn account_row(&self, user: UserId) -> Result<Arc<Row<Account>>, EnvelopeError> {
        self.accounts
            .get(&user)
            .map(|r| Arc::clone(r.value()))
            .ok_or(EnvelopeError::AccountNotFound)
    }

    fn envelope_row(&self, id: EnvelopeId) -> Result<Arc<Row<Envelope>>, EnvelopeError> {
        self.envelopes
            .get(&id)
            .map(|r| Arc::clone(r.value()))
            .ok_or(EnvelopeError::NotFound)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// A unit of work against a [`MemoryStore`].
///
/// Holds row locks until it is committed or dropped. Nothing it writes is
/// visible to anyone else before [`commit`](Transaction::commit) succeeds.
pub struct Transaction<'s> {
    store: &'s MemoryStore,
    now: DateTime<Utc>,
    deadline: Option<Instant>,
    locks: HashMap<RowKey, RowGuard>,
    envelope_writes: HashMap<EnvelopeId, Envelope>,
    new_envelopes: Vec<Envelope>,
    new_claims: Vec<Claim>,
    balance_deltas: HashMap<UserId, Decimal>,
    journal: Vec<JournalEntry>,
    committed: bool,
}

impl<'s> Transaction<'s> {
    fn check_deadline(&self) -> Result<(), EnvelopeError> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(EnvelopeError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    fn try_lock(&mut self, key: RowKey, lock: &Arc<Mutex<()>>) -> Result<(), EnvelopeError> {
        if self.locks.contains_key(&key) {
            return Ok(());
        }
        let guard = lock.try_lock_arc().ok_or_else(|| {
            warn!(row = ?key, "row lock contended");
            EnvelopeError::Busy
        })?;
        self.locks.insert(key, guard);
        Ok(())
    }

    /// `SELECT ... WHERE code = ? FOR UPDATE NOWAIT`.
    pub fn lock_envelope_by_code(&mut self, code: &EnvelopeCode) -> Result<Envelope, EnvelopeError> {
        let id = self
            .store
            .codes
            .get(code)
            .map(|r| *r.value())
            .ok_or(EnvelopeError::NotFound)?;
        self.lock_envelope(id)
    }

    /// `SELECT ... WHERE id = ? FOR UPDATE NOWAIT`.
    pub fn lock_envelope(&mut self, id: EnvelopeId) -> Result<Envelope, EnvelopeError> {
        self.check_deadline()?;
        let row = self.store.envelope_row(id)?;
        self.try_lock(RowKey::Envelope(id), &row.lock)?;
        // Read after locking: every commit touching this row holds its lock.
        Ok(self
            .envelope_writes
            .get(&id)
            .cloned()
            .unwrap_or_else(|| row.snapshot()))
    }

    /// Stages a new image of an envelope this transaction has locked.
    pub fn update_envelope(&mut self, envelope: Envelope) -> Result<(), EnvelopeError> {
        if !self.locks.contains_key(&RowKey::Envelope(envelope.id)) {
            return Err(EnvelopeError::Storage(format!(
                "envelope {} updated without its row lock",
                envelope.id
            )));
        }
        self.envelope_writes.insert(envelope.id, envelope);
        Ok(())
    }

    pub fn next_envelope_id(&self) -> EnvelopeId {
        EnvelopeId(self.store.next_envelope_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Stages an envelope insert. The code's uniqueness is enforced at commit.
    pub fn insert_envelope(&mut self, envelope: Envelope) {
        self.new_envelopes.push(envelope);
    }

    /// Claim id held by `user` on `envelope_id`, committed or staged here.
    pub fn find_claim(&self, envelope_id: EnvelopeId, user: UserId) -> Option<ClaimId> {
        self.store
            .claim_index
            .get(&(envelope_id, user))
            .map(|r| *r.value())
            .or_else(|| {
                self.new_claims
                    .iter()
                    .find(|c| c.envelope_id == envelope_id && c.user_id == user)
                    .map(|c| c.id)
            })
    }

    /// Stages a claim insert; a duplicate `(envelope, user)` fails the commit.
    pub fn insert_claim(&mut self, envelope_id: EnvelopeId, user: UserId, amount: Decimal) -> Claim {
        let claim = Claim {
            id: ClaimId(self.store.next_claim_id.fetch_add(1, Ordering::Relaxed)),
            envelope_id,
            user_id: user,
            amount,
            claimed_at: self.now,
        };
        self.new_claims.push(claim.clone());
        claim
    }

    /// Applies every staged write atomically.
    ///
    /// # Errors
    ///
    /// - [`EnvelopeError::DeadlineExceeded`] - the request deadline passed.
    /// - [`EnvelopeError::AlreadyClaimed`] - duplicate `(envelope, user)`.
    /// - [`EnvelopeError::InsufficientBalance`] - a delta would overdraw.
    /// - [`EnvelopeError::Storage`] - duplicate code or journal id.
    ///
    /// On error nothing is applied.
    pub fn commit(mut self) -> Result<(), EnvelopeError> {
        self.check_deadline()?;
        let store = self.store;
        let _commit = store.commit_lock.lock();

        // Validate everything fallible first.
        for claim in &self.new_claims {
            if store.claim_index.contains_key(&(claim.envelope_id, claim.user_id)) {
                return Err(EnvelopeError::AlreadyClaimed);
            }
        }
        for envelope in &self.new_envelopes {
            if store.codes.contains_key(&envelope.code) {
                return Err(EnvelopeError::Storage(format!(
                    "duplicate envelope code {}",
                    envelope.code
                )));
            }
        }
        let mut account_rows = Vec::with_capacity(self.balance_deltas.len());
        for (user, delta) in &self.balance_deltas {
            let row = store.account_row(*user)?;
            if !row.data.read().can_apply(*delta) {
                return Err(EnvelopeError::InsufficientBalance);
            }
            account_rows.push((row, *delta));
        }
        let mut envelope_rows = Vec::with_capacity(self.envelope_writes.len());
        for id in self.envelope_writes.keys() {
            envelope_rows.push(store.envelope_row(*id)?);
        }
        if let Some(entry) = self.journal.iter().find(|e| store.journal.get(e.id).is_some()) {
            return Err(EnvelopeError::Storage(format!(
                "duplicate journal entry {}",
                entry.id
            )));
        }

        // Apply.
        for envelope in self.new_envelopes.drain(..) {
            store.codes.insert(envelope.code.clone(), envelope.id);
            store.envelopes.insert(envelope.id, Row::new(envelope));
        }
        for row in envelope_rows {
            let mut data = row.data.write();
            if let Some(staged) = self.envelope_writes.remove(&data.id) {
                *data = staged;
            }
        }
        for claim in self.new_claims.drain(..) {
            store
                .claim_index
                .insert((claim.envelope_id, claim.user_id), claim.id);
            store.claims.entry(claim.envelope_id).or_default().push(claim);
        }
        for (row, delta) in account_rows {
            row.data.write().apply(delta);
        }
        for entry in self.journal.drain(..) {
            store.journal.append(entry)?;
        }

        self.committed = true;
        debug!(rows_locked = self.locks.len(), "transaction committed");
        Ok(())
    }
}

impl Ledger for Transaction<'_> {
    fn lock_and_read_balance(&mut self, user: UserId) -> Result<Decimal, EnvelopeError> {
        self.check_deadline()?;
        let row = self.store.account_row(user)?;
        self.try_lock(RowKey::Account(user), &row.lock)?;
        let staged = self
            .balance_deltas
            .get(&user)
            .copied()
            .unwrap_or(Decimal::ZERO);
        Ok(row.snapshot().available() + staged)
    }

    fn adjust_balance(&mut self, user: UserId, delta: Decimal) -> Result<(), EnvelopeError> {
        if !self.store.accounts.contains_key(&user) {
            return Err(EnvelopeError::AccountNotFound);
        }
        *self.balance_deltas.entry(user).or_insert(Decimal::ZERO) += delta;
        Ok(())
    }

    fn append_journal_entry(&mut self, entry: NewJournalEntry) -> Result<EntryId, EnvelopeError> {
        let id = EntryId(self.store.next_entry_id.fetch_add(1, Ordering::Relaxed));
        self.journal.push(entry.into_entry(id, self.now));
        Ok(id)
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.committed && !self.locks.is_empty() {
            debug!(rows_locked = self.locks.len(), "transaction rolled back");
        }
    }
}
