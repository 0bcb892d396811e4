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

//! Account ledger adapter and journal.
//!
//! The envelope engine does not own balances or the money-movement history;
//! it drives them through the [`Ledger`] trait, whose calls all take part in
//! the caller's transaction.

use crate::base::{EntryId, UserId};
use crate::error::EnvelopeError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Balance and journal operations scoped to one open transaction.
pub trait Ledger {
    /// Takes the no-wait exclusive lock on `user`'s balance row and returns
    /// the balance as seen by this transaction.
    ///
    /// # Errors
    ///
    /// - [`EnvelopeError::Busy`] - row is locked by another transaction.
    /// - [`EnvelopeError::AccountNotFound`] - no such account.
    fn lock_and_read_balance(&mut self, user: UserId) -> Result<Decimal, EnvelopeError>;

    /// Stages `balance += delta` for `user`; applied atomically at commit.
    fn adjust_balance(&mut self, user: UserId, delta: Decimal) -> Result<(), EnvelopeError>;

    /// Stages an append-only journal entry; returns its id.
    fn append_journal_entry(&mut self, entry: NewJournalEntry) -> Result<EntryId, EnvelopeError>;
}

/// Kind tag of a journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalKind {
    /// Creator funds an envelope.
    RedEnvelopeSend,
    /// Claimer receives a share.
    RedEnvelopeReceive,
    /// Unclaimed remainder returned to the creator.
    RedEnvelopeRefund,
}

/// Journal entry before it is assigned an id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJournalEntry {
    pub name: String,
    pub payer: UserId,
    pub payee: UserId,
    pub amount: Decimal,
    pub kind: JournalKind,
    pub remark: String,
}

/// Record of one balance movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: EntryId,
    pub name: String,
    pub payer: UserId,
    pub payee: UserId,
    pub amount: Decimal,
    pub kind: JournalKind,
    pub remark: String,
    pub created_at: DateTime<Utc>,
}

impl NewJournalEntry {
    pub(crate) fn into_entry(self, id: EntryId, created_at: DateTime<Utc>) -> JournalEntry {
        JournalEntry {
            id,
            name: self.name,
            payer: self.payer,
            payee: self.payee,
            amount: self.amount,
            kind: self.kind,
            remark: self.remark,
            created_at,
        }
    }
}

/// Append-only journal with duplicate detection.
///
/// A [`DashMap`] gives O(1) lookup by id and rejects an id written twice;
/// a vector of ids preserves append order.
#[derive(Debug, Default)]
pub struct Journal {
    entries: DashMap<EntryId, JournalEntry>,
    order: RwLock<Vec<EntryId>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Storage`] if an entry with the same id
    /// already exists.
    pub fn append(&self, entry: JournalEntry) -> Result<(), EnvelopeError> {
        let id = entry.id;
        match self.entries.entry(id) {
            Entry::Occupied(_) => Err(EnvelopeError::Storage(format!(
                "duplicate journal entry {id}"
            ))),
            Entry::Vacant(slot) => {
                slot.insert(entry);
                self.order.write().push(id);
                Ok(())
            }
        }
    }

    pub fn get(&self, id: EntryId) -> Option<JournalEntry> {
        self.entries.get(&id).map(|entry| entry.clone())
    }

    /// All entries in append order.
    pub fn entries(&self) -> Vec<JournalEntry> {
        self.order
            .read()
            .iter()
            .filter_map(|id| self.get(*id))
            .collect()
    }

    /// Entries where `user` is payer or payee, in append order.
    pub fn entries_for(&self, user: UserId) -> Vec<JournalEntry> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.payer == user || entry.payee == user)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
