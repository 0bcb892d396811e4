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

//! Expiry sweep.
//!
//! Refunds what is left in envelopes past their `expires_at` back to the
//! creator. Each envelope is refunded in its own transaction, so one failing
//! item never blocks the rest; anything still active is picked up by the
//! next run.
//!
//! Scheduling is the caller's job. A run is idempotent: expired envelopes
//! drop out of the due set, and one that changed state between the scan and
//! its lock is skipped.

use crate::base::EnvelopeId;
use crate::clock::Clock;
use crate::envelope::EnvelopeStatus;
use crate::error::EnvelopeError;
use crate::ledger::{JournalKind, Ledger, NewJournalEntry};
use crate::lifecycle::entry_name;
use crate::store::MemoryStore;
use chrono::{DateTime, Utc};
use crossbeam::channel;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info};

/// Tally of one sweep run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Envelopes matched by the due filter.
    pub scanned: usize,
    pub refunded: usize,
    /// No longer active once locked.
    pub skipped: usize,
    /// Logged and left for the next run.
    pub failed: usize,
    pub refunded_amount: Decimal,
}

impl SweepReport {
    fn record(&mut self, id: EnvelopeId, outcome: Result<RefundOutcome, EnvelopeError>) {
        match outcome {
            Ok(RefundOutcome::Refunded(amount)) => {
                self.refunded += 1;
                self.refunded_amount += amount;
            }
            Ok(RefundOutcome::Skipped) => self.skipped += 1,
            Err(err) => {
                error!(envelope_id = %id, code = err.code(), error = %err, "refund failed");
                self.failed += 1;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundOutcome {
    Refunded(Decimal),
    Skipped,
}

pub struct Sweeper {
    store: Arc<MemoryStore>,
    clock: Arc<dyn Clock>,
}

impl Sweeper {
    pub fn new(store: Arc<MemoryStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Active, non-empty envelopes whose expiry is strictly before `now`.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<EnvelopeId> {
        self.store
            .envelopes_where(|e| {
                e.status == EnvelopeStatus::Active
                    && e.expires_at < now
                    && e.remaining_amount > Decimal::ZERO
            })
            .into_iter()
            .map(|e| e.id)
            .collect()
    }

    /// Sweeps every due envelope on the calling thread.
    pub fn run(&self) -> SweepReport {
        let now = self.clock.now();
        let due = self.due(now);
        let mut report = SweepReport {
            scanned: due.len(),
            ..SweepReport::default()
        };
        for id in due {
            report.record(id, self.refund(id, now));
        }
        self.log_report(&report);
        report
    }

    /// Sweeps every due envelope on `workers` scoped threads fed from one
    /// channel. Item semantics are the same as [`run`](Self::run).
    pub fn run_parallel(&self, workers: usize) -> SweepReport {
        let now = self.clock.now();
        let due = self.due(now);
        let mut report = SweepReport {
            scanned: due.len(),
            ..SweepReport::default()
        };

        let (work_tx, work_rx) = channel::unbounded::<EnvelopeId>();
        let (done_tx, done_rx) = channel::unbounded();
        for id in due {
            if work_tx.send(id).is_err() {
                break;
            }
        }
        drop(work_tx);

        let scoped = crossbeam::thread::scope(|scope| {
            for _ in 0..workers.max(1) {
                let work_rx = work_rx.clone();
                let done_tx = done_tx.clone();
                scope.spawn(move |_| {
                    for id in work_rx.iter() {
                        if done_tx.send((id, self.refund(id, now))).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        drop(done_tx);
        if scoped.is_err() {
            error!("sweep worker panicked");
        }

        for (id, outcome) in done_rx.iter() {
            report.record(id, outcome);
        }
        self.log_report(&report);
        report
    }

    /// Expires one envelope and credits its remaining amount to the creator.
    ///
    /// # Errors
    ///
    /// - [`EnvelopeError::Busy`] - a claim holds the envelope row.
    /// - [`EnvelopeError::NotFound`] - no such envelope.
    /// - [`EnvelopeError::AccountNotFound`] - the creator's account is gone.
    pub fn refund(
        &self,
        id: EnvelopeId,
        now: DateTime<Utc>,
    ) -> Result<RefundOutcome, EnvelopeError> {
        let mut tx = self.store.begin(now, None);
        let mut envelope = tx.lock_envelope(id)?;
        if envelope.status != EnvelopeStatus::Active {
            return Ok(RefundOutcome::Skipped);
        }

        let unclaimed = envelope.remaining_count;
        let amount = envelope.expire()?;
        tx.update_envelope(envelope.clone())?;
        tx.adjust_balance(envelope.creator_id, amount)?;
        tx.append_journal_entry(NewJournalEntry {
            name: entry_name("Red envelope refund", &envelope.greeting),
            payer: envelope.creator_id,
            payee: envelope.creator_id,
            amount,
            kind: JournalKind::RedEnvelopeRefund,
            remark: format!("expired with {unclaimed} unclaimed shares"),
        })?;
        tx.commit()?;

        info!(
            envelope_id = %id,
            creator = %envelope.creator_id,
            amount = %amount,
            "red envelope refunded"
        );
        Ok(RefundOutcome::Refunded(amount))
    }

    fn log_report(&self, report: &SweepReport) {
        if report.scanned > 0 {
            info!(
                scanned = report.scanned,
                refunded = report.refunded,
                skipped = report.skipped,
                failed = report.failed,
                amount = %report.refunded_amount,
                "expiry sweep finished"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::{EnvelopeCode, UserId};
    use crate::clock::ManualClock;
    use crate::envelope::{Envelope, EnvelopeKind};
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn setup() -> (Sweeper, Arc<MemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        store.open_account(UserId(1), "alice", dec!(0)).unwrap();
        let sweeper = Sweeper::new(Arc::clone(&store), clock.clone());
        (sweeper, store, clock)
    }

    fn seed(store: &MemoryStore, now: DateTime<Utc>, code: &str, remaining: Decimal) -> EnvelopeId {
        let mut tx = store.begin(now, None);
        let id = tx.next_envelope_id();
        tx.insert_envelope(Envelope {
            id,
            code: EnvelopeCode::from(code),
            creator_id: UserId(1),
            kind: EnvelopeKind::Random,
            total_amount: dec!(10.00),
            remaining_amount: remaining,
            total_count: 4,
            remaining_count: 2,
            greeting: String::new(),
            status: EnvelopeStatus::Active,
            created_at: now,
            expires_at: now + Duration::hours(1),
        });
        tx.commit().unwrap();
        id
    }

    #[test]
    fn expiry_boundary_is_exclusive() {
        let (sweeper, store, clock) = setup();
        seed(&store, clock.now(), "a", dec!(4.00));

        clock.advance(Duration::hours(1));
        assert_eq!(sweeper.run().scanned, 0);

        clock.advance(Duration::seconds(1));
        let report = sweeper.run();
        assert_eq!(report.refunded, 1);
        assert_eq!(report.refunded_amount, dec!(4.00));
    }

    #[test]
    fn refund_expires_and_credits_creator() {
        let (sweeper, store, clock) = setup();
        let id = seed(&store, clock.now(), "a", dec!(4.00));
        clock.advance(Duration::hours(2));

        sweeper.run();

        let envelope = store.envelope(id).unwrap();
        assert_eq!(envelope.status, EnvelopeStatus::Expired);
        assert_eq!(envelope.remaining_amount, Decimal::ZERO);
        assert_eq!(envelope.remaining_count, 0);
        assert_eq!(store.account(UserId(1)).unwrap().available(), dec!(4.00));
        let entries = store.journal().entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, JournalKind::RedEnvelopeRefund);
        assert_eq!(entries[0].payee, UserId(1));
    }

    #[test]
    fn second_run_is_a_no_op() {
        let (sweeper, store, clock) = setup();
        seed(&store, clock.now(), "a", dec!(4.00));
        clock.advance(Duration::hours(2));

        assert_eq!(sweeper.run().refunded, 1);
        assert_eq!(sweeper.run(), SweepReport::default());
        assert_eq!(store.account(UserId(1)).unwrap().available(), dec!(4.00));
    }

    #[test]
    fn refund_of_expired_envelope_is_skipped() {
        let (sweeper, store, clock) = setup();
        let id = seed(&store, clock.now(), "a", dec!(4.00));
        clock.advance(Duration::hours(2));

        assert_eq!(sweeper.refund(id, clock.now()), Ok(RefundOutcome::Refunded(dec!(4.00))));
        assert_eq!(sweeper.refund(id, clock.now()), Ok(RefundOutcome::Skipped));
    }

    #[test]
    fn locked_envelope_fails_and_is_retried() {
        let (sweeper, store, clock) = setup();
        let id = seed(&store, clock.now(), "a", dec!(4.00));
        clock.advance(Duration::hours(2));

        let mut holder = store.begin(clock.now(), None);
        holder.lock_envelope(id).unwrap();
        let report = sweeper.run();
        assert_eq!(report.failed, 1);
        assert_eq!(report.refunded, 0);
        drop(holder);

        assert_eq!(sweeper.run().refunded, 1);
    }

    #[test]
    fn parallel_run_refunds_everything_once() {
        let (sweeper, store, clock) = setup();
        for i in 0..20 {
            seed(&store, clock.now(), &format!("e{i}"), dec!(0.50));
        }
        clock.advance(Duration::hours(2));

        let report = sweeper.run_parallel(4);
        assert_eq!(report.scanned, 20);
        assert_eq!(report.refunded, 20);
        assert_eq!(report.refunded_amount, dec!(10.00));
        assert_eq!(store.account(UserId(1)).unwrap().available(), dec!(10.00));
        assert_eq!(sweeper.run_parallel(4).scanned, 0);
    }
}
