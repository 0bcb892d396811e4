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

//! Engine public API integration tests.

use chrono::{Duration, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use red_envelope_rs::{
    CreateRequest, CreateResponse, Engine, EngineConfig, EnvelopeCode, EnvelopeError,
    EnvelopeId, EnvelopeKind, EnvelopeStatus, JournalKind, ListDirection, ListRequest, ManualClock,
    MemoryStore, PayKeyRegistry, RequestContext, UserId,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

const PAY_KEY: &str = "246810";

struct Harness {
    engine: Engine,
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
}

fn harness(config: EngineConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let keys = Arc::new(PayKeyRegistry::new());
    let names = ["alice", "bob", "carol", "dave", "erin"];
    for (i, name) in names.iter().enumerate() {
        let user = UserId(i as u64 + 1);
        let balance = if i == 0 { dec!(100.00) } else { Decimal::ZERO };
        store.open_account(user, *name, balance).unwrap();
        keys.set_key(user, PAY_KEY);
    }
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let engine = Engine::new(config, Arc::clone(&store), keys, clock.clone());
    Harness {
        engine,
        store,
        clock,
    }
}

fn ctx(user: u64) -> RequestContext {
    RequestContext::new(UserId(user))
}

fn make_create(kind: EnvelopeKind, amount: Decimal, count: u32) -> CreateRequest {
    CreateRequest {
        kind,
        total_amount: amount,
        total_count: count,
        greeting: "Happy new year".into(),
        pay_key: PAY_KEY.into(),
    }
}

fn balance(h: &Harness, user: u64) -> Decimal {
    h.store.account(UserId(user)).unwrap().available()
}

fn create(h: &Harness, kind: EnvelopeKind, amount: Decimal, count: u32) -> CreateResponse {
    h.engine.create(&ctx(1), make_create(kind, amount, count)).unwrap()
}

#[test]
fn fixed_envelope_splits_evenly_with_remainder_last() {
    let h = harness(EngineConfig::default());
    let created = create(&h, EnvelopeKind::Fixed, dec!(10.00), 3);

    let amounts: Vec<_> = (2..=4)
        .map(|user| h.engine.claim(&ctx(user), &created.code).unwrap().amount)
        .collect();
    assert_eq!(amounts, vec![dec!(3.33), dec!(3.33), dec!(3.34)]);

    let envelope = h.store.envelope(created.id).unwrap();
    assert_eq!(envelope.status, EnvelopeStatus::Finished);
    assert_eq!(envelope.remaining_amount, Decimal::ZERO);
    assert_eq!(
        h.engine.claim(&ctx(5), &created.code),
        Err(EnvelopeError::Finished)
    );
}

#[test]
fn claim_after_expiry_fails_and_sweep_refunds() {
    let h = harness(EngineConfig::default());
    let created = create(&h, EnvelopeKind::Fixed, dec!(10.00), 3);
    h.engine.claim(&ctx(2), &created.code).unwrap();

    h.clock.advance(Duration::hours(24));
    assert_eq!(
        h.engine.claim(&ctx(3), &created.code),
        Err(EnvelopeError::Expired)
    );

    h.clock.advance(Duration::seconds(1));
    let report = h.engine.sweep_expired();
    assert_eq!(report.refunded, 1);
    assert_eq!(report.refunded_amount, dec!(6.67));

    let envelope = h.store.envelope(created.id).unwrap();
    assert_eq!(envelope.status, EnvelopeStatus::Expired);
    assert_eq!(balance(&h, 1), dec!(96.67));
    assert_eq!(
        h.engine.claim(&ctx(3), &created.code),
        Err(EnvelopeError::Expired)
    );
}

#[test]
fn fixed_share_below_one_cent_is_rejected() {
    let h = harness(EngineConfig::default());
    let result = h
        .engine
        .create(&ctx(1), make_create(EnvelopeKind::Fixed, dec!(0.02), 3));
    assert_eq!(result, Err(EnvelopeError::AmountTooSmall));
    assert_eq!(balance(&h, 1), dec!(100.00));
    assert!(h.store.journal().is_empty());
}

#[test]
fn second_claim_by_same_user_is_rejected() {
    let h = harness(EngineConfig::default());
    let created = create(&h, EnvelopeKind::Random, dec!(5.00), 3);

    let first = h.engine.claim(&ctx(2), &created.code).unwrap();
    assert_eq!(
        h.engine.claim(&ctx(2), &created.code),
        Err(EnvelopeError::AlreadyClaimed)
    );
    assert_eq!(balance(&h, 2), first.amount);
    assert_eq!(h.store.claims_for(created.id).len(), 1);
}

#[test]
fn claim_on_unknown_code_is_not_found() {
    let h = harness(EngineConfig::default());
    assert_eq!(
        h.engine.claim(&ctx(2), &EnvelopeCode::from("does-not-exist")),
        Err(EnvelopeError::NotFound)
    );
}

#[test]
fn insufficient_balance_changes_nothing() {
    let h = harness(EngineConfig::default());
    let result = h
        .engine
        .create(&ctx(1), make_create(EnvelopeKind::Random, dec!(100.01), 2));
    assert_eq!(result, Err(EnvelopeError::InsufficientBalance));
    assert_eq!(balance(&h, 1), dec!(100.00));
    assert!(h.store.envelopes_where(|_| true).is_empty());
}

#[test]
fn wrong_pay_key_is_rejected_after_validation() {
    let h = harness(EngineConfig::default());
    let mut request = make_create(EnvelopeKind::Fixed, dec!(0.02), 3);
    request.pay_key = "wrong".into();
    assert_eq!(
        h.engine.create(&ctx(1), request.clone()),
        Err(EnvelopeError::AmountTooSmall)
    );

    request.total_amount = dec!(3.00);
    assert_eq!(
        h.engine.create(&ctx(1), request),
        Err(EnvelopeError::PayKeyIncorrect)
    );
}

#[test]
fn more_than_two_decimal_places_is_rejected() {
    let h = harness(EngineConfig::default());
    let result = h
        .engine
        .create(&ctx(1), make_create(EnvelopeKind::Random, dec!(1.001), 1));
    assert_eq!(result, Err(EnvelopeError::DecimalPlacesExceeded));

    // Trailing zeros are not extra precision.
    let created = h
        .engine
        .create(&ctx(1), make_create(EnvelopeKind::Random, dec!(1.500), 1));
    assert!(created.is_ok());
}

#[test]
fn money_is_conserved_across_lifecycle() {
    let h = harness(EngineConfig::default());
    let supply = h.store.money_supply();
    let mut rng = StdRng::seed_from_u64(42);

    let random = create(&h, EnvelopeKind::Random, dec!(20.00), 4);
    let fixed = create(&h, EnvelopeKind::Fixed, dec!(7.77), 5);
    for user in 2..=5 {
        h.engine
            .claim_with_rng(&ctx(user), &random.code, &mut rng)
            .unwrap();
    }
    for user in 2..=3 {
        h.engine.claim(&ctx(user), &fixed.code).unwrap();
    }
    assert_eq!(h.store.money_supply(), supply);

    h.clock.advance(Duration::hours(25));
    let report = h.engine.sweep_expired();
    assert_eq!(h.store.money_supply(), supply);

    // Creator debit == claimed + refunded.
    let claimed = |id: EnvelopeId| -> Decimal { h.store.claims_for(id).iter().map(|c| c.amount).sum() };
    assert_eq!(claimed(random.id), dec!(20.00));
    assert_eq!(claimed(fixed.id), dec!(3.10));
    assert_eq!(report.refunded, 1);
    assert_eq!(claimed(fixed.id) + report.refunded_amount, dec!(7.77));
    assert_eq!(balance(&h, 1), dec!(100.00) - dec!(20.00) - dec!(3.10));
}

#[test]
fn journal_records_every_money_movement() {
    let h = harness(EngineConfig::default());
    let created = create(&h, EnvelopeKind::Fixed, dec!(4.00), 2);
    h.engine.claim(&ctx(2), &created.code).unwrap();
    h.clock.advance(Duration::hours(25));
    h.engine.sweep_expired();

    let kinds: Vec<_> = h.store.journal().entries().iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            JournalKind::RedEnvelopeSend,
            JournalKind::RedEnvelopeReceive,
            JournalKind::RedEnvelopeRefund,
        ]
    );
    let received = h.store.journal().entries_for(UserId(2));
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].payer, UserId(1));
    assert_eq!(received[0].amount, dec!(2.00));
}

#[test]
fn self_claim_can_be_disabled() {
    let h = harness(EngineConfig::default());
    let created = create(&h, EnvelopeKind::Fixed, dec!(2.00), 2);
    assert_eq!(
        h.engine.claim(&ctx(1), &created.code).unwrap().amount,
        dec!(1.00)
    );

    let strict = harness(EngineConfig {
        allow_self_claim: false,
        ..EngineConfig::default()
    });
    let created = create(&strict, EnvelopeKind::Fixed, dec!(2.00), 2);
    assert_eq!(
        strict.engine.claim(&ctx(1), &created.code),
        Err(EnvelopeError::CannotClaimOwn)
    );
}

#[test]
fn detail_lists_claims_newest_first() {
    let h = harness(EngineConfig::default());
    let created = create(&h, EnvelopeKind::Fixed, dec!(3.00), 3);
    h.engine.claim(&ctx(2), &created.code).unwrap();
    h.clock.advance(Duration::minutes(1));
    h.engine.claim(&ctx(3), &created.code).unwrap();

    let detail = h.engine.detail(&ctx(2), &created.code).unwrap();
    assert_eq!(detail.red_envelope.creator_username.as_deref(), Some("alice"));
    let claimers: Vec<_> = detail.claims.iter().map(|c| c.claim.user_id).collect();
    assert_eq!(claimers, vec![UserId(3), UserId(2)]);
    assert_eq!(detail.claims[0].username.as_deref(), Some("carol"));
    let own = detail.user_claimed.unwrap();
    assert_eq!(own.claim.user_id, UserId(2));
    assert_eq!(own.claim.amount, dec!(1.00));

    let outsider = h.engine.detail(&ctx(5), &created.code).unwrap();
    assert!(outsider.user_claimed.is_none());
}

#[test]
fn list_pages_sent_and_received() {
    let h = harness(EngineConfig::default());
    let mut codes = Vec::new();
    for _ in 0..5 {
        codes.push(create(&h, EnvelopeKind::Fixed, dec!(1.00), 1).code);
        h.clock.advance(Duration::minutes(1));
    }
    h.engine.claim(&ctx(2), &codes[0]).unwrap();
    h.engine.claim(&ctx(2), &codes[3]).unwrap();

    let page = h
        .engine
        .list(
            &ctx(1),
            ListRequest {
                page: 1,
                page_size: 2,
                direction: ListDirection::Sent,
            },
        )
        .unwrap();
    assert_eq!(page.total, 5);
    assert_eq!(page.red_envelopes.len(), 2);
    assert_eq!(page.red_envelopes[0].envelope.code, codes[4]);
    assert_eq!(page.red_envelopes[1].envelope.code, codes[3]);

    let last = h
        .engine
        .list(
            &ctx(1),
            ListRequest {
                page: 3,
                page_size: 2,
                direction: ListDirection::Sent,
            },
        )
        .unwrap();
    assert_eq!(last.red_envelopes.len(), 1);
    assert_eq!(last.red_envelopes[0].envelope.code, codes[0]);

    let received = h
        .engine
        .list(
            &ctx(2),
            ListRequest {
                page: 1,
                page_size: 10,
                direction: ListDirection::Received,
            },
        )
        .unwrap();
    assert_eq!(received.total, 2);
    assert_eq!(received.red_envelopes[0].envelope.code, codes[3]);
    assert_eq!(received.red_envelopes[1].envelope.code, codes[0]);

    let oversized = h.engine.list(
        &ctx(1),
        ListRequest {
            page: 1,
            page_size: 101,
            direction: ListDirection::Sent,
        },
    );
    assert_eq!(
        oversized,
        Err(EnvelopeError::InvalidPage { max_page_size: 100 })
    );
}

#[test]
fn disabled_feature_blocks_create_and_claim() {
    let h = harness(EngineConfig::default());
    let created = create(&h, EnvelopeKind::Fixed, dec!(2.00), 2);

    h.engine.set_enabled(false);
    assert!(!h.engine.is_enabled().enabled);
    assert_eq!(
        h.engine
            .create(&ctx(1), make_create(EnvelopeKind::Fixed, dec!(2.00), 2)),
        Err(EnvelopeError::FeatureDisabled)
    );
    assert_eq!(
        h.engine.claim(&ctx(2), &created.code),
        Err(EnvelopeError::FeatureDisabled)
    );
    assert!(h.engine.detail(&ctx(2), &created.code).is_ok());
}

#[test]
fn passed_deadline_rolls_back() {
    let h = harness(EngineConfig::default());
    let ctx = RequestContext::with_timeout(UserId(1), std::time::Duration::ZERO);
    let result = h
        .engine
        .create(&ctx, make_create(EnvelopeKind::Fixed, dec!(2.00), 2));
    assert_eq!(result, Err(EnvelopeError::DeadlineExceeded));
    assert_eq!(balance(&h, 1), dec!(100.00));
}

#[test]
fn error_codes_are_stable() {
    assert_eq!(EnvelopeError::NotFound.code(), "not_found");
    assert_eq!(EnvelopeError::AlreadyClaimed.code(), "already_claimed");
    assert!(EnvelopeError::Busy.is_retryable());
    assert!(!EnvelopeError::Expired.is_retryable());
}
