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

//! # Red Envelope
//!
//! This library implements "red envelopes": a user funds a pool of money,
//! shares a claim link, and other users each claim one share until the pool
//! runs out or expires. What is left at expiry is refunded to the creator.
//!
//! ## Core Components
//!
//! - [`Engine`]: Entry point for create, claim, detail, list and sweep
//! - [`MemoryStore`]: Transactional store with no-wait row locks
//! - [`Envelope`] / [`Claim`]: Persisted rows and the status state machine
//! - [`allocation`]: Fixed and double-average random share computation
//! - [`EnvelopeError`]: Error taxonomy with stable codes
//!
//! ## Example
//!
//! ```
//! use red_envelope_rs::{
//!     CreateRequest, Engine, EngineConfig, EnvelopeKind, ManualClock, MemoryStore,
//!     PayKeyRegistry, RequestContext, UserId,
//! };
//! use rust_decimal_macros::dec;
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryStore::new());
//! store.open_account(UserId(1), "alice", dec!(100.00)).unwrap();
//! store.open_account(UserId(2), "bob", dec!(0)).unwrap();
//! let keys = Arc::new(PayKeyRegistry::new());
//! keys.set_key(UserId(1), "123456");
//! let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
//! let engine = Engine::new(EngineConfig::default(), Arc::clone(&store), keys, clock);
//!
//! // Alice splits 10.00 into three fixed shares.
//! let created = engine
//!     .create(
//!         &RequestContext::new(UserId(1)),
//!         CreateRequest {
//!             kind: EnvelopeKind::Fixed,
//!             total_amount: dec!(10.00),
//!             total_count: 3,
//!             greeting: "Happy new year".into(),
//!             pay_key: "123456".into(),
//!         },
//!     )
//!     .unwrap();
//!
//! // Bob claims one share.
//! let claimed = engine
//!     .claim(&RequestContext::new(UserId(2)), &created.code)
//!     .unwrap();
//! assert_eq!(claimed.amount, dec!(3.33));
//! assert_eq!(store.account(UserId(2)).unwrap().available(), dec!(3.33));
//! ```
//!
//! ## Thread Safety
//!
//! Every operation takes `&self` and may run on its own thread. Conflicting
//! writes fail fast with the retryable [`EnvelopeError::Busy`] instead of
//! blocking.

pub mod account;
pub mod allocation;
pub mod api;
pub mod auth;
mod base;
pub mod clock;
pub mod config;
mod engine;
pub mod envelope;
pub mod error;
pub mod ledger;
pub mod lifecycle;
pub mod money;
pub mod store;
pub mod sweeper;

pub use account::Account;
pub use api::{
    ClaimRequest, ClaimResponse, ClaimView, CreateRequest, CreateResponse, DetailResponse,
    EnvelopeView, IsEnabledResponse, ListDirection, ListRequest, ListResponse,
};
pub use auth::{Authenticator, PayKeyRegistry, RequestContext};
pub use base::{ClaimId, EntryId, EnvelopeCode, EnvelopeId, UserId};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use engine::Engine;
pub use envelope::{Claim, Envelope, EnvelopeKind, EnvelopeStatus};
pub use error::{EnvelopeError, ErrorKind};
pub use ledger::{Journal, JournalEntry, JournalKind, Ledger, NewJournalEntry};
pub use lifecycle::{EnvelopeManager, LifecyclePolicy, NewEnvelope};
pub use store::{MemoryStore, Transaction};
pub use sweeper::{RefundOutcome, SweepReport, Sweeper};
