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

//! Red envelope engine.
//!
//! The [`Engine`] is the entry point callers talk to. It resolves the caller
//! from a [`RequestContext`], verifies payment keys, applies the feature
//! switch, and hands the work to the [`EnvelopeManager`] and [`Sweeper`].
//!
//! # Operations
//!
//! - **Create**: debit the creator and open an envelope.
//! - **Claim**: move one share from an envelope to the caller.
//! - **Detail / List**: read committed state.
//! - **Sweep**: refund envelopes past their expiry.
//!
//! # Thread Safety
//!
//! Every method takes `&self`. Concurrent calls are isolated by the store's
//! row locks; a call that loses a lock race fails fast with
//! [`EnvelopeError::Busy`] and may be retried by the caller.

use crate::api::{
    ClaimResponse, CreateRequest, CreateResponse, DetailResponse, IsEnabledResponse,
    ListRequest, ListResponse,
};
use crate::auth::{Authenticator, RequestContext};
use crate::base::EnvelopeCode;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::EnvelopeError;
use crate::lifecycle::{EnvelopeManager, LifecyclePolicy, NewEnvelope};
use crate::store::MemoryStore;
use crate::sweeper::{SweepReport, Sweeper};
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

/// Red envelope service facade.
///
/// # Invariants
///
/// - Money only moves inside store transactions, so
///   [`MemoryStore::money_supply`] is constant across every operation.
/// - With the feature switch off, create and claim fail with
///   [`EnvelopeError::FeatureDisabled`]; reads and sweeps keep working.
pub struct Engine {
    config: EngineConfig,
    enabled: AtomicBool,
    store: Arc<MemoryStore>,
    auth: Arc<dyn Authenticator>,
    manager: EnvelopeManager,
    sweeper: Sweeper,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        store: Arc<MemoryStore>,
        auth: Arc<dyn Authenticator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        if let Err(err) = config.validate() {
            warn!(error = %err, ttl_hours = config.ttl().num_hours(), "using clamped settings");
        }
        let policy = LifecyclePolicy {
            ttl: config.ttl(),
            allow_self_claim: config.allow_self_claim,
            max_page_size: config.max_page_size,
        };
        Engine {
            enabled: AtomicBool::new(config.enabled),
            manager: EnvelopeManager::new(Arc::clone(&store), Arc::clone(&clock), policy),
            sweeper: Sweeper::new(Arc::clone(&store), clock),
            store,
            auth,
            config,
        }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> IsEnabledResponse {
        IsEnabledResponse {
            enabled: self.enabled.load(Ordering::Acquire),
        }
    }

    /// Flips the feature switch at runtime.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
        info!(enabled, "red envelope feature switched");
    }

    fn ensure_enabled(&self) -> Result<(), EnvelopeError> {
        if self.enabled.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(EnvelopeError::FeatureDisabled)
        }
    }

    /// Creates an envelope funded by the caller.
    ///
    /// # Errors
    ///
    /// - [`EnvelopeError::FeatureDisabled`] - the switch is off.
    /// - Request validation errors, then [`EnvelopeError::PayKeyIncorrect`].
    /// - [`EnvelopeError::Busy`] - the caller's balance row is locked.
    /// - [`EnvelopeError::InsufficientBalance`] - balance below the total.
    pub fn create(
        &self,
        ctx: &RequestContext,
        request: CreateRequest,
    ) -> Result<CreateResponse, EnvelopeError> {
        self.ensure_enabled()?;
        let creator = ctx.current_user_id();
        let new = NewEnvelope {
            kind: request.kind,
            total_amount: request.total_amount,
            total_count: request.total_count,
            greeting: request.greeting,
        };
        // Cheap checks run before the key lookup.
        self.manager.validate(&new)?;
        let verified = self.auth.verify_payment_key(creator, &request.pay_key);
        if !verified {
            warn!(user = %creator, "payment key rejected");
        }

        let envelope = self.manager.create(creator, new, verified, ctx.deadline)?;
        Ok(CreateResponse {
            link: self.config.claim_link(&envelope.code),
            id: envelope.id,
            code: envelope.code,
        })
    }

    /// Claims one share for the caller using a thread-local RNG.
    pub fn claim(
        &self,
        ctx: &RequestContext,
        code: &EnvelopeCode,
    ) -> Result<ClaimResponse, EnvelopeError> {
        self.claim_with_rng(ctx, code, &mut rand::thread_rng())
    }

    /// Claims one share for the caller, drawing random shares from `rng`.
    ///
    /// # Errors
    ///
    /// - [`EnvelopeError::FeatureDisabled`] - the switch is off.
    /// - [`EnvelopeError::Busy`] - another claim holds the envelope.
    /// - [`EnvelopeError::NotFound`], [`EnvelopeError::Expired`],
    ///   [`EnvelopeError::Finished`], [`EnvelopeError::CannotClaimOwn`],
    ///   [`EnvelopeError::AlreadyClaimed`].
    pub fn claim_with_rng<R: Rng + ?Sized>(
        &self,
        ctx: &RequestContext,
        code: &EnvelopeCode,
        rng: &mut R,
    ) -> Result<ClaimResponse, EnvelopeError> {
        self.ensure_enabled()?;
        let outcome = self
            .manager
            .claim(code, ctx.current_user_id(), ctx.deadline, rng)?;
        Ok(ClaimResponse {
            amount: outcome.claim.amount,
            red_envelope: outcome.envelope,
        })
    }

    pub fn detail(
        &self,
        ctx: &RequestContext,
        code: &EnvelopeCode,
    ) -> Result<DetailResponse, EnvelopeError> {
        self.manager.detail(code, Some(ctx.current_user_id()))
    }

    pub fn list(
        &self,
        ctx: &RequestContext,
        request: ListRequest,
    ) -> Result<ListResponse, EnvelopeError> {
        self.manager.list(
            ctx.current_user_id(),
            request.direction,
            request.page,
            request.page_size,
        )
    }

    /// Sweep body for an external scheduler.
    pub fn sweep_expired(&self) -> SweepReport {
        self.sweeper.run()
    }

    pub fn sweep_expired_parallel(&self, workers: usize) -> SweepReport {
        self.sweeper.run_parallel(workers)
    }
}
