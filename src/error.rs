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

//! Error types for envelope operations.
//!
//! Every variant carries a stable [`code`](EnvelopeError::code) so that
//! front ends can render distinct messages without matching on display text.

use crate::envelope::EnvelopeStatus;
use thiserror::Error;

/// Broad classification of an [`EnvelopeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected before any transaction was opened.
    Validation,
    /// Raised inside a transaction; the transaction was rolled back.
    BusinessRule,
    /// A no-wait row lock was not acquired. Safe to retry.
    Contention,
    /// Store failure or deadline. Not retried by the engine.
    Infrastructure,
}

/// Envelope processing errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// The feature switch is off
    #[error("red envelopes are not enabled")]
    FeatureDisabled,

    /// Share count below one
    #[error("invalid share count (must be at least 1)")]
    InvalidCount,

    /// Greeting longer than the allowed number of characters
    #[error("greeting exceeds {max} characters")]
    GreetingTooLong { max: usize },

    /// Amount is zero or negative
    #[error("invalid amount (must be positive)")]
    InvalidAmount,

    /// Amount has more than two decimal places
    #[error("amount has more than 2 decimal places")]
    DecimalPlacesExceeded,

    /// A fixed share would be below the minimum unit
    #[error("amount per share is below 0.01")]
    AmountTooSmall,

    /// The payment key did not verify
    #[error("payment key is incorrect")]
    PayKeyIncorrect,

    /// Page or page size out of range
    #[error("invalid page (page >= 1, 1 <= page_size <= {max_page_size})")]
    InvalidPage { max_page_size: usize },

    /// Creator cannot cover the envelope total
    #[error("insufficient available balance")]
    InsufficientBalance,

    /// No envelope with this code
    #[error("red envelope not found")]
    NotFound,

    /// Envelope is past its expiry
    #[error("red envelope has expired")]
    Expired,

    /// Every share has been claimed
    #[error("red envelope has been fully claimed")]
    Finished,

    /// This user already holds a claim on the envelope
    #[error("red envelope already claimed by this user")]
    AlreadyClaimed,

    /// Creator tried to claim their own envelope while policy forbids it
    #[error("cannot claim your own red envelope")]
    CannotClaimOwn,

    /// No account row for the user
    #[error("account not found")]
    AccountNotFound,

    /// Status change outside the transition table
    #[error("invalid status transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: EnvelopeStatus,
        to: EnvelopeStatus,
    },

    /// Row is locked by a concurrent operation
    #[error("resource busy, retry later")]
    Busy,

    /// Request deadline passed before commit
    #[error("request deadline exceeded")]
    DeadlineExceeded,

    /// Store-level failure
    #[error("storage error: {0}")]
    Storage(String),
}

impl EnvelopeError {
    /// Stable identifier of the condition.
    pub fn code(&self) -> &'static str {
        match self {
            Self::FeatureDisabled => "feature_disabled",
            Self::InvalidCount => "invalid_count",
            Self::GreetingTooLong { .. } => "greeting_too_long",
            Self::InvalidAmount => "invalid_amount",
            Self::DecimalPlacesExceeded => "decimal_places_exceeded",
            Self::AmountTooSmall => "amount_too_small",
            Self::PayKeyIncorrect => "pay_key_incorrect",
            Self::InvalidPage { .. } => "invalid_page",
            Self::InsufficientBalance => "insufficient_balance",
            Self::NotFound => "not_found",
            Self::Expired => "expired",
            Self::Finished => "finished",
            Self::AlreadyClaimed => "already_claimed",
            Self::CannotClaimOwn => "cannot_claim_own",
            Self::AccountNotFound => "account_not_found",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Busy => "busy",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Storage(_) => "storage_error",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::FeatureDisabled
            | Self::InvalidCount
            | Self::GreetingTooLong { .. }
            | Self::InvalidAmount
            | Self::DecimalPlacesExceeded
            | Self::AmountTooSmall
            | Self::PayKeyIncorrect
            | Self::InvalidPage { .. } => ErrorKind::Validation,
            Self::InsufficientBalance
            | Self::NotFound
            | Self::Expired
            | Self::Finished
            | Self::AlreadyClaimed
            | Self::CannotClaimOwn
            | Self::AccountNotFound
            | Self::InvalidTransition { .. } => ErrorKind::BusinessRule,
            Self::Busy => ErrorKind::Contention,
            Self::DeadlineExceeded | Self::Storage(_) => ErrorKind::Infrastructure,
        }
    }

    /// Only lock contention is worth an immediate retry.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Contention
    }
}
