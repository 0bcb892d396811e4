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

//! Request and response shapes of the [`Engine`](crate::Engine) API.
//!
//! Field names match the JSON a front end exchanges with the service:
//!
//! ```json
//! {"type": "random", "total_amount": "88.88", "total_count": 8, "greeting": "hi", "pay_key": "123456"}
//! ```

use crate::base::{EnvelopeCode, EnvelopeId};
use crate::envelope::{Claim, Envelope, EnvelopeKind};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreateRequest {
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    pub total_amount: Decimal,
    pub total_count: u32,
    #[serde(default)]
    pub greeting: String,
    pub pay_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateResponse {
    pub id: EnvelopeId,
    pub code: EnvelopeCode,
    /// Shareable claim URL.
    pub link: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IsEnabledResponse {
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClaimRequest {
    pub code: EnvelopeCode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimResponse {
    pub amount: Decimal,
    /// Envelope state right after this claim.
    pub red_envelope: Envelope,
}

/// Envelope joined with its creator's display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvelopeView {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub creator_username: Option<String>,
}

/// Claim joined with the claimer's display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimView {
    #[serde(flatten)]
    pub claim: Claim,
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetailResponse {
    pub red_envelope: EnvelopeView,
    /// Newest first.
    pub claims: Vec<ClaimView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_claimed: Option<ClaimView>,
}

/// Which side of the envelopes a listing shows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListDirection {
    /// Envelopes the caller created.
    #[default]
    Sent,
    /// Envelopes the caller claimed from.
    Received,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ListRequest {
    pub page: usize,
    pub page_size: usize,
    #[serde(default, rename = "type")]
    pub direction: ListDirection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListResponse {
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub red_envelopes: Vec<EnvelopeView>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn create_request_from_json() {
        let req: CreateRequest = serde_json::from_str(
            r#"{"type": "fixed", "total_amount": "10.00", "total_count": 3, "pay_key": "k"}"#,
        )
        .unwrap();
        assert_eq!(req.kind, EnvelopeKind::Fixed);
        assert_eq!(req.total_amount, dec!(10.00));
        assert_eq!(req.total_count, 3);
        assert!(req.greeting.is_empty());
    }

    #[test]
    fn list_direction_defaults_to_sent() {
        let req: ListRequest = serde_json::from_str(r#"{"page": 1, "page_size": 20}"#).unwrap();
        assert_eq!(req.direction, ListDirection::Sent);
        let req: ListRequest =
            serde_json::from_str(r#"{"page": 2, "page_size": 5, "type": "received"}"#).unwrap();
        assert_eq!(req.direction, ListDirection::Received);
    }

    #[test]
    fn claim_request_from_json() {
        let req: ClaimRequest = serde_json::from_str(r#"{"code": "k3Xq9"}"#).unwrap();
        assert_eq!(req.code, EnvelopeCode::from("k3Xq9"));
        assert!(serde_json::from_str::<ClaimRequest>("{}").is_err());
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let result: Result<CreateRequest, _> = serde_json::from_str(
            r#"{"type": "lucky", "total_amount": "1", "total_count": 1, "pay_key": "k"}"#,
        );
        assert!(result.is_err());
    }
}
