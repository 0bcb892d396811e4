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

//! Engine settings.
//!
//! Layered from an optional TOML file, then `ENVELOPE_*` environment
//! variables (`ENVELOPE_ENABLED=false`, `ENVELOPE_EXPIRY_HOURS=48`, ...).
//! Every field has a default, so an empty configuration is valid.
//! Loaded values are checked by [`EngineConfig::validate`].

use crate::base::EnvelopeCode;
use chrono::Duration;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Longest envelope lifetime accepted from configuration: ten years.
pub const MAX_EXPIRY_HOURS: i64 = 87_600;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Initial state of the feature switch.
    pub enabled: bool,
    /// Base URL claim links point at.
    pub frontend_url: String,
    /// Lifetime of an envelope before the sweeper refunds it, in
    /// `1..=MAX_EXPIRY_HOURS`.
    pub expiry_hours: i64,
    /// Whether a creator may claim from their own envelope.
    pub allow_self_claim: bool,
    pub max_page_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            frontend_url: "http://localhost:3000".to_owned(),
            expiry_hours: 24,
            allow_self_claim: true,
            max_page_size: 100,
        }
    }
}

impl EngineConfig {
    /// Loads settings from `path` (if given) and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        builder
            .add_source(Environment::with_prefix("ENVELOPE").try_parsing(true))
            .build()?
            .try_deserialize::<Self>()
            .and_then(|config| config.validate().map(|()| config))
    }

    /// Rejects settings the engine cannot run with.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Message`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_EXPIRY_HOURS).contains(&self.expiry_hours) {
            return Err(ConfigError::Message(format!(
                "expiry_hours must be between 1 and {MAX_EXPIRY_HOURS}, got {}",
                self.expiry_hours
            )));
        }
        if self.max_page_size == 0 {
            return Err(ConfigError::Message(
                "max_page_size must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }

    /// Envelope lifetime. Out-of-range hours are clamped into
    /// `1..=MAX_EXPIRY_HOURS` for configs built without [`load`](Self::load).
    pub fn ttl(&self) -> Duration {
        Duration::hours(self.expiry_hours.clamp(1, MAX_EXPIRY_HOURS))
    }

    pub fn claim_link(&self, code: &EnvelopeCode) -> String {
        format!(
            "{}/redenvelope/{}",
            self.frontend_url.trim_end_matches('/'),
            code
        )
    }
}
