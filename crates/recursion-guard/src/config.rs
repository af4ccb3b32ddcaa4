// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Recurser configuration

use serde::{Deserialize, Serialize};
use tracing::warn;

pub const ENV_PRUNE_DEAD_SCOPES: &str = "RECURSION_GUARD_PRUNE_DEAD_SCOPES";
pub const ENV_LOG_INTERCEPTIONS: &str = "RECURSION_GUARD_LOG_INTERCEPTIONS";
pub const ENV_PRUNE_THRESHOLD: &str = "RECURSION_GUARD_PRUNE_THRESHOLD";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecurserConfig {
    /// Drop scopes whose `Rc`-backed owner is gone once the registry grows
    /// past `prune_threshold` scopes.
    pub prune_dead_scopes: bool,
    /// Scope count that triggers a prune on registration. After each prune
    /// the trigger moves to twice the surviving count, never below this.
    pub prune_threshold: usize,
    /// Emit a debug event each time a re-entrant call receives its alternate.
    pub log_interceptions: bool,
}

impl Default for RecurserConfig {
    fn default() -> Self {
        Self {
            prune_dead_scopes: true,
            prune_threshold: 64,
            log_interceptions: true,
        }
    }
}

impl RecurserConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`. Unparseable values keep the default.
    pub fn from_lookup<L>(lookup: L) -> Self
    where
        L: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_PRUNE_DEAD_SCOPES) {
            match parse_flag(&value) {
                Some(flag) => config.prune_dead_scopes = flag,
                None => warn!(key = ENV_PRUNE_DEAD_SCOPES, value = %value, "invalid flag, using default"),
            }
        }

        if let Some(value) = lookup(ENV_LOG_INTERCEPTIONS) {
            match parse_flag(&value) {
                Some(flag) => config.log_interceptions = flag,
                None => warn!(key = ENV_LOG_INTERCEPTIONS, value = %value, "invalid flag, using default"),
            }
        }

        if let Some(value) = lookup(ENV_PRUNE_THRESHOLD) {
            match value.trim().parse::<usize>() {
                Ok(threshold) if threshold > 0 => config.prune_threshold = threshold,
                _ => warn!(key = ENV_PRUNE_THRESHOLD, value = %value, "invalid threshold, using default"),
            }
        }

        config
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
