// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Tunables for diagnostics. None of them change admission semantics.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Synchronizer configuration, persisted as JSON by `evsync-config`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// A resumed waiter that parked longer than this is logged at `warn`.
    pub slow_wait_warn_ms: u64,
    /// A waiter reparked this many times is logged at `warn`.
    pub repark_warn_threshold: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            slow_wait_warn_ms: 250,
            repark_warn_threshold: 8,
        }
    }
}

impl SyncConfig {
    /// [`Self::slow_wait_warn_ms`] as a `Duration`.
    #[must_use]
    pub fn slow_wait_warn(&self) -> Duration {
        Duration::from_millis(self.slow_wait_warn_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let cfg: SyncConfig = serde_json::from_str(r#"{"slow_wait_warn_ms": 40}"#)
            .unwrap_or_else(|e| panic!("parse: {e}"));
        assert_eq!(cfg.slow_wait_warn(), Duration::from_millis(40));
        assert_eq!(cfg.repark_warn_threshold, 8);
    }
}
