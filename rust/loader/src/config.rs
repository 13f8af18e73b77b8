// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Loader configuration loaded from environment variables.

use std::time::Duration;

use planview_core::camera::{DEFAULT_FRAMING_MULTIPLIER, FRAMING_MULTIPLIER_RANGE};
use planview_engine::EngineRegistry;

/// Watchdog duration used when none is configured
pub const DEFAULT_WATCHDOG_SECS: u64 = 12;
/// Allowed watchdog range in seconds
pub const WATCHDOG_RANGE_SECS: (u64, u64) = (10, 15);
/// Upper bound of the recovery excursion when none is configured
pub const DEFAULT_RECOVERY_TIMEOUT_SECS: u64 = 12;

/// Load controller configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct LoaderConfig {
    /// Time a session may spend before the timeout recovery starts.
    pub watchdog: Duration,
    /// Upper bound for the single recovery fetch+parse.
    pub recovery_timeout: Duration,
    /// Camera stand-off multiplier, 2 to 3.
    pub framing_multiplier: f64,
    /// Keep the fetched buffer for cascade retries within one session.
    pub reuse_fetched_buffer: bool,
}

impl LoaderConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let watchdog_secs = std::env::var("PLANVIEW_WATCHDOG_SECS")
            .unwrap_or_else(|_| DEFAULT_WATCHDOG_SECS.to_string())
            .parse()
            .unwrap_or(DEFAULT_WATCHDOG_SECS);

        Self {
            watchdog: Self::clamp_watchdog(watchdog_secs),
            recovery_timeout: Duration::from_secs(
                std::env::var("PLANVIEW_RECOVERY_TIMEOUT_SECS")
                    .unwrap_or_else(|_| DEFAULT_RECOVERY_TIMEOUT_SECS.to_string())
                    .parse()
                    .unwrap_or(DEFAULT_RECOVERY_TIMEOUT_SECS)
                    .max(1),
            ),
            framing_multiplier: std::env::var("PLANVIEW_FRAMING_MULTIPLIER")
                .unwrap_or_else(|_| DEFAULT_FRAMING_MULTIPLIER.to_string())
                .parse::<f64>()
                .map(Self::clamp_multiplier)
                .unwrap_or(DEFAULT_FRAMING_MULTIPLIER),
            reuse_fetched_buffer: std::env::var("PLANVIEW_REUSE_BUFFER")
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
        }
    }

    /// Watchdog duration for `secs`, clamped to [`WATCHDOG_RANGE_SECS`]
    pub fn clamp_watchdog(secs: u64) -> Duration {
        let (lo, hi) = WATCHDOG_RANGE_SECS;
        Duration::from_secs(secs.clamp(lo, hi))
    }

    pub fn clamp_multiplier(multiplier: f64) -> f64 {
        let (lo, hi) = FRAMING_MULTIPLIER_RANGE;
        if multiplier.is_finite() {
            multiplier.clamp(lo, hi)
        } else {
            DEFAULT_FRAMING_MULTIPLIER
        }
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            watchdog: Duration::from_secs(DEFAULT_WATCHDOG_SECS),
            recovery_timeout: Duration::from_secs(DEFAULT_RECOVERY_TIMEOUT_SECS),
            framing_multiplier: DEFAULT_FRAMING_MULTIPLIER,
            reuse_fetched_buffer: false,
        }
    }
}

/// Engine registry from `PLANVIEW_ENGINES` (JSON), or the builtin engines
pub fn registry_from_env() -> planview_engine::Result<EngineRegistry> {
    match std::env::var("PLANVIEW_ENGINES") {
        Ok(json) if !json.trim().is_empty() => EngineRegistry::from_json(&json),
        _ => Ok(EngineRegistry::builtin()),
    }
}
