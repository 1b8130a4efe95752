// SPDX-License-Identifier: MIT OR Apache-2.0
//! Exponential backoff with jitter for HTTP requests.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

/// Backoff policy for transient request failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the initial attempt. `0` disables retrying.
    pub max_retries: u32,
    /// Base delay for exponential backoff.
    #[serde(with = "outpost_core::serde_secs")]
    pub base_delay: Duration,
    /// Cap applied to the computed delay.
    #[serde(with = "outpost_core::serde_secs")]
    pub max_delay: Duration,
    /// Jitter factor in `[0.0, 1.0]`; the computed delay is reduced by up
    /// to this fraction.
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.5,
        }
    }
}

/// Backoff delay for a zero-indexed attempt number.
pub fn compute_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exp = 2u64.saturating_pow(attempt);
    let delay_ms = (config.base_delay.as_millis() as u64).saturating_mul(exp);
    let capped_ms = delay_ms.min(config.max_delay.as_millis() as u64);

    let jitter_factor = config.jitter_factor.clamp(0.0, 1.0);
    if jitter_factor > 0.0 && capped_ms > 0 {
        let jitter_range = (capped_ms as f64 * jitter_factor) as u64;
        // Cheap pseudo-random: system-clock nanos mixed with the attempt.
        let nanos = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as u64;
        let pseudo = nanos.wrapping_mul(attempt as u64 + 1);
        let jitter = if jitter_range > 0 { pseudo % jitter_range } else { 0 };
        Duration::from_millis(capped_ms.saturating_sub(jitter))
    } else {
        Duration::from_millis(capped_ms)
    }
}
