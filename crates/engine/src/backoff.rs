// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Retry backoff for recoverable start failures.
//!
//! Exponential from a 1 s base, doubling per attempt, capped at five
//! minutes, with ±20 % jitter so a flapping scheduler is not hammered
//! in lockstep by every waiting target.

use rand::Rng;
use std::time::Duration;

const BASE_MS: u64 = 1_000;
const FACTOR: u64 = 2;
const CAP_MS: u64 = 300_000;
const JITTER: f64 = 0.2;

/// Delay before retry number `attempt` (1-based).
pub fn retry_delay(attempt: u32) -> Duration {
    jittered(raw_delay_ms(attempt), &mut rand::rng())
}

fn raw_delay_ms(attempt: u32) -> u64 {
    let exp = attempt.saturating_sub(1).min(32);
    FACTOR
        .checked_pow(exp)
        .and_then(|f| f.checked_mul(BASE_MS))
        .map(|ms| ms.min(CAP_MS))
        .unwrap_or(CAP_MS)
}

fn jittered(ms: u64, rng: &mut impl Rng) -> Duration {
    let factor: f64 = rng.random_range((1.0 - JITTER)..=(1.0 + JITTER));
    Duration::from_millis((ms as f64 * factor) as u64)
}

#[cfg(test)]
#[path = "backoff_tests.rs"]
mod tests;
