//! Reschedule delays for resource contention.

use std::time::Duration;

use rand::Rng;

/// Ceiling for contention reschedules.
pub const RESCHEDULE_CAP: Duration = Duration::from_secs(300);

/// Base delay before exponential growth.
const RESCHEDULE_BASE: Duration = Duration::from_secs(60);

/// Delay before re-queueing a task that lost a token or namespace race.
///
/// Doubles per prior restart, capped at five minutes, with up to 25%
/// jitter subtracted so contending tasks fan out instead of thundering
/// back together.
pub fn reschedule_delay(restart_num: i32) -> Duration {
    let shift = restart_num.clamp(0, 8) as u32;
    let uncapped = RESCHEDULE_BASE.saturating_mul(1u32 << shift.min(6));
    let capped = uncapped.min(RESCHEDULE_CAP);

    let jitter_frac = rand::rng().random_range(0.0..0.25);
    let jitter = capped.mul_f64(jitter_frac);
    capped - jitter
}

/// Fixed per-attempt retry backoff from a task's policy.
pub fn retry_backoff(backoff_secs: i32) -> Duration {
    Duration::from_secs(backoff_secs.max(0) as u64)
}
