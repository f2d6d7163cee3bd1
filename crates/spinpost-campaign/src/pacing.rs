//! Inter-post delay policy.
//!
//! Two derivations coexist:
//!
//! | Policy                         | After post `n` (1-based)                                   |
//! |--------------------------------|------------------------------------------------------------|
//! | `Continuous`                   | never waits                                                |
//! | `Throttled{batch, minutes, r}` | `minutes * 60` s when `n % batch == 0`, × U[0.7, 1.5] if `r` |
//! | none (default)                 | U[140, 520] s when `n % 3 == 0`                            |

use std::time::Duration;

use rand::Rng;
use spinpost_core::PacingPolicy;
use tracing::debug;

pub const DEFAULT_BATCH: u32 = 3;
pub const DEFAULT_MIN_SECS: u64 = 140;
pub const DEFAULT_MAX_SECS: u64 = 520;
pub const JITTER_MIN: f64 = 0.7;
pub const JITTER_MAX: f64 = 1.5;

/// Delay to observe after `index` posts out of `total` have completed.
pub fn delay_after<R: Rng + ?Sized>(
    index: u32,
    total: u32,
    policy: Option<&PacingPolicy>,
    rng: &mut R,
) -> Duration {
    if index == 0 {
        return Duration::ZERO;
    }
    let delay = match policy {
        Some(PacingPolicy::Continuous) => Duration::ZERO,
        Some(PacingPolicy::Throttled {
            batch_size,
            wait_minutes,
            randomize_wait,
        }) => {
            if *batch_size == 0 || index % batch_size != 0 {
                Duration::ZERO
            } else {
                let base = f64::from(*wait_minutes) * 60.0;
                let secs = if *randomize_wait {
                    base * rng.gen_range(JITTER_MIN..=JITTER_MAX)
                } else {
                    base
                };
                Duration::from_secs_f64(secs)
            }
        }
        None => {
            if index % DEFAULT_BATCH != 0 {
                Duration::ZERO
            } else {
                Duration::from_secs(rng.gen_range(DEFAULT_MIN_SECS..=DEFAULT_MAX_SECS))
            }
        }
    };
    if !delay.is_zero() {
        debug!(index, total, delay_secs = delay.as_secs(), "pacing delay");
    }
    delay
}

/// How an interruptible wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Elapsed,
    Interrupted,
}

/// Sleep for `total` in steps of at most `step`, checking `should_stop`
/// before each step. A stop is therefore honoured within one step.
pub async fn wait_interruptible<F>(total: Duration, step: Duration, should_stop: F) -> WaitOutcome
where
    F: Fn() -> bool,
{
    let step = if step.is_zero() {
        Duration::from_secs(1)
    } else {
        step
    };
    let deadline = tokio::time::Instant::now() + total;
    loop {
        if should_stop() {
            return WaitOutcome::Interrupted;
        }
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return WaitOutcome::Elapsed;
        }
        tokio::time::sleep((deadline - now).min(step)).await;
    }
}
