//! Retry schedule for remote bibliographic APIs.
//!
//! Rate-limit responses (429) wait at least the seeded exponential step
//! and never less than the server's `Retry-After`. Server errors and
//! connection failures use a plain exponential step. The schedule is a
//! pure function so the waits are testable without a live endpoint.

use std::time::Duration;

/// Maximum attempts per request.
pub const MAX_RETRIES: u32 = 7;

/// Exponential factor for all backoff classes.
const BACKOFF_FACTOR: f64 = 2.0;

/// Seed for the 429 backoff ladder, in seconds.
const RATE_LIMIT_SEED_SECS: f64 = 10.0;

/// Wait before retrying a 429, honoring `Retry-After` when present.
///
/// `attempt` is 0-based. The ladder runs 10s, 20s, 40s, ... and the
/// server-provided value wins when it is larger.
#[must_use]
pub fn rate_limit_delay(attempt: u32, retry_after: Option<Duration>) -> Duration {
    let exponential = Duration::from_secs_f64(RATE_LIMIT_SEED_SECS * BACKOFF_FACTOR.powi(cap(attempt)));
    match retry_after {
        Some(server) if server > exponential => server,
        _ => exponential,
    }
}

/// Wait before retrying a 5xx or transient connection error.
///
/// The ladder runs 1s, 2s, 4s, ...
#[must_use]
pub fn transient_delay(attempt: u32) -> Duration {
    Duration::from_secs_f64(BACKOFF_FACTOR.powi(cap(attempt)))
}

/// Caps the exponent so pathological attempt counts cannot overflow.
#[allow(clippy::cast_possible_wrap)]
const fn cap(attempt: u32) -> i32 {
    if attempt > 16 { 16 } else { attempt as i32 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_ladder() {
        assert_eq!(rate_limit_delay(0, None), Duration::from_secs(10));
        assert_eq!(rate_limit_delay(1, None), Duration::from_secs(20));
        assert_eq!(rate_limit_delay(2, None), Duration::from_secs(40));
    }

    #[test]
    fn test_retry_after_wins_when_larger() {
        let delay = rate_limit_delay(0, Some(Duration::from_secs(45)));
        assert_eq!(delay, Duration::from_secs(45));
    }

    #[test]
    fn test_retry_after_ignored_when_smaller() {
        // Retry-After: 7 on the first attempt still waits at least 10s;
        // the observed wait is >= the server's requested 7s either way.
        let delay = rate_limit_delay(0, Some(Duration::from_secs(7)));
        assert_eq!(delay, Duration::from_secs(10));
        assert!(delay >= Duration::from_secs(7));
    }

    #[test]
    fn test_transient_ladder() {
        assert_eq!(transient_delay(0), Duration::from_secs(1));
        assert_eq!(transient_delay(3), Duration::from_secs(8));
    }

    #[test]
    fn test_exponent_capped() {
        // Must not overflow or go infinite for absurd attempts
        let delay = transient_delay(1000);
        assert!(delay <= Duration::from_secs(1 << 17));
    }
}
