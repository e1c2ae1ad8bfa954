//! Rate Limiter (token/auth focus)
//!
//! Sliding 60s window, max 5 attempts, exponential-backoff lockout on
//! overflow (spec §4.7). Generalizes the teacher's `TokenBucket` shape
//! (`safety/rate_limiter.rs`) from a refill-rate bucket per tool to a
//! per-`client_id` attempt window with sticky lockout levels.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::error::{AgencyError, AgencyResult};

const WINDOW: Duration = Duration::from_secs(60);
const MAX_ATTEMPTS: u32 = 5;
const MAX_BACKOFF_LEVEL: u32 = 5;

#[derive(Debug, Clone)]
struct RateLimitState {
    attempts: u32,
    window_start: Instant,
    backoff_level: u32,
    last_attempt: Instant,
    lockout_until: Option<Instant>,
}

impl RateLimitState {
    fn fresh(now: Instant) -> Self {
        Self {
            attempts: 0,
            window_start: now,
            backoff_level: 0,
            last_attempt: now,
            lockout_until: None,
        }
    }
}

/// `level k in 1..=5 -> 2^(k-1)` minutes lockout, spec §4.7.
fn lockout_duration(level: u32) -> Duration {
    Duration::from_secs(60 * (1u64 << (level.saturating_sub(1))))
}

pub struct RateLimiter {
    state: RwLock<HashMap<String, RateLimitState>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(HashMap::new()),
        }
    }

    /// Record an attempt for `client_id`. Fails `rate_limited` with the
    /// remaining lockout if the client is currently locked out, otherwise
    /// records the attempt and escalates the backoff level on overflow.
    pub async fn check(&self, client_id: &str) -> AgencyResult<()> {
        let now = Instant::now();
        let mut guard = self.state.write().await;
        let entry = guard
            .entry(client_id.to_string())
            .or_insert_with(|| RateLimitState::fresh(now));

        if let Some(until) = entry.lockout_until {
            if now < until {
                return Err(AgencyError::rate_limited(until - now));
            }
        }

        // A full window with no attempts clears the backoff level, spec §4.7.
        if now.duration_since(entry.last_attempt) >= WINDOW {
            entry.backoff_level = 0;
            entry.lockout_until = None;
        }

        if now.duration_since(entry.window_start) >= WINDOW {
            entry.window_start = now;
            entry.attempts = 0;
        }

        entry.attempts += 1;
        entry.last_attempt = now;

        if entry.attempts > MAX_ATTEMPTS {
            entry.backoff_level = (entry.backoff_level + 1).min(MAX_BACKOFF_LEVEL);
            let duration = lockout_duration(entry.backoff_level);
            entry.lockout_until = Some(now + duration);
            entry.attempts = 0;
            entry.window_start = now;
            return Err(AgencyError::rate_limited(duration));
        }

        Ok(())
    }

    /// Remove entries whose `last_attempt` is older than 24h, spec §3.
    pub async fn evict_stale(&self) {
        let cutoff = Duration::from_secs(24 * 3600);
        let now = Instant::now();
        let mut guard = self.state.write().await;
        guard.retain(|_, s| now.duration_since(s.last_attempt) < cutoff);
    }
}

/// Loopback literals are exempt from token enforcement, not rate limiting
/// (spec §4.7).
pub fn is_loopback_literal(host: &str) -> bool {
    matches!(host, "127.0.0.1" | "localhost" | "::1")
}

/// Parse whether `addr` falls in an RFC 1918 private range, correctly
/// handling the `172.16/12` second-octet range of 16..=31.
pub fn is_rfc1918(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            o[0] == 10 || (o[0] == 172 && (16..=31).contains(&o[1])) || (o[0] == 192 && o[1] == 168)
        }
        IpAddr::V6(_) => false,
    }
}

/// Binding `0.0.0.0` is rejected outright in production, spec §4.7.
pub fn validate_bind_host(host: &str, environment: &str) -> AgencyResult<()> {
    if host == "0.0.0.0" && environment == "production" {
        return Err(AgencyError::config_refused(
            "binding 0.0.0.0 is rejected in production",
        ));
    }
    Ok(())
}

/// Constant-time byte comparison. No `subtle` crate in the dependency
/// stack, so this is hand-rolled with an XOR accumulator, same approach
/// the teacher takes for hash comparisons in absence of one.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sixth_attempt_within_window_triggers_lockout() {
        let limiter = RateLimiter::new();
        for _ in 0..5 {
            assert!(limiter.check("client-a").await.is_ok());
        }
        let err = limiter.check("client-a").await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::RateLimited);
    }

    #[test]
    fn rfc1918_second_octet_boundary() {
        assert!(is_rfc1918("172.16.0.1".parse().unwrap()));
        assert!(is_rfc1918("172.31.255.255".parse().unwrap()));
        assert!(!is_rfc1918("172.15.0.1".parse().unwrap()));
        assert!(!is_rfc1918("172.32.0.1".parse().unwrap()));
        assert!(is_rfc1918("10.0.0.1".parse().unwrap()));
        assert!(is_rfc1918("192.168.1.1".parse().unwrap()));
        assert!(!is_rfc1918("8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn production_rejects_zero_zero_zero_zero() {
        assert!(validate_bind_host("0.0.0.0", "production").is_err());
        assert!(validate_bind_host("0.0.0.0", "development").is_ok());
    }

    #[test]
    fn constant_time_eq_matches_slow_eq() {
        assert!(ct_eq(b"abcdef", b"abcdef"));
        assert!(!ct_eq(b"abcdef", b"abcdeg"));
        assert!(!ct_eq(b"short", b"longer"));
    }
}
