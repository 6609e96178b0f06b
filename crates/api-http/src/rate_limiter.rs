//! Rate Limiter (Token Bucket Algorithm)
//!
//! Limits task submissions per second. Lock-free: the bucket lives in one
//! `AtomicU64` updated with a CAS loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

// Fixed-point scale: the bucket stores thousandths of a token so refills
// between closely spaced requests are not rounded away.
const SCALE: u64 = 1_000;

/// Token bucket shared by all handler tasks
pub struct RateLimiter {
    // Upper 32 bits: milli-tokens. Lower 32 bits: last refill, ms since `created`
    // modulo 2^32 (compared with wrapping arithmetic).
    packed: AtomicU64,
    created: Instant,
    capacity: u64,
    refill_per_sec: u64,
}

impl RateLimiter {
    /// `burst` requests at once, refilled at `refill_per_sec` per second.
    ///
    /// `RateLimiter::new(200, 100)` allows bursts of 200 and 100 requests/sec sustained.
    pub fn new(burst: u32, refill_per_sec: u32) -> Self {
        let capacity = (burst as u64 * SCALE).min(u32::MAX as u64);
        Self {
            packed: AtomicU64::new(capacity << 32),
            created: Instant::now(),
            capacity,
            refill_per_sec: refill_per_sec as u64,
        }
    }

    /// Consume one token; false when the bucket is empty
    pub fn check(&self) -> bool {
        self.check_at(self.created.elapsed().as_millis() as u64)
    }

    fn check_at(&self, elapsed_ms: u64) -> bool {
        let now = elapsed_ms as u32;
        loop {
            let packed = self.packed.load(Ordering::Acquire);
            let tokens = packed >> 32;
            let last_refill = packed as u32;

            // delta ms * tokens/sec == milli-tokens
            let delta = now.wrapping_sub(last_refill) as u64;
            let refilled = delta.saturating_mul(self.refill_per_sec);
            let available = tokens.saturating_add(refilled).min(self.capacity);

            let (next, allowed) = if available >= SCALE {
                (available - SCALE, true)
            } else {
                (available, false)
            };
            let new_packed = (next << 32) | now as u64;

            match self.packed.compare_exchange(
                packed,
                new_packed,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return allowed,
                Err(_) => continue,
            }
        }
    }

    /// Whole tokens left, as of the last update
    pub fn remaining(&self) -> u64 {
        (self.packed.load(Ordering::Acquire) >> 32) / SCALE
    }
}
