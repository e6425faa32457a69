//! Per-peer rate limiting for inbound relays.
//!
//! Uses a token bucket per direct peer. A Byzantine neighbour can mint
//! unlimited forged variants; the bucket caps how much of the node's event
//! loop it can claim.

use dolev_types::NodeId;
use std::collections::HashMap;
use std::time::Instant;

/// Configuration for inbound relay rate limiting.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Sustained relays per second accepted from one peer.
    pub relays_per_sec: u32,
    /// Bucket capacity: relays a peer may send back-to-back.
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            relays_per_sec: 10_000,
            burst: 2_000,
        }
    }
}

impl RateLimitConfig {
    /// A limiter that never rejects.
    pub fn unlimited() -> Self {
        Self {
            relays_per_sec: u32::MAX,
            burst: u32::MAX,
        }
    }
}

/// Token bucket state for a single peer.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    /// Tokens added per second.
    refill_rate: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: u32, refill_rate: u32) -> Self {
        Self {
            tokens: capacity as f64,
            capacity: capacity as f64,
            refill_rate: refill_rate as f64,
            last_update: Instant::now(),
        }
    }

    /// Try to consume one token. Returns true if allowed.
    fn try_consume(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Per-peer rate limiter for inbound relays.
///
/// Peers are a fixed, small set, so buckets are never evicted.
#[derive(Debug)]
pub struct RelayRateLimiter {
    config: RateLimitConfig,
    buckets: HashMap<NodeId, TokenBucket>,
    rejected: u64,
}

impl RelayRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: HashMap::new(),
            rejected: 0,
        }
    }

    /// Check whether a relay from `peer` should be processed.
    pub fn check(&mut self, peer: NodeId) -> bool {
        let config = &self.config;
        let allowed = self
            .buckets
            .entry(peer)
            .or_insert_with(|| TokenBucket::new(config.burst, config.relays_per_sec))
            .try_consume();
        if !allowed {
            self.rejected += 1;
        }
        allowed
    }

    /// Relays rejected so far.
    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    /// Number of peers seen so far.
    pub fn tracked_peer_count(&self) -> usize {
        self.buckets.len()
    }
}
