//! Per-user token bucket, sized by effective subscription tier. Tokens are
//! deducted on request admission, not on response success.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

use crate::error::{EngineError, EngineResult};
use crate::types::SubscriptionTier;

struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
    tier: SubscriptionTier,
}

#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<String, TokenBucket>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Admit or reject a request. Refill is continuous; a rejection carries
    /// `retry_after = ceil((1 - tokens) / refill_per_second)`.
    pub async fn check(&self, user_id: &str, tier: SubscriptionTier) -> EngineResult<()> {
        let max_tokens = tier.rate_limit_per_minute() as f64;
        let refill_per_second = max_tokens / 60.0;
        let now = Instant::now();

        let mut buckets = self.buckets.lock().await;
        let bucket = buckets.entry(user_id.to_string()).or_insert(TokenBucket {
            tokens: max_tokens,
            last_refill: now,
            tier,
        });

        // Tier changes (upgrades, expiry downgrades) take effect immediately
        if bucket.tier != tier {
            bucket.tier = tier;
            bucket.tokens = bucket.tokens.min(max_tokens);
        }

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * refill_per_second).min(max_tokens);
        bucket.last_refill = now;

        if bucket.tokens < 1.0 {
            let retry_after = ((1.0 - bucket.tokens) / refill_per_second).ceil() as u64;
            return Err(EngineError::RateLimited {
                retry_after: retry_after.max(1),
            });
        }

        bucket.tokens -= 1.0;
        Ok(())
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
