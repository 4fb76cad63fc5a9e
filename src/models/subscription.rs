use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::types::SubscriptionTier;

/// Stored subscription row. Consumers never read `tier` directly — the
/// subscription service resolves the effective tier with expiry handling.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub user_id: String,
    pub tier: String,
    pub started_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub auto_renew: bool,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn free(user_id: String) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            tier: SubscriptionTier::Free.as_str().to_string(),
            started_at: now,
            expires_at: None,
            auto_renew: false,
            updated_at: now,
        }
    }

    pub fn stored_tier(&self) -> SubscriptionTier {
        self.tier.parse().unwrap_or(SubscriptionTier::Free)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now >= expires_at,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_expiry() {
        let mut sub = Subscription::free("u1".into());
        assert!(!sub.is_expired(Utc::now()));

        sub.tier = "premium".to_string();
        sub.expires_at = Some(Utc::now() - Duration::days(1));
        assert!(sub.is_expired(Utc::now()));
        assert_eq!(sub.stored_tier(), SubscriptionTier::Premium);
    }
}
