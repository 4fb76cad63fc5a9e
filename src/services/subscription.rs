//! Single source of truth for the effective subscription tier. Consumers
//! never read the stored tier directly.

use chrono::{Duration, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::db::{
    LedgerRepository, SubscriptionRepository, TxOps as _, UnitOfWork, WalletRepository,
};
use crate::error::EngineResult;
use crate::models::{LedgerEntry, Subscription};
use crate::types::SubscriptionTier;

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionInfo {
    pub tier: SubscriptionTier,
    pub effective_tier: SubscriptionTier,
    pub is_active: bool,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
    pub auto_renew: bool,
}

pub struct SubscriptionService {
    subscriptions: Arc<dyn SubscriptionRepository>,
    wallets: Arc<dyn WalletRepository>,
    ledger: Arc<dyn LedgerRepository>,
    uow: Arc<dyn UnitOfWork>,
}

impl SubscriptionService {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        wallets: Arc<dyn WalletRepository>,
        ledger: Arc<dyn LedgerRepository>,
        uow: Arc<dyn UnitOfWork>,
    ) -> Self {
        Self {
            subscriptions,
            wallets,
            ledger,
            uow,
        }
    }

    /// Stored tier with expiry handling: an expired subscription is
    /// downgraded in place and the downgrade is ledger-recorded.
    pub async fn effective_tier(&self, user_id: &str) -> EngineResult<SubscriptionTier> {
        let Some(subscription) = self.subscriptions.get(user_id).await? else {
            return Ok(SubscriptionTier::Free);
        };

        let stored = subscription.stored_tier();
        if stored == SubscriptionTier::Free {
            return Ok(SubscriptionTier::Free);
        }

        if subscription.is_expired(Utc::now()) {
            self.downgrade_expired(&subscription, stored).await?;
            return Ok(SubscriptionTier::Free);
        }

        Ok(stored)
    }

    async fn downgrade_expired(
        &self,
        subscription: &Subscription,
        old_tier: SubscriptionTier,
    ) -> EngineResult<()> {
        let user_id = &subscription.user_id;
        let wallet = self.wallets.get_or_create(user_id).await?;

        let mut downgraded = subscription.clone();
        downgraded.tier = SubscriptionTier::Free.as_str().to_string();
        downgraded.auto_renew = false;

        let mut tx = self.uow.begin().await?;
        tx.update_subscription(&downgraded).await?;
        tx.append_ledger(&LedgerEntry::new(
            user_id,
            "subscription_expired",
            0,
            wallet.total_credits(),
            format!("Subscription expired: {} -> free", old_tier),
            Some(serde_json::json!({
                "old_tier": old_tier.as_str(),
                "expired_at": subscription.expires_at,
            })),
        ))
        .await?;
        tx.commit().await?;

        tracing::info!("⬇️ subscription expired for {}: {} -> free", user_id, old_tier);
        Ok(())
    }

    pub async fn info(&self, user_id: &str) -> EngineResult<SubscriptionInfo> {
        let effective = self.effective_tier(user_id).await?;
        let subscription = self.subscriptions.get(user_id).await?;
        let (stored, expires_at, auto_renew) = match &subscription {
            Some(s) => (s.stored_tier(), s.expires_at, s.auto_renew),
            None => (SubscriptionTier::Free, None, false),
        };
        Ok(SubscriptionInfo {
            tier: stored,
            effective_tier: effective,
            is_active: effective == stored && effective != SubscriptionTier::Free,
            expires_at,
            auto_renew,
        })
    }

    /// Capability check by effective tier.
    pub async fn has_feature(&self, user_id: &str, feature: &str) -> EngineResult<bool> {
        let tier = self.effective_tier(user_id).await?;
        Ok(tier_has_feature(tier, feature))
    }

    pub async fn activate(
        &self,
        user_id: &str,
        tier: SubscriptionTier,
        duration_days: i64,
        auto_renew: bool,
    ) -> EngineResult<Subscription> {
        let now = Utc::now();
        let subscription = Subscription {
            user_id: user_id.to_string(),
            tier: tier.as_str().to_string(),
            started_at: now,
            expires_at: Some(now + Duration::days(duration_days)),
            auto_renew,
            updated_at: now,
        };
        self.subscriptions.upsert(&subscription).await?;
        self.ledger
            .append(&LedgerEntry::new(
                user_id,
                "subscription_activated",
                0,
                self.wallets.get_or_create(user_id).await?.total_credits(),
                format!("Subscription activated: {} ({} days)", tier, duration_days),
                None,
            ))
            .await?;
        Ok(subscription)
    }
}

fn tier_has_feature(tier: SubscriptionTier, feature: &str) -> bool {
    match feature {
        "nsfw_enabled" | "premium_characters" | "priority_response" | "extended_memory" => {
            tier != SubscriptionTier::Free
        }
        "early_access" => tier == SubscriptionTier::Vip,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;

    fn service_with_store() -> (SubscriptionService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let service = SubscriptionService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
        );
        (service, store)
    }

    #[tokio::test]
    async fn test_no_subscription_is_free() {
        let (service, _) = service_with_store();
        assert_eq!(
            service.effective_tier("u1").await.unwrap(),
            SubscriptionTier::Free
        );
    }

    #[tokio::test]
    async fn test_expiry_downgrades_once_with_ledger() {
        let (service, store) = service_with_store();
        let mut sub = Subscription::free("u1".into());
        sub.tier = "premium".to_string();
        sub.expires_at = Some(Utc::now() - Duration::days(1));
        SubscriptionRepository::upsert(store.as_ref(), &sub)
            .await
            .unwrap();

        assert_eq!(
            service.effective_tier("u1").await.unwrap(),
            SubscriptionTier::Free
        );

        // Second read: already stored as free, no second ledger entry
        assert_eq!(
            service.effective_tier("u1").await.unwrap(),
            SubscriptionTier::Free
        );
        let entries = LedgerRepository::list(store.as_ref(), "u1", 10, 0)
            .await
            .unwrap();
        assert_eq!(
            entries
                .iter()
                .filter(|e| e.entry_type == "subscription_expired")
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_active_premium() {
        let (service, _) = service_with_store();
        service
            .activate("u1", SubscriptionTier::Premium, 30, true)
            .await
            .unwrap();
        assert_eq!(
            service.effective_tier("u1").await.unwrap(),
            SubscriptionTier::Premium
        );
        assert!(service.has_feature("u1", "nsfw_enabled").await.unwrap());
        assert!(!service.has_feature("u1", "early_access").await.unwrap());
    }

    #[test]
    fn test_feature_table() {
        assert!(!tier_has_feature(SubscriptionTier::Free, "nsfw_enabled"));
        assert!(tier_has_feature(SubscriptionTier::Vip, "early_access"));
        assert!(!tier_has_feature(SubscriptionTier::Premium, "early_access"));
        assert!(!tier_has_feature(SubscriptionTier::Vip, "time_travel"));
    }
}
