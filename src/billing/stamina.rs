use serde::Serialize;
use std::sync::Arc;

use crate::db::{StaminaRepository, TxOps as _, UnitOfWork};
use crate::error::{EngineError, EngineResult};
use crate::models::{LedgerEntry, Stamina};

pub const STAMINA_COST_PER_MESSAGE: i32 = 1;
pub const STAMINA_PACK_PRICE: i64 = 10;
pub const STAMINA_PACK_AMOUNT: i32 = 10;

#[derive(Debug, Clone, Serialize)]
pub struct StaminaStatus {
    pub current: i32,
    pub max: i32,
    pub last_reset_at: chrono::DateTime<chrono::Utc>,
    pub needs_purchase: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StaminaPurchase {
    pub stamina_added: i32,
    pub credits_spent: i64,
    pub current: i32,
    pub new_balance: i64,
}

pub struct StaminaService {
    stamina: Arc<dyn StaminaRepository>,
    uow: Arc<dyn UnitOfWork>,
}

impl StaminaService {
    pub fn new(stamina: Arc<dyn StaminaRepository>, uow: Arc<dyn UnitOfWork>) -> Self {
        Self { stamina, uow }
    }

    pub async fn status(&self, user_id: &str) -> EngineResult<StaminaStatus> {
        let stamina = self.stamina.get(user_id).await?;
        Ok(Self::to_status(&stamina))
    }

    fn to_status(stamina: &Stamina) -> StaminaStatus {
        StaminaStatus {
            current: stamina.current,
            max: stamina.max,
            last_reset_at: stamina.last_reset_at,
            needs_purchase: stamina.current <= 0,
        }
    }

    /// Consume stamina for one chat message.
    pub async fn consume(&self, user_id: &str, amount: i32) -> EngineResult<StaminaStatus> {
        let stamina = self.stamina.consume(user_id, amount).await?;
        Ok(Self::to_status(&stamina))
    }

    /// Buy stamina with credits: one transaction debits the wallet and
    /// grants stamina, with a `stamina_purchase` ledger entry.
    pub async fn buy(&self, user_id: &str, packs: i32) -> EngineResult<StaminaPurchase> {
        if packs <= 0 {
            return Err(EngineError::Validation(
                "packs must be positive".to_string(),
            ));
        }

        let cost = STAMINA_PACK_PRICE * packs as i64;
        let gain = STAMINA_PACK_AMOUNT * packs;

        let mut tx = self.uow.begin().await?;
        let mut wallet = tx.wallet_for_update(user_id).await?;
        if !wallet.deduct(cost) {
            tx.rollback().await?;
            return Err(EngineError::InsufficientCredits {
                current: wallet.total_credits(),
                required: cost,
            });
        }
        let new_balance = wallet.total_credits();

        let mut stamina = tx.stamina_for_update(user_id).await?;
        stamina.maybe_reset(chrono::Utc::now());
        stamina.current += gain;

        tx.update_wallet(&wallet).await?;
        tx.update_stamina(&stamina).await?;
        tx.append_ledger(&LedgerEntry::new(
            user_id,
            "stamina_purchase",
            -cost,
            new_balance,
            format!("Bought {} stamina", gain),
            Some(serde_json::json!({ "packs": packs, "stamina_added": gain })),
        ))
        .await?;
        tx.commit().await?;

        Ok(StaminaPurchase {
            stamina_added: gain,
            credits_spent: cost,
            current: stamina.current,
            new_balance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryStore, TxOps, UnitOfWork, WalletRepository};

    fn service_with_store() -> (StaminaService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (StaminaService::new(store.clone(), store.clone()), store)
    }

    #[tokio::test]
    async fn test_fresh_user_has_full_stamina() {
        let (service, _) = service_with_store();
        let status = service.status("u1").await.unwrap();
        assert_eq!(status.current, 50);
        assert_eq!(status.max, 50);
        assert!(!status.needs_purchase);
    }

    #[tokio::test]
    async fn test_consume_and_exhaust() {
        let (service, _) = service_with_store();
        for _ in 0..50 {
            service.consume("u1", 1).await.unwrap();
        }
        let err = service.consume("u1", 1).await.unwrap_err();
        assert!(matches!(err, EngineError::InsufficientStamina { current: 0 }));
    }

    #[tokio::test]
    async fn test_buy_debits_wallet_and_grants_atomically() {
        let (service, store) = service_with_store();
        {
            let mut tx = UnitOfWork::begin(store.as_ref()).await.unwrap();
            let mut wallet = tx.wallet_for_update("u1").await.unwrap();
            wallet.purchased_credits = 25;
            tx.update_wallet(&wallet).await.unwrap();
            tx.commit().await.unwrap();
        }

        let purchase = service.buy("u1", 2).await.unwrap();
        assert_eq!(purchase.stamina_added, 20);
        assert_eq!(purchase.credits_spent, 20);
        assert_eq!(purchase.current, 70);
        assert_eq!(purchase.new_balance, 5);
    }

    #[tokio::test]
    async fn test_buy_insufficient_credits_leaves_stamina_untouched() {
        let (service, store) = service_with_store();
        let err = service.buy("u1", 1).await.unwrap_err();
        assert!(matches!(err, EngineError::InsufficientCredits { .. }));

        let status = service.status("u1").await.unwrap();
        assert_eq!(status.current, 50);
        let wallet = WalletRepository::get_or_create(store.as_ref(), "u1")
            .await
            .unwrap();
        assert_eq!(wallet.total_credits(), 0);
    }
}
