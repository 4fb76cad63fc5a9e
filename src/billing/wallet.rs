use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::billing::catalog::{purchase_package, PurchasePackage};
use crate::db::{LedgerRepository, TxOps as _, UnitOfWork, WalletRepository};
use crate::error::{EngineError, EngineResult};
use crate::models::{LedgerEntry, Wallet};
use crate::types::SubscriptionTier;

/// Token-exact chat cost. The pre-check uses the conservative upper bound.
pub fn chat_cost(tokens_used: i32) -> i64 {
    ((tokens_used.max(0) as i64) + 999) / 1000
}

pub const CHAT_COST_UPPER_BOUND: i64 = 2;

pub struct WalletService {
    wallets: Arc<dyn WalletRepository>,
    ledger: Arc<dyn LedgerRepository>,
    uow: Arc<dyn UnitOfWork>,
}

impl WalletService {
    pub fn new(
        wallets: Arc<dyn WalletRepository>,
        ledger: Arc<dyn LedgerRepository>,
        uow: Arc<dyn UnitOfWork>,
    ) -> Self {
        Self {
            wallets,
            ledger,
            uow,
        }
    }

    // ========================================================================
    // Daily refresh
    // ========================================================================

    /// Lazy refresh: the first request of a UTC day that finds a stale
    /// `daily_refreshed_at` resets the daily bucket under a row lock.
    /// The date comparison under the lock makes this exactly-once per day.
    pub async fn ensure_daily_refresh(
        &self,
        user_id: &str,
        tier: SubscriptionTier,
    ) -> EngineResult<Wallet> {
        let wallet = self.wallets.get_or_create(user_id).await?;
        let today = Utc::now().date_naive();
        if wallet.daily_refreshed_at.date_naive() >= today {
            return Ok(wallet);
        }

        let mut tx = self.uow.begin().await?;
        let mut wallet = tx.wallet_for_update(user_id).await?;

        // Re-check under the lock; a concurrent request may have won
        if wallet.daily_refreshed_at.date_naive() >= today {
            tx.rollback().await?;
            return Ok(wallet);
        }

        let allowance = tier.daily_credit_allowance();
        let old_total = wallet.total_credits();
        wallet.daily_free_credits = allowance;
        wallet.daily_refreshed_at = Utc::now();
        let new_total = wallet.total_credits();

        tx.update_wallet(&wallet).await?;
        tx.append_ledger(&LedgerEntry::new(
            user_id,
            "daily_refresh",
            new_total - old_total,
            new_total,
            format!("Daily credit refresh ({} tier)", tier),
            None,
        ))
        .await?;
        tx.commit().await?;

        tracing::info!("💰 daily refresh for {}: {} credits", user_id, allowance);
        Ok(wallet)
    }

    pub async fn balance(&self, user_id: &str, tier: SubscriptionTier) -> EngineResult<Wallet> {
        self.ensure_daily_refresh(user_id, tier).await
    }

    // ========================================================================
    // Chat billing
    // ========================================================================

    /// Pre-check before the LLM call, with a conservative estimate.
    pub async fn pre_check(&self, user_id: &str, estimated: i64) -> EngineResult<()> {
        let wallet = self.wallets.get_or_create(user_id).await?;
        if wallet.total_credits() < estimated {
            return Err(EngineError::InsufficientCredits {
                current: wallet.total_credits(),
                required: estimated,
            });
        }
        Ok(())
    }

    /// Post-hoc token-exact deduction after a successful completion.
    /// Deducts in priority daily → purchased → bonus, writes the ledger
    /// entry, and bumps the session's cumulative spend — all or nothing.
    pub async fn post_deduct(
        &self,
        user_id: &str,
        session_id: Uuid,
        message_id: Uuid,
        tokens_used: i32,
        tier: SubscriptionTier,
    ) -> EngineResult<i64> {
        let cost = chat_cost(tokens_used).max(1);

        let mut tx = self.uow.begin().await?;
        let mut wallet = tx.wallet_for_update(user_id).await?;

        if !wallet.deduct(cost) {
            tx.rollback().await?;
            return Err(EngineError::InsufficientCredits {
                current: wallet.total_credits(),
                required: cost,
            });
        }
        let balance_after = wallet.total_credits();
        debug_assert!(balance_after >= 0);

        tx.update_wallet(&wallet).await?;
        tx.append_ledger(&LedgerEntry::new(
            user_id,
            "chat_deduction",
            -cost,
            balance_after,
            format!("Chat completion ({} tokens)", tokens_used),
            Some(serde_json::json!({
                "tokens_used": tokens_used,
                "session_id": session_id,
                "message_id": message_id,
                "tier": tier.as_str(),
            })),
        ))
        .await?;
        tx.bump_session(session_id, 0, cost).await?;
        tx.commit().await?;

        Ok(balance_after)
    }

    // ========================================================================
    // Purchases
    // ========================================================================

    pub async fn purchase(&self, user_id: &str, package_id: &str) -> EngineResult<(Wallet, &'static PurchasePackage)> {
        let package = purchase_package(package_id)
            .ok_or_else(|| EngineError::Validation(format!("unknown package: {}", package_id)))?;

        let mut tx = self.uow.begin().await?;
        let mut wallet = tx.wallet_for_update(user_id).await?;
        wallet.purchased_credits += package.credits;
        wallet.bonus_credits += package.bonus_credits;
        let balance_after = wallet.total_credits();

        tx.update_wallet(&wallet).await?;
        tx.append_ledger(&LedgerEntry::new(
            user_id,
            "purchase",
            package.credits + package.bonus_credits,
            balance_after,
            format!("Credit purchase: {}", package.name),
            Some(serde_json::json!({
                "package_id": package.package_id,
                "credits": package.credits,
                "bonus_credits": package.bonus_credits,
            })),
        ))
        .await?;
        tx.commit().await?;

        Ok((wallet, package))
    }

    pub async fn transactions(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> EngineResult<Vec<crate::models::LedgerEntry>> {
        self.ledger.list(user_id, limit, offset).await
    }
}
