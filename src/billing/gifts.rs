//! The gift transaction: the atomicity-critical path of the billing core.
//!
//! Wallet debit, gift row, ledger entry, XP award, effect application,
//! emotion recovery and the idempotency record all commit together. The
//! in-character acknowledgment happens after commit and never rolls the
//! gift back.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::billing::catalog::gift_catalog_entry;
use crate::db::{
    GiftRepository, IdempotencyRepository, MessageRepository, SessionRepository, TxOps as _,
    UnitOfWork, WalletRepository,
};
use crate::emotion::EmotionEngine;
use crate::error::{EngineError, EngineResult};
use crate::intimacy::IntimacyService;
use crate::llm::{ChatCompletionRequest, LlmClient};
use crate::models::{
    ActiveEffect, EmotionHistoryEntry, Gift, GiftCatalogEntry, GiftStatus, IdempotencyRecord,
    LedgerEntry, Message, StatusEffectSpec,
};
use crate::services::CharacterCatalog;
use crate::types::{ChatMessage, EmotionState, IntimacyStage};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GiftSendResult {
    pub gift_id: Uuid,
    pub gift_type: String,
    pub gift_name: String,
    pub tier: i32,
    pub credits_deducted: i64,
    pub new_balance: i64,
    pub xp_awarded: f64,
    pub level_up: bool,
    pub new_level: i32,
    pub new_stage: IntimacyStage,
    pub emotion_score: i32,
    pub emotion_state: EmotionState,
    pub cold_war_cleared: bool,
    pub status_effect: Option<StatusEffectSpec>,
    #[serde(default)]
    pub is_duplicate: bool,
    #[serde(default)]
    pub acknowledgment: Option<String>,
}

pub struct GiftService {
    wallets: Arc<dyn WalletRepository>,
    gifts: Arc<dyn GiftRepository>,
    idempotency: Arc<dyn IdempotencyRepository>,
    sessions: Arc<dyn SessionRepository>,
    messages: Arc<dyn MessageRepository>,
    uow: Arc<dyn UnitOfWork>,
    intimacy: Arc<IntimacyService>,
    characters: Arc<CharacterCatalog>,
    llm: Arc<dyn LlmClient>,
}

impl GiftService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        wallets: Arc<dyn WalletRepository>,
        gifts: Arc<dyn GiftRepository>,
        idempotency: Arc<dyn IdempotencyRepository>,
        sessions: Arc<dyn SessionRepository>,
        messages: Arc<dyn MessageRepository>,
        uow: Arc<dyn UnitOfWork>,
        intimacy: Arc<IntimacyService>,
        characters: Arc<CharacterCatalog>,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        Self {
            wallets,
            gifts,
            idempotency,
            sessions,
            messages,
            uow,
            intimacy,
            characters,
            llm,
        }
    }

    // ========================================================================
    // Idempotency
    // ========================================================================

    /// Returns the cached outcome for `(user, key)` if present and live.
    /// Keys are user-scoped: a mismatched user is treated as not found.
    async fn check_idempotency(
        &self,
        key: &str,
        user_id: &str,
    ) -> EngineResult<Option<GiftSendResult>> {
        let Some(record) = self.idempotency.get(key).await? else {
            return Ok(None);
        };

        if record.is_expired(Utc::now()) {
            self.idempotency.delete(key).await?;
            return Ok(None);
        }

        if record.user_id != user_id {
            tracing::warn!("idempotency key user mismatch for key {}", key);
            return Ok(None);
        }

        let mut cached: GiftSendResult = serde_json::from_str(&record.result)?;
        cached.is_duplicate = true;
        Ok(Some(cached))
    }

    // ========================================================================
    // Send
    // ========================================================================

    pub async fn send_gift(
        &self,
        user_id: &str,
        character_id: &str,
        gift_type: &str,
        idempotency_key: &str,
        session_id: Option<Uuid>,
    ) -> EngineResult<GiftSendResult> {
        // Step 1: replay a previous outcome if the key is known
        if let Some(cached) = self.check_idempotency(idempotency_key, user_id).await? {
            tracing::info!("🔁 duplicate gift request replayed: {}", idempotency_key);
            return Ok(cached);
        }

        // Step 2: validate against the catalog
        let entry = gift_catalog_entry(gift_type)
            .ok_or_else(|| EngineError::Validation(format!("unknown gift type: {}", gift_type)))?;
        self.characters.get(character_id)?;
        if let Some(session_id) = session_id {
            self.sessions
                .get(session_id)
                .await?
                .filter(|s| s.user_id == user_id)
                .ok_or(EngineError::SessionNotFound)?;
        }

        // Step 3: optimistic balance pre-check
        let wallet = self.wallets.get_or_create(user_id).await?;
        if wallet.total_credits() < entry.price {
            return Err(EngineError::InsufficientCredits {
                current: wallet.total_credits(),
                required: entry.price,
            });
        }

        // Step 4: the transaction
        let mut tx = self.uow.begin().await?;

        let mut wallet = tx.wallet_for_update(user_id).await?;
        if !wallet.deduct(entry.price) {
            tx.rollback().await?;
            return Err(EngineError::InsufficientCredits {
                current: wallet.total_credits(),
                required: entry.price,
            });
        }
        let new_balance = wallet.total_credits();
        tx.update_wallet(&wallet).await?;

        let gift = Gift {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            character_id: character_id.to_string(),
            session_id,
            gift_type: entry.gift_type.clone(),
            gift_name: entry.name.clone(),
            price: entry.price,
            xp_reward: entry.xp_reward,
            tier: entry.tier.as_i32(),
            status: GiftStatus::Pending.to_string(),
            idempotency_key: idempotency_key.to_string(),
            created_at: Utc::now(),
            acknowledged_at: None,
        };
        tx.insert_gift(&gift).await?;

        tx.append_ledger(&LedgerEntry::new(
            user_id,
            "gift",
            -entry.price,
            new_balance,
            format!("Sent gift: {} ({} credits)", entry.name, entry.price),
            Some(serde_json::json!({
                "gift_id": gift.id,
                "gift_type": entry.gift_type,
                "character_id": character_id,
            })),
        ))
        .await?;

        let xp = self
            .intimacy
            .award_raw_xp_tx(tx.as_mut(), user_id, character_id, entry.xp_reward as f64)
            .await?;

        // Tier-2 effects replace same-type effects, no stacking
        if let Some(effect_spec) = &entry.status_effect {
            tx.replace_effect(&ActiveEffect::new(
                user_id,
                character_id,
                &effect_spec.effect_type,
                &effect_spec.prompt_modifier,
                effect_spec.duration_messages,
                gift.id,
            ))
            .await?;
        }

        // Emotion side: apology gifts end cold wars, luxury forces maximum
        let mut state = tx.user_state_for_update(user_id, character_id).await?;
        let was_locked_out = state.emotion_state().is_lockout();
        let emotion_delta = Self::emotion_delta_for(&state, entry);
        let mut cold_war_cleared = false;
        if emotion_delta != 0 {
            let score_after = state.apply_emotion_delta(emotion_delta, Utc::now());
            cold_war_cleared = was_locked_out && !state.emotion_state().is_lockout();
            state.add_event("first_gift");
            tx.update_user_state(&state).await?;
            tx.append_emotion_history(&EmotionHistoryEntry::new(
                user_id,
                character_id,
                emotion_delta,
                score_after,
                state.emotion_state().as_str(),
                &format!("gift:{}", entry.gift_type),
            ))
            .await?;
        } else {
            state.add_event("first_gift");
            tx.update_user_state(&state).await?;
        }

        let mut result = GiftSendResult {
            gift_id: gift.id,
            gift_type: entry.gift_type.clone(),
            gift_name: entry.name.clone(),
            tier: entry.tier.as_i32(),
            credits_deducted: entry.price,
            new_balance,
            xp_awarded: xp.awarded,
            level_up: xp.level_up,
            new_level: xp.level_after,
            new_stage: xp.stage_after,
            emotion_score: state.emotion_score,
            emotion_state: state.emotion_state(),
            cold_war_cleared,
            status_effect: entry.status_effect.clone(),
            is_duplicate: false,
            acknowledgment: None,
        };

        tx.put_idempotency(&IdempotencyRecord::new(
            idempotency_key.to_string(),
            user_id.to_string(),
            gift.id,
            serde_json::to_string(&result)?,
        ))
        .await?;

        tx.commit().await?;
        tracing::info!(
            "🎁 gift {} from {} to {} committed ({} credits)",
            entry.gift_type,
            user_id,
            character_id,
            entry.price
        );

        // Step 5: post-commit acknowledgment. A provider failure never
        // rolls the gift back; the gift stays pending for a later retry.
        result.acknowledgment = Some(self.acknowledge(character_id, &gift, entry, &result).await);

        Ok(result)
    }

    fn emotion_delta_for(state: &crate::models::UserState, entry: &GiftCatalogEntry) -> i32 {
        if entry.clears_cold_war && !state.emotion_state().is_lockout() && !entry.force_emotion {
            // Apology outside a cold war is just its plain boost
            return entry.emotion_boost.min(100 - state.emotion_score);
        }
        EmotionEngine::gift_recovery_delta(state.emotion_score, entry)
    }

    // ========================================================================
    // Acknowledgment
    // ========================================================================

    async fn acknowledge(
        &self,
        character_id: &str,
        gift: &Gift,
        entry: &GiftCatalogEntry,
        result: &GiftSendResult,
    ) -> String {
        let character = match self.characters.get(character_id) {
            Ok(c) => c,
            Err(_) => return Self::canned_acknowledgment(entry),
        };

        let mut context = format!(
            "The user just gave you a gift: {} {} (worth {} credits).\n\
             Current intimacy level: {}. Current mood: {}.\n",
            entry.icon, entry.name, entry.price, result.new_level, result.emotion_state
        );
        if result.cold_war_cleared {
            context.push_str(
                "This apology gift just ended the cold war between you. You are \
                 softening, but still a little prickly about it.\n",
            );
        }
        if let Some(effect) = &entry.status_effect {
            context.push_str(&format!("Gift effect now active: {}\n", effect.effect_type));
        }
        if entry.price >= 1000 {
            context.push_str("This is an extravagant gift; react with real shock.\n");
        } else if entry.price >= 200 {
            context.push_str("This is a precious gift; show delight.\n");
        }

        let system = format!(
            "{}\n\n### Scene\n{}\n### Reply rules\n\
             - React to the gift in your own voice, 1-3 sentences\n\
             - Put actions in (parentheses)\n\
             - Match your warmth to the intimacy level and mood",
            character.persona, context
        );

        let request = ChatCompletionRequest {
            messages: vec![
                ChatMessage::system(system),
                ChatMessage::user(format!("[sent a gift: {} {}]", entry.icon, entry.name)),
            ],
            temperature: 0.8,
            max_tokens: 200,
            json_mode: false,
            timeout: Duration::from_secs(10),
        };

        match self.llm.chat_completion(request).await {
            Ok(response) => {
                if let Some(session_id) = gift.session_id {
                    let message = Message::assistant(
                        session_id,
                        response.reply.clone(),
                        response.tokens_used,
                        Some(serde_json::json!({
                            "kind": "gift_acknowledgment",
                            "gift_id": gift.id,
                        })),
                    );
                    if let Err(err) = self.messages.append(&message).await {
                        tracing::error!("failed to persist gift acknowledgment: {}", err);
                    }
                }
                if let Err(err) = self.gifts.mark_acknowledged(gift.id).await {
                    tracing::error!("failed to mark gift acknowledged: {}", err);
                }
                response.reply
            }
            Err(err) => {
                tracing::warn!(
                    "gift acknowledgment generation failed, using canned reply: {}",
                    err
                );
                Self::canned_acknowledgment(entry)
            }
        }
    }

    fn canned_acknowledgment(entry: &GiftCatalogEntry) -> String {
        format!("(accepts the {}) Thank you... really.", entry.name)
    }

    /// Retry acknowledgment for gifts stuck in `pending` (e.g. after a
    /// crash between commit and generation).
    pub async fn retry_acknowledgment(&self, gift_id: Uuid) -> EngineResult<String> {
        let gift = self
            .gifts
            .get(gift_id)
            .await?
            .ok_or_else(|| EngineError::Validation(format!("unknown gift: {}", gift_id)))?;
        if gift.get_status().ok() == Some(GiftStatus::Acknowledged) {
            return Err(EngineError::Duplicate("gift already acknowledged".into()));
        }
        let entry = gift_catalog_entry(&gift.gift_type)
            .ok_or_else(|| EngineError::Validation("gift type no longer in catalog".into()))?;

        let result = GiftSendResult {
            gift_id: gift.id,
            gift_type: gift.gift_type.clone(),
            gift_name: gift.gift_name.clone(),
            tier: gift.tier,
            credits_deducted: gift.price,
            new_balance: 0,
            xp_awarded: 0.0,
            level_up: false,
            new_level: 0,
            new_stage: IntimacyStage::Strangers,
            emotion_score: 0,
            emotion_state: EmotionState::Neutral,
            cold_war_cleared: false,
            status_effect: None,
            is_duplicate: false,
            acknowledgment: None,
        };
        Ok(self
            .acknowledge(&gift.character_id, &gift, entry, &result)
            .await)
    }

    // ========================================================================
    // History
    // ========================================================================

    pub async fn history(
        &self,
        user_id: &str,
        character_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> EngineResult<Vec<Gift>> {
        self.gifts
            .list_for_user(user_id, character_id, limit, offset)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{
        EmotionHistoryRepository, LedgerRepository, MemoryStore, TxOps, UserStateRepository,
    };
    use crate::llm::MockLlm;

    fn service_with_store() -> (GiftService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let intimacy = Arc::new(IntimacyService::new(store.clone()));
        let service = GiftService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            intimacy,
            Arc::new(CharacterCatalog::new()),
            Arc::new(MockLlm),
        );
        (service, store)
    }

    async fn fund(store: &Arc<MemoryStore>, user_id: &str, amount: i64) {
        let mut tx = crate::db::UnitOfWork::begin(store.as_ref()).await.unwrap();
        let mut wallet = tx.wallet_for_update(user_id).await.unwrap();
        wallet.purchased_credits = amount;
        tx.update_wallet(&wallet).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_gift_send_happy_path() {
        let (service, store) = service_with_store();
        fund(&store, "u1", 500).await;

        let result = service
            .send_gift("u1", "luna", "chocolate", "K1", None)
            .await
            .unwrap();
        assert_eq!(result.credits_deducted, 20);
        assert_eq!(result.new_balance, 480);
        assert_eq!(result.xp_awarded, 20.0);
        assert!(!result.is_duplicate);
        assert!(result.acknowledgment.is_some());

        let entries = LedgerRepository::list(store.as_ref(), "u1", 10, 0)
            .await
            .unwrap();
        let gift_entries: Vec<_> = entries.iter().filter(|e| e.entry_type == "gift").collect();
        assert_eq!(gift_entries.len(), 1);
        assert_eq!(gift_entries[0].amount, -20);
        assert_eq!(gift_entries[0].balance_after, 480);

        let state = UserStateRepository::get_or_create(store.as_ref(), "u1", "luna")
            .await
            .unwrap();
        assert!(state.has_event("first_gift"));
        assert_eq!(state.intimacy_xp, 20.0);
    }

    #[tokio::test]
    async fn test_gift_idempotency_replay() {
        let (service, store) = service_with_store();
        fund(&store, "u1", 500).await;

        let first = service
            .send_gift("u1", "luna", "chocolate", "K1", None)
            .await
            .unwrap();
        let replay = service
            .send_gift("u1", "luna", "chocolate", "K1", None)
            .await
            .unwrap();

        assert!(replay.is_duplicate);
        assert_eq!(replay.gift_id, first.gift_id);
        assert_eq!(replay.new_balance, 480);

        // Charged exactly once
        let gifts = service.history("u1", None, 10, 0).await.unwrap();
        assert_eq!(gifts.len(), 1);
        let entries = LedgerRepository::list(store.as_ref(), "u1", 10, 0)
            .await
            .unwrap();
        assert_eq!(
            entries.iter().filter(|e| e.entry_type == "gift").count(),
            1
        );
        let state = UserStateRepository::get_or_create(store.as_ref(), "u1", "luna")
            .await
            .unwrap();
        assert_eq!(state.intimacy_xp, 20.0);
    }

    #[tokio::test]
    async fn test_idempotency_key_is_user_scoped() {
        let (service, store) = service_with_store();
        fund(&store, "u1", 500).await;
        fund(&store, "u2", 500).await;

        service
            .send_gift("u1", "luna", "rose", "SHARED", None)
            .await
            .unwrap();
        // Same key from another user is not a replay of u1's outcome
        let result = service
            .send_gift("u2", "luna", "rose", "SHARED", None)
            .await
            .unwrap();
        assert!(!result.is_duplicate);

        assert_eq!(service.history("u1", None, 10, 0).await.unwrap().len(), 1);
        assert_eq!(service.history("u2", None, 10, 0).await.unwrap().len(), 1);
        let wallet = crate::db::WalletRepository::get_or_create(store.as_ref(), "u1")
            .await
            .unwrap();
        assert_eq!(wallet.total_credits(), 490);
    }

    #[tokio::test]
    async fn test_insufficient_credits_rejected_before_any_write() {
        let (service, store) = service_with_store();
        fund(&store, "u1", 5).await;

        let err = service
            .send_gift("u1", "luna", "chocolate", "K1", None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientCredits { .. }));

        let gifts = service.history("u1", None, 10, 0).await.unwrap();
        assert!(gifts.is_empty());
        let entries = LedgerRepository::list(store.as_ref(), "u1", 10, 0)
            .await
            .unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_gift_type() {
        let (service, store) = service_with_store();
        fund(&store, "u1", 500).await;
        let err = service
            .send_gift("u1", "luna", "yacht", "K1", None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_apology_gift_clears_cold_war_atomically() {
        let (service, store) = service_with_store();
        fund(&store, "u1", 500).await;

        // Seed a cold war
        let mut state = UserStateRepository::get_or_create(store.as_ref(), "u1", "luna")
            .await
            .unwrap();
        state.emotion_score = -85;
        let version = state.version;
        UserStateRepository::update(store.as_ref(), &state, version)
            .await
            .unwrap();

        let result = service
            .send_gift("u1", "luna", "apology_scroll", "K1", None)
            .await
            .unwrap();
        assert!(result.cold_war_cleared);
        assert!(result.emotion_score > -75);
        assert_ne!(result.emotion_state, EmotionState::ColdWar);

        // One ledger row and one emotion-history row in the same commit
        let entries = LedgerRepository::list(store.as_ref(), "u1", 10, 0)
            .await
            .unwrap();
        assert_eq!(
            entries.iter().filter(|e| e.entry_type == "gift").count(),
            1
        );
        let history = EmotionHistoryRepository::list(store.as_ref(), "u1", "luna", 10)
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].reason.contains("apology_scroll"));
    }

    #[tokio::test]
    async fn test_tier2_effect_replaces_same_type() {
        let (service, store) = service_with_store();
        fund(&store, "u1", 1000).await;

        service
            .send_gift("u1", "luna", "red_wine", "K1", None)
            .await
            .unwrap();
        service
            .send_gift("u1", "luna", "red_wine", "K2", None)
            .await
            .unwrap();

        let effects = crate::db::EffectRepository::list_active(store.as_ref(), "u1", "luna")
            .await
            .unwrap();
        assert_eq!(effects.len(), 1);
        assert_eq!(effects[0].effect_type, "tipsy");
        assert_eq!(effects[0].remaining_messages, 10);
    }

    #[tokio::test]
    async fn test_failed_acknowledgment_retries_without_redebit() {
        // A provider outage between commit and acknowledgment leaves the
        // gift pending; the retry acknowledges without touching the wallet.
        let store = Arc::new(MemoryStore::new());
        let intimacy = Arc::new(IntimacyService::new(store.clone()));

        let mut failing = crate::llm::MockLlmClient::new();
        failing
            .expect_chat_completion()
            .returning(|_| Err(EngineError::LlmUnavailable("outage".into())));
        let service = GiftService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            intimacy.clone(),
            Arc::new(CharacterCatalog::new()),
            Arc::new(failing),
        );
        fund(&store, "u1", 500).await;

        let result = service
            .send_gift("u1", "luna", "chocolate", "K1", None)
            .await
            .unwrap();
        assert_eq!(result.new_balance, 480);
        // Canned fallback delivered, gift still pending
        assert!(result.acknowledgment.is_some());
        let gift = GiftRepository::get(store.as_ref(), result.gift_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(gift.get_status().unwrap(), GiftStatus::Pending);

        // Reconnect with a healthy provider and retry
        let healthy = GiftService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            intimacy,
            Arc::new(CharacterCatalog::new()),
            Arc::new(MockLlm),
        );
        healthy.retry_acknowledgment(result.gift_id).await.unwrap();

        let gift = GiftRepository::get(store.as_ref(), result.gift_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(gift.get_status().unwrap(), GiftStatus::Acknowledged);

        // No second debit
        let wallet = crate::db::WalletRepository::get_or_create(store.as_ref(), "u1")
            .await
            .unwrap();
        assert_eq!(wallet.total_credits(), 480);
    }

    #[tokio::test]
    async fn test_luxury_gift_forces_loving() {
        let (service, store) = service_with_store();
        fund(&store, "u1", 2000).await;

        let result = service
            .send_gift("u1", "luna", "diamond_ring", "K1", None)
            .await
            .unwrap();
        assert_eq!(result.emotion_score, 100);
        assert_eq!(result.emotion_state, EmotionState::Loving);
    }
}
