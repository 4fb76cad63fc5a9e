// In-memory storage backend, selected by `MOCK_DATABASE` and used by tests.
// A single mutex serializes all access; a transaction holds the lock for its
// whole lifetime and keeps a snapshot for rollback, so commit/rollback have
// the same observable semantics as the Postgres backend.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::db::{
    EffectRepository, EmotionHistoryRepository, GiftRepository, IdempotencyRepository,
    LedgerRepository, MessageRepository, SessionRepository, StaminaRepository,
    SubscriptionRepository, TxOps, UnitOfWork, UserStateRepository, WalletRepository,
};
use crate::error::{EngineError, EngineResult};
use crate::models::{
    ActiveEffect, EmotionHistoryEntry, Gift, GiftStatus, IdempotencyRecord, LedgerEntry, Message,
    Session, Stamina, Subscription, UserState, Wallet,
};

#[derive(Default, Clone)]
struct MemState {
    sessions: HashMap<Uuid, Session>,
    messages: HashMap<Uuid, Vec<Message>>,
    user_states: HashMap<(String, String), UserState>,
    wallets: HashMap<String, Wallet>,
    stamina: HashMap<String, Stamina>,
    gifts: HashMap<Uuid, Gift>,
    effects: Vec<ActiveEffect>,
    subscriptions: HashMap<String, Subscription>,
    ledger: Vec<LedgerEntry>,
    idempotency: HashMap<String, IdempotencyRecord>,
    emotion_history: Vec<EmotionHistoryEntry>,
}

impl MemState {
    fn sorted_messages(&self, session_id: Uuid) -> Vec<Message> {
        let mut messages = self
            .messages
            .get(&session_id)
            .cloned()
            .unwrap_or_default();
        messages.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then(a.message_id.cmp(&b.message_id))
        });
        messages
    }

    fn user_state_entry(&mut self, user_id: &str, character_id: &str) -> &mut UserState {
        self.user_states
            .entry((user_id.to_string(), character_id.to_string()))
            .or_insert_with(|| UserState::new(user_id.to_string(), character_id.to_string()))
    }

    fn wallet_entry(&mut self, user_id: &str) -> &mut Wallet {
        self.wallets
            .entry(user_id.to_string())
            .or_insert_with(|| Wallet::new(user_id.to_string()))
    }

    fn stamina_entry(&mut self, user_id: &str) -> &mut Stamina {
        let stamina = self
            .stamina
            .entry(user_id.to_string())
            .or_insert_with(|| Stamina::new(user_id.to_string()));
        stamina.maybe_reset(Utc::now());
        stamina
    }
}

pub struct MemoryStore {
    state: Arc<Mutex<MemState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemState::default())),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Repository implementations
// ============================================================================

#[async_trait]
impl SessionRepository for MemoryStore {
    async fn upsert(
        &self,
        user_id: &str,
        character_id: &str,
        character_name: &str,
    ) -> EngineResult<Session> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state
            .sessions
            .values()
            .find(|s| s.user_id == user_id && s.character_id == character_id && !s.is_deleted())
        {
            return Ok(existing.clone());
        }
        let session = Session::new(
            user_id.to_string(),
            character_id.to_string(),
            character_name.to_string(),
        );
        state.sessions.insert(session.session_id, session.clone());
        Ok(session)
    }

    async fn get(&self, session_id: Uuid) -> EngineResult<Option<Session>> {
        let state = self.state.lock().await;
        Ok(state.sessions.get(&session_id).cloned())
    }

    async fn list_for_user(
        &self,
        user_id: &str,
        character_id: Option<&str>,
    ) -> EngineResult<Vec<Session>> {
        let state = self.state.lock().await;
        let mut sessions: Vec<Session> = state
            .sessions
            .values()
            .filter(|s| s.user_id == user_id && !s.is_deleted())
            .filter(|s| character_id.map_or(true, |c| s.character_id == c))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }

    async fn soft_delete(&self, session_id: Uuid) -> EngineResult<()> {
        let mut state = self.state.lock().await;
        match state.sessions.get_mut(&session_id) {
            Some(session) => {
                session.deleted_at = Some(Utc::now());
                session.updated_at = Utc::now();
                Ok(())
            }
            None => Err(EngineError::SessionNotFound),
        }
    }
}

#[async_trait]
impl MessageRepository for MemoryStore {
    async fn append(&self, message: &Message) -> EngineResult<()> {
        let mut state = self.state.lock().await;
        state
            .messages
            .entry(message.session_id)
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn recent(&self, session_id: Uuid, limit: i64) -> EngineResult<Vec<Message>> {
        let state = self.state.lock().await;
        let messages = state.sorted_messages(session_id);
        let skip = messages.len().saturating_sub(limit.max(0) as usize);
        Ok(messages.into_iter().skip(skip).collect())
    }

    async fn page(
        &self,
        session_id: Uuid,
        limit: i64,
        before_id: Option<Uuid>,
        after_id: Option<Uuid>,
    ) -> EngineResult<Vec<Message>> {
        let state = self.state.lock().await;
        let messages = state.sorted_messages(session_id);
        let limit = limit.max(0) as usize;

        let page: Vec<Message> = if let Some(before) = before_id {
            let end = messages
                .iter()
                .position(|m| m.message_id == before)
                .unwrap_or(0);
            let start = end.saturating_sub(limit);
            messages[start..end].to_vec()
        } else if let Some(after) = after_id {
            let start = messages
                .iter()
                .position(|m| m.message_id == after)
                .map(|p| p + 1)
                .unwrap_or(messages.len());
            messages.into_iter().skip(start).take(limit).collect()
        } else {
            let skip = messages.len().saturating_sub(limit);
            messages.into_iter().skip(skip).collect()
        };

        Ok(page)
    }

    async fn count(&self, session_id: Uuid) -> EngineResult<i64> {
        let state = self.state.lock().await;
        Ok(state.messages.get(&session_id).map_or(0, |m| m.len()) as i64)
    }
}

#[async_trait]
impl UserStateRepository for MemoryStore {
    async fn get_or_create(&self, user_id: &str, character_id: &str) -> EngineResult<UserState> {
        let mut state = self.state.lock().await;
        Ok(state.user_state_entry(user_id, character_id).clone())
    }

    async fn update(&self, new_state: &UserState, expected_version: i64) -> EngineResult<UserState> {
        let mut state = self.state.lock().await;
        let entry = state.user_state_entry(&new_state.user_id, &new_state.character_id);
        if entry.version != expected_version {
            return Err(EngineError::Conflict(format!(
                "user state version mismatch: stored {}, expected {}",
                entry.version, expected_version
            )));
        }
        let mut updated = new_state.clone();
        updated.version = expected_version + 1;
        updated.updated_at = Utc::now();
        *entry = updated.clone();
        Ok(updated)
    }
}

#[async_trait]
impl WalletRepository for MemoryStore {
    async fn get_or_create(&self, user_id: &str) -> EngineResult<Wallet> {
        let mut state = self.state.lock().await;
        Ok(state.wallet_entry(user_id).clone())
    }
}

#[async_trait]
impl StaminaRepository for MemoryStore {
    async fn get(&self, user_id: &str) -> EngineResult<Stamina> {
        let mut state = self.state.lock().await;
        Ok(state.stamina_entry(user_id).clone())
    }

    async fn consume(&self, user_id: &str, amount: i32) -> EngineResult<Stamina> {
        let mut state = self.state.lock().await;
        let stamina = state.stamina_entry(user_id);
        if stamina.current < amount {
            return Err(EngineError::InsufficientStamina {
                current: stamina.current,
            });
        }
        stamina.current -= amount;
        Ok(stamina.clone())
    }
}

#[async_trait]
impl GiftRepository for MemoryStore {
    async fn get(&self, gift_id: Uuid) -> EngineResult<Option<Gift>> {
        let state = self.state.lock().await;
        Ok(state.gifts.get(&gift_id).cloned())
    }

    async fn list_for_user(
        &self,
        user_id: &str,
        character_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> EngineResult<Vec<Gift>> {
        let state = self.state.lock().await;
        let mut gifts: Vec<Gift> = state
            .gifts
            .values()
            .filter(|g| g.user_id == user_id)
            .filter(|g| character_id.map_or(true, |c| g.character_id == c))
            .cloned()
            .collect();
        gifts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(gifts
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn mark_acknowledged(&self, gift_id: Uuid) -> EngineResult<()> {
        let mut state = self.state.lock().await;
        if let Some(gift) = state.gifts.get_mut(&gift_id) {
            gift.status = GiftStatus::Acknowledged.to_string();
            gift.acknowledged_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn mark_failed(&self, gift_id: Uuid) -> EngineResult<()> {
        let mut state = self.state.lock().await;
        if let Some(gift) = state.gifts.get_mut(&gift_id) {
            gift.status = GiftStatus::Failed.to_string();
        }
        Ok(())
    }
}

#[async_trait]
impl EffectRepository for MemoryStore {
    async fn list_active(
        &self,
        user_id: &str,
        character_id: &str,
    ) -> EngineResult<Vec<ActiveEffect>> {
        let state = self.state.lock().await;
        Ok(state
            .effects
            .iter()
            .filter(|e| e.user_id == user_id && e.character_id == character_id)
            .cloned()
            .collect())
    }

    async fn decrement_and_expire(
        &self,
        user_id: &str,
        character_id: &str,
    ) -> EngineResult<Vec<ActiveEffect>> {
        let mut state = self.state.lock().await;
        let mut expired = Vec::new();
        for effect in state.effects.iter_mut() {
            if effect.user_id == user_id && effect.character_id == character_id {
                effect.remaining_messages -= 1;
                if effect.remaining_messages <= 0 {
                    expired.push(effect.clone());
                }
            }
        }
        state.effects.retain(|e| e.remaining_messages > 0);
        Ok(expired)
    }
}

#[async_trait]
impl SubscriptionRepository for MemoryStore {
    async fn get(&self, user_id: &str) -> EngineResult<Option<Subscription>> {
        let state = self.state.lock().await;
        Ok(state.subscriptions.get(user_id).cloned())
    }

    async fn upsert(&self, subscription: &Subscription) -> EngineResult<()> {
        let mut state = self.state.lock().await;
        state
            .subscriptions
            .insert(subscription.user_id.clone(), subscription.clone());
        Ok(())
    }
}

#[async_trait]
impl LedgerRepository for MemoryStore {
    async fn append(&self, entry: &LedgerEntry) -> EngineResult<()> {
        let mut state = self.state.lock().await;
        state.ledger.push(entry.clone());
        Ok(())
    }

    async fn list(&self, user_id: &str, limit: i64, offset: i64) -> EngineResult<Vec<LedgerEntry>> {
        let state = self.state.lock().await;
        let mut entries: Vec<LedgerEntry> = state
            .ledger
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }
}

#[async_trait]
impl IdempotencyRepository for MemoryStore {
    async fn get(&self, key: &str) -> EngineResult<Option<IdempotencyRecord>> {
        let state = self.state.lock().await;
        Ok(state.idempotency.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> EngineResult<()> {
        let mut state = self.state.lock().await;
        state.idempotency.remove(key);
        Ok(())
    }
}

#[async_trait]
impl EmotionHistoryRepository for MemoryStore {
    async fn append(&self, entry: &EmotionHistoryEntry) -> EngineResult<()> {
        let mut state = self.state.lock().await;
        state.emotion_history.push(entry.clone());
        Ok(())
    }

    async fn list(
        &self,
        user_id: &str,
        character_id: &str,
        limit: i64,
    ) -> EngineResult<Vec<EmotionHistoryEntry>> {
        let state = self.state.lock().await;
        let mut entries: Vec<EmotionHistoryEntry> = state
            .emotion_history
            .iter()
            .filter(|e| e.user_id == user_id && e.character_id == character_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        entries.truncate(limit.max(0) as usize);
        Ok(entries)
    }
}

// ============================================================================
// Unit of Work
// ============================================================================

struct MemTx {
    guard: OwnedMutexGuard<MemState>,
    snapshot: MemState,
    committed: bool,
}

impl Drop for MemTx {
    fn drop(&mut self) {
        if !self.committed {
            std::mem::swap(&mut *self.guard, &mut self.snapshot);
        }
    }
}

#[async_trait]
impl UnitOfWork for MemoryStore {
    async fn begin(&self) -> EngineResult<Box<dyn TxOps>> {
        let guard = self.state.clone().lock_owned().await;
        let snapshot = guard.clone();
        Ok(Box::new(MemTx {
            guard,
            snapshot,
            committed: false,
        }))
    }
}

#[async_trait]
impl TxOps for MemTx {
    async fn wallet_for_update(&mut self, user_id: &str) -> EngineResult<Wallet> {
        Ok(self.guard.wallet_entry(user_id).clone())
    }

    async fn update_wallet(&mut self, wallet: &Wallet) -> EngineResult<()> {
        let mut updated = wallet.clone();
        updated.updated_at = Utc::now();
        self.guard.wallets.insert(wallet.user_id.clone(), updated);
        Ok(())
    }

    async fn append_ledger(&mut self, entry: &LedgerEntry) -> EngineResult<()> {
        self.guard.ledger.push(entry.clone());
        Ok(())
    }

    async fn append_message(&mut self, message: &Message) -> EngineResult<()> {
        self.guard
            .messages
            .entry(message.session_id)
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn bump_session(
        &mut self,
        session_id: Uuid,
        messages: i64,
        credits_spent: i64,
    ) -> EngineResult<()> {
        let session = self
            .guard
            .sessions
            .get_mut(&session_id)
            .ok_or(EngineError::SessionNotFound)?;
        session.total_messages += messages;
        session.total_credits_spent += credits_spent;
        session.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_gift(&mut self, gift: &Gift) -> EngineResult<()> {
        let duplicate = self
            .guard
            .gifts
            .values()
            .any(|g| g.user_id == gift.user_id && g.idempotency_key == gift.idempotency_key);
        if duplicate {
            return Err(EngineError::Duplicate(format!(
                "gift with idempotency key {} already exists",
                gift.idempotency_key
            )));
        }
        self.guard.gifts.insert(gift.id, gift.clone());
        Ok(())
    }

    async fn put_idempotency(&mut self, record: &IdempotencyRecord) -> EngineResult<()> {
        self.guard
            .idempotency
            .insert(record.key.clone(), record.clone());
        Ok(())
    }

    async fn user_state_for_update(
        &mut self,
        user_id: &str,
        character_id: &str,
    ) -> EngineResult<UserState> {
        Ok(self.guard.user_state_entry(user_id, character_id).clone())
    }

    async fn update_user_state(&mut self, state: &UserState) -> EngineResult<()> {
        let entry = self
            .guard
            .user_state_entry(&state.user_id, &state.character_id);
        let mut updated = state.clone();
        updated.version = entry.version + 1;
        updated.updated_at = Utc::now();
        *entry = updated;
        Ok(())
    }

    async fn replace_effect(&mut self, effect: &ActiveEffect) -> EngineResult<()> {
        self.guard.effects.retain(|e| {
            !(e.user_id == effect.user_id
                && e.character_id == effect.character_id
                && e.effect_type == effect.effect_type)
        });
        self.guard.effects.push(effect.clone());
        Ok(())
    }

    async fn stamina_for_update(&mut self, user_id: &str) -> EngineResult<Stamina> {
        Ok(self.guard.stamina_entry(user_id).clone())
    }

    async fn update_stamina(&mut self, stamina: &Stamina) -> EngineResult<()> {
        self.guard
            .stamina
            .insert(stamina.user_id.clone(), stamina.clone());
        Ok(())
    }

    async fn update_subscription(&mut self, subscription: &Subscription) -> EngineResult<()> {
        self.guard
            .subscriptions
            .insert(subscription.user_id.clone(), subscription.clone());
        Ok(())
    }

    async fn append_emotion_history(&mut self, entry: &EmotionHistoryEntry) -> EngineResult<()> {
        self.guard.emotion_history.push(entry.clone());
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> EngineResult<()> {
        self.committed = true;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> EngineResult<()> {
        // Drop restores the snapshot
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_session_upsert_is_idempotent() {
        let store = MemoryStore::new();
        let a = SessionRepository::upsert(&store, "u1", "luna", "Luna").await.unwrap();
        let b = SessionRepository::upsert(&store, "u1", "luna", "Luna").await.unwrap();
        assert_eq!(a.session_id, b.session_id);

        let c = SessionRepository::upsert(&store, "u1", "vera", "Vera").await.unwrap();
        assert_ne!(a.session_id, c.session_id);
    }

    #[tokio::test]
    async fn test_message_ordering_and_pages() {
        let store = MemoryStore::new();
        let session = SessionRepository::upsert(&store, "u1", "luna", "Luna").await.unwrap();

        let mut ids = Vec::new();
        for i in 0..5 {
            let msg = Message::user(session.session_id, format!("msg {}", i));
            ids.push(msg.message_id);
            MessageRepository::append(&store, &msg).await.unwrap();
        }

        let recent = store.recent(session.session_id, 3).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].content, "msg 2");
        assert_eq!(recent[2].content, "msg 4");

        let before = store
            .page(session.session_id, 10, Some(ids[2]), None)
            .await
            .unwrap();
        assert_eq!(before.len(), 2);
        assert_eq!(before[0].content, "msg 0");

        let after = store
            .page(session.session_id, 10, None, Some(ids[2]))
            .await
            .unwrap();
        assert_eq!(after.len(), 2);
        assert_eq!(after[0].content, "msg 3");
    }

    #[tokio::test]
    async fn test_optimistic_update_conflict() {
        let store = MemoryStore::new();
        let mut state = UserStateRepository::get_or_create(&store, "u1", "luna")
            .await
            .unwrap();
        state.intimacy_xp = 10.0;
        let updated = store.update(&state, 0).await.unwrap();
        assert_eq!(updated.version, 1);

        // Stale version is rejected
        let err = store.update(&state, 0).await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_tx_rollback_restores_state() {
        let store = MemoryStore::new();
        {
            let mut tx = UnitOfWork::begin(&store).await.unwrap();
            let mut wallet = tx.wallet_for_update("u1").await.unwrap();
            wallet.purchased_credits = 500;
            tx.update_wallet(&wallet).await.unwrap();
            tx.rollback().await.unwrap();
        }
        let wallet = WalletRepository::get_or_create(&store, "u1").await.unwrap();
        assert_eq!(wallet.total_credits(), 0);
    }

    #[tokio::test]
    async fn test_tx_commit_applies_state() {
        let store = MemoryStore::new();
        {
            let mut tx = UnitOfWork::begin(&store).await.unwrap();
            let mut wallet = tx.wallet_for_update("u1").await.unwrap();
            wallet.purchased_credits = 500;
            tx.update_wallet(&wallet).await.unwrap();
            tx.commit().await.unwrap();
        }
        let wallet = WalletRepository::get_or_create(&store, "u1").await.unwrap();
        assert_eq!(wallet.total_credits(), 500);
    }

    #[tokio::test]
    async fn test_tx_drop_rolls_back() {
        let store = MemoryStore::new();
        {
            let mut tx = UnitOfWork::begin(&store).await.unwrap();
            let mut wallet = tx.wallet_for_update("u1").await.unwrap();
            wallet.purchased_credits = 500;
            tx.update_wallet(&wallet).await.unwrap();
            // dropped without commit
        }
        let wallet = WalletRepository::get_or_create(&store, "u1").await.unwrap();
        assert_eq!(wallet.total_credits(), 0);
    }

    #[tokio::test]
    async fn test_effect_decrement_and_expire() {
        let store = MemoryStore::new();
        let effect = ActiveEffect::new("u1", "luna", "tipsy", "feels tipsy", 2, Uuid::new_v4());
        {
            let mut tx = UnitOfWork::begin(&store).await.unwrap();
            tx.replace_effect(&effect).await.unwrap();
            tx.commit().await.unwrap();
        }

        let expired = store.decrement_and_expire("u1", "luna").await.unwrap();
        assert!(expired.is_empty());
        let expired = store.decrement_and_expire("u1", "luna").await.unwrap();
        assert_eq!(expired.len(), 1);
        assert!(store.list_active("u1", "luna").await.unwrap().is_empty());
    }
}
