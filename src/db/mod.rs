// Storage contracts. The engine depends only on these traits plus the
// unit-of-work abstraction; implementations are swapped at process start
// (`MOCK_DATABASE` selects the in-memory store).

pub mod memory;
pub mod pool;
pub mod postgres;

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::EngineResult;
use crate::models::{
    ActiveEffect, EmotionHistoryEntry, Gift, IdempotencyRecord, LedgerEntry, Message, Session,
    Stamina, Subscription, UserState, Wallet,
};

pub use memory::MemoryStore;
pub use pool::create_pool;

// ============================================================================
// Aggregate Repositories
// ============================================================================

#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Idempotent by `(user_id, character_id)`: returns the existing live
    /// session when present.
    async fn upsert(
        &self,
        user_id: &str,
        character_id: &str,
        character_name: &str,
    ) -> EngineResult<Session>;

    async fn get(&self, session_id: Uuid) -> EngineResult<Option<Session>>;

    async fn list_for_user(
        &self,
        user_id: &str,
        character_id: Option<&str>,
    ) -> EngineResult<Vec<Session>>;

    /// Sessions are never destroyed, only soft-deleted.
    async fn soft_delete(&self, session_id: Uuid) -> EngineResult<()>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Non-transactional append (gift acknowledgments, audit records).
    async fn append(&self, message: &Message) -> EngineResult<()>;

    /// The most recent `limit` messages in chronological order.
    async fn recent(&self, session_id: Uuid, limit: i64) -> EngineResult<Vec<Message>>;

    /// Keyset page ordered by `(created_at, message_id)`.
    async fn page(
        &self,
        session_id: Uuid,
        limit: i64,
        before_id: Option<Uuid>,
        after_id: Option<Uuid>,
    ) -> EngineResult<Vec<Message>>;

    async fn count(&self, session_id: Uuid) -> EngineResult<i64>;
}

#[async_trait]
pub trait UserStateRepository: Send + Sync {
    async fn get_or_create(&self, user_id: &str, character_id: &str) -> EngineResult<UserState>;

    /// Optimistic write: fails with `Conflict` when `expected_version` is
    /// stale. The stored version is bumped on success.
    async fn update(&self, state: &UserState, expected_version: i64) -> EngineResult<UserState>;
}

#[async_trait]
pub trait WalletRepository: Send + Sync {
    async fn get_or_create(&self, user_id: &str) -> EngineResult<Wallet>;
}

#[async_trait]
pub trait StaminaRepository: Send + Sync {
    /// Reads apply the UTC-rollover reset and persist it.
    async fn get(&self, user_id: &str) -> EngineResult<Stamina>;

    /// Atomically consume `amount`; fails with `InsufficientStamina`.
    async fn consume(&self, user_id: &str, amount: i32) -> EngineResult<Stamina>;
}

#[async_trait]
pub trait GiftRepository: Send + Sync {
    async fn get(&self, gift_id: Uuid) -> EngineResult<Option<Gift>>;

    async fn list_for_user(
        &self,
        user_id: &str,
        character_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> EngineResult<Vec<Gift>>;

    async fn mark_acknowledged(&self, gift_id: Uuid) -> EngineResult<()>;

    async fn mark_failed(&self, gift_id: Uuid) -> EngineResult<()>;
}

#[async_trait]
pub trait EffectRepository: Send + Sync {
    async fn list_active(&self, user_id: &str, character_id: &str)
        -> EngineResult<Vec<ActiveEffect>>;

    /// Decrement every active effect for the pair by one message; effects
    /// that reach zero are deleted and returned.
    async fn decrement_and_expire(
        &self,
        user_id: &str,
        character_id: &str,
    ) -> EngineResult<Vec<ActiveEffect>>;
}

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn get(&self, user_id: &str) -> EngineResult<Option<Subscription>>;
    async fn upsert(&self, subscription: &Subscription) -> EngineResult<()>;
}

#[async_trait]
pub trait LedgerRepository: Send + Sync {
    async fn append(&self, entry: &LedgerEntry) -> EngineResult<()>;
    async fn list(&self, user_id: &str, limit: i64, offset: i64) -> EngineResult<Vec<LedgerEntry>>;
}

#[async_trait]
pub trait IdempotencyRepository: Send + Sync {
    async fn get(&self, key: &str) -> EngineResult<Option<IdempotencyRecord>>;
    async fn delete(&self, key: &str) -> EngineResult<()>;
}

#[async_trait]
pub trait EmotionHistoryRepository: Send + Sync {
    async fn append(&self, entry: &EmotionHistoryEntry) -> EngineResult<()>;
    async fn list(
        &self,
        user_id: &str,
        character_id: &str,
        limit: i64,
    ) -> EngineResult<Vec<EmotionHistoryEntry>>;
}

// ============================================================================
// Unit of Work
// ============================================================================

/// Transactional boundary. `begin` hands out a handle whose mutations all
/// commit or roll back together; dropping an uncommitted handle rolls back.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    async fn begin(&self) -> EngineResult<Box<dyn TxOps>>;
}

/// Operations available inside a storage transaction. Row reads with
/// `_for_update` take row-level locks for the duration of the transaction.
#[async_trait]
pub trait TxOps: Send {
    async fn wallet_for_update(&mut self, user_id: &str) -> EngineResult<Wallet>;
    async fn update_wallet(&mut self, wallet: &Wallet) -> EngineResult<()>;
    async fn append_ledger(&mut self, entry: &LedgerEntry) -> EngineResult<()>;

    async fn append_message(&mut self, message: &Message) -> EngineResult<()>;
    async fn bump_session(
        &mut self,
        session_id: Uuid,
        messages: i64,
        credits_spent: i64,
    ) -> EngineResult<()>;

    async fn insert_gift(&mut self, gift: &Gift) -> EngineResult<()>;
    async fn put_idempotency(&mut self, record: &IdempotencyRecord) -> EngineResult<()>;

    async fn user_state_for_update(
        &mut self,
        user_id: &str,
        character_id: &str,
    ) -> EngineResult<UserState>;
    async fn update_user_state(&mut self, state: &UserState) -> EngineResult<()>;

    /// Delete any effect of the same type for the pair, then insert.
    async fn replace_effect(&mut self, effect: &ActiveEffect) -> EngineResult<()>;

    async fn stamina_for_update(&mut self, user_id: &str) -> EngineResult<Stamina>;
    async fn update_stamina(&mut self, stamina: &Stamina) -> EngineResult<()>;

    async fn update_subscription(&mut self, subscription: &Subscription) -> EngineResult<()>;

    async fn append_emotion_history(&mut self, entry: &EmotionHistoryEntry) -> EngineResult<()>;

    async fn commit(self: Box<Self>) -> EngineResult<()>;
    async fn rollback(self: Box<Self>) -> EngineResult<()>;
}

// ============================================================================
// Wiring
// ============================================================================

/// The full set of storage contracts, injected into services at startup.
#[derive(Clone)]
pub struct Repositories {
    pub sessions: Arc<dyn SessionRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub user_states: Arc<dyn UserStateRepository>,
    pub wallets: Arc<dyn WalletRepository>,
    pub stamina: Arc<dyn StaminaRepository>,
    pub gifts: Arc<dyn GiftRepository>,
    pub effects: Arc<dyn EffectRepository>,
    pub subscriptions: Arc<dyn SubscriptionRepository>,
    pub ledger: Arc<dyn LedgerRepository>,
    pub idempotency: Arc<dyn IdempotencyRepository>,
    pub emotion_history: Arc<dyn EmotionHistoryRepository>,
    pub uow: Arc<dyn UnitOfWork>,
}

impl Repositories {
    pub fn in_memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            sessions: store.clone(),
            messages: store.clone(),
            user_states: store.clone(),
            wallets: store.clone(),
            stamina: store.clone(),
            gifts: store.clone(),
            effects: store.clone(),
            subscriptions: store.clone(),
            ledger: store.clone(),
            idempotency: store.clone(),
            emotion_history: store.clone(),
            uow: store,
        }
    }

    pub fn postgres(pool: sqlx::PgPool) -> Self {
        use postgres::*;
        Self {
            sessions: Arc::new(PgSessionRepository::new(pool.clone())),
            messages: Arc::new(PgMessageRepository::new(pool.clone())),
            user_states: Arc::new(PgUserStateRepository::new(pool.clone())),
            wallets: Arc::new(PgWalletRepository::new(pool.clone())),
            stamina: Arc::new(PgStaminaRepository::new(pool.clone())),
            gifts: Arc::new(PgGiftRepository::new(pool.clone())),
            effects: Arc::new(PgEffectRepository::new(pool.clone())),
            subscriptions: Arc::new(PgSubscriptionRepository::new(pool.clone())),
            ledger: Arc::new(PgLedgerRepository::new(pool.clone())),
            idempotency: Arc::new(PgIdempotencyRepository::new(pool.clone())),
            emotion_history: Arc::new(PgEmotionHistoryRepository::new(pool.clone())),
            uow: Arc::new(PgUnitOfWork::new(pool)),
        }
    }
}
