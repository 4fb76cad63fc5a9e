// Postgres storage backend. Queries follow the repository-per-aggregate
// split; row locks (`FOR UPDATE`) are taken only inside unit-of-work
// transactions.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Postgres, Transaction};
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

// ============================================================================
// Sessions
// ============================================================================

pub struct PgSessionRepository {
    pool: PgPool,
}

impl PgSessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRepository for PgSessionRepository {
    async fn upsert(
        &self,
        user_id: &str,
        character_id: &str,
        character_name: &str,
    ) -> EngineResult<Session> {
        if let Some(existing) = sqlx::query_as::<_, Session>(
            "SELECT * FROM sessions WHERE user_id = $1 AND character_id = $2 AND deleted_at IS NULL",
        )
        .bind(user_id)
        .bind(character_id)
        .fetch_optional(&self.pool)
        .await?
        {
            return Ok(existing);
        }

        let session = Session::new(
            user_id.to_string(),
            character_id.to_string(),
            character_name.to_string(),
        );
        let inserted = sqlx::query_as::<_, Session>(
            r#"
            INSERT INTO sessions (
                session_id, user_id, character_id, character_name,
                total_messages, total_credits_spent, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, 0, 0, $5, $5)
            ON CONFLICT (user_id, character_id) WHERE deleted_at IS NULL DO NOTHING
            RETURNING *
            "#,
        )
        .bind(session.session_id)
        .bind(&session.user_id)
        .bind(&session.character_id)
        .bind(&session.character_name)
        .bind(session.created_at)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(session) => Ok(session),
            // Lost the race; the concurrent insert wins
            None => {
                let existing = sqlx::query_as::<_, Session>(
                    "SELECT * FROM sessions WHERE user_id = $1 AND character_id = $2 AND deleted_at IS NULL",
                )
                .bind(user_id)
                .bind(character_id)
                .fetch_one(&self.pool)
                .await?;
                Ok(existing)
            }
        }
    }

    async fn get(&self, session_id: Uuid) -> EngineResult<Option<Session>> {
        let session =
            sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE session_id = $1")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(session)
    }

    async fn list_for_user(
        &self,
        user_id: &str,
        character_id: Option<&str>,
    ) -> EngineResult<Vec<Session>> {
        let sessions = sqlx::query_as::<_, Session>(
            r#"
            SELECT * FROM sessions
            WHERE user_id = $1
              AND deleted_at IS NULL
              AND ($2::text IS NULL OR character_id = $2)
            ORDER BY updated_at DESC
            "#,
        )
        .bind(user_id)
        .bind(character_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(sessions)
    }

    async fn soft_delete(&self, session_id: Uuid) -> EngineResult<()> {
        let result = sqlx::query(
            "UPDATE sessions SET deleted_at = NOW(), updated_at = NOW() WHERE session_id = $1",
        )
        .bind(session_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(EngineError::SessionNotFound);
        }
        Ok(())
    }
}

// ============================================================================
// Messages
// ============================================================================

pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn anchor(&self, message_id: Uuid) -> EngineResult<Option<Message>> {
        let message =
            sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE message_id = $1")
                .bind(message_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(message)
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn append(&self, message: &Message) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO messages (message_id, session_id, role, content, tokens_used, extra_data, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(message.message_id)
        .bind(message.session_id)
        .bind(&message.role)
        .bind(&message.content)
        .bind(message.tokens_used)
        .bind(&message.extra_data)
        .bind(message.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent(&self, session_id: Uuid, limit: i64) -> EngineResult<Vec<Message>> {
        let messages = sqlx::query_as::<_, Message>(
            r#"
            SELECT * FROM messages
            WHERE session_id = $1
            ORDER BY created_at DESC, message_id DESC
            LIMIT $2
            "#,
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(messages.into_iter().rev().collect())
    }

    async fn page(
        &self,
        session_id: Uuid,
        limit: i64,
        before_id: Option<Uuid>,
        after_id: Option<Uuid>,
    ) -> EngineResult<Vec<Message>> {
        if let Some(before) = before_id {
            let Some(anchor) = self.anchor(before).await? else {
                return Ok(Vec::new());
            };
            let messages = sqlx::query_as::<_, Message>(
                r#"
                SELECT * FROM messages
                WHERE session_id = $1 AND (created_at, message_id) < ($2, $3)
                ORDER BY created_at DESC, message_id DESC
                LIMIT $4
                "#,
            )
            .bind(session_id)
            .bind(anchor.created_at)
            .bind(anchor.message_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            return Ok(messages.into_iter().rev().collect());
        }

        if let Some(after) = after_id {
            let Some(anchor) = self.anchor(after).await? else {
                return Ok(Vec::new());
            };
            let messages = sqlx::query_as::<_, Message>(
                r#"
                SELECT * FROM messages
                WHERE session_id = $1 AND (created_at, message_id) > ($2, $3)
                ORDER BY created_at ASC, message_id ASC
                LIMIT $4
                "#,
            )
            .bind(session_id)
            .bind(anchor.created_at)
            .bind(anchor.message_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            return Ok(messages);
        }

        self.recent(session_id, limit).await
    }

    async fn count(&self, session_id: Uuid) -> EngineResult<i64> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM messages WHERE session_id = $1")
                .bind(session_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

// ============================================================================
// User States
// ============================================================================

pub struct PgUserStateRepository {
    pool: PgPool,
}

impl PgUserStateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStateRepository for PgUserStateRepository {
    async fn get_or_create(&self, user_id: &str, character_id: &str) -> EngineResult<UserState> {
        if let Some(state) = sqlx::query_as::<_, UserState>(
            "SELECT * FROM user_states WHERE user_id = $1 AND character_id = $2",
        )
        .bind(user_id)
        .bind(character_id)
        .fetch_optional(&self.pool)
        .await?
        {
            return Ok(state);
        }

        let fresh = UserState::new(user_id.to_string(), character_id.to_string());
        let state = sqlx::query_as::<_, UserState>(
            r#"
            INSERT INTO user_states (user_id, character_id, created_at, updated_at)
            VALUES ($1, $2, $3, $3)
            ON CONFLICT (user_id, character_id) DO UPDATE SET updated_at = user_states.updated_at
            RETURNING *
            "#,
        )
        .bind(&fresh.user_id)
        .bind(&fresh.character_id)
        .bind(fresh.created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(state)
    }

    async fn update(&self, state: &UserState, expected_version: i64) -> EngineResult<UserState> {
        let updated = sqlx::query_as::<_, UserState>(
            r#"
            UPDATE user_states SET
                intimacy_xp = $3,
                intimacy_level = $4,
                daily_xp_earned = $5,
                last_daily_reset = $6,
                streak_days = $7,
                last_interaction_date = $8,
                emotion_score = $9,
                emotion_high = $10,
                emotion_low = $11,
                emotion_update_count = $12,
                emotion_updated_at = $13,
                events = $14,
                version = version + 1,
                updated_at = NOW()
            WHERE user_id = $1 AND character_id = $2 AND version = $15
            RETURNING *
            "#,
        )
        .bind(&state.user_id)
        .bind(&state.character_id)
        .bind(state.intimacy_xp)
        .bind(state.intimacy_level)
        .bind(state.daily_xp_earned)
        .bind(state.last_daily_reset)
        .bind(state.streak_days)
        .bind(state.last_interaction_date)
        .bind(state.emotion_score)
        .bind(state.emotion_high)
        .bind(state.emotion_low)
        .bind(state.emotion_update_count)
        .bind(state.emotion_updated_at)
        .bind(sqlx::types::Json(&state.events))
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await?;

        updated.ok_or_else(|| {
            EngineError::Conflict(format!(
                "user state version {} is stale for {}:{}",
                expected_version, state.user_id, state.character_id
            ))
        })
    }
}

// ============================================================================
// Wallets
// ============================================================================

pub struct PgWalletRepository {
    pool: PgPool,
}

impl PgWalletRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WalletRepository for PgWalletRepository {
    async fn get_or_create(&self, user_id: &str) -> EngineResult<Wallet> {
        let wallet = sqlx::query_as::<_, Wallet>(
            r#"
            INSERT INTO wallets (user_id) VALUES ($1)
            ON CONFLICT (user_id) DO UPDATE SET updated_at = wallets.updated_at
            RETURNING *
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(wallet)
    }
}

// ============================================================================
// Stamina
// ============================================================================

pub struct PgStaminaRepository {
    pool: PgPool,
}

impl PgStaminaRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn locked(
        tx: &mut Transaction<'static, Postgres>,
        user_id: &str,
    ) -> EngineResult<Stamina> {
        if let Some(stamina) =
            sqlx::query_as::<_, Stamina>("SELECT * FROM stamina WHERE user_id = $1 FOR UPDATE")
                .bind(user_id)
                .fetch_optional(&mut **tx)
                .await?
        {
            return Ok(stamina);
        }

        let fresh = Stamina::new(user_id.to_string());
        sqlx::query(
            r#"INSERT INTO stamina (user_id, current, "max", last_reset_at) VALUES ($1, $2, $3, $4)
               ON CONFLICT (user_id) DO NOTHING"#,
        )
        .bind(&fresh.user_id)
        .bind(fresh.current)
        .bind(fresh.max)
        .bind(fresh.last_reset_at)
        .execute(&mut **tx)
        .await?;

        let stamina =
            sqlx::query_as::<_, Stamina>("SELECT * FROM stamina WHERE user_id = $1 FOR UPDATE")
                .bind(user_id)
                .fetch_one(&mut **tx)
                .await?;
        Ok(stamina)
    }

    async fn save(
        tx: &mut Transaction<'static, Postgres>,
        stamina: &Stamina,
    ) -> EngineResult<()> {
        sqlx::query(
            r#"UPDATE stamina SET current = $2, "max" = $3, last_reset_at = $4 WHERE user_id = $1"#,
        )
        .bind(&stamina.user_id)
        .bind(stamina.current)
        .bind(stamina.max)
        .bind(stamina.last_reset_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl StaminaRepository for PgStaminaRepository {
    async fn get(&self, user_id: &str) -> EngineResult<Stamina> {
        let mut tx = self.pool.begin().await?;
        let mut stamina = Self::locked(&mut tx, user_id).await?;
        if stamina.maybe_reset(Utc::now()) {
            Self::save(&mut tx, &stamina).await?;
        }
        tx.commit().await?;
        Ok(stamina)
    }

    async fn consume(&self, user_id: &str, amount: i32) -> EngineResult<Stamina> {
        let mut tx = self.pool.begin().await?;
        let mut stamina = Self::locked(&mut tx, user_id).await?;
        stamina.maybe_reset(Utc::now());
        if stamina.current < amount {
            return Err(EngineError::InsufficientStamina {
                current: stamina.current,
            });
        }
        stamina.current -= amount;
        Self::save(&mut tx, &stamina).await?;
        tx.commit().await?;
        Ok(stamina)
    }
}

// ============================================================================
// Gifts
// ============================================================================

pub struct PgGiftRepository {
    pool: PgPool,
}

impl PgGiftRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GiftRepository for PgGiftRepository {
    async fn get(&self, gift_id: Uuid) -> EngineResult<Option<Gift>> {
        let gift = sqlx::query_as::<_, Gift>("SELECT * FROM gifts WHERE id = $1")
            .bind(gift_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(gift)
    }

    async fn list_for_user(
        &self,
        user_id: &str,
        character_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> EngineResult<Vec<Gift>> {
        let gifts = sqlx::query_as::<_, Gift>(
            r#"
            SELECT * FROM gifts
            WHERE user_id = $1 AND ($2::text IS NULL OR character_id = $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(user_id)
        .bind(character_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(gifts)
    }

    async fn mark_acknowledged(&self, gift_id: Uuid) -> EngineResult<()> {
        sqlx::query("UPDATE gifts SET status = $2, acknowledged_at = NOW() WHERE id = $1")
            .bind(gift_id)
            .bind(GiftStatus::Acknowledged.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_failed(&self, gift_id: Uuid) -> EngineResult<()> {
        sqlx::query("UPDATE gifts SET status = $2 WHERE id = $1")
            .bind(gift_id)
            .bind(GiftStatus::Failed.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// ============================================================================
// Effects
// ============================================================================

pub struct PgEffectRepository {
    pool: PgPool,
}

impl PgEffectRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EffectRepository for PgEffectRepository {
    async fn list_active(
        &self,
        user_id: &str,
        character_id: &str,
    ) -> EngineResult<Vec<ActiveEffect>> {
        let effects = sqlx::query_as::<_, ActiveEffect>(
            "SELECT * FROM active_effects WHERE user_id = $1 AND character_id = $2 ORDER BY created_at",
        )
        .bind(user_id)
        .bind(character_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(effects)
    }

    async fn decrement_and_expire(
        &self,
        user_id: &str,
        character_id: &str,
    ) -> EngineResult<Vec<ActiveEffect>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE active_effects SET remaining_messages = remaining_messages - 1
             WHERE user_id = $1 AND character_id = $2",
        )
        .bind(user_id)
        .bind(character_id)
        .execute(&mut *tx)
        .await?;

        let expired = sqlx::query_as::<_, ActiveEffect>(
            "DELETE FROM active_effects
             WHERE user_id = $1 AND character_id = $2 AND remaining_messages <= 0
             RETURNING *",
        )
        .bind(user_id)
        .bind(character_id)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(expired)
    }
}

// ============================================================================
// Subscriptions
// ============================================================================

pub struct PgSubscriptionRepository {
    pool: PgPool,
}

impl PgSubscriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionRepository for PgSubscriptionRepository {
    async fn get(&self, user_id: &str) -> EngineResult<Option<Subscription>> {
        let subscription =
            sqlx::query_as::<_, Subscription>("SELECT * FROM subscriptions WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(subscription)
    }

    async fn upsert(&self, subscription: &Subscription) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (user_id, tier, started_at, expires_at, auto_renew, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (user_id) DO UPDATE SET
                tier = EXCLUDED.tier,
                started_at = EXCLUDED.started_at,
                expires_at = EXCLUDED.expires_at,
                auto_renew = EXCLUDED.auto_renew,
                updated_at = NOW()
            "#,
        )
        .bind(&subscription.user_id)
        .bind(&subscription.tier)
        .bind(subscription.started_at)
        .bind(subscription.expires_at)
        .bind(subscription.auto_renew)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ============================================================================
// Ledger
// ============================================================================

pub struct PgLedgerRepository {
    pool: PgPool,
}

impl PgLedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn insert_ledger_query(entry: &LedgerEntry) -> sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments> {
    sqlx::query(
        r#"
        INSERT INTO ledger (id, user_id, entry_type, amount, balance_after, description, extra_data, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(entry.id)
    .bind(&entry.user_id)
    .bind(&entry.entry_type)
    .bind(entry.amount)
    .bind(entry.balance_after)
    .bind(&entry.description)
    .bind(&entry.extra_data)
    .bind(entry.created_at)
}

#[async_trait]
impl LedgerRepository for PgLedgerRepository {
    async fn append(&self, entry: &LedgerEntry) -> EngineResult<()> {
        insert_ledger_query(entry).execute(&self.pool).await?;
        Ok(())
    }

    async fn list(&self, user_id: &str, limit: i64, offset: i64) -> EngineResult<Vec<LedgerEntry>> {
        let entries = sqlx::query_as::<_, LedgerEntry>(
            r#"
            SELECT * FROM ledger
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }
}

// ============================================================================
// Idempotency Keys
// ============================================================================

pub struct PgIdempotencyRepository {
    pool: PgPool,
}

impl PgIdempotencyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdempotencyRepository for PgIdempotencyRepository {
    async fn get(&self, key: &str) -> EngineResult<Option<IdempotencyRecord>> {
        let record = sqlx::query_as::<_, IdempotencyRecord>(
            "SELECT * FROM idempotency_keys WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn delete(&self, key: &str) -> EngineResult<()> {
        sqlx::query("DELETE FROM idempotency_keys WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// ============================================================================
// Emotion History
// ============================================================================

pub struct PgEmotionHistoryRepository {
    pool: PgPool,
}

impl PgEmotionHistoryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn insert_emotion_history_query(
    entry: &EmotionHistoryEntry,
) -> sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments> {
    sqlx::query(
        r#"
        INSERT INTO emotion_history (id, user_id, character_id, delta, score_after, state_after, reason, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(entry.id)
    .bind(&entry.user_id)
    .bind(&entry.character_id)
    .bind(entry.delta)
    .bind(entry.score_after)
    .bind(&entry.state_after)
    .bind(&entry.reason)
    .bind(entry.created_at)
}

#[async_trait]
impl EmotionHistoryRepository for PgEmotionHistoryRepository {
    async fn append(&self, entry: &EmotionHistoryEntry) -> EngineResult<()> {
        insert_emotion_history_query(entry).execute(&self.pool).await?;
        Ok(())
    }

    async fn list(
        &self,
        user_id: &str,
        character_id: &str,
        limit: i64,
    ) -> EngineResult<Vec<EmotionHistoryEntry>> {
        let entries = sqlx::query_as::<_, EmotionHistoryEntry>(
            r#"
            SELECT * FROM emotion_history
            WHERE user_id = $1 AND character_id = $2
            ORDER BY created_at DESC
            LIMIT $3
            "#,
        )
        .bind(user_id)
        .bind(character_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }
}

// ============================================================================
// Unit of Work
// ============================================================================

pub struct PgUnitOfWork {
    pool: PgPool,
}

impl PgUnitOfWork {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn begin(&self) -> EngineResult<Box<dyn TxOps>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }
}

/// Dropping an uncommitted `PgTx` rolls the transaction back via sqlx.
struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl TxOps for PgTx {
    async fn wallet_for_update(&mut self, user_id: &str) -> EngineResult<Wallet> {
        if let Some(wallet) =
            sqlx::query_as::<_, Wallet>("SELECT * FROM wallets WHERE user_id = $1 FOR UPDATE")
                .bind(user_id)
                .fetch_optional(&mut *self.tx)
                .await?
        {
            return Ok(wallet);
        }

        sqlx::query("INSERT INTO wallets (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id)
            .execute(&mut *self.tx)
            .await?;

        let wallet =
            sqlx::query_as::<_, Wallet>("SELECT * FROM wallets WHERE user_id = $1 FOR UPDATE")
                .bind(user_id)
                .fetch_one(&mut *self.tx)
                .await?;
        Ok(wallet)
    }

    async fn update_wallet(&mut self, wallet: &Wallet) -> EngineResult<()> {
        sqlx::query(
            r#"
            UPDATE wallets SET
                daily_free_credits = $2,
                purchased_credits = $3,
                bonus_credits = $4,
                daily_refreshed_at = $5,
                updated_at = NOW()
            WHERE user_id = $1
            "#,
        )
        .bind(&wallet.user_id)
        .bind(wallet.daily_free_credits)
        .bind(wallet.purchased_credits)
        .bind(wallet.bonus_credits)
        .bind(wallet.daily_refreshed_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn append_ledger(&mut self, entry: &LedgerEntry) -> EngineResult<()> {
        insert_ledger_query(entry).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn append_message(&mut self, message: &Message) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO messages (message_id, session_id, role, content, tokens_used, extra_data, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(message.message_id)
        .bind(message.session_id)
        .bind(&message.role)
        .bind(&message.content)
        .bind(message.tokens_used)
        .bind(&message.extra_data)
        .bind(message.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn bump_session(
        &mut self,
        session_id: Uuid,
        messages: i64,
        credits_spent: i64,
    ) -> EngineResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE sessions SET
                total_messages = total_messages + $2,
                total_credits_spent = total_credits_spent + $3,
                updated_at = NOW()
            WHERE session_id = $1
            "#,
        )
        .bind(session_id)
        .bind(messages)
        .bind(credits_spent)
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(EngineError::SessionNotFound);
        }
        Ok(())
    }

    async fn insert_gift(&mut self, gift: &Gift) -> EngineResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO gifts (
                id, user_id, character_id, session_id, gift_type, gift_name,
                price, xp_reward, tier, status, idempotency_key, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(gift.id)
        .bind(&gift.user_id)
        .bind(&gift.character_id)
        .bind(gift.session_id)
        .bind(&gift.gift_type)
        .bind(&gift.gift_name)
        .bind(gift.price)
        .bind(gift.xp_reward)
        .bind(gift.tier)
        .bind(&gift.status)
        .bind(&gift.idempotency_key)
        .bind(gift.created_at)
        .execute(&mut *self.tx)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(EngineError::Duplicate(format!(
                    "gift with idempotency key {} already exists",
                    gift.idempotency_key
                )))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn put_idempotency(&mut self, record: &IdempotencyRecord) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO idempotency_keys (key, user_id, gift_id, result, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (key) DO UPDATE SET
                result = EXCLUDED.result,
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(&record.key)
        .bind(&record.user_id)
        .bind(record.gift_id)
        .bind(&record.result)
        .bind(record.created_at)
        .bind(record.expires_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn user_state_for_update(
        &mut self,
        user_id: &str,
        character_id: &str,
    ) -> EngineResult<UserState> {
        if let Some(state) = sqlx::query_as::<_, UserState>(
            "SELECT * FROM user_states WHERE user_id = $1 AND character_id = $2 FOR UPDATE",
        )
        .bind(user_id)
        .bind(character_id)
        .fetch_optional(&mut *self.tx)
        .await?
        {
            return Ok(state);
        }

        sqlx::query(
            "INSERT INTO user_states (user_id, character_id) VALUES ($1, $2)
             ON CONFLICT (user_id, character_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(character_id)
        .execute(&mut *self.tx)
        .await?;

        let state = sqlx::query_as::<_, UserState>(
            "SELECT * FROM user_states WHERE user_id = $1 AND character_id = $2 FOR UPDATE",
        )
        .bind(user_id)
        .bind(character_id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(state)
    }

    async fn update_user_state(&mut self, state: &UserState) -> EngineResult<()> {
        sqlx::query(
            r#"
            UPDATE user_states SET
                intimacy_xp = $3,
                intimacy_level = $4,
                daily_xp_earned = $5,
                last_daily_reset = $6,
                streak_days = $7,
                last_interaction_date = $8,
                emotion_score = $9,
                emotion_high = $10,
                emotion_low = $11,
                emotion_update_count = $12,
                emotion_updated_at = $13,
                events = $14,
                version = version + 1,
                updated_at = NOW()
            WHERE user_id = $1 AND character_id = $2
            "#,
        )
        .bind(&state.user_id)
        .bind(&state.character_id)
        .bind(state.intimacy_xp)
        .bind(state.intimacy_level)
        .bind(state.daily_xp_earned)
        .bind(state.last_daily_reset)
        .bind(state.streak_days)
        .bind(state.last_interaction_date)
        .bind(state.emotion_score)
        .bind(state.emotion_high)
        .bind(state.emotion_low)
        .bind(state.emotion_update_count)
        .bind(state.emotion_updated_at)
        .bind(sqlx::types::Json(&state.events))
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn replace_effect(&mut self, effect: &ActiveEffect) -> EngineResult<()> {
        sqlx::query(
            "DELETE FROM active_effects WHERE user_id = $1 AND character_id = $2 AND effect_type = $3",
        )
        .bind(&effect.user_id)
        .bind(&effect.character_id)
        .bind(&effect.effect_type)
        .execute(&mut *self.tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO active_effects (
                id, user_id, character_id, effect_type, prompt_modifier,
                remaining_messages, gift_id, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(effect.id)
        .bind(&effect.user_id)
        .bind(&effect.character_id)
        .bind(&effect.effect_type)
        .bind(&effect.prompt_modifier)
        .bind(effect.remaining_messages)
        .bind(effect.gift_id)
        .bind(effect.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn stamina_for_update(&mut self, user_id: &str) -> EngineResult<Stamina> {
        if let Some(stamina) =
            sqlx::query_as::<_, Stamina>("SELECT * FROM stamina WHERE user_id = $1 FOR UPDATE")
                .bind(user_id)
                .fetch_optional(&mut *self.tx)
                .await?
        {
            return Ok(stamina);
        }

        let fresh = Stamina::new(user_id.to_string());
        sqlx::query(
            r#"INSERT INTO stamina (user_id, current, "max", last_reset_at) VALUES ($1, $2, $3, $4)
               ON CONFLICT (user_id) DO NOTHING"#,
        )
        .bind(&fresh.user_id)
        .bind(fresh.current)
        .bind(fresh.max)
        .bind(fresh.last_reset_at)
        .execute(&mut *self.tx)
        .await?;

        let stamina =
            sqlx::query_as::<_, Stamina>("SELECT * FROM stamina WHERE user_id = $1 FOR UPDATE")
                .bind(user_id)
                .fetch_one(&mut *self.tx)
                .await?;
        Ok(stamina)
    }

    async fn update_stamina(&mut self, stamina: &Stamina) -> EngineResult<()> {
        sqlx::query(
            r#"UPDATE stamina SET current = $2, "max" = $3, last_reset_at = $4 WHERE user_id = $1"#,
        )
        .bind(&stamina.user_id)
        .bind(stamina.current)
        .bind(stamina.max)
        .bind(stamina.last_reset_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_subscription(&mut self, subscription: &Subscription) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (user_id, tier, started_at, expires_at, auto_renew, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (user_id) DO UPDATE SET
                tier = EXCLUDED.tier,
                expires_at = EXCLUDED.expires_at,
                auto_renew = EXCLUDED.auto_renew,
                updated_at = NOW()
            "#,
        )
        .bind(&subscription.user_id)
        .bind(&subscription.tier)
        .bind(subscription.started_at)
        .bind(subscription.expires_at)
        .bind(subscription.auto_renew)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn append_emotion_history(&mut self, entry: &EmotionHistoryEntry) -> EngineResult<()> {
        insert_emotion_history_query(entry)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> EngineResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> EngineResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
