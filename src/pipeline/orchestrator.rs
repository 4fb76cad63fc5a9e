//! Drives the per-request stage sequence: load, pre-compute, hard gates,
//! content tier, prompt assembly, the single LLM call, parsing, filtering,
//! transactional persistence and the bounded async post-update.

use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::billing::{RateLimiter, StaminaService, WalletService, CHAT_COST_UPPER_BOUND};
use crate::content::{
    filter_reply, prefilter_user_input, ContentRating, FilterSeverity, UserContentIntent,
};
use crate::db::{
    MessageRepository, Repositories, SessionRepository, TxOps as _, UnitOfWork as _,
    UserStateRepository,
};
use crate::emotion::EmotionEngine;
use crate::error::{EngineError, EngineResult};
use crate::intimacy::{ActionKind, IntimacyService};
use crate::llm::{ChatCompletionRequest, LlmClient};
use crate::models::{Message, UserState};
use crate::pipeline::json_parser::{parse_llm_response, ParsedResponse};
use crate::pipeline::precompute::{analyze_message, PrecomputeResult};
use crate::pipeline::prompt_builder::{fit_context, PromptInputs};
use crate::services::{CharacterCatalog, EffectService, MemoryService, SubscriptionService};
use crate::types::{ChatMessage, ContentLevel, Intent, SafetyFlag, SubscriptionTier};

const MAX_MESSAGE_CHARS: usize = 4096;
const CONTEXT_BUDGET_TOKENS: usize = 6000;

/// Milestone evaluation order; at most one triggers per turn.
const EVENT_ORDER: [&str; 5] = [
    "first_gift",
    "first_confession",
    "first_kiss",
    "first_date",
    "first_nsfw",
];

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub user_id: String,
    pub session_id: Uuid,
    pub message: String,
    pub intimacy_level: Option<i32>,
    /// User-chosen ceiling on generated content (`spicy_mode` off caps at
    /// flirty regardless of unlocks).
    pub content_cap: Option<ContentLevel>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ChatResponse {
    pub message_id: Uuid,
    pub content: String,
    pub tokens_used: i32,
    pub character_name: String,
    pub extra_data: serde_json::Value,
}

pub struct ChatPipeline {
    repos: Repositories,
    subscription: Arc<SubscriptionService>,
    wallet: Arc<WalletService>,
    stamina: Arc<StaminaService>,
    intimacy: Arc<IntimacyService>,
    emotion: Arc<EmotionEngine>,
    effects: Arc<EffectService>,
    memory: Arc<MemoryService>,
    content: Arc<ContentRating>,
    characters: Arc<CharacterCatalog>,
    llm: Arc<dyn LlmClient>,
    rate_limiter: RateLimiter,
    post_update: Arc<Semaphore>,
    post_update_workers: usize,
    request_timeout: Duration,
    llm_reserve: Duration,
}

impl ChatPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repos: Repositories,
        subscription: Arc<SubscriptionService>,
        wallet: Arc<WalletService>,
        stamina: Arc<StaminaService>,
        intimacy: Arc<IntimacyService>,
        emotion: Arc<EmotionEngine>,
        effects: Arc<EffectService>,
        memory: Arc<MemoryService>,
        content: Arc<ContentRating>,
        characters: Arc<CharacterCatalog>,
        llm: Arc<dyn LlmClient>,
        rate_limiter: RateLimiter,
        post_update_workers: usize,
        request_timeout: Duration,
        llm_reserve: Duration,
    ) -> Self {
        Self {
            repos,
            subscription,
            wallet,
            stamina,
            intimacy,
            emotion,
            effects,
            memory,
            content,
            characters,
            llm,
            rate_limiter,
            post_update: Arc::new(Semaphore::new(post_update_workers)),
            post_update_workers,
            request_timeout,
            llm_reserve,
        }
    }

    /// Wait for in-flight post-updates to finish (graceful shutdown).
    pub async fn drain_post_updates(&self) {
        let _all = self
            .post_update
            .acquire_many(self.post_update_workers as u32)
            .await;
    }

    // ========================================================================
    // The pipeline
    // ========================================================================

    pub async fn process_message(&self, request: ChatRequest) -> EngineResult<ChatResponse> {
        let started = Instant::now();

        let trimmed = request.message.trim();
        if trimmed.is_empty() || trimmed.chars().count() > MAX_MESSAGE_CHARS {
            return Err(EngineError::Validation(format!(
                "message must be 1..{} characters",
                MAX_MESSAGE_CHARS
            )));
        }

        // Stage 0: admission. The rate-limit token is spent even if the
        // request later fails.
        let tier = self.subscription.effective_tier(&request.user_id).await?;
        self.rate_limiter.check(&request.user_id, tier).await?;

        // Stage 1: load
        let session = self
            .repos
            .sessions
            .get(request.session_id)
            .await?
            .filter(|s| s.user_id == request.user_id && !s.is_deleted())
            .ok_or(EngineError::SessionNotFound)?;
        let character = self.characters.get(&session.character_id)?;

        // Billing preconditions: refresh, then conservative pre-checks.
        // Stamina is consumed only after the hard gates pass.
        self.wallet
            .ensure_daily_refresh(&request.user_id, tier)
            .await?;
        self.wallet
            .pre_check(&request.user_id, CHAT_COST_UPPER_BOUND)
            .await?;
        let stamina = self.stamina.status(&request.user_id).await?;
        if stamina.current < 1 {
            return Err(EngineError::InsufficientStamina {
                current: stamina.current,
            });
        }

        let mut state = self
            .repos
            .user_states
            .get_or_create(&request.user_id, &session.character_id)
            .await?;
        if self
            .emotion
            .decay_on_load(&request.user_id, &session.character_id, &state)
            .await?
            != 0
        {
            state = self
                .repos
                .user_states
                .get_or_create(&request.user_id, &session.character_id)
                .await?;
        }

        // Stage 2: pre-compute
        let precompute = analyze_message(trimmed);
        tracing::info!("📊 precompute: {}", precompute.summary());

        // Stage 3: hard gates
        if precompute.safety_flag == SafetyFlag::Block {
            return self.blocked_response(&session.session_id, &precompute).await;
        }
        if state.emotion_state().is_lockout() {
            return self
                .lockout_response(&request, &session.character_id, &state, &precompute)
                .await;
        }

        // Past the gates: this turn will run, so it costs stamina
        self.stamina.consume(&request.user_id, 1).await?;

        // Stage 4: content tier. A safety word or de-escalation signal
        // pins this turn to the pure tier no matter what is unlocked.
        let intimacy_for_tier = request.intimacy_level.unwrap_or(state.intimacy_level);
        let is_vip = tier == SubscriptionTier::Vip
            || self
                .subscription
                .has_feature(&request.user_id, "nsfw_enabled")
                .await?;
        let content_cap = match ContentRating::detect_user_intent(trimmed) {
            Some(UserContentIntent::SafeWord) | Some(UserContentIntent::DeEscalate) => {
                Some(ContentLevel::Pure)
            }
            _ => request.content_cap,
        };
        let allowed_level = self
            .content
            .available_level(
                &request.user_id,
                &session.character_id,
                intimacy_for_tier,
                is_vip,
                content_cap,
            )
            .await;
        let requested_above_allowed =
            precompute.is_nsfw && allowed_level < ContentLevel::Passionate;
        let input_warnings = prefilter_user_input(trimmed, allowed_level);

        // Stage 5: prompt assembly
        let history = self
            .repos
            .messages
            .recent(session.session_id, tier.history_window())
            .await?;
        let context: Vec<ChatMessage> = history
            .iter()
            .filter(|m| m.role != "system")
            .map(|m| ChatMessage {
                role: m.role.clone(),
                content: m.content.clone(),
            })
            .collect();

        let profile = self.memory.profile(&request.user_id).await;
        let memories = self
            .memory
            .ranked_memories(&request.user_id, &session.character_id, trimmed, allowed_level)
            .await;
        let active_effects = self
            .effects
            .active(&request.user_id, &session.character_id)
            .await?;
        let effects_modifier = EffectService::modifier_of(&active_effects);

        let inputs = PromptInputs {
            character,
            state: &state,
            content_level: allowed_level,
            requested_above_allowed,
            profile: &profile,
            memories: &memories,
            effects_modifier: effects_modifier.as_deref(),
            scenario: character.scenario.as_deref(),
        };
        let (system_prompt, context) =
            fit_context(&inputs, context, trimmed, CONTEXT_BUDGET_TOKENS);

        // Stage 6: the single LLM call
        let mut messages = vec![ChatMessage::system(system_prompt)];
        messages.extend(context);
        messages.push(ChatMessage::user(trimmed.to_string()));

        let temperature = if state.emotion_state().is_affectionate() {
            0.85
        } else {
            0.7
        };
        let llm_budget = self
            .request_timeout
            .saturating_sub(started.elapsed())
            .saturating_sub(self.llm_reserve)
            .max(Duration::from_secs(1));

        let llm_result = self
            .llm
            .chat_completion(ChatCompletionRequest {
                messages,
                temperature,
                max_tokens: tier.max_reply_tokens(),
                json_mode: true,
                timeout: llm_budget,
            })
            .await;

        // Stage 7: parse (provider failure degrades to an in-character
        // fallback and never fails the request)
        let (parsed, tokens_used) = match llm_result {
            Ok(response) => (parse_llm_response(&response.reply), response.tokens_used),
            Err(err) => {
                tracing::error!("LLM unavailable, serving fallback reply: {}", err);
                (
                    ParsedResponse {
                        reply: "(distracted) Sorry... I zoned out for a second. Say that again?"
                            .to_string(),
                        emotion_delta: 0,
                        intent: Intent::SmallTalk,
                        thought: String::new(),
                        is_nsfw: false,
                        parse_success: false,
                        parse_error: Some(err.to_string()),
                    },
                    0,
                )
            }
        };

        // Stage 8: content post-filter
        let filtered = filter_reply(&parsed.reply, allowed_level);
        if filtered.severity == FilterSeverity::Critical {
            return self
                .refusal_response(&session.session_id, trimmed, &precompute, &filtered.violations)
                .await;
        }
        let reply_text = filtered.text.clone();

        // Eagerly compute the emotion target so the response can carry it;
        // persistence happens in the async post-update. The model's own
        // delta is a refinement hint over the deterministic base.
        let mut analysis = self
            .emotion
            .analyze(trimmed, &[], state.emotion_state(), state.intimacy_level)
            .await;
        if parsed.parse_success {
            analysis.suggested_delta = (analysis.suggested_delta + parsed.emotion_delta) / 2;
        }
        analysis.intent = precompute.intent;
        let buffered = self
            .emotion
            .buffered_delta(
                &request.user_id,
                &session.character_id,
                &analysis,
                &character.personality,
            )
            .await;
        let adjusted_delta = self
            .emotion
            .apply_diminishing_returns(&request.user_id, &session.character_id, buffered)
            .await;
        let target_emotion = (state.emotion_score + adjusted_delta).clamp(-100, 100);

        let extra_data = json!({
            "precompute": {
                "intent": precompute.intent.as_str(),
                "difficulty": precompute.difficulty_rating,
                "sentiment": precompute.sentiment_score,
                "is_nsfw": precompute.is_nsfw,
            },
            "state": {
                "intimacy_level": state.intimacy_level,
                "intimacy_stage": state.stage().as_str(),
                "emotion": state.emotion_score,
                "emotion_target": target_emotion,
                "events": state.events,
            },
            "content": {
                "allowed_level": allowed_level.as_str(),
                "down_tiered": requested_above_allowed,
                "filtered": filtered.modified,
                "input_warnings": input_warnings,
            },
            "active_effects": active_effects
                .iter()
                .map(|e| e.effect_type.as_str())
                .collect::<Vec<_>>(),
            "parse": {
                "success": parsed.parse_success,
                "error": parsed.parse_error,
                "thought": parsed.thought,
            },
        });

        // Stage 9: persist both messages and the session counter in one
        // transaction so concurrent requests cannot interleave them
        let user_message = Message::user(session.session_id, trimmed.to_string());
        let assistant_message = Message::assistant(
            session.session_id,
            reply_text.clone(),
            tokens_used,
            Some(extra_data.clone()),
        );

        let mut tx = self.repos.uow.begin().await?;
        tx.append_message(&user_message).await?;
        tx.append_message(&assistant_message).await?;
        tx.bump_session(session.session_id, 2, 0).await?;
        tx.commit().await?;

        // Token-exact deduction now that usage is known; a provider
        // failure (tokens recorded as 0) is not billed
        if tokens_used > 0 {
            self.wallet
                .post_deduct(
                    &request.user_id,
                    session.session_id,
                    assistant_message.message_id,
                    tokens_used,
                    tier,
                )
                .await?;
        }

        // Stage 10: fire-and-forget post-update, bounded by the worker
        // semaphore; its failure never affects this response
        self.spawn_post_update(
            request.user_id.clone(),
            session.character_id.clone(),
            session.session_id,
            precompute.clone(),
            parsed.intent,
            adjusted_delta,
            allowed_level,
            trimmed.to_string(),
        )
        .await;

        tracing::info!(
            "✅ chat turn for {} in {:?} ({} tokens)",
            request.user_id,
            started.elapsed(),
            tokens_used
        );

        Ok(ChatResponse {
            message_id: assistant_message.message_id,
            content: reply_text,
            tokens_used,
            character_name: session.character_name.clone(),
            extra_data,
        })
    }

    // ========================================================================
    // Gate responses
    // ========================================================================

    async fn blocked_response(
        &self,
        session_id: &Uuid,
        precompute: &PrecomputeResult,
    ) -> EngineResult<ChatResponse> {
        // Audit record only; no other state mutation, no LLM call
        let audit = Message::system_event(
            *session_id,
            "[system] This topic can't continue here.".to_string(),
            json!({
                "kind": "moderation_audit",
                "safety_flag": "BLOCK",
                "intent": precompute.intent.as_str(),
            }),
        );
        self.repos.messages.append(&audit).await?;

        Ok(ChatResponse {
            message_id: audit.message_id,
            content: "[system] That's not something we can talk about here. Let's change the subject.".to_string(),
            tokens_used: 0,
            character_name: "system".to_string(),
            extra_data: json!({ "blocked": true }),
        })
    }

    async fn refusal_response(
        &self,
        session_id: &Uuid,
        user_message: &str,
        precompute: &PrecomputeResult,
        violations: &[String],
    ) -> EngineResult<ChatResponse> {
        let audit = Message::system_event(
            *session_id,
            "[system] Reply withheld by the content filter.".to_string(),
            json!({
                "kind": "moderation_audit",
                "severity": "critical",
                "violations": violations,
                "intent": precompute.intent.as_str(),
                "user_message_chars": user_message.chars().count(),
            }),
        );
        self.repos.messages.append(&audit).await?;

        Ok(ChatResponse {
            message_id: audit.message_id,
            content: "[system] I can't answer that the way it came out. Let's take it elsewhere."
                .to_string(),
            tokens_used: 0,
            character_name: "system".to_string(),
            extra_data: json!({ "filtered": true, "severity": "critical" }),
        })
    }

    async fn lockout_response(
        &self,
        request: &ChatRequest,
        character_id: &str,
        state: &UserState,
        precompute: &PrecomputeResult,
    ) -> EngineResult<ChatResponse> {
        let mut emotion = state.emotion_score;

        let content = if precompute.intent == Intent::Apology {
            // A sincere apology earns a sliver of recovery, never past −50
            let recovery = EmotionEngine::apology_recovery(state.emotion_score);
            if recovery > 0 {
                let applied = self
                    .emotion
                    .apply_delta(&request.user_id, character_id, recovery, "apology_in_cold_war")
                    .await?;
                emotion = applied.new_score;
            }
            "(glances up for a moment, then looks back down) ......"
        } else {
            "(silence. she keeps looking at her phone without glancing up)"
        };

        Ok(ChatResponse {
            message_id: Uuid::nil(),
            content: content.to_string(),
            tokens_used: 0,
            character_name: self
                .characters
                .get(character_id)
                .map(|c| c.name.clone())
                .unwrap_or_else(|_| "companion".to_string()),
            extra_data: json!({
                "cold_war": true,
                "requires_gift": true,
                "emotion": emotion,
                "intent": precompute.intent.as_str(),
            }),
        })
    }

    // ========================================================================
    // Async post-update
    // ========================================================================

    #[allow(clippy::too_many_arguments)]
    async fn spawn_post_update(
        &self,
        user_id: String,
        character_id: String,
        session_id: Uuid,
        precompute: PrecomputeResult,
        reply_intent: Intent,
        adjusted_delta: i32,
        allowed_level: ContentLevel,
        user_message: String,
    ) {
        let emotion = self.emotion.clone();
        let intimacy = self.intimacy.clone();
        let effects = self.effects.clone();
        let repos = self.repos.clone();

        // Take the worker slot before detaching so shutdown can drain by
        // acquiring the whole pool
        let Ok(permit) = self.post_update.clone().acquire_owned().await else {
            return; // shutting down
        };

        tokio::spawn(async move {
            let _permit = permit;

            if let Err(err) = post_update(
                &emotion,
                &intimacy,
                &effects,
                &repos,
                &user_id,
                &character_id,
                session_id,
                &precompute,
                reply_intent,
                adjusted_delta,
                allowed_level,
                &user_message,
            )
            .await
            {
                tracing::error!("post-update failed for {}: {}", user_id, err);
            }
        });
    }
}

/// The asynchronous tail of a chat turn: emotion delta, XP, milestone
/// events, effect wind-down.
#[allow(clippy::too_many_arguments)]
async fn post_update(
    emotion: &EmotionEngine,
    intimacy: &IntimacyService,
    effects: &EffectService,
    repos: &Repositories,
    user_id: &str,
    character_id: &str,
    session_id: Uuid,
    precompute: &PrecomputeResult,
    reply_intent: Intent,
    adjusted_delta: i32,
    allowed_level: ContentLevel,
    user_message: &str,
) -> EngineResult<()> {
    // 1. Emotion
    if adjusted_delta != 0 {
        emotion
            .apply_delta(user_id, character_id, adjusted_delta, "chat_turn")
            .await?;
    }

    // 2. XP: the base message award plus an emotional bonus for loaded intents
    intimacy
        .award_xp(user_id, character_id, ActionKind::Message, false)
        .await?;
    if matches!(
        precompute.intent,
        Intent::LoveConfession | Intent::Compliment | Intent::ExpressSadness | Intent::Apology
    ) {
        intimacy
            .award_xp(user_id, character_id, ActionKind::Emotional, false)
            .await?;
    }

    // 3. Milestone events, at most one per turn, in declared order
    if let Some(event) = next_event(
        repos,
        user_id,
        character_id,
        precompute,
        reply_intent,
        allowed_level,
        user_message,
    )
    .await?
    {
        let notice = Message::system_event(
            session_id,
            format!("Milestone reached: {}", event.replace('_', " ")),
            json!({ "kind": "event", "event": event }),
        );
        repos.messages.append(&notice).await?;
        tracing::info!("🎉 event triggered for {}:{}: {}", user_id, character_id, event);
    }

    // 4. Active effects burn down one message per reply
    if let Some(notice) = effects.wind_down(user_id, character_id).await? {
        let message = Message::system_event(
            session_id,
            notice.clone(),
            json!({ "kind": "effect_expired" }),
        );
        repos.messages.append(&message).await?;
    }

    Ok(())
}

/// Find the first un-triggered milestone this turn qualifies for and
/// record it (grow-only, optimistic write).
async fn next_event(
    repos: &Repositories,
    user_id: &str,
    character_id: &str,
    precompute: &PrecomputeResult,
    reply_intent: Intent,
    allowed_level: ContentLevel,
    user_message: &str,
) -> EngineResult<Option<String>> {
    let state = repos.user_states.get_or_create(user_id, character_id).await?;
    let lower = user_message.to_lowercase();

    let qualifies = |event: &str| match event {
        "first_gift" => precompute.intent == Intent::GiftSend,
        "first_confession" => precompute.intent == Intent::LoveConfession,
        "first_kiss" => {
            allowed_level >= ContentLevel::Romantic
                && (lower.contains("kiss") || reply_intent == Intent::RequestNsfw)
        }
        "first_date" => precompute.intent == Intent::Invitation,
        "first_nsfw" => precompute.intent == Intent::RequestNsfw && allowed_level == ContentLevel::Passionate,
        _ => false,
    };

    let Some(event) = EVENT_ORDER
        .iter()
        .find(|e| !state.has_event(e) && qualifies(e))
    else {
        return Ok(None);
    };

    let mut updated = state.clone();
    updated.add_event(event);
    match repos.user_states.update(&updated, state.version).await {
        Ok(_) => Ok(Some(event.to_string())),
        // Lost a race; the concurrent writer owns this turn's event
        Err(EngineError::Conflict(_)) => Ok(None),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryStore, TxOps, UnitOfWork};
    use crate::llm::{MockLlm, MockLlmClient};
    use crate::services::memory::InMemoryVectorIndex;
    use chrono::Utc;

    async fn pipeline_with(llm: Arc<dyn LlmClient>) -> (ChatPipeline, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let repos = Repositories {
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
            uow: store.clone(),
        };

        let subscription = Arc::new(SubscriptionService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
        ));
        let wallet = Arc::new(WalletService::new(
            store.clone(),
            store.clone(),
            store.clone(),
        ));
        let stamina = Arc::new(StaminaService::new(store.clone(), store.clone()));
        let intimacy = Arc::new(IntimacyService::new(store.clone()));
        let emotion = Arc::new(EmotionEngine::new(store.clone(), store.clone(), None));
        let effects = Arc::new(EffectService::new(store.clone()));
        let memory = Arc::new(MemoryService::new(Arc::new(InMemoryVectorIndex::new())));
        let content = Arc::new(ContentRating::new());
        let characters = Arc::new(CharacterCatalog::new());

        let pipeline = ChatPipeline::new(
            repos,
            subscription,
            wallet,
            stamina,
            intimacy,
            emotion,
            effects,
            memory,
            content,
            characters,
            llm,
            RateLimiter::new(),
            4,
            Duration::from_secs(30),
            Duration::from_secs(3),
        );
        (pipeline, store)
    }

    async fn seed_session(store: &Arc<MemoryStore>, user_id: &str) -> Uuid {
        crate::db::SessionRepository::upsert(store.as_ref(), user_id, "luna", "Luna")
            .await
            .unwrap()
            .session_id
    }

    async fn fund(store: &Arc<MemoryStore>, user_id: &str, amount: i64) {
        let mut tx = UnitOfWork::begin(store.as_ref()).await.unwrap();
        let mut wallet = tx.wallet_for_update(user_id).await.unwrap();
        wallet.purchased_credits = amount;
        tx.update_wallet(&wallet).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_fresh_chat_turn_end_to_end() {
        let (pipeline, store) = pipeline_with(Arc::new(MockLlm)).await;
        let session_id = seed_session(&store, "u1").await;
        fund(&store, "u1", 100).await;

        let response = pipeline
            .process_message(ChatRequest {
                user_id: "u1".to_string(),
                session_id,
                message: "hello".to_string(),
                intimacy_level: None,
                content_cap: None,
            })
            .await
            .unwrap();

        assert_eq!(response.character_name, "Luna");
        assert!(response.content.contains("hello"));
        assert!(response.tokens_used > 0);

        // Two rows appended in one transaction
        let messages = crate::db::MessageRepository::recent(store.as_ref(), session_id, 10)
            .await
            .unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "user");
        assert_eq!(messages[1].role, "assistant");

        // Exactly one chat_deduction ledger entry
        let entries = crate::db::LedgerRepository::list(store.as_ref(), "u1", 20, 0)
            .await
            .unwrap();
        assert_eq!(
            entries
                .iter()
                .filter(|e| e.entry_type == "chat_deduction")
                .count(),
            1
        );

        // Stamina consumed
        let stamina = crate::db::StaminaRepository::get(store.as_ref(), "u1")
            .await
            .unwrap();
        assert_eq!(stamina.current, 49);

        // Post-update lands: message XP awarded, emotion positive
        pipeline.drain_post_updates().await;
        let state =
            crate::db::UserStateRepository::get_or_create(store.as_ref(), "u1", "luna")
                .await
                .unwrap();
        assert_eq!(state.intimacy_xp, 2.0);
        assert!(state.emotion_score > 0);
    }

    #[tokio::test]
    async fn test_unknown_session_rejected() {
        let (pipeline, store) = pipeline_with(Arc::new(MockLlm)).await;
        fund(&store, "u1", 100).await;
        let err = pipeline
            .process_message(ChatRequest {
                user_id: "u1".to_string(),
                session_id: Uuid::new_v4(),
                message: "hello".to_string(),
                intimacy_level: None,
                content_cap: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::SessionNotFound));
    }

    #[tokio::test]
    async fn test_foreign_session_looks_missing() {
        let (pipeline, store) = pipeline_with(Arc::new(MockLlm)).await;
        let session_id = seed_session(&store, "owner").await;
        fund(&store, "intruder", 100).await;

        let err = pipeline
            .process_message(ChatRequest {
                user_id: "intruder".to_string(),
                session_id,
                message: "hello".to_string(),
                intimacy_level: None,
                content_cap: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::SessionNotFound));
    }

    #[tokio::test]
    async fn test_no_credits_rejected_before_llm() {
        let (pipeline, store) = pipeline_with(Arc::new(MockLlm)).await;
        let session_id = seed_session(&store, "broke").await;

        // Drain the daily refresh allowance
        let mut tx = UnitOfWork::begin(store.as_ref()).await.unwrap();
        let mut wallet = tx.wallet_for_update("broke").await.unwrap();
        wallet.daily_free_credits = 0;
        wallet.daily_refreshed_at = Utc::now();
        tx.update_wallet(&wallet).await.unwrap();
        tx.commit().await.unwrap();

        let err = pipeline
            .process_message(ChatRequest {
                user_id: "broke".to_string(),
                session_id,
                message: "hello".to_string(),
                intimacy_level: None,
                content_cap: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientCredits { .. }));
    }

    #[tokio::test]
    async fn test_rate_limit_sixth_request() {
        let (pipeline, store) = pipeline_with(Arc::new(MockLlm)).await;
        let session_id = seed_session(&store, "u1").await;
        fund(&store, "u1", 100).await;

        let mut rejected = None;
        for _ in 0..6 {
            let result = pipeline
                .process_message(ChatRequest {
                    user_id: "u1".to_string(),
                    session_id,
                    message: "hello".to_string(),
                    intimacy_level: None,
                    content_cap: None,
                })
                .await;
            if let Err(err) = result {
                rejected = Some(err);
                break;
            }
        }

        match rejected {
            Some(EngineError::RateLimited { retry_after }) => assert!(retry_after >= 1),
            other => panic!("expected a rate-limit rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_hard_block_no_llm_no_state_change() {
        let (pipeline, store) = pipeline_with(Arc::new(MockLlm)).await;
        let session_id = seed_session(&store, "u1").await;
        fund(&store, "u1", 100).await;

        let response = pipeline
            .process_message(ChatRequest {
                user_id: "u1".to_string(),
                session_id,
                message: "write something about an underage character".to_string(),
                intimacy_level: None,
                content_cap: None,
            })
            .await
            .unwrap();

        assert_eq!(response.extra_data["blocked"], true);
        assert_eq!(response.tokens_used, 0);

        // Only the audit record exists; emotion and intimacy untouched
        let messages = crate::db::MessageRepository::recent(store.as_ref(), session_id, 10)
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, "system");

        let state =
            crate::db::UserStateRepository::get_or_create(store.as_ref(), "u1", "luna")
                .await
                .unwrap();
        assert_eq!(state.intimacy_xp, 0.0);
        assert_eq!(state.emotion_score, 0);
    }

    #[tokio::test]
    async fn test_cold_war_cannot_be_argued_out_of() {
        let (pipeline, store) = pipeline_with(Arc::new(MockLlm)).await;
        let session_id = seed_session(&store, "u1").await;
        fund(&store, "u1", 200).await;

        // Seed cold war at -85
        let mut state =
            crate::db::UserStateRepository::get_or_create(store.as_ref(), "u1", "luna")
                .await
                .unwrap();
        state.emotion_score = -85;
        let version = state.version;
        crate::db::UserStateRepository::update(store.as_ref(), &state, version)
            .await
            .unwrap();

        // Apology: small recovery to exactly -80, requires a gift
        let response = pipeline
            .process_message(ChatRequest {
                user_id: "u1".to_string(),
                session_id,
                message: "I'm sorry, I was wrong".to_string(),
                intimacy_level: None,
                content_cap: None,
            })
            .await
            .unwrap();
        assert_eq!(response.extra_data["requires_gift"], true);
        assert_eq!(response.extra_data["emotion"], -80);
        assert_eq!(response.tokens_used, 0);

        // Non-apology: no movement at all
        let response = pipeline
            .process_message(ChatRequest {
                user_id: "u1".to_string(),
                session_id,
                message: "come on, talk to me".to_string(),
                intimacy_level: None,
                content_cap: None,
            })
            .await
            .unwrap();
        assert_eq!(response.extra_data["emotion"], -80);

        let state =
            crate::db::UserStateRepository::get_or_create(store.as_ref(), "u1", "luna")
                .await
                .unwrap();
        assert_eq!(state.emotion_score, -80);
    }

    #[tokio::test]
    async fn test_llm_failure_soft_fails_with_persisted_fallback() {
        let mut mock = MockLlmClient::new();
        mock.expect_chat_completion()
            .returning(|_| Err(EngineError::LlmUnavailable("connection refused".into())));
        mock.expect_model_name().return_const("test".to_string());

        let (pipeline, store) = pipeline_with(Arc::new(mock)).await;
        let session_id = seed_session(&store, "u1").await;
        fund(&store, "u1", 100).await;

        let response = pipeline
            .process_message(ChatRequest {
                user_id: "u1".to_string(),
                session_id,
                message: "hello".to_string(),
                intimacy_level: None,
                content_cap: None,
            })
            .await
            .unwrap();

        assert_eq!(response.tokens_used, 0);
        assert!(response.content.contains("zoned out"));
        assert_eq!(response.extra_data["parse"]["success"], false);

        // Fallback reply was persisted
        let messages = crate::db::MessageRepository::recent(store.as_ref(), session_id, 10)
            .await
            .unwrap();
        assert_eq!(messages.len(), 2);
    }

    #[tokio::test]
    async fn test_first_confession_event_triggers_once() {
        let (pipeline, store) = pipeline_with(Arc::new(MockLlm)).await;
        let session_id = seed_session(&store, "u1").await;
        fund(&store, "u1", 100).await;

        for _ in 0..2 {
            pipeline
                .process_message(ChatRequest {
                    user_id: "u1".to_string(),
                    session_id,
                    message: "i love you".to_string(),
                    intimacy_level: None,
                    content_cap: None,
                })
                .await
                .unwrap();
            pipeline.drain_post_updates().await;
        }

        let state =
            crate::db::UserStateRepository::get_or_create(store.as_ref(), "u1", "luna")
                .await
                .unwrap();
        assert_eq!(
            state.events.iter().filter(|e| *e == "first_confession").count(),
            1
        );
    }
}
