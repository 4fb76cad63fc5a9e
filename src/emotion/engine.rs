use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::db::{EmotionHistoryRepository, UserStateRepository};
use crate::error::{EngineError, EngineResult};
use crate::emotion::classifier::{rule_analysis, EmotionAnalysis};
use crate::llm::{ChatCompletionRequest, LlmClient};
use crate::models::{CharacterPersonality, EmotionHistoryEntry, GiftCatalogEntry, UserState};
use crate::types::{ChatMessage, EmotionState, Intent};

/// Hard bound on any single-message score change.
pub const MAX_SINGLE_DELTA: i32 = 50;
/// Below this score the relationship needs active repair, not time.
pub const COLD_WAR_FLOOR: i32 = -75;

const BUFFER_CAPACITY: usize = 5;
const NEGATIVE_COOLDOWN_SECS: i64 = 60;
const POSITIVE_BOOST_THRESHOLD: usize = 3;
const OPTIMISTIC_RETRIES: u32 = 3;

#[derive(Debug, Clone)]
struct BufferEntry {
    delta: i32,
    #[allow(dead_code)]
    intent: Intent,
    at: DateTime<Utc>,
}

/// Per-pair rolling affect bookkeeping. Process-scoped; rebuilt from
/// recent messages if lost.
#[derive(Debug, Default)]
struct PairBuffer {
    entries: Vec<BufferEntry>,
    cooldown_until: Option<DateTime<Utc>>,
    /// Applied deltas within the diminishing-returns window.
    applied: Vec<(DateTime<Utc>, i32)>,
}

impl PairBuffer {
    fn push(&mut self, delta: i32, intent: Intent, at: DateTime<Utc>) {
        self.entries.push(BufferEntry { delta, intent, at });
        if self.entries.len() > BUFFER_CAPACITY {
            let excess = self.entries.len() - BUFFER_CAPACITY;
            self.entries.drain(..excess);
        }
    }

    fn negative_sum_within(&self, now: DateTime<Utc>, window: Duration) -> i32 {
        self.entries
            .iter()
            .filter(|e| e.delta < 0 && now - e.at < window)
            .map(|e| e.delta)
            .sum()
    }

    fn positive_count_within(&self, now: DateTime<Utc>, window: Duration) -> usize {
        self.entries
            .iter()
            .filter(|e| e.delta > 0 && now - e.at < window)
            .count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeltaApplication {
    pub previous_score: i32,
    pub new_score: i32,
    pub delta_applied: i32,
    pub previous_state: EmotionState,
    pub new_state: EmotionState,
    pub state_changed: bool,
}

pub struct EmotionEngine {
    user_states: Arc<dyn UserStateRepository>,
    history: Arc<dyn EmotionHistoryRepository>,
    buffers: Mutex<HashMap<(String, String), PairBuffer>>,
    /// Optional small-model refinement; never authoritative.
    refiner: Option<Arc<dyn LlmClient>>,
}

impl EmotionEngine {
    pub fn new(
        user_states: Arc<dyn UserStateRepository>,
        history: Arc<dyn EmotionHistoryRepository>,
        refiner: Option<Arc<dyn LlmClient>>,
    ) -> Self {
        Self {
            user_states,
            history,
            buffers: Mutex::new(HashMap::new()),
            refiner,
        }
    }

    // ========================================================================
    // Analysis
    // ========================================================================

    /// Analyze a message: deterministic rules, optionally nudged by the
    /// small-model hint when it is available and parseable.
    pub async fn analyze(
        &self,
        message: &str,
        context: &[ChatMessage],
        current_state: EmotionState,
        intimacy_level: i32,
    ) -> EmotionAnalysis {
        let mut analysis = rule_analysis(message);

        if let Some(refiner) = &self.refiner {
            match self
                .llm_refine(refiner.as_ref(), message, context, current_state, intimacy_level)
                .await
            {
                Ok(Some(suggested)) => {
                    // Hint adjusts the rule base; split the difference
                    let clamped = suggested.clamp(-30, 30);
                    analysis.suggested_delta = (analysis.suggested_delta + clamped) / 2;
                    analysis.llm_refined = true;
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!("emotion refinement unavailable, using rules only: {}", err);
                }
            }
        }

        analysis
    }

    async fn llm_refine(
        &self,
        refiner: &dyn LlmClient,
        message: &str,
        context: &[ChatMessage],
        current_state: EmotionState,
        intimacy_level: i32,
    ) -> EngineResult<Option<i32>> {
        let context_lines: String = context
            .iter()
            .rev()
            .take(5)
            .rev()
            .map(|m| format!("- {}: {}\n", m.role, m.content.chars().take(100).collect::<String>()))
            .collect();

        let system = format!(
            "You are an affect analyst for a companion character.\n\
             Current emotion state: {current_state}. Intimacy level: {intimacy_level}.\n\
             Recent context:\n{context_lines}\n\
             Judge the user's real intent, not the literal words. Reply with JSON only:\n\
             {{\"sentiment\": \"positive|negative|neutral\", \"intensity\": 0.0, \
             \"intent\": \"SMALL_TALK\", \"suggested_delta\": 0, \"reasoning\": \"...\"}}"
        );

        let response = refiner
            .chat_completion(ChatCompletionRequest {
                messages: vec![
                    ChatMessage::system(system),
                    ChatMessage::user(format!("Analyze this message: {}", message)),
                ],
                temperature: 0.3,
                max_tokens: 200,
                json_mode: true,
                timeout: std::time::Duration::from_secs(5),
            })
            .await?;

        let parsed = crate::pipeline::json_parser::extract_json_object(&response.reply);
        Ok(parsed
            .and_then(|v| v.get("suggested_delta").cloned())
            .and_then(|d| d.as_i64())
            .map(|d| d as i32))
    }

    // ========================================================================
    // Buffer logic
    // ========================================================================

    /// Run the suggested delta through the per-pair buffer: negative
    /// cooldown damping, accumulated-negative scaling, positive streak
    /// boost, personality modifiers, and the single-message clamp.
    pub async fn buffered_delta(
        &self,
        user_id: &str,
        character_id: &str,
        analysis: &EmotionAnalysis,
        personality: &CharacterPersonality,
    ) -> i32 {
        let now = Utc::now();
        let mut buffers = self.buffers.lock().await;
        let buffer = buffers
            .entry((user_id.to_string(), character_id.to_string()))
            .or_default();

        let mut delta = analysis.suggested_delta as f64;

        if let Some(until) = buffer.cooldown_until {
            if now < until {
                delta *= 0.5;
            }
        }

        if delta < 0.0 {
            let accumulated = buffer.negative_sum_within(now, Duration::minutes(5));
            if accumulated > -30 {
                delta *= 0.6;
            } else if accumulated >= -60 {
                // Mid-range accumulation applies as-is
            } else {
                delta *= 1.2;
            }
            buffer.cooldown_until = Some(now + Duration::seconds(NEGATIVE_COOLDOWN_SECS));
        } else if delta > 0.0
            && buffer.positive_count_within(now, Duration::minutes(10)) >= POSITIVE_BOOST_THRESHOLD
        {
            delta *= 1.3;
        }

        // Personality: sensitivity deepens hurt, forgiveness lifts praise
        if delta < 0.0 {
            delta *= 1.0 + personality.sensitivity * 0.3;
        } else if delta > 0.0 {
            delta *= 1.0 + personality.forgiveness_rate * 0.2;
        }

        let final_delta = (delta as i32).clamp(-MAX_SINGLE_DELTA, MAX_SINGLE_DELTA);
        buffer.push(final_delta, analysis.intent, now);
        final_delta
    }

    // ========================================================================
    // Diminishing returns (anti-farming)
    // ========================================================================

    /// Scale consecutive positive deltas by `[1.0, 0.7, 0.4, 0.2, 0.1]`
    /// within a 5-minute window, floor 1. Negative deltas never discount.
    pub async fn apply_diminishing_returns(
        &self,
        user_id: &str,
        character_id: &str,
        delta: i32,
    ) -> i32 {
        const FACTORS: [f64; 5] = [1.0, 0.7, 0.4, 0.2, 0.1];
        let now = Utc::now();

        let mut buffers = self.buffers.lock().await;
        let buffer = buffers
            .entry((user_id.to_string(), character_id.to_string()))
            .or_default();

        let cutoff = now - Duration::minutes(5);
        buffer.applied.retain(|(at, _)| *at >= cutoff);

        if delta <= 0 {
            buffer.applied.push((now, delta));
            return delta;
        }

        let consecutive_positive = buffer
            .applied
            .iter()
            .rev()
            .take_while(|(_, d)| *d > 0)
            .count();
        let factor = FACTORS[consecutive_positive.min(FACTORS.len() - 1)];
        let adjusted = ((delta as f64 * factor) as i32).max(1);

        if adjusted != delta {
            tracing::info!(
                "📉 diminishing returns: {:+} × {} = {:+} (streak {})",
                delta,
                factor,
                adjusted,
                consecutive_positive
            );
        }

        buffer.applied.push((now, adjusted));
        adjusted
    }

    // ========================================================================
    // Lockout and recovery math
    // ========================================================================

    /// Apology while in cold war: a small recovery, asymptotic to −50.
    pub fn apology_recovery(score: i32) -> i32 {
        let target = (score + 5).min(-50);
        (target - score).max(0)
    }

    /// Score change a gift produces, honoring the cold-war escape floor
    /// and luxury force-positive semantics.
    pub fn gift_recovery_delta(score: i32, entry: &GiftCatalogEntry) -> i32 {
        if entry.force_emotion {
            return 100 - score;
        }

        let mut delta = entry.emotion_boost;
        if entry.clears_cold_war && score <= COLD_WAR_FLOOR {
            // Must land strictly above the floor
            delta = delta.max(COLD_WAR_FLOOR + 1 - score);
        }
        delta
    }

    // ========================================================================
    // Natural decay
    // ========================================================================

    /// Move a stale score toward baseline: +3/hour for negatives, −1/hour
    /// above 50, after an hour of silence. Never crosses 0. Lockout states
    /// do not heal with time, and a score below the repair floor can only
    /// drift up to the floor itself, never across it.
    pub fn natural_decay(state: &UserState, now: DateTime<Utc>) -> i32 {
        let elapsed = now - state.emotion_updated_at;
        if elapsed < Duration::hours(1) {
            return 0;
        }
        let hours = elapsed.num_minutes() as f64 / 60.0;
        let score = state.emotion_score;

        if state.emotion_state().is_lockout() {
            0
        } else if score < 0 {
            let ceiling = if score <= COLD_WAR_FLOOR { COLD_WAR_FLOOR } else { 0 };
            let recovery = (3.0 * hours) as i32;
            recovery.min(ceiling - score)
        } else if score > 50 {
            let decay = (1.0 * hours) as i32;
            -decay.min(score - 50)
        } else {
            0
        }
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Apply a delta with optimistic concurrency and append history.
    pub async fn apply_delta(
        &self,
        user_id: &str,
        character_id: &str,
        delta: i32,
        reason: &str,
    ) -> EngineResult<DeltaApplication> {
        for attempt in 0..=OPTIMISTIC_RETRIES {
            let mut state = self.user_states.get_or_create(user_id, character_id).await?;
            let version = state.version;
            let previous_score = state.emotion_score;
            let previous_state = state.emotion_state();

            let now = Utc::now();
            let new_score = state.apply_emotion_delta(delta, now);
            let new_state = state.emotion_state();

            match self.user_states.update(&state, version).await {
                Ok(_) => {
                    self.history
                        .append(&EmotionHistoryEntry::new(
                            user_id,
                            character_id,
                            delta,
                            new_score,
                            new_state.as_str(),
                            reason,
                        ))
                        .await?;

                    tracing::info!(
                        "💟 emotion {}:{} {} -> {} ({:+}, {})",
                        user_id,
                        character_id,
                        previous_score,
                        new_score,
                        delta,
                        reason
                    );

                    return Ok(DeltaApplication {
                        previous_score,
                        new_score,
                        delta_applied: delta,
                        previous_state,
                        new_state,
                        state_changed: previous_state != new_state,
                    });
                }
                Err(EngineError::Conflict(_)) if attempt < OPTIMISTIC_RETRIES => {
                    let jitter = rand::thread_rng().gen_range(5..40);
                    tokio::time::sleep(std::time::Duration::from_millis(jitter)).await;
                }
                Err(err) => return Err(err),
            }
        }

        Err(EngineError::Conflict(
            "emotion update retries exhausted".to_string(),
        ))
    }

    /// Run decay on load; skipped entirely when fresh.
    pub async fn decay_on_load(
        &self,
        user_id: &str,
        character_id: &str,
        state: &UserState,
    ) -> EngineResult<i32> {
        let decay = Self::natural_decay(state, Utc::now());
        if decay != 0 {
            self.apply_delta(user_id, character_id, decay, "natural_decay")
                .await?;
        }
        Ok(decay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::catalog::gift_catalog_entry;
    use crate::db::MemoryStore;

    fn engine() -> EmotionEngine {
        let store = Arc::new(MemoryStore::new());
        EmotionEngine::new(store.clone(), store, None)
    }

    fn personality() -> CharacterPersonality {
        CharacterPersonality::default()
    }

    #[tokio::test]
    async fn test_single_delta_clamped() {
        let engine = engine();
        let mut analysis = rule_analysis("I love you");
        analysis.suggested_delta = 300;
        let delta = engine
            .buffered_delta("u1", "luna", &analysis, &personality())
            .await;
        assert!(delta <= MAX_SINGLE_DELTA);

        analysis.suggested_delta = -300;
        let delta = engine
            .buffered_delta("u1", "luna", &analysis, &personality())
            .await;
        assert!(delta >= -MAX_SINGLE_DELTA);
    }

    #[tokio::test]
    async fn test_mild_negative_softened_by_buffer() {
        let engine = engine();
        let analysis = rule_analysis("this is boring");
        assert_eq!(analysis.suggested_delta, -10);

        let delta = engine
            .buffered_delta("u1", "luna", &analysis, &personality())
            .await;
        // First negative: accumulated sum is above -30, softened by 0.6
        // then deepened by sensitivity
        assert!(delta < 0 && delta > -10);
    }

    #[tokio::test]
    async fn test_diminishing_returns_sequence() {
        let engine = engine();
        let first = engine.apply_diminishing_returns("u1", "luna", 10).await;
        assert_eq!(first, 10);
        let second = engine.apply_diminishing_returns("u1", "luna", 10).await;
        assert_eq!(second, 7);
        let third = engine.apply_diminishing_returns("u1", "luna", 10).await;
        assert_eq!(third, 4);
        let fourth = engine.apply_diminishing_returns("u1", "luna", 10).await;
        assert_eq!(fourth, 2);
        let fifth = engine.apply_diminishing_returns("u1", "luna", 10).await;
        assert_eq!(fifth, 1);

        // Negatives never discount, and they reset the streak
        let negative = engine.apply_diminishing_returns("u1", "luna", -20).await;
        assert_eq!(negative, -20);
        let after = engine.apply_diminishing_returns("u1", "luna", 10).await;
        assert_eq!(after, 10);
    }

    #[test]
    fn test_apology_recovery_caps_at_minus_50() {
        assert_eq!(EmotionEngine::apology_recovery(-85), 5); // -85 -> -80
        assert_eq!(EmotionEngine::apology_recovery(-52), 2); // -52 -> -50
        assert_eq!(EmotionEngine::apology_recovery(-50), 0);
    }

    #[test]
    fn test_gift_recovery_escapes_cold_war() {
        let apology = gift_catalog_entry("apology_scroll").unwrap();
        let delta = EmotionEngine::gift_recovery_delta(-85, apology);
        assert!(-85 + delta > COLD_WAR_FLOOR);

        // Deep block still escapes
        let delta = EmotionEngine::gift_recovery_delta(-100, apology);
        assert!(-100 + delta > COLD_WAR_FLOOR);
    }

    #[test]
    fn test_luxury_forces_max() {
        let luxury = gift_catalog_entry("diamond_ring").unwrap();
        assert!(luxury.force_emotion);
        let delta = EmotionEngine::gift_recovery_delta(-40, luxury);
        assert_eq!(-40 + delta, 100);
    }

    #[test]
    fn test_natural_decay_rules() {
        let mut state = UserState::new("u1".into(), "luna".into());
        let now = Utc::now();

        // Fresh state: no decay
        state.emotion_score = -30;
        state.emotion_updated_at = now;
        assert_eq!(EmotionEngine::natural_decay(&state, now), 0);

        // Negative recovers 3/hour, capped at zero
        state.emotion_updated_at = now - Duration::hours(2);
        assert_eq!(EmotionEngine::natural_decay(&state, now), 6);
        state.emotion_score = -2;
        assert_eq!(EmotionEngine::natural_decay(&state, now), 2);

        // High positive decays toward 50
        state.emotion_score = 80;
        assert_eq!(EmotionEngine::natural_decay(&state, now), -2);
        state.emotion_score = 51;
        assert_eq!(EmotionEngine::natural_decay(&state, now), -1);

        // Lockout states do not heal with time
        state.emotion_score = -85;
        assert_eq!(EmotionEngine::natural_decay(&state, now), 0);
        state.emotion_score = -100;
        assert_eq!(EmotionEngine::natural_decay(&state, now), 0);

        // Angry scores below the repair floor drift up to it, never past
        state.emotion_score = -78;
        assert_eq!(EmotionEngine::natural_decay(&state, now), 3);
        state.emotion_score = -75;
        assert_eq!(EmotionEngine::natural_decay(&state, now), 0);
    }

    #[tokio::test]
    async fn test_apply_delta_writes_history() {
        let store = Arc::new(MemoryStore::new());
        let engine = EmotionEngine::new(store.clone(), store.clone(), None);

        let result = engine.apply_delta("u1", "luna", 10, "test").await.unwrap();
        assert_eq!(result.previous_score, 0);
        assert_eq!(result.new_score, 10);

        let history = EmotionHistoryRepository::list(store.as_ref(), "u1", "luna", 10)
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].delta, 10);
    }
}
