use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::db::{TxOps, UserStateRepository};
use crate::error::{EngineError, EngineResult};
use crate::intimacy::actions::ActionKind;
use crate::intimacy::levels::{
    self, celebration_message, newly_unlocked_features, unlocked_features, FeatureUnlock,
    DAILY_XP_CAP,
};
use crate::models::UserState;
use crate::types::IntimacyStage;

const OPTIMISTIC_RETRIES: u32 = 3;

/// Result of one XP award attempt. `awarded == 0.0` with a `reason` means
/// the award was gated, not an error.
#[derive(Debug, Clone, Serialize)]
pub struct AwardOutcome {
    pub action: ActionKind,
    pub awarded: f64,
    pub xp_before: f64,
    pub xp_after: f64,
    pub level_before: i32,
    pub level_after: i32,
    pub stage_before: IntimacyStage,
    pub stage_after: IntimacyStage,
    pub level_up: bool,
    pub stage_changed: bool,
    pub newly_unlocked_features: Vec<FeatureUnlock>,
    pub daily_remaining: f64,
    pub streak_days: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub celebration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
}

impl AwardOutcome {
    fn gated(action: ActionKind, state: &UserState, reason: &'static str) -> Self {
        let level = state.intimacy_level;
        Self {
            action,
            awarded: 0.0,
            xp_before: state.intimacy_xp,
            xp_after: state.intimacy_xp,
            level_before: level,
            level_after: level,
            stage_before: state.stage(),
            stage_after: state.stage(),
            level_up: false,
            stage_changed: false,
            newly_unlocked_features: Vec::new(),
            daily_remaining: (DAILY_XP_CAP - state.daily_xp_earned).max(0.0),
            streak_days: state.streak_days,
            celebration: None,
            reason: Some(reason),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IntimacyStatus {
    pub character_id: String,
    pub level: i32,
    pub total_xp: f64,
    pub xp_for_current_level: f64,
    pub xp_for_next_level: f64,
    pub progress_percent: f64,
    pub stage: IntimacyStage,
    pub streak_days: i32,
    pub daily_xp_earned: f64,
    pub daily_xp_remaining: f64,
    pub events: Vec<String>,
    pub unlocked_features: Vec<FeatureUnlock>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckinResult {
    pub outcome: AwardOutcome,
    pub streak_bonus: f64,
}

#[derive(Debug, Clone)]
struct ActionLogEntry {
    action: ActionKind,
    at: DateTime<Utc>,
}

/// Core service for user↔character intimacy progression.
///
/// The per-action log (daily limits, cooldowns) is a process-scoped cache
/// keyed by pair, like the emotion buffers: bounded, and rebuildable from
/// message history if the process restarts.
pub struct IntimacyService {
    user_states: Arc<dyn UserStateRepository>,
    action_log: Mutex<HashMap<(String, String), Vec<ActionLogEntry>>>,
}

impl IntimacyService {
    pub fn new(user_states: Arc<dyn UserStateRepository>) -> Self {
        Self {
            user_states,
            action_log: Mutex::new(HashMap::new()),
        }
    }

    // ========================================================================
    // Pure XP application (shared by the optimistic and in-tx paths)
    // ========================================================================

    /// Apply a rolling 24h window reset to the daily counter.
    fn roll_daily_window(state: &mut UserState, now: DateTime<Utc>) {
        if now - state.last_daily_reset >= Duration::hours(24) {
            state.daily_xp_earned = 0.0;
            state.last_daily_reset = now;
        }
    }

    fn update_streak(state: &mut UserState, now: DateTime<Utc>) {
        let today = now.date_naive();
        match state.last_interaction_date {
            None => state.streak_days = 1,
            Some(last) if last == today => {}
            Some(last) if (today - last).num_days() == 1 => state.streak_days += 1,
            Some(_) => state.streak_days = 1,
        }
        state.last_interaction_date = Some(today);
    }

    /// Award `action` XP against `state`. Pure state mutation; the caller
    /// persists.
    pub fn apply_award(
        state: &mut UserState,
        action: ActionKind,
        now: DateTime<Utc>,
    ) -> AwardOutcome {
        Self::roll_daily_window(state, now);

        let cap_remaining = DAILY_XP_CAP - state.daily_xp_earned;
        if cap_remaining <= 0.0 {
            return AwardOutcome::gated(action, state, "daily_cap");
        }

        let awarded = action.xp().min(cap_remaining);
        let xp_before = state.intimacy_xp;
        let level_before = state.intimacy_level;
        let stage_before = state.stage();

        state.intimacy_xp += awarded;
        state.daily_xp_earned += awarded;
        state.intimacy_level = levels::level_for_xp(state.intimacy_xp);
        Self::update_streak(state, now);

        let level_after = state.intimacy_level;
        let stage_after = state.stage();
        let level_up = level_after > level_before;
        let stage_changed = stage_after != stage_before;
        let newly_unlocked = if level_up {
            newly_unlocked_features(level_before, level_after)
        } else {
            Vec::new()
        };
        let celebration =
            level_up.then(|| celebration_message(level_after, stage_changed, stage_after));

        AwardOutcome {
            action,
            awarded,
            xp_before,
            xp_after: state.intimacy_xp,
            level_before,
            level_after,
            stage_before,
            stage_after,
            level_up,
            stage_changed,
            newly_unlocked_features: newly_unlocked,
            daily_remaining: (DAILY_XP_CAP - state.daily_xp_earned).max(0.0),
            streak_days: state.streak_days,
            celebration,
            reason: None,
        }
    }

    /// Add a raw XP amount (gift rewards, streak bonuses), still honoring
    /// the daily cap. Returns the amount actually applied.
    pub fn apply_raw_xp(state: &mut UserState, amount: f64, now: DateTime<Utc>) -> f64 {
        Self::roll_daily_window(state, now);
        let applied = amount.min(DAILY_XP_CAP - state.daily_xp_earned).max(0.0);
        state.intimacy_xp += applied;
        state.daily_xp_earned += applied;
        state.intimacy_level = levels::level_for_xp(state.intimacy_xp);
        Self::update_streak(state, now);
        applied
    }

    // ========================================================================
    // Availability (daily limits + cooldowns)
    // ========================================================================

    async fn check_available(
        &self,
        user_id: &str,
        character_id: &str,
        action: ActionKind,
        now: DateTime<Utc>,
    ) -> (bool, Option<&'static str>, Option<i64>) {
        let log = self.action_log.lock().await;
        let Some(entries) = log.get(&(user_id.to_string(), character_id.to_string())) else {
            return (true, None, None);
        };

        if let Some(limit) = action.daily_limit() {
            let day_start = now
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .map(|dt| dt.and_utc())
                .unwrap_or(now);
            let used_today = entries
                .iter()
                .filter(|e| e.action == action && e.at >= day_start)
                .count() as u32;
            if used_today >= limit {
                return (false, Some("daily_limit"), None);
            }
        }

        let cooldown = action.cooldown_seconds();
        if cooldown > 0 {
            if let Some(last) = entries
                .iter()
                .filter(|e| e.action == action)
                .map(|e| e.at)
                .max()
            {
                let elapsed = (now - last).num_seconds();
                if elapsed < cooldown {
                    return (false, Some("cooldown"), Some(cooldown - elapsed));
                }
            }
        }

        (true, None, None)
    }

    async fn log_action(&self, user_id: &str, character_id: &str, action: ActionKind, at: DateTime<Utc>) {
        let mut log = self.action_log.lock().await;
        let entries = log
            .entry((user_id.to_string(), character_id.to_string()))
            .or_default();
        entries.push(ActionLogEntry { action, at });

        // Bounded: keep the last week (the longest cooldown), max 64 rows
        let cutoff = at - Duration::days(7);
        entries.retain(|e| e.at >= cutoff);
        if entries.len() > 64 {
            let excess = entries.len() - 64;
            entries.drain(..excess);
        }
    }

    // ========================================================================
    // Public operations
    // ========================================================================

    /// Award XP for an action with optimistic concurrency (3 retries with
    /// jitter on version conflicts).
    pub async fn award_xp(
        &self,
        user_id: &str,
        character_id: &str,
        action: ActionKind,
        force: bool,
    ) -> EngineResult<AwardOutcome> {
        let now = Utc::now();

        if !force {
            let (available, reason, _cooldown) =
                self.check_available(user_id, character_id, action, now).await;
            if !available {
                let state = self.user_states.get_or_create(user_id, character_id).await?;
                return Ok(AwardOutcome::gated(action, &state, reason.unwrap_or("unavailable")));
            }
        }

        for attempt in 0..=OPTIMISTIC_RETRIES {
            let mut state = self.user_states.get_or_create(user_id, character_id).await?;
            let version = state.version;
            let outcome = Self::apply_award(&mut state, action, now);

            match self.user_states.update(&state, version).await {
                Ok(_) => {
                    if outcome.awarded > 0.0 {
                        self.log_action(user_id, character_id, action, now).await;
                    }
                    if outcome.level_up {
                        tracing::info!(
                            "📈 {}:{} leveled up {} -> {}",
                            user_id,
                            character_id,
                            outcome.level_before,
                            outcome.level_after
                        );
                    }
                    return Ok(outcome);
                }
                Err(EngineError::Conflict(_)) if attempt < OPTIMISTIC_RETRIES => {
                    let jitter = rand::thread_rng().gen_range(5..40);
                    tokio::time::sleep(std::time::Duration::from_millis(jitter)).await;
                }
                Err(err) => return Err(err),
            }
        }

        Err(EngineError::Conflict(
            "user state update retries exhausted".to_string(),
        ))
    }

    /// Award gift XP inside an open storage transaction. The row is already
    /// locked, so no optimistic loop is needed.
    pub async fn award_raw_xp_tx(
        &self,
        tx: &mut dyn TxOps,
        user_id: &str,
        character_id: &str,
        amount: f64,
    ) -> EngineResult<AwardOutcome> {
        let now = Utc::now();
        let mut state = tx.user_state_for_update(user_id, character_id).await?;

        let xp_before = state.intimacy_xp;
        let level_before = state.intimacy_level;
        let stage_before = state.stage();
        let awarded = Self::apply_raw_xp(&mut state, amount, now);
        tx.update_user_state(&state).await?;

        let level_after = state.intimacy_level;
        let stage_after = state.stage();
        let level_up = level_after > level_before;
        let stage_changed = stage_after != stage_before;
        Ok(AwardOutcome {
            action: ActionKind::Emotional,
            awarded,
            xp_before,
            xp_after: state.intimacy_xp,
            level_before,
            level_after,
            stage_before,
            stage_after,
            level_up,
            stage_changed,
            newly_unlocked_features: if level_up {
                newly_unlocked_features(level_before, level_after)
            } else {
                Vec::new()
            },
            daily_remaining: (DAILY_XP_CAP - state.daily_xp_earned).max(0.0),
            streak_days: state.streak_days,
            celebration: level_up
                .then(|| celebration_message(level_after, stage_changed, stage_after)),
            reason: None,
        })
    }

    /// Daily check-in: base award plus a streak bonus of 10% per consecutive
    /// day, capped at 50%.
    pub async fn daily_checkin(
        &self,
        user_id: &str,
        character_id: &str,
    ) -> EngineResult<CheckinResult> {
        let outcome = self
            .award_xp(user_id, character_id, ActionKind::Checkin, false)
            .await?;

        if outcome.awarded <= 0.0 {
            return Ok(CheckinResult {
                outcome,
                streak_bonus: 0.0,
            });
        }

        let mut streak_bonus = 0.0;
        if outcome.streak_days > 1 {
            let pct = (outcome.streak_days as f64 * 0.1).min(0.5);
            let bonus = outcome.awarded * pct;

            for attempt in 0..=OPTIMISTIC_RETRIES {
                let mut state = self.user_states.get_or_create(user_id, character_id).await?;
                let version = state.version;
                let applied = Self::apply_raw_xp(&mut state, bonus, Utc::now());
                match self.user_states.update(&state, version).await {
                    Ok(_) => {
                        streak_bonus = applied;
                        break;
                    }
                    Err(EngineError::Conflict(_)) if attempt < OPTIMISTIC_RETRIES => {
                        let jitter = rand::thread_rng().gen_range(5..40);
                        tokio::time::sleep(std::time::Duration::from_millis(jitter)).await;
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        Ok(CheckinResult {
            outcome,
            streak_bonus,
        })
    }

    pub async fn status(&self, user_id: &str, character_id: &str) -> EngineResult<IntimacyStatus> {
        let state = self.user_states.get_or_create(user_id, character_id).await?;
        let now = Utc::now();

        let daily_earned = if now - state.last_daily_reset >= Duration::hours(24) {
            0.0
        } else {
            state.daily_xp_earned
        };

        let (level, at_level, next, progress) = levels::level_progress(state.intimacy_xp);
        Ok(IntimacyStatus {
            character_id: character_id.to_string(),
            level,
            total_xp: state.intimacy_xp,
            xp_for_current_level: at_level,
            xp_for_next_level: next,
            progress_percent: progress,
            stage: state.stage(),
            streak_days: state.streak_days,
            daily_xp_earned: daily_earned,
            daily_xp_remaining: (DAILY_XP_CAP - daily_earned).max(0.0),
            events: state.events.clone(),
            unlocked_features: unlocked_features(level),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;

    fn service() -> IntimacyService {
        IntimacyService::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_message_award() {
        let svc = service();
        let outcome = svc
            .award_xp("u1", "luna", ActionKind::Message, false)
            .await
            .unwrap();
        assert_eq!(outcome.awarded, 2.0);
        assert_eq!(outcome.xp_after, 2.0);
        assert_eq!(outcome.level_after, 0);
        assert_eq!(outcome.streak_days, 1);
    }

    #[tokio::test]
    async fn test_level_up_reports_unlocks() {
        let svc = service();
        // 5 messages = 10 XP, exactly the level-1 threshold
        for _ in 0..5 {
            svc.award_xp("u1", "luna", ActionKind::Message, false)
                .await
                .unwrap();
        }
        let status = svc.status("u1", "luna").await.unwrap();
        assert_eq!(status.level, 1);

        // The crossing award carried the unlock
        let mut found = false;
        for _ in 0..5 {
            let outcome = svc
                .award_xp("u1", "luna", ActionKind::Message, false)
                .await
                .unwrap();
            if outcome.level_up {
                found = true;
                assert!(outcome
                    .newly_unlocked_features
                    .iter()
                    .any(|f| f.id == "ai_nickname"));
            }
        }
        assert!(found);
    }

    #[tokio::test]
    async fn test_daily_cap_partial_then_zero() {
        let svc = service();
        let mut state = svc.user_states.get_or_create("u1", "luna").await.unwrap();
        state.daily_xp_earned = 495.0;
        let version = state.version;
        svc.user_states.update(&state, version).await.unwrap();

        let outcome = svc
            .award_xp("u1", "luna", ActionKind::Checkin, false)
            .await
            .unwrap();
        assert_eq!(outcome.awarded, 5.0);

        let outcome = svc
            .award_xp("u1", "luna", ActionKind::Emotional, false)
            .await
            .unwrap();
        assert_eq!(outcome.awarded, 0.0);
        assert_eq!(outcome.reason, Some("daily_cap"));
    }

    #[tokio::test]
    async fn test_checkin_daily_limit() {
        let svc = service();
        let first = svc.daily_checkin("u1", "luna").await.unwrap();
        assert_eq!(first.outcome.awarded, 20.0);
        assert_eq!(first.streak_bonus, 0.0);

        let second = svc.daily_checkin("u1", "luna").await.unwrap();
        assert_eq!(second.outcome.awarded, 0.0);
        assert!(second.outcome.reason.is_some());
    }

    #[tokio::test]
    async fn test_voice_daily_limit() {
        let svc = service();
        for _ in 0..3 {
            // force skips the cooldown gate but not the logging
            let outcome = svc
                .award_xp("u1", "luna", ActionKind::Voice, true)
                .await
                .unwrap();
            assert!(outcome.awarded > 0.0);
        }
        let outcome = svc
            .award_xp("u1", "luna", ActionKind::Voice, false)
            .await
            .unwrap();
        assert_eq!(outcome.awarded, 0.0);
        assert_eq!(outcome.reason, Some("daily_limit"));
    }

    #[test]
    fn test_streak_logic() {
        let mut state = UserState::new("u1".into(), "luna".into());
        let day1 = Utc::now();

        IntimacyService::apply_award(&mut state, ActionKind::Message, day1);
        assert_eq!(state.streak_days, 1);

        // Same day keeps the streak
        IntimacyService::apply_award(&mut state, ActionKind::Message, day1);
        assert_eq!(state.streak_days, 1);

        // Next day increments
        IntimacyService::apply_award(&mut state, ActionKind::Message, day1 + Duration::days(1));
        assert_eq!(state.streak_days, 2);

        // A gap resets to 1
        IntimacyService::apply_award(&mut state, ActionKind::Message, day1 + Duration::days(4));
        assert_eq!(state.streak_days, 1);
    }
}
