use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::types::{EmotionState, IntimacyStage};

/// The running relationship state for a `(user, character)` pair.
///
/// Writes outside a storage transaction use optimistic concurrency on
/// `version`; see `UserStateRepository::update`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserState {
    pub user_id: String,
    pub character_id: String,

    // Intimacy progression
    pub intimacy_xp: f64,
    pub intimacy_level: i32,
    pub daily_xp_earned: f64,
    pub last_daily_reset: DateTime<Utc>,
    pub streak_days: i32,
    pub last_interaction_date: Option<NaiveDate>,

    // Emotion machine
    pub emotion_score: i32,
    pub emotion_high: i32,
    pub emotion_low: i32,
    pub emotion_update_count: i64,
    pub emotion_updated_at: DateTime<Utc>,

    /// Unlocked milestone events; grow-only within a relationship.
    #[sqlx(json)]
    pub events: Vec<String>,

    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserState {
    pub fn new(user_id: String, character_id: String) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            character_id,
            intimacy_xp: 0.0,
            intimacy_level: 0,
            daily_xp_earned: 0.0,
            last_daily_reset: now,
            streak_days: 0,
            last_interaction_date: None,
            emotion_score: 0,
            emotion_high: 0,
            emotion_low: 0,
            emotion_update_count: 0,
            emotion_updated_at: now,
            events: Vec::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn stage(&self) -> IntimacyStage {
        IntimacyStage::from_level(self.intimacy_level)
    }

    pub fn emotion_state(&self) -> EmotionState {
        EmotionState::from_score(self.emotion_score)
    }

    pub fn has_event(&self, event: &str) -> bool {
        self.events.iter().any(|e| e == event)
    }

    /// Record an event; the set is grow-only, re-adding is a no-op.
    pub fn add_event(&mut self, event: &str) -> bool {
        if self.has_event(event) {
            return false;
        }
        self.events.push(event.to_string());
        true
    }

    /// Apply a clamped score change and keep the high/low watermarks.
    pub fn apply_emotion_delta(&mut self, delta: i32, now: DateTime<Utc>) -> i32 {
        let new_score = (self.emotion_score + delta).clamp(-100, 100);
        self.emotion_score = new_score;
        self.emotion_high = self.emotion_high.max(new_score);
        self.emotion_low = self.emotion_low.min(new_score);
        self.emotion_update_count += 1;
        self.emotion_updated_at = now;
        new_score
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_grow_only() {
        let mut state = UserState::new("u1".into(), "luna".into());
        assert!(state.add_event("first_gift"));
        assert!(!state.add_event("first_gift"));
        assert!(state.has_event("first_gift"));
        assert_eq!(state.events.len(), 1);
    }

    #[test]
    fn test_emotion_delta_clamps_and_tracks() {
        let mut state = UserState::new("u1".into(), "luna".into());
        let now = Utc::now();
        assert_eq!(state.apply_emotion_delta(120, now), 100);
        assert_eq!(state.emotion_high, 100);
        assert_eq!(state.apply_emotion_delta(-250, now), -100);
        assert_eq!(state.emotion_low, -100);
        assert_eq!(state.emotion_update_count, 2);
    }
}
