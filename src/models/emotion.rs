use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Append-only record of every applied emotion change.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EmotionHistoryEntry {
    pub id: Uuid,
    pub user_id: String,
    pub character_id: String,
    pub delta: i32,
    pub score_after: i32,
    pub state_after: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl EmotionHistoryEntry {
    pub fn new(
        user_id: &str,
        character_id: &str,
        delta: i32,
        score_after: i32,
        state_after: &str,
        reason: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            character_id: character_id.to_string(),
            delta,
            score_after,
            state_after: state_after.to_string(),
            reason: reason.to_string(),
            created_at: Utc::now(),
        }
    }
}
