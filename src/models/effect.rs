use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A tier-2 gift effect: a prompt modifier that rides along for a bounded
/// number of assistant replies. At most one effect per `effect_type` per
/// pair; a new gift of the same type replaces the old effect.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ActiveEffect {
    pub id: Uuid,
    pub user_id: String,
    pub character_id: String,
    pub effect_type: String,
    pub prompt_modifier: String,
    pub remaining_messages: i32,
    pub gift_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl ActiveEffect {
    pub fn new(
        user_id: &str,
        character_id: &str,
        effect_type: &str,
        prompt_modifier: &str,
        duration_messages: i32,
        gift_id: Uuid,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            character_id: character_id.to_string(),
            effect_type: effect_type.to_string(),
            prompt_modifier: prompt_modifier.to_string(),
            remaining_messages: duration_messages,
            gift_id,
            created_at: Utc::now(),
        }
    }
}
