use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Gift processing status for the acknowledgment flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GiftStatus {
    /// Created, waiting for the in-character acknowledgment
    Pending,
    /// The character has responded to the gift
    Acknowledged,
    Failed,
}

impl std::fmt::Display for GiftStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GiftStatus::Pending => write!(f, "pending"),
            GiftStatus::Acknowledged => write!(f, "acknowledged"),
            GiftStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for GiftStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(GiftStatus::Pending),
            "acknowledged" => Ok(GiftStatus::Acknowledged),
            "failed" => Ok(GiftStatus::Failed),
            _ => Err(format!("Invalid gift status: {}", s)),
        }
    }
}

/// Gift tier semantics:
/// 1 consumable, 2 state-effect, 3 relationship accelerator, 4 luxury.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GiftTier {
    Consumable,
    StateEffect,
    Accelerator,
    Luxury,
}

impl GiftTier {
    pub fn as_i32(&self) -> i32 {
        match self {
            Self::Consumable => 1,
            Self::StateEffect => 2,
            Self::Accelerator => 3,
            Self::Luxury => 4,
        }
    }

    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            1 => Some(Self::Consumable),
            2 => Some(Self::StateEffect),
            3 => Some(Self::Accelerator),
            4 => Some(Self::Luxury),
            _ => None,
        }
    }
}

/// A sent gift, recorded inside the gift transaction.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Gift {
    pub id: Uuid,
    pub user_id: String,
    pub character_id: String,
    pub session_id: Option<Uuid>,
    pub gift_type: String,
    pub gift_name: String,
    pub price: i64,
    pub xp_reward: i64,
    pub tier: i32,
    pub status: String,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
}

impl Gift {
    pub fn get_status(&self) -> Result<GiftStatus, String> {
        self.status.parse()
    }
}

/// Idempotency record: one logical outcome per `(user, key)` within the TTL.
/// The full serialized response body is replayed on duplicates.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct IdempotencyRecord {
    pub key: String,
    pub user_id: String,
    pub gift_id: Uuid,
    pub result: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

pub const IDEMPOTENCY_KEY_TTL_HOURS: i64 = 24;

impl IdempotencyRecord {
    pub fn new(key: String, user_id: String, gift_id: Uuid, result: String) -> Self {
        let now = Utc::now();
        Self {
            key,
            user_id,
            gift_id,
            result,
            created_at: now,
            expires_at: now + Duration::hours(IDEMPOTENCY_KEY_TTL_HOURS),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Tier-2 status effect attached to a gift type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEffectSpec {
    pub effect_type: String,
    pub prompt_modifier: String,
    pub duration_messages: i32,
}

/// Catalog row describing a purchasable gift type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GiftCatalogEntry {
    pub gift_type: String,
    pub name: String,
    pub description: String,
    pub icon: String,
    pub price: i64,
    pub xp_reward: i64,
    pub tier: GiftTier,
    pub sort_order: i32,
    /// Positive score change applied when the gift lands
    pub emotion_boost: i32,
    /// Apology gifts can end a cold war in the same transaction
    pub clears_cold_war: bool,
    /// Luxury gifts force the score to the positive maximum
    pub force_emotion: bool,
    pub status_effect: Option<StatusEffectSpec>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gift_status_round_trip() {
        assert_eq!("pending".parse::<GiftStatus>().unwrap(), GiftStatus::Pending);
        assert_eq!(GiftStatus::Acknowledged.to_string(), "acknowledged");
        assert!("shipped".parse::<GiftStatus>().is_err());
    }

    #[test]
    fn test_idempotency_expiry() {
        let record = IdempotencyRecord::new(
            "k1".into(),
            "u1".into(),
            Uuid::new_v4(),
            "{}".into(),
        );
        assert!(!record.is_expired(Utc::now()));
        assert!(record.is_expired(Utc::now() + Duration::hours(25)));
    }

    #[test]
    fn test_gift_tier_mapping() {
        assert_eq!(GiftTier::from_i32(2), Some(GiftTier::StateEffect));
        assert_eq!(GiftTier::Luxury.as_i32(), 4);
        assert_eq!(GiftTier::from_i32(9), None);
    }
}
