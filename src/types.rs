use serde::{Deserialize, Serialize};

// ============================================================================
// Subscription Tiers
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    Free,
    Premium,
    Vip,
}

impl SubscriptionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Premium => "premium",
            Self::Vip => "vip",
        }
    }

    /// Hierarchy rank for tier comparisons
    pub fn rank(&self) -> u8 {
        match self {
            Self::Free => 0,
            Self::Premium => 1,
            Self::Vip => 2,
        }
    }

    /// Daily free credit allowance refreshed each UTC day
    pub fn daily_credit_allowance(&self) -> i64 {
        match self {
            Self::Free => 10,
            Self::Premium => 100,
            Self::Vip => 500,
        }
    }

    /// Request admissions per minute for the token bucket
    pub fn rate_limit_per_minute(&self) -> u32 {
        match self {
            Self::Free => 5,
            Self::Premium => 30,
            Self::Vip => 100,
        }
    }

    /// How many recent messages are loaded as conversation context
    pub fn history_window(&self) -> i64 {
        match self {
            Self::Free => 10,
            Self::Premium | Self::Vip => 20,
        }
    }

    /// Reply token budget for the main completion call
    pub fn max_reply_tokens(&self) -> u32 {
        match self {
            Self::Free => 300,
            Self::Premium => 400,
            Self::Vip => 512,
        }
    }
}

impl std::fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SubscriptionTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "premium" => Ok(Self::Premium),
            "vip" => Ok(Self::Vip),
            _ => Err(format!("Invalid subscription tier: {}", s)),
        }
    }
}

// ============================================================================
// Message Intent
// ============================================================================

/// Classification of what the user is doing with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    SmallTalk,
    Question,
    Compliment,
    LoveConfession,
    Apology,
    Invitation,
    GiftSend,
    RequestNsfw,
    ExpressSadness,
    Teasing,
    Insult,
    Ignore,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SmallTalk => "SMALL_TALK",
            Self::Question => "QUESTION",
            Self::Compliment => "COMPLIMENT",
            Self::LoveConfession => "LOVE_CONFESSION",
            Self::Apology => "APOLOGY",
            Self::Invitation => "INVITATION",
            Self::GiftSend => "GIFT_SEND",
            Self::RequestNsfw => "REQUEST_NSFW",
            Self::ExpressSadness => "EXPRESS_SADNESS",
            Self::Teasing => "TEASING",
            Self::Insult => "INSULT",
            Self::Ignore => "IGNORE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "SMALL_TALK" => Some(Self::SmallTalk),
            "QUESTION" => Some(Self::Question),
            "COMPLIMENT" => Some(Self::Compliment),
            "LOVE_CONFESSION" => Some(Self::LoveConfession),
            "APOLOGY" => Some(Self::Apology),
            "INVITATION" => Some(Self::Invitation),
            "GIFT_SEND" => Some(Self::GiftSend),
            "REQUEST_NSFW" => Some(Self::RequestNsfw),
            "EXPRESS_SADNESS" => Some(Self::ExpressSadness),
            "TEASING" => Some(Self::Teasing),
            "INSULT" => Some(Self::Insult),
            "IGNORE" => Some(Self::Ignore),
            _ => None,
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Safety Flag
// ============================================================================

/// Outcome of the deterministic pre-compute safety pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SafetyFlag {
    Ok,
    Review,
    Block,
}

// ============================================================================
// Intimacy Stage
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntimacyStage {
    Strangers,
    Acquaintances,
    CloseFriends,
    Ambiguous,
    Soulmates,
}

impl IntimacyStage {
    pub fn from_level(level: i32) -> Self {
        match level {
            i32::MIN..=3 => Self::Strangers,
            4..=10 => Self::Acquaintances,
            11..=25 => Self::CloseFriends,
            26..=40 => Self::Ambiguous,
            _ => Self::Soulmates,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strangers => "strangers",
            Self::Acquaintances => "acquaintances",
            Self::CloseFriends => "close_friends",
            Self::Ambiguous => "ambiguous",
            Self::Soulmates => "soulmates",
        }
    }
}

impl std::fmt::Display for IntimacyStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for IntimacyStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strangers" => Ok(Self::Strangers),
            "acquaintances" => Ok(Self::Acquaintances),
            "close_friends" => Ok(Self::CloseFriends),
            "ambiguous" => Ok(Self::Ambiguous),
            "soulmates" => Ok(Self::Soulmates),
            _ => Err(format!("Invalid intimacy stage: {}", s)),
        }
    }
}

// ============================================================================
// Emotion State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmotionState {
    Loving,
    Happy,
    Content,
    Neutral,
    Annoyed,
    Angry,
    ColdWar,
    Blocked,
}

impl EmotionState {
    /// Bucket a score in [-100, 100] into its emotion state.
    pub fn from_score(score: i32) -> Self {
        match score {
            100..=i32::MAX => Self::Loving,
            50..=99 => Self::Happy,
            20..=49 => Self::Content,
            -19..=19 => Self::Neutral,
            -49..=-20 => Self::Annoyed,
            -79..=-50 => Self::Angry,
            -99..=-80 => Self::ColdWar,
            _ => Self::Blocked,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Loving => "loving",
            Self::Happy => "happy",
            Self::Content => "content",
            Self::Neutral => "neutral",
            Self::Annoyed => "annoyed",
            Self::Angry => "angry",
            Self::ColdWar => "cold_war",
            Self::Blocked => "blocked",
        }
    }

    /// Lockout states refuse regular conversation until repaired.
    pub fn is_lockout(&self) -> bool {
        matches!(self, Self::ColdWar | Self::Blocked)
    }

    /// Affectionate states raise the completion temperature.
    pub fn is_affectionate(&self) -> bool {
        matches!(self, Self::Happy | Self::Loving)
    }
}

impl std::fmt::Display for EmotionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Content Level
// ============================================================================

/// Progressive unlock tier for generated content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentLevel {
    Pure,
    Flirty,
    Intimate,
    Romantic,
    Passionate,
}

impl ContentLevel {
    pub const ALL: [ContentLevel; 5] = [
        Self::Pure,
        Self::Flirty,
        Self::Intimate,
        Self::Romantic,
        Self::Passionate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pure => "pure",
            Self::Flirty => "flirty",
            Self::Intimate => "intimate",
            Self::Romantic => "romantic",
            Self::Passionate => "passionate",
        }
    }
}

impl std::fmt::Display for ContentLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Chat Messages (LLM wire format)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emotion_state_buckets() {
        assert_eq!(EmotionState::from_score(100), EmotionState::Loving);
        assert_eq!(EmotionState::from_score(99), EmotionState::Happy);
        assert_eq!(EmotionState::from_score(50), EmotionState::Happy);
        assert_eq!(EmotionState::from_score(49), EmotionState::Content);
        assert_eq!(EmotionState::from_score(0), EmotionState::Neutral);
        assert_eq!(EmotionState::from_score(-20), EmotionState::Annoyed);
        assert_eq!(EmotionState::from_score(-50), EmotionState::Angry);
        assert_eq!(EmotionState::from_score(-80), EmotionState::ColdWar);
        assert_eq!(EmotionState::from_score(-99), EmotionState::ColdWar);
        assert_eq!(EmotionState::from_score(-100), EmotionState::Blocked);
    }

    #[test]
    fn test_stage_boundaries() {
        assert_eq!(IntimacyStage::from_level(0), IntimacyStage::Strangers);
        assert_eq!(IntimacyStage::from_level(3), IntimacyStage::Strangers);
        assert_eq!(IntimacyStage::from_level(4), IntimacyStage::Acquaintances);
        assert_eq!(IntimacyStage::from_level(10), IntimacyStage::Acquaintances);
        assert_eq!(IntimacyStage::from_level(11), IntimacyStage::CloseFriends);
        assert_eq!(IntimacyStage::from_level(25), IntimacyStage::CloseFriends);
        assert_eq!(IntimacyStage::from_level(26), IntimacyStage::Ambiguous);
        assert_eq!(IntimacyStage::from_level(41), IntimacyStage::Soulmates);
        assert_eq!(IntimacyStage::from_level(50), IntimacyStage::Soulmates);
    }

    #[test]
    fn test_intent_round_trip() {
        for intent in [
            Intent::SmallTalk,
            Intent::LoveConfession,
            Intent::Apology,
            Intent::RequestNsfw,
        ] {
            assert_eq!(Intent::parse(intent.as_str()), Some(intent));
        }
        assert_eq!(Intent::parse("definitely_not_an_intent"), None);
    }

    #[test]
    fn test_tier_ordering() {
        assert!(SubscriptionTier::Vip.rank() > SubscriptionTier::Premium.rank());
        assert!(SubscriptionTier::Premium.rank() > SubscriptionTier::Free.rank());
        assert_eq!(
            "premium".parse::<SubscriptionTier>().unwrap(),
            SubscriptionTier::Premium
        );
    }
}
