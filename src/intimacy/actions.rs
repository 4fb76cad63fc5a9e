use serde::{Deserialize, Serialize};

/// Actions that can earn intimacy XP, with per-action daily limits and
/// cooldowns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Message,
    ContinuousChat,
    Checkin,
    Emotional,
    Voice,
    Share,
}

impl ActionKind {
    pub const ALL: [ActionKind; 6] = [
        Self::Message,
        Self::ContinuousChat,
        Self::Checkin,
        Self::Emotional,
        Self::Voice,
        Self::Share,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::ContinuousChat => "continuous_chat",
            Self::Checkin => "checkin",
            Self::Emotional => "emotional",
            Self::Voice => "voice",
            Self::Share => "share",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Message => "Send Message",
            Self::ContinuousChat => "Continuous Chat Bonus",
            Self::Checkin => "Daily Check-in",
            Self::Emotional => "Emotional Expression",
            Self::Voice => "Voice Interaction",
            Self::Share => "Share with a Friend",
        }
    }

    pub fn xp(&self) -> f64 {
        match self {
            Self::Message => 2.0,
            Self::ContinuousChat => 5.0,
            Self::Checkin => 20.0,
            Self::Emotional => 10.0,
            Self::Voice => 15.0,
            Self::Share => 50.0,
        }
    }

    /// `None` means unlimited uses per day.
    pub fn daily_limit(&self) -> Option<u32> {
        match self {
            Self::Message | Self::ContinuousChat => None,
            Self::Checkin => Some(1),
            Self::Emotional => Some(5),
            Self::Voice => Some(3),
            Self::Share => Some(1),
        }
    }

    pub fn cooldown_seconds(&self) -> i64 {
        match self {
            Self::Message | Self::ContinuousChat | Self::Emotional => 0,
            Self::Checkin => 86_400,
            Self::Voice => 300,
            Self::Share => 604_800,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "message" => Some(Self::Message),
            "continuous_chat" => Some(Self::ContinuousChat),
            "checkin" => Some(Self::Checkin),
            "emotional" => Some(Self::Emotional),
            "voice" => Some(Self::Voice),
            "share" => Some(Self::Share),
            _ => None,
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reward_table() {
        assert_eq!(ActionKind::Message.xp(), 2.0);
        assert_eq!(ActionKind::Checkin.xp(), 20.0);
        assert_eq!(ActionKind::Checkin.daily_limit(), Some(1));
        assert_eq!(ActionKind::Checkin.cooldown_seconds(), 86_400);
        assert_eq!(ActionKind::Share.cooldown_seconds(), 604_800);
        assert_eq!(ActionKind::Message.daily_limit(), None);
    }

    #[test]
    fn test_parse() {
        assert_eq!(ActionKind::parse("voice"), Some(ActionKind::Voice));
        assert_eq!(ActionKind::parse("dance"), None);
    }
}
