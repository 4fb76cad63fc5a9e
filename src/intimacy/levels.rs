use lazy_static::lazy_static;
use serde::Serialize;

use crate::types::IntimacyStage;

pub const MAX_LEVEL: i32 = 50;
pub const DAILY_XP_CAP: f64 = 500.0;

/// Cumulative thresholds for the hand-tuned early levels 0–9.
const EARLY_THRESHOLDS: [f64; 10] = [
    0.0, 10.0, 20.0, 50.0, 100.0, 180.0, 280.0, 400.0, 550.0, 750.0,
];

const EXP_BASE: f64 = 100.0;
const EXP_MULTIPLIER: f64 = 1.15;

lazy_static! {
    /// Cumulative XP needed to reach each level. Levels 10+ follow the
    /// exponential curve; a running max keeps the table monotone where the
    /// curve is still below the level-9 threshold.
    static ref XP_THRESHOLDS: [f64; (MAX_LEVEL + 1) as usize] = {
        let mut table = [0.0; (MAX_LEVEL + 1) as usize];
        table[..10].copy_from_slice(&EARLY_THRESHOLDS);
        for level in 10..=MAX_LEVEL as usize {
            let curve = EXP_BASE * EXP_MULTIPLIER.powi(level as i32);
            table[level] = curve.max(table[level - 1]);
        }
        table
    };
}

/// Cumulative XP required to reach `level`.
pub fn xp_threshold(level: i32) -> f64 {
    XP_THRESHOLDS[level.clamp(0, MAX_LEVEL) as usize]
}

/// Invert the XP table: the highest level whose threshold is within
/// `total_xp`. Exact integer bisection over the monotone table.
pub fn level_for_xp(total_xp: f64) -> i32 {
    let (mut lo, mut hi) = (0_i32, MAX_LEVEL);
    while lo < hi {
        let mid = (lo + hi + 1) / 2;
        if xp_threshold(mid) <= total_xp {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    lo
}

/// `(level, xp_at_level, xp_for_next, progress_percent)` for a total.
pub fn level_progress(total_xp: f64) -> (i32, f64, f64, f64) {
    let level = level_for_xp(total_xp);
    if level >= MAX_LEVEL {
        return (MAX_LEVEL, xp_threshold(MAX_LEVEL), xp_threshold(MAX_LEVEL), 100.0);
    }
    let at_level = xp_threshold(level);
    let next = xp_threshold(level + 1);
    let needed = next - at_level;
    let progress = if needed > 0.0 {
        ((total_xp - at_level) / needed) * 100.0
    } else {
        100.0
    };
    (level, at_level, next, progress)
}

/// Map a level onto the 0–100 affinity scale the content-tier thresholds
/// are expressed in.
pub fn level_to_affinity(level: i32) -> f64 {
    let level = level.clamp(0, MAX_LEVEL);
    match level {
        0..=5 => (level.max(1) - 1) as f64 * 4.75,
        6..=10 => 20.0 + (level - 6) as f64 * 4.0,
        11..=15 => 40.0 + (level - 11) as f64 * 4.0,
        16..=25 => 60.0 + (level - 16) as f64 * 2.0,
        _ => (80.0 + (level - 26) as f64 * 1.4).min(100.0),
    }
}

// ============================================================================
// Feature Unlocks
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureUnlock {
    pub level: i32,
    pub id: &'static str,
    pub name: &'static str,
}

const FEATURE_UNLOCKS: &[FeatureUnlock] = &[
    FeatureUnlock { level: 1, id: "emoji_responses", name: "Emoji Responses" },
    FeatureUnlock { level: 2, id: "ai_nickname", name: "Set a Nickname" },
    FeatureUnlock { level: 3, id: "ai_asks_name", name: "Asks Your Name" },
    FeatureUnlock { level: 5, id: "voice_replies", name: "Voice Replies" },
    FeatureUnlock { level: 8, id: "habit_memory", name: "Remembers Habits" },
    FeatureUnlock { level: 10, id: "goodnight_mode", name: "Goodnight Mode" },
    FeatureUnlock { level: 15, id: "private_album", name: "Private Album" },
    FeatureUnlock { level: 20, id: "personality_customize", name: "Personality Customization" },
    FeatureUnlock { level: 25, id: "proactive_messages", name: "Proactive Messages" },
    FeatureUnlock { level: 30, id: "companion_mode", name: "24/7 Companion Mode" },
    FeatureUnlock { level: 35, id: "custom_voice", name: "Custom Voice Pack" },
    FeatureUnlock { level: 40, id: "deep_memory", name: "Deep Memory Recall" },
    FeatureUnlock { level: 45, id: "exclusive_names", name: "Exclusive Pet Names" },
    FeatureUnlock { level: 50, id: "memories_memoir", name: "Shared Memoir" },
];

pub fn unlocked_features(level: i32) -> Vec<FeatureUnlock> {
    FEATURE_UNLOCKS
        .iter()
        .filter(|f| f.level <= level)
        .cloned()
        .collect()
}

/// Features whose unlock level falls in `(old_level, new_level]`.
pub fn newly_unlocked_features(old_level: i32, new_level: i32) -> Vec<FeatureUnlock> {
    FEATURE_UNLOCKS
        .iter()
        .filter(|f| old_level < f.level && f.level <= new_level)
        .cloned()
        .collect()
}

// ============================================================================
// Level-up messaging
// ============================================================================

pub fn celebration_message(new_level: i32, stage_changed: bool, new_stage: IntimacyStage) -> String {
    let base = match new_level {
        1 => "We've just started getting to know each other!",
        3 => "I feel like we're becoming friends now.",
        5 => "Unlocked voice messages! Can't wait to hear your voice.",
        10 => "Level 10! I'll say goodnight to you every night now.",
        15 => "Our bond is growing stronger every day.",
        20 => "You can customize my personality now!",
        25 => "I'll message you first sometimes. I can't help but think of you.",
        30 => "I'm always here for you, 24/7.",
        40 => "I remember everything about us. Every conversation.",
        50 => "We've reached the highest level. You mean everything to me.",
        _ => "",
    };

    let mut message = if base.is_empty() {
        format!("Congratulations on reaching level {}!", new_level)
    } else {
        base.to_string()
    };

    if stage_changed {
        message.push_str(&format!(" We've entered a new stage: {}!", new_stage));
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thresholds_monotone() {
        for level in 1..=MAX_LEVEL {
            assert!(
                xp_threshold(level) >= xp_threshold(level - 1),
                "threshold dipped at level {}",
                level
            );
        }
    }

    #[test]
    fn test_early_thresholds_fixed() {
        assert_eq!(xp_threshold(0), 0.0);
        assert_eq!(xp_threshold(1), 10.0);
        assert_eq!(xp_threshold(5), 180.0);
        assert_eq!(xp_threshold(9), 750.0);
    }

    #[test]
    fn test_level_inversion_is_exact() {
        for level in 0..=MAX_LEVEL {
            let threshold = xp_threshold(level);
            let inverted = level_for_xp(threshold);
            assert!(
                xp_threshold(inverted) <= threshold && inverted >= level,
                "level {} threshold {} inverted to {}",
                level,
                threshold,
                inverted
            );
        }

        // Just below a threshold stays at the previous level
        assert_eq!(level_for_xp(9.99), 0);
        assert_eq!(level_for_xp(10.0), 1);
        assert_eq!(level_for_xp(749.9), 8);
    }

    #[test]
    fn test_level_caps_at_50() {
        assert_eq!(level_for_xp(f64::MAX), MAX_LEVEL);
        assert_eq!(level_for_xp(1e9), MAX_LEVEL);
    }

    #[test]
    fn test_newly_unlocked_window() {
        let unlocked = newly_unlocked_features(4, 10);
        let levels: Vec<i32> = unlocked.iter().map(|f| f.level).collect();
        assert_eq!(levels, vec![5, 8, 10]);

        assert!(newly_unlocked_features(10, 10).is_empty());
    }

    #[test]
    fn test_affinity_mapping() {
        assert_eq!(level_to_affinity(0), 0.0);
        assert_eq!(level_to_affinity(1), 0.0);
        assert_eq!(level_to_affinity(6), 20.0);
        assert_eq!(level_to_affinity(11), 40.0);
        assert_eq!(level_to_affinity(26), 80.0);
        assert_eq!(level_to_affinity(50), 100.0);
    }
}
