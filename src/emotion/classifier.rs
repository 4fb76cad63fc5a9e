//! Fast rule-based affect detection. This layer is authoritative: the
//! LLM-assisted refinement only adjusts what these rules produce.

use serde::Serialize;

use crate::types::Intent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    StrongPositive,
    MildPositive,
    Apology,
    MildNegative,
    StrongNegative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Anomaly {
    TooShort,
    AllCaps,
    Repeated,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuickDetection {
    pub patterns_matched: Vec<PatternKind>,
    pub emoji_sentiment: f64,
    pub anomaly: Option<Anomaly>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmotionAnalysis {
    pub sentiment: f64,
    pub intensity: f64,
    pub intent: Intent,
    pub suggested_delta: i32,
    pub reasoning: String,
    /// True when the small-model refinement contributed to the delta.
    pub llm_refined: bool,
}

const STRONG_POSITIVE: &[&str] = &[
    "i love you",
    "love you",
    "miss you",
    "you're the best",
    "you are the best",
    "adore you",
];
const MILD_POSITIVE: &[&str] = &[
    "thank you",
    "thanks",
    "great",
    "amazing",
    "awesome",
    "wonderful",
    "you're sweet",
];
const APOLOGY: &[&str] = &[
    "sorry",
    "i apologize",
    "my fault",
    "forgive me",
    "i was wrong",
];
const MILD_NEGATIVE: &[&str] = &["boring", "annoying", "whatever", "meh", "lame"];
const STRONG_NEGATIVE: &[&str] = &[
    "fuck off",
    "shut up",
    "hate you",
    "go away",
    "you're useless",
    "you are useless",
];

const POSITIVE_EMOJIS: &[&str] = &["😊", "❤️", "🥰", "😍", "💕", "😘", "🤗", "💖", "😄", "🥺"];
const NEGATIVE_EMOJIS: &[&str] = &["😡", "😤", "💢", "😒", "🙄", "😑", "👎", "💔", "😢", "😭"];

fn matches_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

fn is_repeated_message(message: &str) -> bool {
    let compact: String = message.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.chars().count() < 4 {
        return false;
    }

    let distinct: std::collections::HashSet<char> = compact.chars().collect();
    if distinct.len() <= 2 {
        return true;
    }

    let chars: Vec<char> = compact.chars().collect();
    for len in 2..=4_usize {
        if chars.len() >= len * 3 && chars.len() % len == 0 {
            let pattern = &chars[..len];
            if chars.chunks(len).all(|chunk| chunk == pattern) {
                return true;
            }
        }
    }
    false
}

pub fn quick_detect(message: &str) -> QuickDetection {
    let lower = message.to_lowercase();
    let mut patterns = Vec::new();

    if matches_any(&lower, STRONG_POSITIVE) {
        patterns.push(PatternKind::StrongPositive);
    }
    if matches_any(&lower, MILD_POSITIVE) {
        patterns.push(PatternKind::MildPositive);
    }
    if matches_any(&lower, APOLOGY) {
        patterns.push(PatternKind::Apology);
    }
    if matches_any(&lower, MILD_NEGATIVE) {
        patterns.push(PatternKind::MildNegative);
    }
    if matches_any(&lower, STRONG_NEGATIVE) {
        patterns.push(PatternKind::StrongNegative);
    }

    let positives: i32 = POSITIVE_EMOJIS
        .iter()
        .map(|e| message.matches(e).count() as i32)
        .sum();
    let negatives: i32 = NEGATIVE_EMOJIS
        .iter()
        .map(|e| message.matches(e).count() as i32)
        .sum();
    let emoji_sentiment = if positives + negatives > 0 {
        (positives - negatives) as f64 / (positives + negatives) as f64
    } else {
        0.0
    };

    let trimmed = message.trim();
    let anomaly = if trimmed.chars().count() <= 2 {
        Some(Anomaly::TooShort)
    } else if trimmed.len() > 5
        && trimmed.chars().any(|c| c.is_alphabetic())
        && trimmed
            .chars()
            .filter(|c| c.is_alphabetic())
            .all(|c| c.is_uppercase())
    {
        Some(Anomaly::AllCaps)
    } else if is_repeated_message(trimmed) {
        Some(Anomaly::Repeated)
    } else {
        None
    };

    QuickDetection {
        patterns_matched: patterns,
        emoji_sentiment,
        anomaly,
    }
}

/// Produce the deterministic base analysis from the quick-detect signals.
pub fn rule_analysis(message: &str) -> EmotionAnalysis {
    let quick = quick_detect(message);

    let (mut delta, intent, reasoning) = if quick.patterns_matched.contains(&PatternKind::StrongNegative)
    {
        (-25, Intent::Insult, "strong negative phrasing")
    } else if quick.patterns_matched.contains(&PatternKind::Apology) {
        (12, Intent::Apology, "apology phrasing")
    } else if quick.patterns_matched.contains(&PatternKind::StrongPositive) {
        (15, Intent::Compliment, "strong positive phrasing")
    } else if quick.patterns_matched.contains(&PatternKind::MildNegative) {
        (-10, Intent::SmallTalk, "mild negative phrasing")
    } else if quick.patterns_matched.contains(&PatternKind::MildPositive) {
        (8, Intent::SmallTalk, "mild positive phrasing")
    } else {
        (0, Intent::SmallTalk, "no affect patterns")
    };

    delta += (quick.emoji_sentiment * 5.0) as i32;

    let sentiment = match delta {
        d if d > 0 => 1.0_f64.min(d as f64 / 25.0),
        d if d < 0 => (-1.0_f64).max(d as f64 / 25.0),
        _ => 0.0,
    };

    EmotionAnalysis {
        sentiment,
        intensity: (delta.abs() as f64 / 30.0).min(1.0),
        intent,
        suggested_delta: delta,
        reasoning: reasoning.to_string(),
        llm_refined: false,
    }
}
