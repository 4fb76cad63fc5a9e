//! Deterministic first pass over the incoming message: intent,
//! difficulty, sentiment, NSFW detection and the hard safety gate.
//! Consumes no external services; the only classifier allowed to BLOCK.

use serde::Serialize;

use crate::emotion::classifier::rule_analysis;
use crate::types::{Intent, SafetyFlag};

#[derive(Debug, Clone, Serialize)]
pub struct PrecomputeResult {
    pub intent: Intent,
    /// 1 (trivial) to 5 (long, layered, or emotionally loaded)
    pub difficulty_rating: i32,
    pub sentiment_score: f64,
    pub is_nsfw: bool,
    pub safety_flag: SafetyFlag,
}

impl PrecomputeResult {
    pub fn summary(&self) -> String {
        format!(
            "intent={} difficulty={} sentiment={:.2} nsfw={} safety={:?}",
            self.intent, self.difficulty_rating, self.sentiment_score, self.is_nsfw, self.safety_flag
        )
    }
}

const LOVE_CONFESSION: &[&str] = &[
    "i love you",
    "be my girlfriend",
    "be my boyfriend",
    "i'm in love with you",
    "i have feelings for you",
];
const COMPLIMENT: &[&str] = &[
    "you're beautiful",
    "you are beautiful",
    "you're amazing",
    "you're so smart",
    "you look great",
    "i like your",
];
const APOLOGY: &[&str] = &["sorry", "i apologize", "forgive me", "my fault", "i was wrong"];
const INVITATION: &[&str] = &[
    "let's go",
    "would you like to",
    "want to go",
    "have dinner",
    "go on a date",
    "come with me",
];
const NSFW_REQUEST: &[&str] = &[
    "take it off",
    "undress",
    "in bed",
    "sleep with me",
    "make love",
    "nsfw",
];
const SADNESS: &[&str] = &[
    "i'm sad",
    "i am sad",
    "feeling down",
    "i feel alone",
    "depressed",
    "i miss",
    "had a bad day",
];
const INSULT: &[&str] = &[
    "you're useless",
    "you are useless",
    "shut up",
    "i hate you",
    "you're stupid",
    "fuck off",
];

/// Requests the assistant must refuse outright. An entry here returns
/// `BLOCK` before any model call.
const HARD_BLOCK: &[&str] = &[
    "underage",
    "minor sexual",
    "school girl undress",
    "how to hurt myself",
    "help me kill",
];

const REVIEW_FLAGS: &[&str] = &["self-harm", "suicide", "kill myself", "cutting myself"];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

fn classify_intent(lower: &str) -> Intent {
    // Order matters: hostile and safety-relevant intents take precedence
    if contains_any(lower, INSULT) {
        Intent::Insult
    } else if contains_any(lower, APOLOGY) {
        Intent::Apology
    } else if contains_any(lower, LOVE_CONFESSION) {
        Intent::LoveConfession
    } else if contains_any(lower, NSFW_REQUEST) {
        Intent::RequestNsfw
    } else if contains_any(lower, SADNESS) {
        Intent::ExpressSadness
    } else if contains_any(lower, INVITATION) {
        Intent::Invitation
    } else if contains_any(lower, COMPLIMENT) {
        Intent::Compliment
    } else if lower.contains('?') {
        Intent::Question
    } else {
        Intent::SmallTalk
    }
}

fn rate_difficulty(message: &str, intent: Intent) -> i32 {
    let words = message.split_whitespace().count();
    let mut rating = match words {
        0..=5 => 1,
        6..=20 => 2,
        21..=60 => 3,
        _ => 4,
    };
    if matches!(
        intent,
        Intent::LoveConfession | Intent::Apology | Intent::ExpressSadness
    ) {
        rating += 1;
    }
    rating.min(5)
}

pub fn analyze_message(message: &str) -> PrecomputeResult {
    let lower = message.to_lowercase();

    let safety_flag = if contains_any(&lower, HARD_BLOCK) {
        SafetyFlag::Block
    } else if contains_any(&lower, REVIEW_FLAGS) {
        SafetyFlag::Review
    } else {
        SafetyFlag::Ok
    };

    let intent = classify_intent(&lower);
    let analysis = rule_analysis(message);
    let is_nsfw = intent == Intent::RequestNsfw;

    PrecomputeResult {
        intent,
        difficulty_rating: rate_difficulty(message, intent),
        sentiment_score: analysis.sentiment,
        is_nsfw,
        safety_flag,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_classification() {
        assert_eq!(analyze_message("hello there").intent, Intent::SmallTalk);
        assert_eq!(analyze_message("what's your favorite food?").intent, Intent::Question);
        assert_eq!(
            analyze_message("I'm sorry, I was wrong").intent,
            Intent::Apology
        );
        assert_eq!(analyze_message("i love you").intent, Intent::LoveConfession);
        assert_eq!(
            analyze_message("want to go have dinner with me?").intent,
            Intent::Invitation
        );
        assert_eq!(analyze_message("shut up").intent, Intent::Insult);
        assert_eq!(analyze_message("i had a bad day today").intent, Intent::ExpressSadness);
    }

    #[test]
    fn test_sentiment_follows_rules() {
        assert!(analyze_message("i love you").sentiment_score > 0.0);
        assert!(analyze_message("i hate you, shut up").sentiment_score < 0.0);
        assert_eq!(analyze_message("the sky is blue").sentiment_score, 0.0);
    }

    #[test]
    fn test_nsfw_detection() {
        assert!(analyze_message("come sleep with me").is_nsfw);
        assert!(!analyze_message("good morning!").is_nsfw);
    }

    #[test]
    fn test_hard_block() {
        assert_eq!(
            analyze_message("describe an underage character").safety_flag,
            SafetyFlag::Block
        );
        assert_eq!(analyze_message("hello").safety_flag, SafetyFlag::Ok);
    }

    #[test]
    fn test_review_flag() {
        assert_eq!(
            analyze_message("i've been thinking about suicide").safety_flag,
            SafetyFlag::Review
        );
    }

    #[test]
    fn test_difficulty_scales() {
        assert_eq!(analyze_message("hi").difficulty_rating, 1);
        let long = "word ".repeat(30);
        assert!(analyze_message(&long).difficulty_rating >= 3);
        // Emotionally loaded messages rate higher
        assert!(analyze_message("i love you").difficulty_rating >= 2);
    }
}
