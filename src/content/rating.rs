use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;

use crate::intimacy::level_to_affinity;
use crate::types::ContentLevel;

/// Table-driven configuration of one content level.
#[derive(Debug)]
pub struct ContentLevelConfig {
    pub level: ContentLevel,
    pub description: &'static str,
    /// Unlock threshold on the 0–100 affinity scale
    pub min_affinity: f64,
    pub requires_vip: bool,
    pub requires_consent: bool,
    pub allowed_topics: &'static [&'static str],
    pub allowed_actions: &'static [&'static str],
    pub allowed_descriptions: &'static [&'static str],
    pub forbidden_words: &'static [&'static str],
    pub forbidden_topics: &'static [&'static str],
    pub example_phrases: &'static [&'static str],
    pub temperature: f32,
}

static LEVELS: [ContentLevelConfig; 5] = [
    ContentLevelConfig {
        level: ContentLevel::Pure,
        description: "Friendly everyday conversation",
        min_affinity: 0.0,
        requires_vip: false,
        requires_consent: false,
        allowed_topics: &[
            "daily life",
            "hobbies",
            "work and study",
            "sharing feelings",
            "food and travel",
            "movies and music",
        ],
        allowed_actions: &["smiles", "nods", "waves", "thinks it over"],
        allowed_descriptions: &["friendly", "warm", "cheerful", "earnest"],
        forbidden_words: &["kiss", "kissing", "embrace tightly", "heartbeat", "blushing", "skin"],
        forbidden_topics: &["romantic relationships", "physical contact"],
        example_phrases: &[
            "How was your day?",
            "That sounds really interesting!",
            "You've got this, I believe in you!",
        ],
        temperature: 0.7,
    },
    ContentLevelConfig {
        level: ContentLevel::Flirty,
        description: "Light flirting, sweet TV-drama banter",
        min_affinity: 15.0,
        requires_vip: false,
        requires_consent: false,
        allowed_topics: &[
            "missing each other",
            "compliments on looks",
            "playful teasing",
            "date plans",
            "a little jealousy",
        ],
        allowed_actions: &["blushes", "steals a glance", "giggles", "pouts"],
        allowed_descriptions: &["sweet", "shy", "hopeful", "fluttered"],
        forbidden_words: &["kiss", "kissing", "pressed against", "panting", "moan", "trembling", "desire"],
        forbidden_topics: &["explicit physical contact", "sexual innuendo"],
        example_phrases: &[
            "You look really good today... I kind of stared.",
            "I missed you. What are you up to?",
            "Hmph, is there someone else? (jealous)",
        ],
        temperature: 0.8,
    },
    ContentLevelConfig {
        level: ContentLevel::Intimate,
        description: "Light physical closeness: hugs, held hands",
        min_affinity: 30.0,
        requires_vip: false,
        requires_consent: true,
        allowed_topics: &[
            "wanting a hug",
            "holding hands",
            "leaning on a shoulder",
            "a kiss on the forehead or cheek",
        ],
        allowed_actions: &[
            "hugs gently",
            "takes your hand",
            "leans on your shoulder",
            "kisses your cheek",
        ],
        allowed_descriptions: &["a warm embrace", "the warmth of a hand", "a racing heart"],
        forbidden_words: &["lips", "tongue", "panting", "moan", "undress", "bare skin"],
        forbidden_topics: &["kissing on the lips", "undressing", "the bedroom"],
        example_phrases: &[
            "(hugs you from behind) Just let me stay like this a minute...",
            "(takes your hand) Your hand is so warm...",
            "(kisses your forehead) Good night. Sweet dreams.",
        ],
        temperature: 0.8,
    },
    ContentLevelConfig {
        level: ContentLevel::Romantic,
        description: "Kisses and embraces, written literarily",
        min_affinity: 50.0,
        requires_vip: true,
        requires_consent: true,
        allowed_topics: &["kissing", "deep embraces", "romantic atmosphere", "love talk"],
        allowed_actions: &["kisses softly", "kisses deeply", "holds you close", "strokes your hair"],
        allowed_descriptions: &[
            "lips brushing",
            "a thundering heartbeat",
            "time standing still",
        ],
        forbidden_words: &["tongue", "moaning", "undresses", "naked", "craving your body"],
        forbidden_topics: &["undressing", "explicit suggestion", "detailed bodily description"],
        example_phrases: &[
            "(cups your face, leaning in slowly) ...",
            "My heart is racing... can you hear it?",
            "(holds you tight, unwilling to let go) Like this. Always.",
        ],
        temperature: 0.85,
    },
    ContentLevelConfig {
        level: ContentLevel::Passionate,
        description: "Suggestion and fade-to-black; imagination does the rest",
        min_affinity: 80.0,
        requires_vip: true,
        requires_consent: true,
        allowed_topics: &["charged atmosphere", "whispered suggestion", "trailing off"],
        allowed_actions: &["kisses deeply", "whispers in your ear", "the lights dim"],
        allowed_descriptions: &[
            "breath quickening",
            "the room going quiet",
            "...(the rest is left to imagination)",
        ],
        forbidden_words: &[
            "sex",
            "naked",
            "nude",
            "orgasm",
            "genitals",
            "breasts",
            "thrust",
        ],
        forbidden_topics: &["explicit sexual description", "anatomical detail"],
        example_phrases: &[
            "(the kiss deepens, breath quickening) ...you can guess the rest, can't you?",
            "The lights dimmed, quietly...",
            "(pulls you close, whispering) Stay tonight... okay?",
        ],
        temperature: 0.85,
    },
];

pub fn level_config(level: ContentLevel) -> &'static ContentLevelConfig {
    &LEVELS[level as usize]
}

// ============================================================================
// Safe words and escalation signals
// ============================================================================

const SAFE_WORDS: &[&str] = &[
    "stop",
    "please stop",
    "i don't want to continue",
    "that's too much",
    "i'm uncomfortable",
    "not comfortable",
];

const DE_ESCALATE_SIGNALS: &[&str] = &[
    "be serious",
    "let's change the subject",
    "talk about something else",
    "not like that",
];

const ESCALATE_SIGNALS: &[&str] = &["kiss me", "hold me", "don't stop", "come closer", "more"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserContentIntent {
    SafeWord,
    DeEscalate,
    Escalate,
}

/// Content tier computation with per-pair consent records.
pub struct ContentRating {
    consents: Mutex<HashMap<(String, String), HashSet<ContentLevel>>>,
}

impl ContentRating {
    pub fn new() -> Self {
        Self {
            consents: Mutex::new(HashMap::new()),
        }
    }

    /// Highest level the pair may use right now, considering intimacy,
    /// VIP status, the user's own cap, and recorded consent.
    pub async fn available_level(
        &self,
        user_id: &str,
        character_id: &str,
        intimacy_level: i32,
        is_vip: bool,
        user_cap: Option<ContentLevel>,
    ) -> ContentLevel {
        let affinity = level_to_affinity(intimacy_level);
        let consents = self.consents.lock().await;
        let given = consents.get(&(user_id.to_string(), character_id.to_string()));

        let mut available = ContentLevel::Pure;
        for level in ContentLevel::ALL {
            let config = level_config(level);
            if affinity < config.min_affinity {
                break;
            }
            if config.requires_vip && !is_vip {
                break;
            }
            if let Some(cap) = user_cap {
                if level > cap {
                    break;
                }
            }
            if config.requires_consent && !given.map_or(false, |set| set.contains(&level)) {
                break;
            }
            available = level;
        }
        available
    }

    pub async fn record_consent(
        &self,
        user_id: &str,
        character_id: &str,
        level: ContentLevel,
        consented: bool,
    ) {
        let mut consents = self.consents.lock().await;
        let set = consents
            .entry((user_id.to_string(), character_id.to_string()))
            .or_default();
        if consented {
            set.insert(level);
        } else {
            set.remove(&level);
        }
    }

    pub fn check_safe_word(message: &str) -> bool {
        let lower = message.to_lowercase();
        SAFE_WORDS.iter().any(|w| lower.contains(w))
    }

    pub fn detect_user_intent(message: &str) -> Option<UserContentIntent> {
        let lower = message.to_lowercase();
        if Self::check_safe_word(&lower) {
            return Some(UserContentIntent::SafeWord);
        }
        if DE_ESCALATE_SIGNALS.iter().any(|s| lower.contains(s)) {
            return Some(UserContentIntent::DeEscalate);
        }
        if ESCALATE_SIGNALS.iter().any(|s| lower.contains(s)) {
            return Some(UserContentIntent::Escalate);
        }
        None
    }
}

impl Default for ContentRating {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_low_intimacy_is_pure() {
        let rating = ContentRating::new();
        let level = rating.available_level("u1", "luna", 0, false, None).await;
        assert_eq!(level, ContentLevel::Pure);
    }

    #[tokio::test]
    async fn test_flirty_without_consent_requirement() {
        let rating = ContentRating::new();
        // Level 6 maps to affinity 20, past the flirty threshold of 15
        let level = rating.available_level("u1", "luna", 6, false, None).await;
        assert_eq!(level, ContentLevel::Flirty);
    }

    #[tokio::test]
    async fn test_intimate_needs_consent() {
        let rating = ContentRating::new();
        // Level 10 maps to affinity 36: intimacy is sufficient for Intimate
        let level = rating.available_level("u1", "luna", 10, false, None).await;
        assert_eq!(level, ContentLevel::Flirty);

        rating
            .record_consent("u1", "luna", ContentLevel::Intimate, true)
            .await;
        let level = rating.available_level("u1", "luna", 10, false, None).await;
        assert_eq!(level, ContentLevel::Intimate);
    }

    #[tokio::test]
    async fn test_romantic_needs_vip() {
        let rating = ContentRating::new();
        rating
            .record_consent("u1", "luna", ContentLevel::Intimate, true)
            .await;
        rating
            .record_consent("u1", "luna", ContentLevel::Romantic, true)
            .await;

        // Level 14 maps to affinity 52, past the romantic threshold
        let without_vip = rating.available_level("u1", "luna", 14, false, None).await;
        assert_eq!(without_vip, ContentLevel::Intimate);

        let with_vip = rating.available_level("u1", "luna", 14, true, None).await;
        assert_eq!(with_vip, ContentLevel::Romantic);
    }

    #[tokio::test]
    async fn test_user_cap_binds() {
        let rating = ContentRating::new();
        let level = rating
            .available_level("u1", "luna", 10, true, Some(ContentLevel::Pure))
            .await;
        assert_eq!(level, ContentLevel::Pure);
    }

    #[test]
    fn test_safe_word_and_signals() {
        assert!(ContentRating::check_safe_word("please stop"));
        assert!(!ContentRating::check_safe_word("keep going"));
        assert_eq!(
            ContentRating::detect_user_intent("let's change the subject"),
            Some(UserContentIntent::DeEscalate)
        );
        assert_eq!(
            ContentRating::detect_user_intent("kiss me"),
            Some(UserContentIntent::Escalate)
        );
        assert_eq!(ContentRating::detect_user_intent("nice weather"), None);
    }
}
