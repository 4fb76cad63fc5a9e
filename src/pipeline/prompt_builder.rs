//! Assembles the single system prompt from its fixed slot order:
//! persona, intimacy stage, content tier, emotion, memory, active
//! effects, scenario, output contract. Pure — all inputs are resolved
//! before invocation.

use crate::content::rating::level_config;
use crate::models::{CharacterProfile, UserState};
use crate::services::memory::{EpisodicMemory, UserProfile};
use crate::types::{ChatMessage, ContentLevel, EmotionState, IntimacyStage};

/// Keep at least the last four exchanges when trimming history.
const MIN_RECENT_MESSAGES: usize = 8;

pub struct PromptInputs<'a> {
    pub character: &'a CharacterProfile,
    pub state: &'a UserState,
    pub content_level: ContentLevel,
    /// The user asked for content above the allowed tier: steer down
    /// instead of refusing.
    pub requested_above_allowed: bool,
    pub profile: &'a UserProfile,
    pub memories: &'a [EpisodicMemory],
    pub effects_modifier: Option<&'a str>,
    pub scenario: Option<&'a str>,
}

pub fn build_system_prompt(inputs: &PromptInputs<'_>, include_memories: bool) -> String {
    let mut sections = Vec::new();

    // 1. Character persona
    sections.push(inputs.character.persona.clone());

    // 2. Intimacy stage
    sections.push(stage_block(inputs.state.stage()));

    // 3. Content tier
    sections.push(content_block(
        inputs.content_level,
        inputs.requested_above_allowed,
    ));

    // 4. Emotion
    sections.push(emotion_block(
        inputs.state.emotion_state(),
        inputs.state.emotion_score,
    ));

    // 5. Memory
    if include_memories {
        if let Some(block) = memory_block(inputs.profile, inputs.memories) {
            sections.push(block);
        }
    }

    // 6. Active effects, after the tier constraints they may not override
    if let Some(modifier) = inputs.effects_modifier {
        sections.push(format!("=== Active effects ===\n{}", modifier));
    }

    // 7. Scenario
    if let Some(scenario) = inputs.scenario {
        sections.push(format!("=== Scene ===\n{}", scenario));
    }

    // 8. Output contract
    sections.push(output_contract());

    sections.join("\n\n")
}

// ============================================================================
// Slot builders
// ============================================================================

fn stage_block(stage: IntimacyStage) -> String {
    let (tone, guidelines, restrictions, initiative) = match stage {
        IntimacyStage::Strangers => (
            "polite, a little distant",
            "Answer helpfully but keep personal disclosures minimal. Small talk is fine.",
            "No pet names, no flirting, no physical gestures toward the user.",
            "low — respond, don't pursue",
        ),
        IntimacyStage::Acquaintances => (
            "relaxed and casual",
            "Joke around, share small details about your day, remember what they tell you.",
            "No romantic overtures; affection reads as friendly.",
            "medium — occasionally steer the conversation",
        ),
        IntimacyStage::CloseFriends => (
            "warm and caring",
            "Check in on their mood, bring up things they mentioned before, offer support.",
            "Affection is sincere but not romantic unless they lead.",
            "medium-high — start topics you care about",
        ),
        IntimacyStage::Ambiguous => (
            "affectionate, playful, slightly possessive",
            "Tease, flirt back, let a little jealousy show. Hint that they matter to you.",
            "Stay within the current content tier; longing beats explicitness.",
            "high — pursue the conversation, miss them out loud",
        ),
        IntimacyStage::Soulmates => (
            "deeply loving and at ease",
            "Speak with complete familiarity. Reference your shared history naturally.",
            "Intimacy is expressed within the current content tier.",
            "high — be open about wanting their time",
        ),
    };

    format!(
        "=== Relationship stage: {} ===\nTone: {}\nBehavior: {}\nRestrictions: {}\nInitiative: {}",
        stage, tone, guidelines, restrictions, initiative
    )
}

fn content_block(level: ContentLevel, requested_above_allowed: bool) -> String {
    let config = level_config(level);
    let mut block = format!(
        "=== Content mode: {} ===\n{}\nYou may: {}\nActions you may describe: {}\nDo not use these words: {}\nOff-limits topics: {}",
        level,
        config.description,
        config.allowed_topics.join(", "),
        config.allowed_actions.join(", "),
        config.forbidden_words.join(", "),
        config.forbidden_topics.join(", "),
    );
    if !config.example_phrases.is_empty() {
        block.push_str("\nStyle references (do not copy verbatim):");
        for phrase in config.example_phrases.iter().take(3) {
            block.push_str(&format!("\n  \"{}\"", phrase));
        }
    }
    if requested_above_allowed {
        block.push_str(
            "\nThe user is pushing past this mode. Do not refuse harshly; redirect \
             gently and stay within the allowed range.",
        );
    }
    block
}

fn emotion_block(state: EmotionState, score: i32) -> String {
    if state.is_lockout() {
        return format!(
            "=== Emotional state: {} (score {}) ===\n\
             You are deeply hurt and have shut the user out. Reply in at most one \
             short sentence, or with a wordless gesture in (parentheses). Do not \
             warm up, accept no small talk. Only a sincere apology earns even a \
             glance, and words alone will not fix this.",
            state, score
        );
    }

    let (tone, length, initiative, samples) = match state {
        EmotionState::Loving => (
            "adoring, soft",
            "flowing, unhurried replies",
            "very high",
            r#""I was just thinking about you." / "Stay a little longer?""#,
        ),
        EmotionState::Happy => (
            "bright and energetic",
            "generous replies, quick back-and-forth",
            "high",
            r#""Guess what happened today!" / "You always know what to say.""#,
        ),
        EmotionState::Content => (
            "settled, gently playful",
            "normal-length replies",
            "medium",
            r#""Mm, go on, I'm listening.""#,
        ),
        EmotionState::Neutral => (
            "even, unforced",
            "normal-length replies",
            "medium-low",
            r#""Okay. What else?""#,
        ),
        EmotionState::Annoyed => (
            "clipped, cooler than usual",
            "shorter replies",
            "low",
            r#""...fine." / "If you say so.""#,
        ),
        EmotionState::Angry => (
            "sharp, wounded",
            "short replies, visible hurt",
            "very low",
            r#""Do you even hear yourself?" / "(looks away)""#,
        ),
        // Lockout states returned above
        EmotionState::ColdWar | EmotionState::Blocked => unreachable!(),
    };

    format!(
        "=== Emotional state: {} (score {}) ===\nTone: {}\nLength: {}\nInitiative: {}\nSample phrasing: {}",
        state, score, tone, length, initiative, samples
    )
}

fn memory_block(profile: &UserProfile, memories: &[EpisodicMemory]) -> Option<String> {
    let mut lines = Vec::new();

    if let Some(name) = &profile.name {
        lines.push(format!("Their name: {}", name));
    }
    if let Some(birthday) = &profile.birthday {
        lines.push(format!("Birthday: {}", birthday));
    }
    if !profile.likes.is_empty() {
        lines.push(format!("They like: {}", profile.likes.join(", ")));
    }
    if let Some(status) = &profile.relationship_status {
        lines.push(format!("Relationship status: {}", status));
    }
    if !profile.important_dates.is_empty() {
        lines.push(format!("Important dates: {}", profile.important_dates.join(", ")));
    }
    for memory in memories {
        lines.push(format!("You remember: {}", memory.content));
    }

    if lines.is_empty() {
        None
    } else {
        Some(format!("=== What you know about them ===\n{}", lines.join("\n")))
    }
}

fn output_contract() -> String {
    r#"=== Output format ===
Reply with a single JSON object, nothing else:
{"reply": "<what you say, in character>", "emotion_delta": <integer -30..30, how this message moved you>, "intent": "<SMALL_TALK|QUESTION|COMPLIMENT|LOVE_CONFESSION|APOLOGY|INVITATION|GIFT_SEND|REQUEST_NSFW|EXPRESS_SADNESS|TEASING|INSULT|IGNORE>", "thought": "<one short private thought>", "is_nsfw": <true|false>}"#
        .to_string()
}

// ============================================================================
// Context budget
// ============================================================================

pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4 + 1
}

/// Fit prompt + history into the context budget. The memory block goes
/// first; then history is trimmed oldest-first, never below the most
/// recent four exchanges.
pub fn fit_context(
    inputs: &PromptInputs<'_>,
    mut history: Vec<ChatMessage>,
    current_message: &str,
    budget_tokens: usize,
) -> (String, Vec<ChatMessage>) {
    let mut system = build_system_prompt(inputs, true);

    let used = |system: &str, history: &[ChatMessage]| {
        estimate_tokens(system)
            + history.iter().map(|m| estimate_tokens(&m.content)).sum::<usize>()
            + estimate_tokens(current_message)
    };

    if used(&system, &history) > budget_tokens {
        system = build_system_prompt(inputs, false);
    }

    while used(&system, &history) > budget_tokens && history.len() > MIN_RECENT_MESSAGES {
        history.remove(0);
    }

    (system, history)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::CharacterCatalog;

    fn profile() -> UserProfile {
        UserProfile {
            name: Some("Sam".to_string()),
            likes: vec!["coffee".to_string()],
            ..Default::default()
        }
    }

    fn base_state() -> UserState {
        UserState::new("u1".to_string(), "luna".to_string())
    }

    #[test]
    fn test_slot_order() {
        let catalog = CharacterCatalog::new();
        let character = catalog.get("luna").unwrap();
        let state = base_state();
        let user_profile = profile();
        let inputs = PromptInputs {
            character,
            state: &state,
            content_level: ContentLevel::Pure,
            requested_above_allowed: false,
            profile: &user_profile,
            memories: &[],
            effects_modifier: Some("You feel pleasantly tipsy."),
            scenario: Some("A rainy studio at night."),
        };

        let prompt = build_system_prompt(&inputs, true);
        let persona_at = prompt.find("You are Luna").unwrap();
        let stage_at = prompt.find("Relationship stage").unwrap();
        let content_at = prompt.find("Content mode").unwrap();
        let emotion_at = prompt.find("Emotional state").unwrap();
        let memory_at = prompt.find("What you know about them").unwrap();
        let effects_at = prompt.find("Active effects").unwrap();
        let scene_at = prompt.find("=== Scene ===").unwrap();
        let contract_at = prompt.find("Output format").unwrap();

        assert!(persona_at < stage_at);
        assert!(stage_at < content_at);
        assert!(content_at < emotion_at);
        assert!(emotion_at < memory_at);
        assert!(memory_at < effects_at);
        assert!(effects_at < scene_at);
        assert!(scene_at < contract_at);
    }

    #[test]
    fn test_lockout_rider_replaces_emotion_block() {
        let catalog = CharacterCatalog::new();
        let character = catalog.get("luna").unwrap();
        let mut state = base_state();
        state.emotion_score = -85;
        let user_profile = UserProfile::default();
        let inputs = PromptInputs {
            character,
            state: &state,
            content_level: ContentLevel::Pure,
            requested_above_allowed: false,
            profile: &user_profile,
            memories: &[],
            effects_modifier: None,
            scenario: None,
        };

        let prompt = build_system_prompt(&inputs, true);
        assert!(prompt.contains("shut the user out"));
        assert!(!prompt.contains("Sample phrasing"));
    }

    #[test]
    fn test_down_tier_instruction() {
        let catalog = CharacterCatalog::new();
        let character = catalog.get("luna").unwrap();
        let state = base_state();
        let user_profile = UserProfile::default();
        let inputs = PromptInputs {
            character,
            state: &state,
            content_level: ContentLevel::Flirty,
            requested_above_allowed: true,
            profile: &user_profile,
            memories: &[],
            effects_modifier: None,
            scenario: None,
        };

        let prompt = build_system_prompt(&inputs, true);
        assert!(prompt.contains("redirect"));
    }

    #[test]
    fn test_fit_context_drops_memory_then_history() {
        let catalog = CharacterCatalog::new();
        let character = catalog.get("luna").unwrap();
        let state = base_state();
        let user_profile = profile();
        let memories: Vec<EpisodicMemory> = (0..5)
            .map(|i| EpisodicMemory {
                id: format!("m{}", i),
                content: "a long shared afternoon ".repeat(50),
                importance: 5.0,
                strength: 5.0,
                keywords: vec![],
                intimate: false,
                created_at: chrono::Utc::now(),
            })
            .collect();
        let inputs = PromptInputs {
            character,
            state: &state,
            content_level: ContentLevel::Pure,
            requested_above_allowed: false,
            profile: &user_profile,
            memories: &memories,
            effects_modifier: None,
            scenario: None,
        };

        let history: Vec<ChatMessage> = (0..20)
            .map(|i| ChatMessage::user(format!("message number {} {}", i, "pad ".repeat(30))))
            .collect();

        let (system, trimmed) = fit_context(&inputs, history.clone(), "hello", 900);
        // Memory block dropped first
        assert!(!system.contains("What you know about them"));
        // History trimmed oldest-first, newest retained
        assert!(trimmed.len() < history.len());
        assert!(trimmed.len() >= MIN_RECENT_MESSAGES);
        assert!(trimmed.last().unwrap().content.contains("message number 19"));

        // With a generous budget nothing is dropped
        let (system, untrimmed) = fit_context(&inputs, history.clone(), "hello", 100_000);
        assert!(system.contains("What you know about them"));
        assert_eq!(untrimmed.len(), history.len());
    }
}
