use serde::{Deserialize, Serialize};

/// How a character reacts emotionally. `sensitivity` amplifies negative
/// deltas, `forgiveness_rate` amplifies positive ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterPersonality {
    pub base_temperament: String,
    pub sensitivity: f64,
    pub forgiveness_rate: f64,
    pub jealousy: f64,
    pub love_triggers: Vec<String>,
    pub hate_triggers: Vec<String>,
}

impl Default for CharacterPersonality {
    fn default() -> Self {
        Self {
            base_temperament: "cheerful".to_string(),
            sensitivity: 0.5,
            forgiveness_rate: 0.6,
            jealousy: 0.3,
            love_triggers: Vec::new(),
            hate_triggers: Vec::new(),
        }
    }
}

/// A character catalog entry. The catalog itself is an external
/// collaborator; the engine only consumes this shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterProfile {
    pub id: String,
    pub name: String,
    /// Identity, personality, speech patterns, background — slot 1 of the
    /// system prompt.
    pub persona: String,
    pub greeting: String,
    pub personality: CharacterPersonality,
    /// Scenario text bound to new sessions, with ambiance hints.
    pub scenario: Option<String>,
}
