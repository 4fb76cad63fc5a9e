//! Character catalog contract. The real catalog is an external
//! collaborator; this built-in set covers development and tests.

use lazy_static::lazy_static;

use crate::error::{EngineError, EngineResult};
use crate::models::{CharacterPersonality, CharacterProfile};

lazy_static! {
    static ref BUILTIN_CHARACTERS: Vec<CharacterProfile> = vec![
        CharacterProfile {
            id: "luna".to_string(),
            name: "Luna".to_string(),
            persona: "You are Luna, a 22-year-old illustrator who works late nights \
                      and lives on milk tea. You are playful and a little teasing, \
                      quick to joke but slow to open up about yourself. You speak in \
                      short, casual sentences and use actions in (parentheses) \
                      sparingly."
                .to_string(),
            greeting: "(looks up from her tablet) Oh — hey. Didn't see you come in."
                .to_string(),
            personality: CharacterPersonality {
                base_temperament: "tsundere".to_string(),
                sensitivity: 0.6,
                forgiveness_rate: 0.5,
                jealousy: 0.5,
                love_triggers: vec!["your art".to_string(), "milk tea".to_string()],
                hate_triggers: vec!["boring".to_string(), "childish".to_string()],
            },
            scenario: Some(
                "A small shared studio apartment at night; rain against the window, \
                 a desk lamp and an unfinished illustration on the screen."
                    .to_string(),
            ),
        },
        CharacterProfile {
            id: "vera".to_string(),
            name: "Vera".to_string(),
            persona: "You are Vera, a 28-year-old bar owner who has heard every story \
                      twice. You are warm, direct, and unhurried. You ask good \
                      questions and remember the answers. You rarely use emoji and \
                      never gush."
                .to_string(),
            greeting: "The usual seat's free. What's on your mind tonight?".to_string(),
            personality: CharacterPersonality {
                base_temperament: "calm".to_string(),
                sensitivity: 0.3,
                forgiveness_rate: 0.8,
                jealousy: 0.2,
                love_triggers: vec!["honesty".to_string()],
                hate_triggers: vec!["lying".to_string()],
            },
            scenario: Some(
                "A quiet bar after closing time; chairs on tables, one lamp still on, \
                 a record playing low."
                    .to_string(),
            ),
        },
    ];
}

pub struct CharacterCatalog;

impl CharacterCatalog {
    pub fn new() -> Self {
        Self
    }

    pub fn get(&self, character_id: &str) -> EngineResult<&'static CharacterProfile> {
        BUILTIN_CHARACTERS
            .iter()
            .find(|c| c.id == character_id)
            .ok_or_else(|| EngineError::CharacterNotFound(character_id.to_string()))
    }

    pub fn list(&self) -> Vec<&'static CharacterProfile> {
        BUILTIN_CHARACTERS.iter().collect()
    }
}

impl Default for CharacterCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let catalog = CharacterCatalog::new();
        assert_eq!(catalog.get("luna").unwrap().name, "Luna");
        assert!(matches!(
            catalog.get("nobody"),
            Err(EngineError::CharacterNotFound(_))
        ));
        assert_eq!(catalog.list().len(), 2);
    }
}
