use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Message role in a conversation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "system" => Ok(MessageRole::System),
            _ => Err(format!("Invalid message role: {}", s)),
        }
    }
}

/// A single turn in a session. Append-only; never mutated after creation.
/// Ordered by `(created_at, message_id)`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Message {
    pub message_id: Uuid,
    pub session_id: Uuid,
    pub role: String,
    pub content: String,
    pub tokens_used: i32,
    #[sqlx(json(nullable))]
    pub extra_data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn user(session_id: Uuid, content: String) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            session_id,
            role: MessageRole::User.to_string(),
            content,
            tokens_used: 0,
            extra_data: None,
            created_at: Utc::now(),
        }
    }

    pub fn assistant(
        session_id: Uuid,
        content: String,
        tokens_used: i32,
        extra_data: Option<serde_json::Value>,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            session_id,
            role: MessageRole::Assistant.to_string(),
            content,
            tokens_used,
            extra_data,
            created_at: Utc::now(),
        }
    }

    /// System messages carry structured event records (e.g. milestone
    /// notices) distinguishable by a tagged JSON body in `extra_data`.
    pub fn system_event(session_id: Uuid, content: String, event: serde_json::Value) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            session_id,
            role: MessageRole::System.to_string(),
            content,
            tokens_used: 0,
            extra_data: Some(event),
            created_at: Utc::now(),
        }
    }

    pub fn get_role(&self) -> Result<MessageRole, String> {
        self.role.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_role_round_trip() {
        assert_eq!("user".parse::<MessageRole>().unwrap(), MessageRole::User);
        assert_eq!(
            "ASSISTANT".parse::<MessageRole>().unwrap(),
            MessageRole::Assistant
        );
        assert!("invalid".parse::<MessageRole>().is_err());
        assert_eq!(MessageRole::System.to_string(), "system");
    }

    #[test]
    fn test_message_constructors() {
        let session_id = Uuid::new_v4();
        let user_msg = Message::user(session_id, "Hello".to_string());
        assert_eq!(user_msg.role, "user");
        assert_eq!(user_msg.tokens_used, 0);

        let reply = Message::assistant(session_id, "hi!".to_string(), 42, None);
        assert_eq!(reply.role, "assistant");
        assert_eq!(reply.tokens_used, 42);

        let event = Message::system_event(
            session_id,
            "Milestone reached".to_string(),
            serde_json::json!({"kind": "event", "event": "first_gift"}),
        );
        assert_eq!(event.get_role().unwrap(), MessageRole::System);
        assert!(event.extra_data.is_some());
    }
}
