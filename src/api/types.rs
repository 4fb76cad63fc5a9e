//! Request/response bodies for the HTTP surface.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Message, Session};
use crate::types::ContentLevel;

// ============================================================================
// Sessions & chat
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub character_id: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: Uuid,
    pub character_id: String,
    pub character_name: String,
    pub total_messages: i64,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<Session> for SessionResponse {
    fn from(session: Session) -> Self {
        Self {
            session_id: session.session_id,
            character_id: session.character_id,
            character_name: session.character_name,
            total_messages: session.total_messages,
            created_at: session.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListSessionsQuery {
    pub character_id: Option<String>,
    #[serde(default)]
    pub include_messages: bool,
}

#[derive(Debug, Serialize)]
pub struct SessionsWithMessages {
    pub sessions: Vec<SessionResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Message>>,
}

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    pub limit: Option<i64>,
    pub before_id: Option<Uuid>,
    pub after_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct MessagesPage {
    pub messages: Vec<Message>,
    pub has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newest_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct CompletionRequest {
    pub session_id: Uuid,
    pub message: String,
    pub intimacy_level: Option<i32>,
    pub spicy_mode: Option<bool>,
}

impl CompletionRequest {
    /// Spicy mode off caps generated content at flirty.
    pub fn content_cap(&self) -> Option<ContentLevel> {
        match self.spicy_mode {
            Some(false) => Some(ContentLevel::Flirty),
            _ => None,
        }
    }
}

// ============================================================================
// Gifts
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SendGiftRequest {
    pub character_id: String,
    pub gift_type: String,
    pub idempotency_key: String,
    pub session_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct GiftCatalogQuery {
    pub tier: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct GiftHistoryQuery {
    pub character_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

// ============================================================================
// Wallet & stamina
// ============================================================================

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub total: i64,
    pub daily_free: i64,
    pub purchased: i64,
    pub bonus: i64,
    pub tier: String,
}

#[derive(Debug, Deserialize)]
pub struct PurchaseRequest {
    pub package_id: String,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct StaminaPurchaseRequest {
    pub packs: i32,
}
