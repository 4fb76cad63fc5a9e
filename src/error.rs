use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::types::SubscriptionTier;

/// Engine-wide error type. Every variant has a fixed HTTP disposition so the
/// API layer never needs to inspect error contents.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("session not found")]
    SessionNotFound,

    #[error("character not found: {0}")]
    CharacterNotFound(String),

    #[error("authentication required")]
    Unauthorized,

    #[error("subscription tier {required_tier} required")]
    SubscriptionRequired { required_tier: SubscriptionTier },

    #[error("insufficient credits: have {current}, need {required}")]
    InsufficientCredits { current: i64, required: i64 },

    #[error("insufficient stamina: {current} remaining")]
    InsufficientStamina { current: i32 },

    #[error("rate limit exceeded, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    #[error("daily cap reached: {0}")]
    DailyCapReached(String),

    #[error("content blocked: {0}")]
    Blocked(String),

    #[error("duplicate request: {0}")]
    Duplicate(String),

    #[error("storage conflict: {0}")]
    Conflict(String),

    #[error("llm provider unavailable: {0}")]
    LlmUnavailable(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::InsufficientCredits { .. } | Self::InsufficientStamina { .. } => {
                StatusCode::PAYMENT_REQUIRED
            }
            Self::SubscriptionRequired { .. } | Self::Blocked(_) => StatusCode::FORBIDDEN,
            Self::SessionNotFound | Self::CharacterNotFound(_) => StatusCode::NOT_FOUND,
            Self::Duplicate(_) | Self::Conflict(_) => StatusCode::CONFLICT,
            Self::RateLimited { .. } | Self::DailyCapReached(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::LlmUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::Storage(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "bad_request",
            Self::Unauthorized => "unauthorized",
            Self::SubscriptionRequired { .. } => "subscription_required",
            Self::InsufficientCredits { .. } => "insufficient_credits",
            Self::InsufficientStamina { .. } => "insufficient_stamina",
            Self::RateLimited { .. } => "rate_limit_exceeded",
            Self::DailyCapReached(_) => "daily_cap_reached",
            Self::Blocked(_) => "content_blocked",
            Self::SessionNotFound | Self::CharacterNotFound(_) => "not_found",
            Self::Duplicate(_) => "duplicate",
            Self::Conflict(_) => "conflict",
            Self::LlmUnavailable(_) => "provider_unavailable",
            Self::Storage(_) => "storage_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut body = json!({
            "error": self.error_code(),
            "message": self.to_string(),
        });

        // Structured quota / tier info per error kind
        match &self {
            Self::InsufficientCredits { current, required } => {
                body["current_balance"] = json!(current);
                body["required"] = json!(required);
            }
            Self::InsufficientStamina { current } => {
                body["current_stamina"] = json!(current);
            }
            Self::SubscriptionRequired { required_tier } => {
                body["required_tier"] = json!(required_tier.as_str());
            }
            Self::RateLimited { retry_after } => {
                body["retry_after"] = json!(retry_after);
            }
            _ => {}
        }

        let mut response = (status, Json(body)).into_response();
        if let Self::RateLimited { retry_after } = &self {
            if let Ok(value) = header::HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::Storage("row not found".to_string()),
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("serialization error: {}", err))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            EngineError::InsufficientCredits { current: 0, required: 2 }.status_code(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            EngineError::RateLimited { retry_after: 3 }.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(EngineError::SessionNotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            EngineError::Conflict("version mismatch".into()).status_code(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_error_codes() {
        let err = EngineError::SubscriptionRequired {
            required_tier: SubscriptionTier::Vip,
        };
        assert_eq!(err.error_code(), "subscription_required");
        assert_eq!(
            EngineError::LlmUnavailable("timeout".into()).error_code(),
            "provider_unavailable"
        );
    }
}
