use axum::{
    extract::{Query, State},
    Json,
};

use crate::api::middleware::AuthUser;
use crate::api::types::{GiftCatalogQuery, GiftHistoryQuery, SendGiftRequest};
use crate::api::AppState;
use crate::billing::{gift_catalog, GiftSendResult};
use crate::error::{EngineError, EngineResult};
use crate::models::{Gift, GiftCatalogEntry, GiftTier};

pub async fn send_gift(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(request): Json<SendGiftRequest>,
) -> EngineResult<Json<GiftSendResult>> {
    if request.idempotency_key.trim().is_empty() {
        return Err(EngineError::Validation(
            "idempotency_key is required".to_string(),
        ));
    }

    let result = state
        .gifts
        .send_gift(
            &user_id,
            &request.character_id,
            &request.gift_type,
            request.idempotency_key.trim(),
            request.session_id,
        )
        .await?;
    Ok(Json(result))
}

pub async fn gift_catalog_handler(
    Query(query): Query<GiftCatalogQuery>,
) -> EngineResult<Json<Vec<&'static GiftCatalogEntry>>> {
    let tier = match query.tier {
        Some(raw) => Some(
            GiftTier::from_i32(raw)
                .ok_or_else(|| EngineError::Validation(format!("invalid tier: {}", raw)))?,
        ),
        None => None,
    };
    Ok(Json(gift_catalog(tier)))
}

pub async fn gift_history(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<GiftHistoryQuery>,
) -> EngineResult<Json<Vec<Gift>>> {
    let gifts = state
        .gifts
        .history(
            &user_id,
            query.character_id.as_deref(),
            query.limit.unwrap_or(50).clamp(1, 200),
            query.offset.unwrap_or(0).max(0),
        )
        .await?;
    Ok(Json(gifts))
}
