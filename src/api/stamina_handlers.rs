use axum::{extract::State, Json};

use crate::api::middleware::AuthUser;
use crate::api::types::StaminaPurchaseRequest;
use crate::api::AppState;
use crate::billing::stamina::{StaminaPurchase, StaminaStatus};
use crate::error::EngineResult;

pub async fn status(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> EngineResult<Json<StaminaStatus>> {
    Ok(Json(state.stamina.status(&user_id).await?))
}

pub async fn purchase(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(request): Json<StaminaPurchaseRequest>,
) -> EngineResult<Json<StaminaPurchase>> {
    Ok(Json(state.stamina.buy(&user_id, request.packs).await?))
}
