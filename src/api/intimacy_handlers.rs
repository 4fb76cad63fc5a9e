use axum::{
    extract::{Path, Query, State},
    Json,
};

use crate::api::middleware::AuthUser;
use crate::api::types::PageQuery;
use crate::api::AppState;
use crate::db::EmotionHistoryRepository;
use crate::error::EngineResult;
use crate::intimacy::{CheckinResult, IntimacyStatus};
use crate::models::EmotionHistoryEntry;

pub async fn status(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(character_id): Path<String>,
) -> EngineResult<Json<IntimacyStatus>> {
    state.characters.get(&character_id)?;
    let status = state.intimacy.status(&user_id, &character_id).await?;
    Ok(Json(status))
}

pub async fn checkin(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(character_id): Path<String>,
) -> EngineResult<Json<CheckinResult>> {
    state.characters.get(&character_id)?;
    let result = state.intimacy.daily_checkin(&user_id, &character_id).await?;
    Ok(Json(result))
}

/// Relationship history: the append-only emotion trail for the pair.
pub async fn history(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(character_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> EngineResult<Json<Vec<EmotionHistoryEntry>>> {
    state.characters.get(&character_id)?;
    let entries = state
        .repos
        .emotion_history
        .list(
            &user_id,
            &character_id,
            query.limit.unwrap_or(50).clamp(1, 200),
        )
        .await?;
    Ok(Json(entries))
}
