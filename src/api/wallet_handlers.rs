use axum::{
    extract::{Query, State},
    Json,
};

use crate::api::middleware::AuthUser;
use crate::api::types::{BalanceResponse, PageQuery, PurchaseRequest};
use crate::api::AppState;
use crate::error::EngineResult;
use crate::models::LedgerEntry;

pub async fn balance(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> EngineResult<Json<BalanceResponse>> {
    let tier = state.subscription.effective_tier(&user_id).await?;
    let wallet = state.wallet.balance(&user_id, tier).await?;
    Ok(Json(BalanceResponse {
        total: wallet.total_credits(),
        daily_free: wallet.daily_free_credits,
        purchased: wallet.purchased_credits,
        bonus: wallet.bonus_credits,
        tier: tier.as_str().to_string(),
    }))
}

pub async fn purchase(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(request): Json<PurchaseRequest>,
) -> EngineResult<Json<serde_json::Value>> {
    let (wallet, package) = state.wallet.purchase(&user_id, &request.package_id).await?;
    Ok(Json(serde_json::json!({
        "package_id": package.package_id,
        "credits_added": package.credits + package.bonus_credits,
        "new_balance": wallet.total_credits(),
    })))
}

pub async fn transactions(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<PageQuery>,
) -> EngineResult<Json<Vec<LedgerEntry>>> {
    let entries = state
        .wallet
        .transactions(
            &user_id,
            query.limit.unwrap_or(50).clamp(1, 200),
            query.offset.unwrap_or(0).max(0),
        )
        .await?;
    Ok(Json(entries))
}
