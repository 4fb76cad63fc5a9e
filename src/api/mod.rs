// HTTP adapter: routes, middleware, request/response types. Thin by
// design — every rule lives in the services behind `AppState`.

pub mod chat_handlers;
pub mod gift_handlers;
pub mod intimacy_handlers;
pub mod middleware;
pub mod stamina_handlers;
pub mod types;
pub mod wallet_handlers;

use axum::{
    extract::State,
    routing::{delete, get, post},
    Json, Router,
};
use std::sync::Arc;
use std::time::Instant;

use crate::billing::{GiftService, StaminaService, WalletService};
use crate::db::Repositories;
use crate::intimacy::IntimacyService;
use crate::pipeline::ChatPipeline;
use crate::services::{CharacterCatalog, SubscriptionService};

pub use middleware::AuthUser;

#[derive(Clone)]
pub struct AppState {
    pub repos: Repositories,
    pub pipeline: Arc<ChatPipeline>,
    pub gifts: Arc<GiftService>,
    pub wallet: Arc<WalletService>,
    pub stamina: Arc<StaminaService>,
    pub intimacy: Arc<IntimacyService>,
    pub subscription: Arc<SubscriptionService>,
    pub characters: Arc<CharacterCatalog>,
    pub start_time: Instant,
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        // Chat
        .route(
            "/chat/sessions",
            post(chat_handlers::create_session).get(chat_handlers::list_sessions),
        )
        .route(
            "/chat/sessions/{id}/messages",
            get(chat_handlers::session_messages),
        )
        .route("/chat/sessions/{id}", delete(chat_handlers::delete_session))
        .route("/chat/completions", post(chat_handlers::chat_completion))
        // Gifts
        .route("/gifts", post(gift_handlers::send_gift))
        .route("/gifts/catalog", get(gift_handlers::gift_catalog_handler))
        .route("/gifts/history", get(gift_handlers::gift_history))
        // Wallet
        .route("/wallet/balance", get(wallet_handlers::balance))
        .route("/wallet/purchase", post(wallet_handlers::purchase))
        .route("/wallet/transactions", get(wallet_handlers::transactions))
        // Intimacy
        .route("/intimacy/{character_id}", get(intimacy_handlers::status))
        .route(
            "/intimacy/{character_id}/checkin",
            post(intimacy_handlers::checkin),
        )
        .route(
            "/intimacy/{character_id}/history",
            get(intimacy_handlers::history),
        )
        // Stamina
        .route("/stamina", get(stamina_handlers::status))
        .route("/stamina/purchase", post(stamina_handlers::purchase))
        // Middleware
        .layer(
            tower::ServiceBuilder::new()
                .layer(axum::middleware::from_fn(middleware::request_logger))
                .layer(middleware::cors_layer()),
        )
        .with_state(state)
}
