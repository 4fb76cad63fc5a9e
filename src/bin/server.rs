// API Server Binary
// Wires storage, services and the chat pipeline behind the axum router.

use heartline_engine::{
    api::{build_router, AppState},
    billing::{GiftService, RateLimiter, StaminaService, WalletService},
    config::Config,
    db::{create_pool, Repositories},
    emotion::EmotionEngine,
    intimacy::IntimacyService,
    llm::{HttpLlmClient, LlmClient, MockLlm},
    pipeline::ChatPipeline,
    services::{
        memory::InMemoryVectorIndex, CharacterCatalog, EffectService, MemoryService,
        SubscriptionService,
    },
};

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    info!("Heartline conversational engine v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;

    // Storage backend: Postgres, or the in-memory store when mocked
    let repos = if config.mock_database {
        info!("MOCK_DATABASE set, using in-memory repositories");
        Repositories::in_memory()
    } else {
        info!("Connecting to database...");
        let pool = create_pool(&config.database_url).await?;
        info!("✓ Database ready");
        Repositories::postgres(pool)
    };

    // LLM provider
    let llm: Arc<dyn LlmClient> = if config.mock_llm {
        info!("MOCK_LLM set, using the deterministic echo provider");
        Arc::new(MockLlm)
    } else {
        Arc::new(HttpLlmClient::new(&config)?)
    };
    let refiner: Option<Arc<dyn LlmClient>> = if config.emotion_llm_enabled && !config.mock_llm {
        Some(Arc::new(
            HttpLlmClient::new(&config)?.with_model(config.emotion_model.clone()),
        ))
    } else {
        None
    };

    // Services
    let characters = Arc::new(CharacterCatalog::new());
    let subscription = Arc::new(SubscriptionService::new(
        repos.subscriptions.clone(),
        repos.wallets.clone(),
        repos.ledger.clone(),
        repos.uow.clone(),
    ));
    let wallet = Arc::new(WalletService::new(
        repos.wallets.clone(),
        repos.ledger.clone(),
        repos.uow.clone(),
    ));
    let stamina = Arc::new(StaminaService::new(repos.stamina.clone(), repos.uow.clone()));
    let intimacy = Arc::new(IntimacyService::new(repos.user_states.clone()));
    let emotion = Arc::new(EmotionEngine::new(
        repos.user_states.clone(),
        repos.emotion_history.clone(),
        refiner,
    ));
    let effects = Arc::new(EffectService::new(repos.effects.clone()));
    let memory = Arc::new(MemoryService::new(Arc::new(InMemoryVectorIndex::new())));
    let content = Arc::new(heartline_engine::content::ContentRating::new());

    let gifts = Arc::new(GiftService::new(
        repos.wallets.clone(),
        repos.gifts.clone(),
        repos.idempotency.clone(),
        repos.sessions.clone(),
        repos.messages.clone(),
        repos.uow.clone(),
        intimacy.clone(),
        characters.clone(),
        llm.clone(),
    ));

    let pipeline = Arc::new(ChatPipeline::new(
        repos.clone(),
        subscription.clone(),
        wallet.clone(),
        stamina.clone(),
        intimacy.clone(),
        emotion,
        effects,
        memory,
        content,
        characters.clone(),
        llm,
        RateLimiter::new(),
        config.post_update_workers,
        Duration::from_secs(config.request_timeout_secs),
        Duration::from_secs(config.llm_reserve_secs),
    ));

    if config.use_v4_pipeline {
        info!("✓ Single-call pipeline enabled (USE_V4_PIPELINE)");
    }

    let state = AppState {
        repos,
        pipeline: pipeline.clone(),
        gifts,
        wallet,
        stamina,
        intimacy,
        subscription,
        characters,
        start_time: Instant::now(),
    };

    let app = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("🚀 Server running on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let in-flight post-updates land before exiting
    pipeline.drain_post_updates().await;
    info!("Server shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C signal"),
        _ = terminate => info!("Received terminate signal"),
    }

    info!("Shutting down gracefully...");
}
