// Core modules
pub mod config;
pub mod error;
pub mod types;

// Data layer modules
pub mod db;
pub mod models;

// Engine modules
pub mod billing;
pub mod content;
pub mod emotion;
pub mod intimacy;
pub mod pipeline;

// Provider modules
pub mod llm;

// Service layer modules
pub mod services;

// API modules
pub mod api;

// Re-exports for convenience
pub use api::{build_router, AppState};
pub use config::Config;
pub use error::{EngineError, EngineResult};
pub use pipeline::{ChatPipeline, ChatRequest, ChatResponse};
