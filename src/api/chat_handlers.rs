use axum::{
    extract::{Path, Query, State},
    Json,
};
use uuid::Uuid;

use crate::api::middleware::AuthUser;
use crate::api::types::{
    CompletionRequest, CreateSessionRequest, ListSessionsQuery, MessagesPage, MessagesQuery,
    SessionResponse, SessionsWithMessages,
};
use crate::api::AppState;
use crate::db::{MessageRepository, SessionRepository};
use crate::error::{EngineError, EngineResult};
use crate::pipeline::{ChatRequest, ChatResponse};

const DEFAULT_PAGE: i64 = 50;
const MAX_PAGE: i64 = 200;

pub async fn create_session(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(request): Json<CreateSessionRequest>,
) -> EngineResult<Json<SessionResponse>> {
    let character = state.characters.get(&request.character_id)?;
    let session = state
        .repos
        .sessions
        .upsert(&user_id, &character.id, &character.name)
        .await?;
    Ok(Json(session.into()))
}

pub async fn list_sessions(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<ListSessionsQuery>,
) -> EngineResult<Json<SessionsWithMessages>> {
    let sessions = state
        .repos
        .sessions
        .list_for_user(&user_id, query.character_id.as_deref())
        .await?;

    let messages = if query.include_messages {
        let pages = futures::future::try_join_all(
            sessions
                .iter()
                .map(|s| state.repos.messages.recent(s.session_id, DEFAULT_PAGE)),
        )
        .await?;
        Some(pages.into_iter().flatten().collect())
    } else {
        None
    };

    Ok(Json(SessionsWithMessages {
        sessions: sessions.into_iter().map(SessionResponse::from).collect(),
        messages,
    }))
}

pub async fn session_messages(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(session_id): Path<Uuid>,
    Query(query): Query<MessagesQuery>,
) -> EngineResult<Json<MessagesPage>> {
    let session = state
        .repos
        .sessions
        .get(session_id)
        .await?
        .filter(|s| s.user_id == user_id)
        .ok_or(EngineError::SessionNotFound)?;

    let limit = query.limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);
    let messages = state
        .repos
        .messages
        .page(session.session_id, limit, query.before_id, query.after_id)
        .await?;

    let total = state.repos.messages.count(session.session_id).await?;
    let has_more = (messages.len() as i64) < total;

    Ok(Json(MessagesPage {
        oldest_id: messages.first().map(|m| m.message_id),
        newest_id: messages.last().map(|m| m.message_id),
        has_more,
        messages,
    }))
}

pub async fn chat_completion(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(request): Json<CompletionRequest>,
) -> EngineResult<Json<ChatResponse>> {
    let response = state
        .pipeline
        .process_message(ChatRequest {
            user_id,
            session_id: request.session_id,
            message: request.message.clone(),
            intimacy_level: request.intimacy_level,
            content_cap: request.content_cap(),
        })
        .await?;
    Ok(Json(response))
}

pub async fn delete_session(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(session_id): Path<Uuid>,
) -> EngineResult<Json<serde_json::Value>> {
    state
        .repos
        .sessions
        .get(session_id)
        .await?
        .filter(|s| s.user_id == user_id)
        .ok_or(EngineError::SessionNotFound)?;

    state.repos.sessions.soft_delete(session_id).await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}
