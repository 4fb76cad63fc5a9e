// CORS, request logging, and the authenticated-user extractor.

use axum::{
    body::Body,
    extract::FromRequestParts,
    http::{header, request::Parts, Method, Request},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::error::EngineError;

pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
}

pub async fn request_logger(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let start = Instant::now();

    let response = next.run(req).await;

    let latency = start.elapsed();
    let status = response.status();
    if status.is_server_error() {
        error!(
            "{} {} -> {} ({:.1}ms)",
            method,
            uri,
            status,
            latency.as_secs_f64() * 1000.0
        );
    } else {
        info!(
            "{} {} -> {} ({:.1}ms)",
            method,
            uri,
            status,
            latency.as_secs_f64() * 1000.0
        );
    }
    response
}

/// The authenticated user, derived from the opaque bearer token (or the
/// `X-User-ID` header in development). Token verification itself belongs
/// to the auth collaborator in front of this service.
pub struct AuthUser(pub String);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = EngineError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(user_id) = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
        {
            return Ok(AuthUser(user_id.to_string()));
        }

        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .filter(|v| !v.is_empty());

        match token {
            Some(token) => Ok(AuthUser(token.to_string())),
            None => Err(EngineError::Unauthorized),
        }
    }
}
