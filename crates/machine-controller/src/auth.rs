use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::ApiError;
use crate::state::AppState;

/// Middleware that validates `Authorization: Bearer <key>` against the
/// configured `DRIVER_API_KEY`. Without a configured key every call passes.
pub async fn auth_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    match validate_request(&state, &req) {
        Ok(()) => next.run(req).await,
        Err(e) => e.into_response(),
    }
}

fn validate_request(state: &AppState, req: &Request) -> Result<(), ApiError> {
    let Some(expected) = state.config.api_key.as_deref() else {
        return Ok(());
    };

    let token = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;

    if token != expected {
        tracing::warn!(path = %req.uri().path(), "rejected driver call with wrong API key");
        return Err(ApiError::Unauthorized);
    }

    Ok(())
}
