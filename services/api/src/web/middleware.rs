//! services/api/src/web/middleware.rs
//!
//! Resolves the caller of every protected request.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use read_receipts_core::domain::Caller;
use std::sync::Arc;
use tracing::error;

use crate::web::state::AppState;

/// Header carrying the auth session id for non-browser clients.
pub const ACCESS_TOKEN_HEADER: &str = "x-access-token";

/// Collects candidate auth session ids: the `session` cookie first, then the
/// `x-access-token` header.
fn auth_session_ids(headers: &HeaderMap) -> Vec<&str> {
    let from_cookie = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|cookies| {
            cookies
                .split(';')
                .find_map(|c| c.trim().strip_prefix("session="))
        });
    let from_header = headers
        .get(ACCESS_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok());
    from_cookie.into_iter().chain(from_header).collect()
}

/// Middleware that inserts a `Caller` into the request extensions.
///
/// Each candidate session id is tried in turn. When none validates, the
/// request carries `Caller::Anonymous` and the operations decide whether
/// anonymous access is acceptable. Only a failure to reach the session store
/// short-circuits the request.
pub async fn identify_caller(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let mut caller = Caller::Anonymous;
    // A stale cookie must not hide a valid access token.
    for session_id in auth_session_ids(req.headers()) {
        match state.auth.validate_auth_session(session_id).await {
            Ok(Some(user_id)) => {
                caller = Caller::User(user_id);
                break;
            }
            Ok(None) => {}
            Err(e) => {
                error!("Failed to validate auth session: {:?}", e);
                return Err(StatusCode::INTERNAL_SERVER_ERROR);
            }
        }
    }

    req.extensions_mut().insert(caller);
    Ok(next.run(req).await)
}
