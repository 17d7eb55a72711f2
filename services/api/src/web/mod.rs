pub mod middleware;
pub mod rest;
pub mod state;

pub use middleware::identify_caller;
pub use rest::{
    conversation_receipts_handler, health_handler, mark_conversation_read_handler,
    mark_messages_read_handler,
};

use axum::{
    middleware as axum_middleware,
    routing::{get, put},
    Router,
};
use std::sync::Arc;
use state::AppState;

/// Builds the HTTP routes. CORS and the Swagger UI are layered on by the binary.
pub fn router(app_state: Arc<AppState>) -> Router {
    // Public routes (no caller needed)
    let public_routes = Router::new().route("/health", get(health_handler));

    // Routes that act on behalf of a caller
    let protected_routes = Router::new()
        .route("/api/messages_read", put(mark_conversation_read_handler))
        .route("/api/messages_read/receipts", put(mark_messages_read_handler))
        .route(
            "/api/conversations/{conversation_id}/receipts",
            get(conversation_receipts_handler),
        )
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            identify_caller,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(app_state)
}
