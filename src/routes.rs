use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};

use crate::auth::middleware::JwtSecret;
use crate::dm::{conversations, messages};
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Inject the JWT secret into request extensions so the Claims extractor can find it.
async fn inject_jwt_secret(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Pull path (JWT required; AuthUser extractor validates token and resolves the user)
    let conversation_routes = Router::new()
        .route(
            "/api/conversations",
            get(conversations::list_conversations).post(conversations::create_conversation),
        )
        .route(
            "/api/conversations/{id}/messages",
            get(conversations::get_messages),
        )
        .route(
            "/api/conversations/{id}/read",
            put(conversations::mark_conversation_read),
        );

    let message_routes = Router::new()
        .route("/api/messages", post(messages::send_message))
        .route("/api/messages/unread-count", get(messages::unread_count))
        .route("/api/messages/{id}", delete(messages::delete_message))
        .route("/api/notifications", get(messages::list_notifications));

    // Admin routes (administrator role checked in the chat layer)
    let admin_routes = Router::new().route(
        "/api/admin/conversations",
        get(conversations::admin_list_conversations),
    );

    // WebSocket endpoint (auth via query param or bearer header)
    let ws_routes = Router::new().route("/ws", get(ws_handler::ws_upgrade));

    // Health check
    let health = Router::new().route("/health", get(health_check));

    Router::new()
        .merge(conversation_routes)
        .merge(message_routes)
        .merge(admin_routes)
        .merge(ws_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
