use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Authenticated Router Module
///
/// Everything that needs a logged-in user. The session layer in `create_router` rejects
/// anonymous requests with a 401 before any handler runs; role and ownership checks
/// happen inside the handlers through the policy module.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        .route("/logout", post(handlers::logout))
        // GET /api/user/role
        // Identity and capabilities for the dashboard.
        .route("/user/role", get(handlers::get_user_role))
        .route("/stats", get(handlers::get_stats))
        // --- Posts ---
        // The GET of the same paths lives on the public router; axum merges the methods.
        .route("/posts", post(handlers::create_post))
        .route(
            "/posts/{id}",
            put(handlers::update_post).delete(handlers::delete_post),
        )
        // --- Review workflow (reviewer or admin) ---
        .route("/posts/{id}/status", put(handlers::update_post_status))
        .route("/posts/{id}/comment", post(handlers::add_comment))
}
