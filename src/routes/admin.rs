use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{delete, get, put},
};

/// Admin Router Module
///
/// Account management. Mounted behind the session layer; every handler additionally
/// requires the `admin` role and answers 403 otherwise.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // GET/POST /api/users
        .route(
            "/users",
            get(handlers::list_users).post(handlers::create_user),
        )
        // PUT /api/users/{id}/role
        // Role changes propagate to the user's live sessions.
        .route("/users/{id}/role", put(handlers::update_user_role))
        // DELETE /api/users/{id}
        // Admin accounts and the caller's own account are protected.
        .route("/users/{id}", delete(handlers::delete_user))
}
