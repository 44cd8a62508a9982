use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Endpoints reachable without a session. `/posts` and `/posts/{id}` still look at an
/// optional session to widen what the caller may see.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // POST /api/register
        // Self-registration. The role is always `author`.
        .route("/register", post(handlers::register_user))
        // POST /api/login
        // Opens a session and sets the signed cookie.
        .route("/login", post(handlers::login))
        // GET /api/posts
        // Role-scoped listing: published only for anonymous readers.
        .route("/posts", get(handlers::list_posts))
        // GET /api/posts/{id}
        .route("/posts/{id}", get(handlers::get_post))
}
