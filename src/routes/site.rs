use crate::{AppState, auth::require_login};
use axum::{Router, middleware};
use tower::ServiceBuilder;
use tower_http::services::ServeDir;

/// Static Site Router
///
/// Serves the two browser front ends from disk. `/admin/*` goes through
/// [`require_login`], which redirects visitors without a session to the login page.
/// Everything else falls through to the public blog directory.
///
/// The returned router owns the fallback, so it must be merged into a router that has
/// none of its own.
pub fn site_routes(state: AppState) -> Router<AppState> {
    let public_dir = state.config.public_dir.clone();
    let admin_dir = state.config.admin_dir.clone();

    let admin = ServiceBuilder::new()
        .layer(middleware::from_fn_with_state(state, require_login))
        .service(ServeDir::new(admin_dir));

    Router::new()
        .nest_service("/admin", admin)
        .fallback_service(ServeDir::new(public_dir))
}
