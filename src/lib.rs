use axum::{
    Router,
    extract::{DefaultBodyLimit, FromRef},
    http::HeaderName,
    middleware,
    routing::get,
};
use axum_extra::extract::cookie::Key;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Core application services and components.
pub mod auth;
pub mod config;
pub mod error;
pub mod extract;
pub mod forms;
pub mod handlers;
pub mod models;
pub mod password;
pub mod policy;
pub mod repository;
pub mod session;
pub mod storage;

// Module for routing segregation (Public, Authenticated, Admin, Static site).
pub mod routes;
use routes::{admin, authenticated, public, site};

// --- Public Re-exports ---

pub use config::AppConfig;
pub use error::{AppError, AppResult};
pub use repository::{PostgresRepository, RepositoryState};
pub use storage::{MockStorageService, S3StorageClient, StorageState};

/// ApiDoc
///
/// The generated OpenAPI document, served at `/api-docs/openapi.json` and browsable
/// through `/swagger-ui`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::register_user, handlers::login, handlers::logout, handlers::get_user_role,
        handlers::list_posts, handlers::get_post, handlers::create_post, handlers::update_post,
        handlers::delete_post, handlers::update_post_status, handlers::add_comment,
        handlers::get_stats, handlers::list_users, handlers::create_user,
        handlers::update_user_role, handlers::delete_user,
    ),
    components(
        schemas(
            models::Post, models::Author, models::Comment, models::PostStatus, models::Role,
            models::User, models::PostStats, models::Capabilities, models::IdentityResponse,
            models::MessageResponse, models::RegisterUserRequest, models::LoginRequest,
            models::CreateUserRequest, models::UpdateRoleRequest, models::StatusUpdateRequest,
            models::CommentRequest, forms::PostFormSchema,
        )
    ),
    tags(
        (name = "blog-cms", description = "Blog CMS API")
    )
)]
struct ApiDoc;

/// AppState
///
/// The single shared container of application services. Every field is cheap to clone
/// and handlers pull only what they need through `FromRef`.
#[derive(Clone)]
pub struct AppState {
    /// Persistence for posts, users and sessions.
    pub repo: RepositoryState,
    /// Object storage for uploaded featured images.
    pub storage: StorageState,
    /// The loaded, immutable configuration.
    pub config: AppConfig,
    /// Signing key of the session cookie.
    pub cookie_key: Key,
}

impl AppState {
    pub fn new(repo: RepositoryState, storage: StorageState, config: AppConfig) -> Self {
        let cookie_key = session::cookie_key(&config.session_secret);
        Self {
            repo,
            storage,
            config,
            cookie_key,
        }
    }
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for StorageState {
    fn from_ref(app_state: &AppState) -> StorageState {
        app_state.storage.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

// Needed by `SignedCookieJar` and the `AuthUser` extractor.
impl FromRef<AppState> for Key {
    fn from_ref(app_state: &AppState) -> Key {
        app_state.cookie_key.clone()
    }
}

/// create_router
///
/// Assembles the API under `/api`, the documentation, the health check and the static
/// front ends, then applies the observability layers.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");
    let max_upload_bytes = state.config.max_upload_bytes;

    // Protected API routes share one session layer.
    let protected = authenticated::authenticated_routes()
        .merge(admin::admin_routes())
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_session,
        ));

    let api = public::public_routes().merge(protected);

    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Monitoring and load balancer checks.
        .route("/health", get(|| async { "ok" }))
        .nest("/api", api)
        .merge(site::site_routes(state.clone()))
        .with_state(state);

    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        // Multipart uploads may exceed axum's 2 MB default; the explicit ceiling replaces it.
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
        .layer(cors)
}

/// trace_span_logger
///
/// Builds the span of every request, tagged with its `x-request-id` so all log lines of
/// one request can be correlated.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
