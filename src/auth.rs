use axum::{
    extract::{FromRef, FromRequestParts, OptionalFromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Key, SignedCookieJar};
use uuid::Uuid;

use crate::{
    AppState,
    error::AppError,
    models::Role,
    policy::Actor,
    repository::RepositoryState,
    session::COOKIE_NAME,
};

/// Where unauthenticated visitors of the admin area are sent.
pub const LOGIN_PAGE: &str = "/admin/login.html";

/// Admin assets reachable without a session (paths relative to `/admin`).
const PUBLIC_ADMIN_ASSETS: [&str; 4] = ["/login.html", "/login.js", "/login.css", "/dashboard.css"];

/// AuthUser Extractor Result
///
/// The resolved identity of an authenticated request. Handlers use it to make every
/// permission decision; nothing about the caller is stored anywhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    /// The id of the logged-in user.
    pub id: Uuid,
    /// The role recorded in the session, kept in sync by role changes.
    pub role: Role,
    /// The server-side session the cookie points at. Needed by logout.
    pub session_id: Uuid,
}

impl AuthUser {
    pub fn actor(&self) -> Actor {
        Actor {
            id: self.id,
            role: self.role,
        }
    }
}

/// Reads the signed session cookie and loads the live session behind it.
///
/// A missing, tampered, malformed or expired cookie resolves to `Ok(None)`; only a
/// repository failure is an error. An identity already resolved for this request by
/// [`require_session`] is reused without another lookup.
async fn resolve_session<S>(parts: &Parts, state: &S) -> Result<Option<AuthUser>, AppError>
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    Key: FromRef<S>,
{
    if let Some(user) = parts.extensions.get::<AuthUser>() {
        return Ok(Some(*user));
    }

    let jar = SignedCookieJar::from_headers(&parts.headers, Key::from_ref(state));

    let Some(session_id) = jar
        .get(COOKIE_NAME)
        .and_then(|cookie| Uuid::parse_str(cookie.value()).ok())
    else {
        return Ok(None);
    };

    let repo = RepositoryState::from_ref(state);
    let session = repo
        .get_session(session_id)
        .await?
        .filter(|session| !session.is_expired());

    Ok(session.map(|session| AuthUser {
        id: session.user_id,
        role: session.role,
        session_id: session.id,
    }))
}

/// AuthUser Extractor Implementation
///
/// Makes `AuthUser` usable as a handler argument. Rejects with a 401 `{"message"}` when
/// no valid session is attached to the request.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    Key: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        resolve_session(parts, state)
            .await?
            .ok_or(AppError::Unauthenticated)
    }
}

/// `Option<AuthUser>` for routes that serve anonymous and logged-in viewers alike.
impl<S> OptionalFromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    Key: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        resolve_session(parts, state).await
    }
}

/// require_login
///
/// Guards the static admin dashboard. Visitors without a session are redirected (303)
/// to the login page instead of receiving a JSON 401. The login page and the assets it
/// needs stay reachable.
pub async fn require_login(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path();
    let relative = path.strip_prefix("/admin").unwrap_or(path);
    if PUBLIC_ADMIN_ASSETS.contains(&relative) {
        return next.run(request).await;
    }

    let (parts, body) = request.into_parts();
    match resolve_session(&parts, &state).await {
        Ok(Some(_)) => next.run(Request::from_parts(parts, body)).await,
        Ok(None) => Redirect::to(LOGIN_PAGE).into_response(),
        Err(e) => e.into_response(),
    }
}

/// require_session
///
/// Guards the authenticated and admin API routers: a request without a live session is
/// rejected with a 401 before the handler runs. The resolved identity is stored in the
/// request extensions, where the handler's `AuthUser` extractor picks it up.
pub async fn require_session(user: AuthUser, mut request: Request, next: Next) -> Response {
    request.extensions_mut().insert(user);
    next.run(request).await
}
