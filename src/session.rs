use axum_extra::extract::cookie::{Cookie, Key, SameSite};
use chrono::{Duration, Utc};
use sha2::{Digest, Sha512};
use uuid::Uuid;

use crate::models::{Role, Session};

pub const COOKIE_NAME: &str = "blog.sid";

/// Sessions, and the cookie that points at them, live for one day.
pub const SESSION_TTL_HOURS: i64 = 24;

impl Session {
    /// Opens a fresh session for `user_id` expiring [`SESSION_TTL_HOURS`] from now.
    pub fn start(user_id: Uuid, role: Role) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            role,
            expires_at: Utc::now() + Duration::hours(SESSION_TTL_HOURS),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// Derives the 64-byte cookie signing key from the configured secret of any length.
pub fn cookie_key(secret: &str) -> Key {
    let digest = Sha512::digest(secret.as_bytes());
    Key::from(digest.as_slice())
}

/// Creates the session cookie. `secure` is set in production only so local HTTP works.
pub fn create_cookie(session_id: Uuid, secure: bool) -> Cookie<'static> {
    Cookie::build((COOKIE_NAME, session_id.to_string()))
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .path("/")
        .max_age(cookie::time::Duration::hours(SESSION_TTL_HOURS))
        .build()
}

/// The cookie passed to the jar's `remove`; the path must match the one it was set with.
pub fn clear_cookie() -> Cookie<'static> {
    Cookie::build(COOKIE_NAME).path("/").build()
}
