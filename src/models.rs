use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::{fmt, str::FromStr};
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

// --- Enumerations (stored as TEXT columns) ---

/// Raised when a role or status string from the client or the database is not a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Role
///
/// The RBAC field of a user account. `Admin` is a superset of every other role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum Role {
    Admin,
    Reviewer,
    Author,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Admin, Role::Reviewer, Role::Author];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Reviewer => "reviewer",
            Role::Author => "author",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == value)
            .ok_or_else(|| UnknownVariant {
                kind: "role",
                value: value.to_string(),
            })
    }
}

impl TryFrom<String> for Role {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// PostStatus
///
/// The workflow state of a post. Transitions between states are governed by
/// the table in [`crate::policy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum PostStatus {
    Draft,
    PendingReview,
    Published,
    Rejected,
}

impl PostStatus {
    pub const ALL: [PostStatus; 4] = [
        PostStatus::Draft,
        PostStatus::PendingReview,
        PostStatus::Published,
        PostStatus::Rejected,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::PendingReview => "pending_review",
            PostStatus::Published => "published",
            PostStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PostStatus {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        PostStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == value)
            .ok_or_else(|| UnknownVariant {
                kind: "status",
                value: value.to_string(),
            })
    }
}

impl TryFrom<String> for PostStatus {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// --- Core Application Schemas (Mapped to Database) ---

/// User
///
/// A user account as returned to clients. The password hash lives only in
/// [`UserCredentials`] and is never serialized.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[sqlx(try_from = "String")]
    pub role: Role,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

/// The subset of a user row needed to verify a login attempt.
#[derive(Debug, Clone, FromRow)]
pub struct UserCredentials {
    pub id: Uuid,
    pub username: String,
    /// Argon2 PHC string.
    pub password: String,
    #[sqlx(try_from = "String")]
    pub role: Role,
}

/// Insert payload for a user whose password has already been hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
}

/// Author
///
/// The populated author reference embedded in every post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct Author {
    pub id: Uuid,
    pub username: String,
}

/// Comment
///
/// One entry of a post's append-only review log.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Comment {
    pub text: String,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

/// A comment row tagged with its post, used when loading the logs of many posts at once.
#[derive(Debug, Clone, FromRow)]
pub struct CommentRow {
    pub post_id: Uuid,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Post
///
/// A blog post with its author populated and its comment log in creation order.
///
/// `allowed_transitions` is filled per request for authenticated viewers, listing the
/// statuses the viewer may move the post to. It is omitted for anonymous readers.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Post {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub image_url: Option<String>,
    #[ts(type = "string")]
    pub date: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
    pub status: PostStatus,
    pub author: Option<Author>,
    pub comments: Vec<Comment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_transitions: Option<Vec<PostStatus>>,
}

impl Post {
    /// The id of the owning user, if the author account still exists.
    pub fn author_id(&self) -> Option<Uuid> {
        self.author.as_ref().map(|author| author.id)
    }
}

/// PostRow
///
/// Raw row of `posts` joined with the author's username. Comments are attached
/// separately by [`PostRow::into_post`].
#[derive(Debug, Clone, FromRow)]
pub struct PostRow {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub image_url: Option<String>,
    #[sqlx(try_from = "String")]
    pub status: PostStatus,
    pub author_id: Option<Uuid>,
    pub author_username: Option<String>,
    pub date: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PostRow {
    pub fn into_post(self, comments: Vec<Comment>) -> Post {
        let author = match (self.author_id, self.author_username) {
            (Some(id), Some(username)) => Some(Author { id, username }),
            _ => None,
        };

        Post {
            id: self.id,
            title: self.title,
            content: self.content,
            image_url: self.image_url,
            date: self.date,
            updated_at: self.updated_at,
            status: self.status,
            author,
            comments,
            allowed_transitions: None,
        }
    }
}

/// Insert payload for a post, built by the create handler after all checks have passed.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub title: String,
    pub content: String,
    pub image_url: Option<String>,
    pub status: PostStatus,
    pub author_id: Uuid,
    pub comment: Option<String>,
}

/// PostChanges
///
/// Partial update applied atomically by the repository. `None` fields are left untouched;
/// `comment` is appended to the log in the same transaction.
#[derive(Debug, Clone, Default)]
pub struct PostChanges {
    pub title: Option<String>,
    pub content: Option<String>,
    pub image_url: Option<String>,
    pub status: Option<PostStatus>,
    pub comment: Option<String>,
}

impl PostChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.content.is_none()
            && self.image_url.is_none()
            && self.status.is_none()
            && self.comment.is_none()
    }
}

/// Session
///
/// Server-side session record. The cookie only carries the signed `id`.
#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    #[sqlx(try_from = "String")]
    pub role: Role,
    pub expires_at: DateTime<Utc>,
}

// --- Request Payloads (Input Schemas) ---

/// RegisterUserRequest
///
/// Input payload for public self-registration (POST /api/register). The role is not
/// accepted here; every self-registered account is an author.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct RegisterUserRequest {
    #[schema(example = "alice")]
    pub username: String,
    #[schema(example = "alice@example.com")]
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// CreateUserRequest
///
/// Admin-only account creation (POST /api/users). `role` is validated by the handler so
/// an unknown value yields a 400 with a readable message.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    #[schema(example = "reviewer")]
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UpdateRoleRequest {
    #[schema(example = "reviewer")]
    pub role: String,
}

/// StatusUpdateRequest
///
/// Reviewer/admin status change (PUT /api/posts/{id}/status). `comment` is mandatory
/// when the target status is `rejected`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct StatusUpdateRequest {
    #[schema(example = "published")]
    pub status: String,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CommentRequest {
    pub comment: String,
}

// --- Dashboard & Profile Schemas (Output) ---

/// PostStats
///
/// Aggregate counts by status for the dashboard (GET /api/stats).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, FromRow)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct PostStats {
    pub post_count: i64,
    pub published_post_count: i64,
    pub draft_post_count: i64,
    pub pending_review_count: i64,
    pub rejected_count: i64,
}

/// Capabilities
///
/// Role-derived switches the admin UI uses to assemble itself. Computed from
/// [`crate::policy::capabilities`] so the dashboard and the server share one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Capabilities {
    pub can_manage_users: bool,
    pub can_review: bool,
    pub can_comment: bool,
    pub can_edit_any_post: bool,
    pub can_delete_any_post: bool,
}

/// IdentityResponse
///
/// Output of GET /api/user/role.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct IdentityResponse {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
    pub capabilities: Capabilities,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
