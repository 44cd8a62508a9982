use crate::{
    AppState,
    auth::AuthUser,
    error::{AppError, AppResult},
    extract::Json,
    forms::{PostForm, PostFormSchema},
    models::{
        Comment, CommentRequest, CreateUserRequest, IdentityResponse, LoginRequest,
        MessageResponse, NewPost, NewUser, Post, PostChanges, PostStats, PostStatus,
        RegisterUserRequest, Role, Session, StatusUpdateRequest, UnknownVariant,
        UpdateRoleRequest, User,
    },
    password,
    policy::{self, Actor, PostScope},
    session,
};
use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
};
use axum_extra::extract::cookie::SignedCookieJar;
use std::str::FromStr;
use uuid::Uuid;

pub const MIN_USERNAME_LENGTH: usize = 3;
pub const MAX_USERNAME_LENGTH: usize = 32;

// --- Helpers ---

/// Validated account fields, shared by self-registration and admin creation.
struct AccountInput {
    username: String,
    email: String,
    password_hash: String,
}

fn validate_account(username: &str, email: &str, password: &str) -> AppResult<AccountInput> {
    let username = username.trim();
    let length = username.chars().count();
    if !(MIN_USERNAME_LENGTH..=MAX_USERNAME_LENGTH).contains(&length) {
        return Err(AppError::Validation(format!(
            "Username must be between {MIN_USERNAME_LENGTH} and {MAX_USERNAME_LENGTH} characters."
        )));
    }

    let email = email.trim();
    if !email.contains('@') {
        return Err(AppError::Validation("A valid email is required.".to_string()));
    }

    Ok(AccountInput {
        username: username.to_string(),
        email: email.to_string(),
        password_hash: password::hash_password(password)?,
    })
}

/// Parses a role or status sent by the client; unknown values are a 400.
fn parse_variant<T>(value: &str) -> AppResult<T>
where
    T: FromStr<Err = UnknownVariant>,
{
    value
        .trim()
        .parse()
        .map_err(|e: UnknownVariant| AppError::Validation(e.to_string()))
}

/// Fills `allowedTransitions` for an authenticated viewer.
fn annotate(mut post: Post, actor: &Actor) -> Post {
    post.allowed_transitions = Some(policy::allowed_transitions(
        actor,
        post.author_id(),
        post.status,
    ));
    post
}

/// Trims a free-text comment; blank means absent.
fn normalize_comment(comment: Option<String>) -> Option<String> {
    comment
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

async fn load_post(state: &AppState, id: Uuid) -> AppResult<Post> {
    state
        .repo
        .get_post(id)
        .await?
        .ok_or(AppError::NotFound("Post not found"))
}

// --- Authentication ---

/// register_user
///
/// [Public Route] Self-registration. Every account created here is an `author`.
#[utoipa::path(
    post,
    path = "/api/register",
    request_body = RegisterUserRequest,
    responses(
        (status = 201, description = "Account created", body = MessageResponse),
        (status = 400, description = "Invalid input or duplicate username/email", body = MessageResponse)
    )
)]
pub async fn register_user(
    State(state): State<AppState>,
    Json(payload): Json<RegisterUserRequest>,
) -> AppResult<(StatusCode, Json<MessageResponse>)> {
    let input = validate_account(&payload.username, &payload.email, &payload.password)?;

    let user = state
        .repo
        .create_user(NewUser {
            username: input.username,
            email: input.email,
            password_hash: input.password_hash,
            role: Role::Author,
        })
        .await?;

    tracing::info!(user_id = %user.id, username = %user.username, "user registered");

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse::new("Registration successful")),
    ))
}

/// login
///
/// [Public Route] Verifies the credentials, opens a server-side session and sets the
/// signed `blog.sid` cookie. Unknown user and wrong password produce the same 401.
#[utoipa::path(
    post,
    path = "/api/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in; session cookie set", body = MessageResponse),
        (status = 401, description = "Invalid credentials", body = MessageResponse)
    )
)]
pub async fn login(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Json(payload): Json<LoginRequest>,
) -> AppResult<(SignedCookieJar, Json<MessageResponse>)> {
    let Some(credentials) = state
        .repo
        .get_credentials(payload.username.trim())
        .await?
    else {
        // Same Argon2 cost as a wrong password for a known user.
        password::verify_dummy_password(&payload.password).ok();
        return Err(AppError::InvalidCredentials);
    };

    password::verify_password(&payload.password, &credentials.password).map_err(|e| match e {
        password::PasswordError::VerificationFailed => AppError::InvalidCredentials,
        other => AppError::Password(other),
    })?;

    let purged = state.repo.purge_expired_sessions().await?;
    if purged > 0 {
        tracing::debug!(purged, "expired sessions removed");
    }

    let session = Session::start(credentials.id, credentials.role);
    state.repo.create_session(&session).await?;

    tracing::info!(user_id = %credentials.id, role = %credentials.role, "user logged in");

    let jar = jar.add(session::create_cookie(
        session.id,
        state.config.secure_cookies(),
    ));
    Ok((jar, Json(MessageResponse::new("Login successful"))))
}

/// logout
///
/// [Authenticated Route] Destroys the session and clears the cookie.
#[utoipa::path(
    post,
    path = "/api/logout",
    responses(
        (status = 200, description = "Logged out", body = MessageResponse),
        (status = 401, description = "No session", body = MessageResponse)
    )
)]
pub async fn logout(
    user: AuthUser,
    State(state): State<AppState>,
    jar: SignedCookieJar,
) -> AppResult<(SignedCookieJar, Json<MessageResponse>)> {
    state.repo.delete_session(user.session_id).await?;
    tracing::info!(user_id = %user.id, "user logged out");

    Ok((
        jar.remove(session::clear_cookie()),
        Json(MessageResponse::new("Logout successful")),
    ))
}

/// get_user_role
///
/// [Authenticated Route] The caller's identity and the capabilities its role grants.
/// The admin dashboard builds its navigation from this.
#[utoipa::path(
    get,
    path = "/api/user/role",
    responses(
        (status = 200, description = "Current identity", body = IdentityResponse),
        (status = 401, description = "No session", body = MessageResponse),
        (status = 404, description = "Account no longer exists", body = MessageResponse)
    )
)]
pub async fn get_user_role(
    AuthUser { id, .. }: AuthUser,
    State(state): State<AppState>,
) -> AppResult<Json<IdentityResponse>> {
    let user = state
        .repo
        .get_user(id)
        .await?
        .ok_or(AppError::NotFound("User not found"))?;

    Ok(Json(IdentityResponse {
        id: user.id,
        username: user.username,
        role: user.role,
        capabilities: policy::capabilities(user.role),
    }))
}

// --- Posts ---

/// list_posts
///
/// [Public Route] Posts visible to the caller, newest first. Anonymous readers see
/// published posts, authors their own posts, reviewers and admins everything.
#[utoipa::path(
    get,
    path = "/api/posts",
    responses((status = 200, description = "Visible posts", body = [Post]))
)]
pub async fn list_posts(
    viewer: Option<AuthUser>,
    State(state): State<AppState>,
) -> AppResult<Json<Vec<Post>>> {
    let actor = viewer.map(|user| user.actor());
    let posts = state
        .repo
        .list_posts(PostScope::for_viewer(actor.as_ref()))
        .await?;

    let posts = match actor {
        Some(actor) => posts.into_iter().map(|post| annotate(post, &actor)).collect(),
        None => posts,
    };
    Ok(Json(posts))
}

/// get_post
///
/// [Public Route] A single post under the same visibility rules as the listing. A post
/// the caller may not see is reported as missing.
#[utoipa::path(
    get,
    path = "/api/posts/{id}",
    params(("id" = Uuid, Path, description = "Post id")),
    responses(
        (status = 200, description = "The post", body = Post),
        (status = 404, description = "Not found or not visible", body = MessageResponse)
    )
)]
pub async fn get_post(
    viewer: Option<AuthUser>,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Post>> {
    let actor = viewer.map(|user| user.actor());
    let scope = PostScope::for_viewer(actor.as_ref());

    let post = state
        .repo
        .get_post(id)
        .await?
        .filter(|post| scope.admits(post))
        .ok_or(AppError::NotFound("Post not found"))?;

    Ok(Json(match actor {
        Some(actor) => annotate(post, &actor),
        None => post,
    }))
}

/// create_post
///
/// [Authenticated Route] Creates a post owned by the caller from a multipart form.
/// The post starts as `draft`; another initial status is checked as a move out of draft.
#[utoipa::path(
    post,
    path = "/api/posts",
    request_body(content = PostFormSchema, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Post created", body = Post),
        (status = 400, description = "Missing title/content or invalid field", body = MessageResponse),
        (status = 403, description = "Initial status not allowed", body = MessageResponse)
    )
)]
pub async fn create_post(
    user: AuthUser,
    State(state): State<AppState>,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<Post>)> {
    let actor = user.actor();
    let mut form = PostForm::from_multipart(multipart).await?;

    let (Some(title), Some(content)) = (form.title.take(), form.content.take()) else {
        return Err(AppError::Validation(
            "Title and content are required.".to_string(),
        ));
    };

    let status = form.parsed_status()?.unwrap_or(PostStatus::Draft);
    let comment = normalize_comment(form.comment.take());
    if comment.is_some() {
        policy::check_comment(&actor)?;
    }
    policy::check_initial_status(&actor, status, comment.as_deref())?;

    let image_url = form.store_image(state.storage.as_ref()).await?;

    let post = state
        .repo
        .create_post(NewPost {
            title,
            content,
            image_url,
            status,
            author_id: actor.id,
            comment,
        })
        .await?;

    tracing::info!(post_id = %post.id, author_id = %actor.id, status = %post.status, "post created");

    Ok((StatusCode::CREATED, Json(annotate(post, &actor))))
}

/// update_post
///
/// [Authenticated Route] Edits a post from a multipart form. Absent fields stay as they
/// are. A `status` field is validated against the workflow table like a status change.
#[utoipa::path(
    put,
    path = "/api/posts/{id}",
    params(("id" = Uuid, Path, description = "Post id")),
    request_body(content = PostFormSchema, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Updated post", body = Post),
        (status = 403, description = "Edit or transition not allowed", body = MessageResponse),
        (status = 404, description = "Not found", body = MessageResponse),
        (status = 409, description = "Status changed concurrently", body = MessageResponse)
    )
)]
pub async fn update_post(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    multipart: Multipart,
) -> AppResult<Json<Post>> {
    let actor = user.actor();
    let mut form = PostForm::from_multipart(multipart).await?;
    let current = load_post(&state, id).await?;
    let owner = current.author_id();

    policy::check_edit(&actor, owner, current.status)?;

    let comment = normalize_comment(form.comment.take());
    if comment.is_some() {
        policy::check_comment(&actor)?;
    }

    let status = form.parsed_status()?;
    if let Some(target) = status {
        policy::check_transition(&actor, owner, current.status, target, comment.as_deref())?;
    }

    let image_url = form.store_image(state.storage.as_ref()).await?;

    let changes = PostChanges {
        title: form.title.take(),
        content: form.content.take(),
        image_url,
        status: status.filter(|target| *target != current.status),
        comment,
    };

    if changes.is_empty() {
        return Ok(Json(annotate(current, &actor)));
    }

    let status_change = changes.status;
    let post = state
        .repo
        .update_post(id, current.status, changes)
        .await?
        .ok_or(AppError::NotFound("Post not found"))?;

    match status_change {
        Some(to) => tracing::info!(post_id = %id, actor_id = %actor.id, from = %current.status, to = %to, "post updated with status change"),
        None => tracing::info!(post_id = %id, actor_id = %actor.id, "post updated"),
    }

    Ok(Json(annotate(post, &actor)))
}

/// delete_post
///
/// [Authenticated Route] Admins may delete any post, everyone else only their own drafts.
#[utoipa::path(
    delete,
    path = "/api/posts/{id}",
    params(("id" = Uuid, Path, description = "Post id")),
    responses(
        (status = 200, description = "Deleted", body = MessageResponse),
        (status = 403, description = "Not allowed", body = MessageResponse),
        (status = 404, description = "Not found", body = MessageResponse)
    )
)]
pub async fn delete_post(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<MessageResponse>> {
    let actor = user.actor();
    let post = load_post(&state, id).await?;

    policy::check_delete(&actor, post.author_id(), post.status)?;

    if !state.repo.delete_post(id).await? {
        return Err(AppError::NotFound("Post not found"));
    }

    tracing::info!(post_id = %id, actor_id = %actor.id, "post deleted");
    Ok(Json(MessageResponse::new("Post deleted")))
}

/// update_post_status
///
/// [Reviewer Route] Moves a post through the workflow. Rejections need a comment, which
/// is stored with the status change in one transaction.
#[utoipa::path(
    put,
    path = "/api/posts/{id}/status",
    params(("id" = Uuid, Path, description = "Post id")),
    request_body = StatusUpdateRequest,
    responses(
        (status = 200, description = "Updated post", body = Post),
        (status = 400, description = "Unknown status or missing rejection comment", body = MessageResponse),
        (status = 403, description = "Transition not allowed", body = MessageResponse),
        (status = 404, description = "Not found", body = MessageResponse),
        (status = 409, description = "Status changed concurrently", body = MessageResponse)
    )
)]
pub async fn update_post_status(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<StatusUpdateRequest>,
) -> AppResult<Json<Post>> {
    let actor = user.actor();
    policy::require_role(&actor, Role::Reviewer)?;

    let target: PostStatus = parse_variant(&payload.status)?;
    let comment = normalize_comment(payload.comment);

    let current = load_post(&state, id).await?;
    policy::check_transition(
        &actor,
        current.author_id(),
        current.status,
        target,
        comment.as_deref(),
    )?;

    let changes = PostChanges {
        status: (target != current.status).then_some(target),
        comment,
        ..PostChanges::default()
    };
    if changes.is_empty() {
        return Ok(Json(annotate(current, &actor)));
    }

    let post = state
        .repo
        .update_post(id, current.status, changes)
        .await?
        .ok_or(AppError::NotFound("Post not found"))?;

    tracing::info!(post_id = %id, actor_id = %actor.id, from = %current.status, to = %target, "post status changed");

    Ok(Json(annotate(post, &actor)))
}

/// add_comment
///
/// [Reviewer Route] Appends a review note to a post, whatever its status.
#[utoipa::path(
    post,
    path = "/api/posts/{id}/comment",
    params(("id" = Uuid, Path, description = "Post id")),
    request_body = CommentRequest,
    responses(
        (status = 201, description = "Comment added", body = Comment),
        (status = 400, description = "Empty comment", body = MessageResponse),
        (status = 403, description = "Not a reviewer", body = MessageResponse),
        (status = 404, description = "Not found", body = MessageResponse)
    )
)]
pub async fn add_comment(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CommentRequest>,
) -> AppResult<(StatusCode, Json<Comment>)> {
    policy::check_comment(&user.actor())?;

    let text = normalize_comment(Some(payload.comment))
        .ok_or_else(|| AppError::Validation("Comment must not be empty.".to_string()))?;

    let comment = state
        .repo
        .add_comment(id, text)
        .await?
        .ok_or(AppError::NotFound("Post not found"))?;

    tracing::info!(post_id = %id, actor_id = %user.id, "comment added");
    Ok((StatusCode::CREATED, Json(comment)))
}

/// get_stats
///
/// [Authenticated Route] Post counts by status for the dashboard header.
#[utoipa::path(
    get,
    path = "/api/stats",
    responses((status = 200, description = "Post counts", body = PostStats))
)]
pub async fn get_stats(
    _user: AuthUser,
    State(state): State<AppState>,
) -> AppResult<Json<PostStats>> {
    Ok(Json(state.repo.get_stats().await?))
}

// --- User management (admin) ---

#[utoipa::path(
    get,
    path = "/api/users",
    responses(
        (status = 200, description = "All accounts", body = [User]),
        (status = 403, description = "Admin only", body = MessageResponse)
    )
)]
pub async fn list_users(
    user: AuthUser,
    State(state): State<AppState>,
) -> AppResult<Json<Vec<User>>> {
    policy::require_role(&user.actor(), Role::Admin)?;
    Ok(Json(state.repo.list_users().await?))
}

/// create_user
///
/// [Admin Route] Creates an account with an explicit role.
#[utoipa::path(
    post,
    path = "/api/users",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "Account created", body = User),
        (status = 400, description = "Invalid input or duplicate", body = MessageResponse),
        (status = 403, description = "Admin only", body = MessageResponse)
    )
)]
pub async fn create_user(
    user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateUserRequest>,
) -> AppResult<(StatusCode, Json<User>)> {
    policy::require_role(&user.actor(), Role::Admin)?;

    let role: Role = parse_variant(&payload.role)?;
    let input = validate_account(&payload.username, &payload.email, &payload.password)?;

    let created = state
        .repo
        .create_user(NewUser {
            username: input.username,
            email: input.email,
            password_hash: input.password_hash,
            role,
        })
        .await?;

    tracing::info!(user_id = %created.id, role = %created.role, actor_id = %user.id, "user created");
    Ok((StatusCode::CREATED, Json(created)))
}

/// update_user_role
///
/// [Admin Route] Changes an account's role. Live sessions of that account pick up the
/// new role immediately.
#[utoipa::path(
    put,
    path = "/api/users/{id}/role",
    params(("id" = Uuid, Path, description = "User id")),
    request_body = UpdateRoleRequest,
    responses(
        (status = 200, description = "Updated account", body = User),
        (status = 400, description = "Unknown role", body = MessageResponse),
        (status = 403, description = "Admin only, or own account", body = MessageResponse),
        (status = 404, description = "Not found", body = MessageResponse)
    )
)]
pub async fn update_user_role(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateRoleRequest>,
) -> AppResult<Json<User>> {
    let actor = user.actor();
    let role: Role = parse_variant(&payload.role)?;
    policy::check_role_change(&actor, id)?;

    let updated = state
        .repo
        .update_user_role(id, role)
        .await?
        .ok_or(AppError::NotFound("User not found"))?;

    tracing::info!(user_id = %id, role = %role, actor_id = %actor.id, "user role changed");
    Ok(Json(updated))
}

/// delete_user
///
/// [Admin Route] Deletes an account. Admin accounts and the caller's own account are
/// protected. Posts of the deleted user remain, without an author.
#[utoipa::path(
    delete,
    path = "/api/users/{id}",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 200, description = "Deleted", body = MessageResponse),
        (status = 403, description = "Not allowed", body = MessageResponse),
        (status = 404, description = "Not found", body = MessageResponse)
    )
)]
pub async fn delete_user(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<MessageResponse>> {
    let actor = user.actor();
    policy::require_role(&actor, Role::Admin)?;

    let target = state
        .repo
        .get_user(id)
        .await?
        .ok_or(AppError::NotFound("User not found"))?;
    policy::check_user_deletion(&actor, &target)?;

    if !state.repo.delete_user(id).await? {
        return Err(AppError::NotFound("User not found"));
    }

    tracing::info!(user_id = %id, actor_id = %actor.id, "user deleted");
    Ok(Json(MessageResponse::new("User deleted")))
}
