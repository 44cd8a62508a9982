#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, Response, header},
};
use blog_cms::{
    AppConfig, AppState, MockStorageService, create_router,
    models::{
        Author, Comment, NewPost, NewUser, Post, PostChanges, PostStats, PostStatus, Role,
        Session, User, UserCredentials,
    },
    password,
    policy::PostScope,
    repository::{RepoError, RepoResult, Repository},
};
use chrono::{Duration, Utc};
use serde::de::DeserializeOwned;
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, OnceLock,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_PASSWORD: &str = "correct-horse-battery";

/// Argon2 is slow in debug builds; every seeded account shares one hash.
pub fn test_password_hash() -> String {
    static HASH: OnceLock<String> = OnceLock::new();
    HASH.get_or_init(|| {
        password::hash_password(TEST_PASSWORD).expect("hashing the test password")
    })
    .clone()
}

// --- IN-MEMORY REPOSITORY ---

#[derive(Default)]
struct Store {
    users: Vec<(User, String)>,
    posts: Vec<Post>,
    sessions: HashMap<Uuid, Session>,
}

/// A complete `Repository` over plain collections, for router and handler tests.
#[derive(Default)]
pub struct InMemoryRepository {
    store: Mutex<Store>,
    failing: AtomicBool,
    session_lookups: AtomicUsize,
    /// Applied to the post right after the next `get_post` of that id.
    interleaved_status: Mutex<Option<(Uuid, PostStatus)>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every subsequent call fails with a database error.
    pub fn fail_all(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    fn check(&self) -> RepoResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(RepoError::Database(sqlx::Error::PoolTimedOut))
        } else {
            Ok(())
        }
    }

    fn store(&self) -> std::sync::MutexGuard<'_, Store> {
        self.store.lock().expect("store lock poisoned")
    }

    pub fn seed_user(&self, username: &str, role: Role) -> User {
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: format!("{username}@example.com"),
            role,
            created_at: Utc::now(),
        };
        self.store()
            .users
            .push((user.clone(), test_password_hash()));
        user
    }

    /// Inserts a post directly, bypassing the workflow.
    pub fn seed_post(&self, author: &User, title: &str, status: PostStatus) -> Post {
        let now = Utc::now();
        let post = Post {
            id: Uuid::new_v4(),
            title: title.to_string(),
            content: format!("<p>{title}</p>"),
            image_url: None,
            date: now,
            updated_at: now,
            status,
            author: Some(Author {
                id: author.id,
                username: author.username.clone(),
            }),
            comments: vec![],
            allowed_transitions: None,
        };
        self.store().posts.push(post.clone());
        post
    }

    /// Opens a session directly and returns it.
    pub fn seed_session(&self, user: &User) -> Session {
        let session = Session::start(user.id, user.role);
        self.store().sessions.insert(session.id, session.clone());
        session
    }

    pub fn seed_expired_session(&self, user: &User) -> Session {
        let mut session = Session::start(user.id, user.role);
        session.expires_at = Utc::now() - Duration::minutes(1);
        self.store().sessions.insert(session.id, session.clone());
        session
    }

    pub fn post(&self, id: Uuid) -> Option<Post> {
        self.store().posts.iter().find(|post| post.id == id).cloned()
    }

    pub fn user(&self, id: Uuid) -> Option<User> {
        self.store()
            .users
            .iter()
            .find(|(user, _)| user.id == id)
            .map(|(user, _)| user.clone())
    }

    pub fn session_count(&self) -> usize {
        self.store().sessions.len()
    }

    /// Number of `get_session` calls so far.
    pub fn session_lookups(&self) -> usize {
        self.session_lookups.load(Ordering::SeqCst)
    }

    /// Simulates another request moving post `id` to `status` between a handler's read
    /// and its write.
    pub fn interleave_status_change(&self, id: Uuid, status: PostStatus) {
        *self.interleaved_status.lock().expect("lock poisoned") = Some((id, status));
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn list_posts(&self, scope: PostScope) -> RepoResult<Vec<Post>> {
        self.check()?;
        let mut posts: Vec<Post> = self
            .store()
            .posts
            .iter()
            .filter(|post| scope.admits(post))
            .cloned()
            .collect();
        posts.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(posts)
    }

    async fn get_post(&self, id: Uuid) -> RepoResult<Option<Post>> {
        self.check()?;
        let post = self.post(id);
        let mut interleaved = self.interleaved_status.lock().expect("lock poisoned");
        if let Some((_, status)) = interleaved.take_if(|(target, _)| *target == id) {
            if let Some(stored) = self.store().posts.iter_mut().find(|post| post.id == id) {
                stored.status = status;
            }
        }
        Ok(post)
    }

    async fn create_post(&self, new: NewPost) -> RepoResult<Post> {
        self.check()?;
        let mut store = self.store();
        let author = store
            .users
            .iter()
            .find(|(user, _)| user.id == new.author_id)
            .map(|(user, _)| Author {
                id: user.id,
                username: user.username.clone(),
            });

        let now = Utc::now();
        let post = Post {
            id: Uuid::new_v4(),
            title: new.title,
            content: new.content,
            image_url: new.image_url,
            date: now,
            updated_at: now,
            status: new.status,
            author,
            comments: new
                .comment
                .map(|text| Comment {
                    text,
                    created_at: now,
                })
                .into_iter()
                .collect(),
            allowed_transitions: None,
        };
        store.posts.push(post.clone());
        Ok(post)
    }

    async fn update_post(
        &self,
        id: Uuid,
        expected: PostStatus,
        changes: PostChanges,
    ) -> RepoResult<Option<Post>> {
        self.check()?;
        let mut store = self.store();
        let Some(post) = store.posts.iter_mut().find(|post| post.id == id) else {
            return Ok(None);
        };
        if post.status != expected {
            return Err(RepoError::Conflict("post"));
        }

        if let Some(title) = changes.title {
            post.title = title;
        }
        if let Some(content) = changes.content {
            post.content = content;
        }
        if let Some(image_url) = changes.image_url {
            post.image_url = Some(image_url);
        }
        if let Some(status) = changes.status {
            post.status = status;
        }
        if let Some(text) = changes.comment {
            post.comments.push(Comment {
                text,
                created_at: Utc::now(),
            });
        }
        post.updated_at = Utc::now();

        Ok(Some(post.clone()))
    }

    async fn add_comment(&self, post_id: Uuid, text: String) -> RepoResult<Option<Comment>> {
        self.check()?;
        let mut store = self.store();
        let Some(post) = store.posts.iter_mut().find(|post| post.id == post_id) else {
            return Ok(None);
        };
        let comment = Comment {
            text,
            created_at: Utc::now(),
        };
        post.comments.push(comment.clone());
        Ok(Some(comment))
    }

    async fn delete_post(&self, id: Uuid) -> RepoResult<bool> {
        self.check()?;
        let mut store = self.store();
        let before = store.posts.len();
        store.posts.retain(|post| post.id != id);
        Ok(store.posts.len() < before)
    }

    async fn get_stats(&self) -> RepoResult<PostStats> {
        self.check()?;
        let store = self.store();
        let count = |status: PostStatus| {
            store
                .posts
                .iter()
                .filter(|post| post.status == status)
                .count() as i64
        };
        Ok(PostStats {
            post_count: store.posts.len() as i64,
            published_post_count: count(PostStatus::Published),
            draft_post_count: count(PostStatus::Draft),
            pending_review_count: count(PostStatus::PendingReview),
            rejected_count: count(PostStatus::Rejected),
        })
    }

    async fn get_user(&self, id: Uuid) -> RepoResult<Option<User>> {
        self.check()?;
        Ok(self.user(id))
    }

    async fn get_credentials(&self, username: &str) -> RepoResult<Option<UserCredentials>> {
        self.check()?;
        Ok(self
            .store()
            .users
            .iter()
            .find(|(user, _)| user.username == username)
            .map(|(user, hash)| UserCredentials {
                id: user.id,
                username: user.username.clone(),
                password: hash.clone(),
                role: user.role,
            }))
    }

    async fn list_users(&self) -> RepoResult<Vec<User>> {
        self.check()?;
        Ok(self
            .store()
            .users
            .iter()
            .map(|(user, _)| user.clone())
            .collect())
    }

    async fn create_user(&self, new: NewUser) -> RepoResult<User> {
        self.check()?;
        let mut store = self.store();
        if store.users.iter().any(|(user, _)| user.username == new.username) {
            return Err(RepoError::Duplicate("username"));
        }
        if store.users.iter().any(|(user, _)| user.email == new.email) {
            return Err(RepoError::Duplicate("email"));
        }

        let user = User {
            id: Uuid::new_v4(),
            username: new.username,
            email: new.email,
            role: new.role,
            created_at: Utc::now(),
        };
        store.users.push((user.clone(), new.password_hash));
        Ok(user)
    }

    async fn update_user_role(&self, id: Uuid, role: Role) -> RepoResult<Option<User>> {
        self.check()?;
        let mut store = self.store();
        let Some((user, _)) = store.users.iter_mut().find(|(user, _)| user.id == id) else {
            return Ok(None);
        };
        user.role = role;
        let updated = user.clone();

        for session in store.sessions.values_mut() {
            if session.user_id == id {
                session.role = role;
            }
        }
        Ok(Some(updated))
    }

    async fn delete_user(&self, id: Uuid) -> RepoResult<bool> {
        self.check()?;
        let mut store = self.store();
        let before = store.users.len();
        store.users.retain(|(user, _)| user.id != id);
        if store.users.len() == before {
            return Ok(false);
        }

        store.sessions.retain(|_, session| session.user_id != id);
        for post in store.posts.iter_mut() {
            if post.author_id() == Some(id) {
                post.author = None;
            }
        }
        Ok(true)
    }

    async fn create_session(&self, session: &Session) -> RepoResult<()> {
        self.check()?;
        self.store().sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> RepoResult<Option<Session>> {
        self.check()?;
        self.session_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .store()
            .sessions
            .get(&id)
            .filter(|session| !session.is_expired())
            .cloned())
    }

    async fn delete_session(&self, id: Uuid) -> RepoResult<bool> {
        self.check()?;
        Ok(self.store().sessions.remove(&id).is_some())
    }

    async fn purge_expired_sessions(&self) -> RepoResult<u64> {
        self.check()?;
        let mut store = self.store();
        let before = store.sessions.len();
        store.sessions.retain(|_, session| !session.is_expired());
        Ok((before - store.sessions.len()) as u64)
    }
}

// --- STATE & ROUTER ---

pub struct TestContext {
    pub repo: Arc<InMemoryRepository>,
    pub storage: MockStorageService,
    pub state: AppState,
    pub app: Router,
}

pub fn test_context() -> TestContext {
    test_context_with_storage(MockStorageService::new())
}

pub fn test_context_with_storage(storage: MockStorageService) -> TestContext {
    let repo = Arc::new(InMemoryRepository::new());
    let state = AppState::new(
        repo.clone(),
        Arc::new(storage.clone()),
        AppConfig::default(),
    );
    let app = create_router(state.clone());

    TestContext {
        repo,
        storage,
        state,
        app,
    }
}

impl TestContext {
    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.app
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible")
    }

    /// Logs in through the API and returns the `Cookie` header value.
    pub async fn login(&self, username: &str) -> String {
        let response = self
            .send(json_request(
                "POST",
                "/api/login",
                None,
                serde_json::json!({ "username": username, "password": TEST_PASSWORD }),
            ))
            .await;
        assert_eq!(response.status(), 200, "login as {username} failed");
        session_cookie(&response).expect("login sets the session cookie")
    }
}

// --- REQUEST HELPERS ---

pub fn json_request(
    method: &str,
    uri: &str,
    cookie: Option<&str>,
    body: serde_json::Value,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("valid request")
}

pub fn empty_request(method: &str, uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).expect("valid request")
}

/// Hand-built `multipart/form-data` body.
pub struct MultipartBuilder {
    boundary: String,
    body: Vec<u8>,
}

impl MultipartBuilder {
    pub fn new() -> Self {
        Self {
            boundary: format!("----blogcms{}", Uuid::new_v4().simple()),
            body: Vec::new(),
        }
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n",
                self.boundary
            )
            .as_bytes(),
        );
        self
    }

    pub fn file(mut self, name: &str, file_name: &str, content_type: &str, bytes: &[u8]) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n",
                self.boundary
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(bytes);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    pub fn request(mut self, method: &str, uri: &str, cookie: Option<&str>) -> Request<Body> {
        self.body
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());

        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", self.boundary),
            );
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::from(self.body)).expect("valid request")
    }
}

// --- RESPONSE HELPERS ---

/// The `blog.sid=...` pair from a `Set-Cookie` header, ready to send back.
pub fn session_cookie(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find(|value| value.starts_with("blog.sid="))
        .and_then(|value| value.split(';').next())
        .map(str::to_string)
}

pub async fn read_json<T: DeserializeOwned>(response: Response<Body>) -> T {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("readable body");
    serde_json::from_slice(&bytes).expect("JSON body")
}

pub async fn read_message(response: Response<Body>) -> String {
    let value: serde_json::Value = read_json(response).await;
    value["message"].as_str().unwrap_or_default().to_string()
}
