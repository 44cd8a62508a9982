use crate::{
    models::{
        Comment, CommentRow, NewPost, NewUser, Post, PostChanges, PostRow, PostStats, PostStatus,
        Role, Session, User, UserCredentials,
    },
    policy::PostScope,
};
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, query_builder::QueryBuilder};
use std::{collections::HashMap, sync::Arc};
use uuid::Uuid;

/// RepoError
///
/// Persistence failures. Unique-constraint violations on user accounts are surfaced as
/// [`RepoError::Duplicate`] so the handler can answer with a 400 naming the field.
/// A post whose status moved under a pending write is a [`RepoError::Conflict`].
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("{0} already exists")]
    Duplicate(&'static str),
    #[error("{0} was changed by another request")]
    Conflict(&'static str),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository Trait
///
/// Abstract contract for all persistence operations. Handlers only talk to
/// `Arc<dyn Repository>`, which lets tests swap the Postgres implementation for an
/// in-memory one.
///
/// Lookups return `Ok(None)` / `Ok(false)` when the target does not exist; `Err` is
/// reserved for storage failures.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Posts ---
    /// Posts visible in `scope`, newest first, comments attached.
    async fn list_posts(&self, scope: PostScope) -> RepoResult<Vec<Post>>;
    async fn get_post(&self, id: Uuid) -> RepoResult<Option<Post>>;
    async fn create_post(&self, post: NewPost) -> RepoResult<Post>;
    /// Applies `changes` (and appends `changes.comment`) in one transaction, provided the
    /// post is still in `expected`. Otherwise [`RepoError::Conflict`] and nothing is written.
    async fn update_post(
        &self,
        id: Uuid,
        expected: PostStatus,
        changes: PostChanges,
    ) -> RepoResult<Option<Post>>;
    /// Appends to the comment log. `None` if the post does not exist.
    async fn add_comment(&self, post_id: Uuid, text: String) -> RepoResult<Option<Comment>>;
    async fn delete_post(&self, id: Uuid) -> RepoResult<bool>;
    async fn get_stats(&self) -> RepoResult<PostStats>;

    // --- Users ---
    async fn get_user(&self, id: Uuid) -> RepoResult<Option<User>>;
    async fn get_credentials(&self, username: &str) -> RepoResult<Option<UserCredentials>>;
    async fn list_users(&self) -> RepoResult<Vec<User>>;
    async fn create_user(&self, user: NewUser) -> RepoResult<User>;
    /// Changes the role and carries it into the user's live sessions.
    async fn update_user_role(&self, id: Uuid, role: Role) -> RepoResult<Option<User>>;
    /// Deletes the account. Its sessions go with it; its posts keep a null author.
    async fn delete_user(&self, id: Uuid) -> RepoResult<bool>;

    // --- Sessions ---
    async fn create_session(&self, session: &Session) -> RepoResult<()>;
    /// Only non-expired sessions are returned.
    async fn get_session(&self, id: Uuid) -> RepoResult<Option<Session>>;
    async fn delete_session(&self, id: Uuid) -> RepoResult<bool>;
    async fn purge_expired_sessions(&self) -> RepoResult<u64>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the application state.
pub type RepositoryState = Arc<dyn Repository>;

const POST_SELECT: &str = r#"
    SELECT
        p.id, p.title, p.content, p.image_url, p.status,
        p.author_id, u.username AS author_username,
        p.date, p.updated_at
    FROM posts p
    LEFT JOIN users u ON u.id = p.author_id
"#;

const USER_COLUMNS: &str = "id, username, email, role, created_at";

/// Maps the named unique constraints of `users` onto [`RepoError::Duplicate`].
fn map_user_conflict(error: sqlx::Error) -> RepoError {
    if let sqlx::Error::Database(ref db) = error {
        match db.constraint() {
            Some("users_username_key") => return RepoError::Duplicate("username"),
            Some("users_email_key") => return RepoError::Duplicate("email"),
            _ => {}
        }
    }
    RepoError::Database(error)
}

/// PostgresRepository
///
/// The `Repository` implementation backed by PostgreSQL. Queries are built at runtime
/// (`query_as::<_, T>`) so the crate builds without a live database.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Loads the comment logs of `ids` with one query, grouped per post in creation order.
    async fn comments_for(&self, ids: &[Uuid]) -> RepoResult<HashMap<Uuid, Vec<Comment>>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query_as::<_, CommentRow>(
            r#"
            SELECT post_id, text, created_at
            FROM post_comments
            WHERE post_id = ANY($1)
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: HashMap<Uuid, Vec<Comment>> = HashMap::new();
        for row in rows {
            grouped.entry(row.post_id).or_default().push(Comment {
                text: row.text,
                created_at: row.created_at,
            });
        }
        Ok(grouped)
    }

    async fn attach_comments(&self, rows: Vec<PostRow>) -> RepoResult<Vec<Post>> {
        let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
        let mut comments = self.comments_for(&ids).await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let log = comments.remove(&row.id).unwrap_or_default();
                row.into_post(log)
            })
            .collect())
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    /// list_posts
    ///
    /// The scope becomes the WHERE clause, so invisible rows never leave the database.
    async fn list_posts(&self, scope: PostScope) -> RepoResult<Vec<Post>> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(POST_SELECT);

        match scope {
            PostScope::Published => {
                builder.push(" WHERE p.status = 'published'");
            }
            PostScope::OwnedBy(author_id) => {
                builder.push(" WHERE p.author_id = ");
                builder.push_bind(author_id);
            }
            PostScope::All => {}
        }
        builder.push(" ORDER BY p.date DESC");

        let rows = builder
            .build_query_as::<PostRow>()
            .fetch_all(&self.pool)
            .await?;

        self.attach_comments(rows).await
    }

    async fn get_post(&self, id: Uuid) -> RepoResult<Option<Post>> {
        let row = sqlx::query_as::<_, PostRow>(&format!("{POST_SELECT} WHERE p.id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(self.attach_comments(vec![row]).await?.pop())
    }

    /// create_post
    ///
    /// Inserts the post and its optional first comment in one transaction, then reads
    /// it back with the author populated.
    async fn create_post(&self, post: NewPost) -> RepoResult<Post> {
        let id = Uuid::new_v4();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO posts (id, title, content, image_url, status, author_id, date, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())
            "#,
        )
        .bind(id)
        .bind(&post.title)
        .bind(&post.content)
        .bind(&post.image_url)
        .bind(post.status.as_str())
        .bind(post.author_id)
        .execute(&mut *tx)
        .await?;

        if let Some(text) = &post.comment {
            sqlx::query("INSERT INTO post_comments (post_id, text) VALUES ($1, $2)")
                .bind(id)
                .bind(text)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        self.get_post(id)
            .await?
            .ok_or(RepoError::Database(sqlx::Error::RowNotFound))
    }

    /// update_post
    ///
    /// COALESCE keeps every column whose change is `None`. The status guard in the WHERE
    /// clause makes the policy check and the write atomic.
    async fn update_post(
        &self,
        id: Uuid,
        expected: PostStatus,
        changes: PostChanges,
    ) -> RepoResult<Option<Post>> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE posts
            SET title = COALESCE($2, title),
                content = COALESCE($3, content),
                image_url = COALESCE($4, image_url),
                status = COALESCE($5, status),
                updated_at = NOW()
            WHERE id = $1 AND status = $6
            "#,
        )
        .bind(id)
        .bind(&changes.title)
        .bind(&changes.content)
        .bind(&changes.image_url)
        .bind(changes.status.map(|status| status.as_str()))
        .bind(expected.as_str())
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            let exists = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS (SELECT 1 FROM posts WHERE id = $1)",
            )
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
            tx.rollback().await?;
            return if exists {
                Err(RepoError::Conflict("post"))
            } else {
                Ok(None)
            };
        }

        if let Some(text) = &changes.comment {
            sqlx::query("INSERT INTO post_comments (post_id, text) VALUES ($1, $2)")
                .bind(id)
                .bind(text)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        self.get_post(id).await
    }

    async fn add_comment(&self, post_id: Uuid, text: String) -> RepoResult<Option<Comment>> {
        let comment = sqlx::query_as::<_, Comment>(
            r#"
            INSERT INTO post_comments (post_id, text)
            SELECT $1, $2 WHERE EXISTS (SELECT 1 FROM posts WHERE id = $1)
            RETURNING text, created_at
            "#,
        )
        .bind(post_id)
        .bind(text)
        .fetch_optional(&self.pool)
        .await?;

        Ok(comment)
    }

    async fn delete_post(&self, id: Uuid) -> RepoResult<bool> {
        let result = sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// get_stats
    ///
    /// All counters in a single scan.
    async fn get_stats(&self) -> RepoResult<PostStats> {
        let stats = sqlx::query_as::<_, PostStats>(
            r#"
            SELECT
                COUNT(*) AS post_count,
                COUNT(*) FILTER (WHERE status = 'published') AS published_post_count,
                COUNT(*) FILTER (WHERE status = 'draft') AS draft_post_count,
                COUNT(*) FILTER (WHERE status = 'pending_review') AS pending_review_count,
                COUNT(*) FILTER (WHERE status = 'rejected') AS rejected_count
            FROM posts
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(stats)
    }

    // --- USERS ---

    async fn get_user(&self, id: Uuid) -> RepoResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn get_credentials(&self, username: &str) -> RepoResult<Option<UserCredentials>> {
        let credentials = sqlx::query_as::<_, UserCredentials>(
            "SELECT id, username, password, role FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(credentials)
    }

    async fn list_users(&self) -> RepoResult<Vec<User>> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn create_user(&self, user: NewUser) -> RepoResult<User> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (id, username, email, password, role, created_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(map_user_conflict)
    }

    async fn update_user_role(&self, id: Uuid, role: Role) -> RepoResult<Option<User>> {
        let mut tx = self.pool.begin().await?;

        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET role = $2 WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(role.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        if user.is_some() {
            sqlx::query("UPDATE sessions SET role = $2 WHERE user_id = $1")
                .bind(id)
                .bind(role.as_str())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(user)
    }

    async fn delete_user(&self, id: Uuid) -> RepoResult<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // --- SESSIONS ---

    async fn create_session(&self, session: &Session) -> RepoResult<()> {
        sqlx::query(
            "INSERT INTO sessions (id, user_id, role, expires_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(session.id)
        .bind(session.user_id)
        .bind(session.role.as_str())
        .bind(session.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> RepoResult<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(
            "SELECT id, user_id, role, expires_at FROM sessions WHERE id = $1 AND expires_at > NOW()",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    async fn delete_session(&self, id: Uuid) -> RepoResult<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn purge_expired_sessions(&self) -> RepoResult<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
