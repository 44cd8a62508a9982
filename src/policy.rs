//! Policy Module
//!
//! The single permission table of the application. Every role-sensitive decision made
//! by a handler goes through one of the functions below, and the admin UI receives the
//! same answers through `capabilities` and `allowedTransitions`.
//!
//! All checks are pure: they read the actor and the current state of the target and
//! return an error before any side effect takes place.

use uuid::Uuid;

use crate::models::{Capabilities, Post, PostStatus, Role, User};

/// Actor
///
/// The request-scoped identity a decision is made for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: Uuid,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    /// The actor's role or ownership does not allow the operation.
    #[error("Forbidden: {0}")]
    Forbidden(String),
    /// A transition to `rejected` was requested with an empty comment.
    #[error("A non-empty comment is required to reject a post.")]
    MissingRejectionComment,
}

impl Role {
    /// The actor's role must equal `required`, or be `admin`.
    pub fn satisfies(self, required: Role) -> bool {
        self == required || self == Role::Admin
    }
}

/// Fails with [`PolicyError::Forbidden`] unless the actor holds `required` (or is admin).
pub fn require_role(actor: &Actor, required: Role) -> Result<(), PolicyError> {
    if actor.role.satisfies(required) {
        Ok(())
    } else {
        Err(PolicyError::Forbidden(
            "Insufficient role permissions.".to_string(),
        ))
    }
}

// --- Status workflow ---

#[derive(Debug, Clone, Copy)]
enum Gate {
    /// The post's own author, or an admin.
    Owner,
    /// A reviewer, or an admin.
    Reviewer,
}

/// The transition table. Admins bypass it entirely.
const TRANSITIONS: [(PostStatus, PostStatus, Gate); 5] = [
    (PostStatus::Draft, PostStatus::PendingReview, Gate::Owner),
    // Reviewers may publish a draft directly.
    (PostStatus::Draft, PostStatus::Published, Gate::Reviewer),
    (PostStatus::PendingReview, PostStatus::Published, Gate::Reviewer),
    (PostStatus::PendingReview, PostStatus::Rejected, Gate::Reviewer),
    (PostStatus::Published, PostStatus::Draft, Gate::Reviewer),
];

impl Gate {
    fn admits(self, actor: &Actor, owner: Option<Uuid>) -> bool {
        match self {
            Gate::Owner => owner == Some(actor.id),
            Gate::Reviewer => actor.role.satisfies(Role::Reviewer),
        }
    }
}

fn is_owner(actor: &Actor, owner: Option<Uuid>) -> bool {
    owner == Some(actor.id)
}

/// Whether the table lets `actor` move a post owned by `owner` from `from` to `to`.
///
/// `from == to` is not a transition and is never listed here.
pub fn permits_transition(actor: &Actor, owner: Option<Uuid>, from: PostStatus, to: PostStatus) -> bool {
    if from == to {
        return false;
    }
    if actor.role == Role::Admin {
        return true;
    }

    TRANSITIONS
        .iter()
        .any(|(f, t, gate)| *f == from && *t == to && gate.admits(actor, owner))
}

/// check_transition
///
/// Validates a requested status change. Requesting the current status is accepted as a
/// no-op. A permitted move to `rejected` additionally needs a comment that is non-empty
/// after trimming, and that requirement applies to admins as well.
pub fn check_transition(
    actor: &Actor,
    owner: Option<Uuid>,
    from: PostStatus,
    to: PostStatus,
    comment: Option<&str>,
) -> Result<(), PolicyError> {
    if from == to {
        return Ok(());
    }

    if !permits_transition(actor, owner, from, to) {
        return Err(PolicyError::Forbidden(format!(
            "cannot change status from {from} to {to}."
        )));
    }

    if to == PostStatus::Rejected && comment.is_none_or(|text| text.trim().is_empty()) {
        return Err(PolicyError::MissingRejectionComment);
    }

    Ok(())
}

/// Every status `actor` may move the post to from `from`, in declaration order.
pub fn allowed_transitions(actor: &Actor, owner: Option<Uuid>, from: PostStatus) -> Vec<PostStatus> {
    PostStatus::ALL
        .into_iter()
        .filter(|to| permits_transition(actor, owner, from, *to))
        .collect()
}

/// New posts start as drafts; any other initial status is checked as a move out of
/// `draft` by the creator, who owns the post.
pub fn check_initial_status(
    actor: &Actor,
    requested: PostStatus,
    comment: Option<&str>,
) -> Result<(), PolicyError> {
    check_transition(actor, Some(actor.id), PostStatus::Draft, requested, comment)
}

// --- Edit / delete / comment rules ---

/// Reviewers and admins may edit any post. Everyone else only their own drafts.
pub fn check_edit(actor: &Actor, owner: Option<Uuid>, status: PostStatus) -> Result<(), PolicyError> {
    if actor.role.satisfies(Role::Reviewer) {
        return Ok(());
    }
    if is_owner(actor, owner) && status == PostStatus::Draft {
        return Ok(());
    }
    Err(PolicyError::Forbidden(
        "You can only edit your own draft posts.".to_string(),
    ))
}

/// Admins may delete any post. Everyone else, reviewers included, only their own drafts.
pub fn check_delete(actor: &Actor, owner: Option<Uuid>, status: PostStatus) -> Result<(), PolicyError> {
    if actor.role == Role::Admin {
        return Ok(());
    }
    if is_owner(actor, owner) && status == PostStatus::Draft {
        return Ok(());
    }
    Err(PolicyError::Forbidden(
        "You can only delete your own draft posts.".to_string(),
    ))
}

pub fn check_comment(actor: &Actor) -> Result<(), PolicyError> {
    require_role(actor, Role::Reviewer)
}

/// Admin accounts cannot be deleted through the API, and nobody deletes themselves.
pub fn check_user_deletion(actor: &Actor, target: &User) -> Result<(), PolicyError> {
    require_role(actor, Role::Admin)?;

    if target.id == actor.id {
        return Err(PolicyError::Forbidden(
            "You cannot delete your own account.".to_string(),
        ));
    }
    if target.role == Role::Admin {
        return Err(PolicyError::Forbidden(
            "Admin accounts cannot be deleted.".to_string(),
        ));
    }
    Ok(())
}

/// Admins manage other accounts' roles, never their own.
pub fn check_role_change(actor: &Actor, target_id: Uuid) -> Result<(), PolicyError> {
    require_role(actor, Role::Admin)?;

    if target_id == actor.id {
        return Err(PolicyError::Forbidden(
            "You cannot change your own role.".to_string(),
        ));
    }
    Ok(())
}

pub fn capabilities(role: Role) -> Capabilities {
    Capabilities {
        can_manage_users: role.satisfies(Role::Admin),
        can_review: role.satisfies(Role::Reviewer),
        can_comment: role.satisfies(Role::Reviewer),
        can_edit_any_post: role.satisfies(Role::Reviewer),
        can_delete_any_post: role == Role::Admin,
    }
}

// --- Listing visibility ---

/// PostScope
///
/// Which posts a viewer may read, both in listings and single lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostScope {
    /// Anonymous readers: published posts only.
    Published,
    /// Authors: their own posts in any status.
    OwnedBy(Uuid),
    /// Reviewers and admins.
    All,
}

impl PostScope {
    pub fn for_viewer(viewer: Option<&Actor>) -> Self {
        match viewer {
            None => PostScope::Published,
            Some(actor) if actor.role.satisfies(Role::Reviewer) => PostScope::All,
            Some(actor) => PostScope::OwnedBy(actor.id),
        }
    }

    pub fn admits(&self, post: &Post) -> bool {
        match self {
            PostScope::Published => post.status == PostStatus::Published,
            PostScope::OwnedBy(id) => post.author_id() == Some(*id),
            PostScope::All => true,
        }
    }
}
