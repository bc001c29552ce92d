use async_trait::async_trait;
use blogroll_common::model::{
    Id, ModelValidationError,
    auth::{AuthTokenHash, Authentication},
    comment::{Comment, CreateComment},
    follow::{Follow, FollowCounts},
    group::{CreateGroup, Group, GroupMarker},
    post::{CreatePost, Post, PostFilter, PostMarker, UpdatePost},
    user::{CreateUser, User, UserMarker},
};
use blogroll_common::pagination::PageWindow;
use std::fmt::Debug;
use thiserror::Error;

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("An object in the database was invalid: {0}")]
    Data(#[from] ModelValidationError),
    #[error("A {0} with this key already exists")]
    Duplicate(&'static str),
    #[error("Referenced {0} does not exist")]
    MissingReference(&'static str),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("Running migrations failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Durable state of the application.
///
/// Lookups return `Ok(None)` for absent rows; `Err` is reserved for storage
/// failures and violated constraints.
#[async_trait]
pub trait Store: Debug + Send + Sync {
    async fn fetch_user(&self, user_id: Id<UserMarker>) -> Result<Option<User>>;

    async fn fetch_user_by_username(&self, username: &str) -> Result<Option<User>>;

    async fn create_user(&self, user: &CreateUser) -> Result<User>;

    async fn fetch_authentication(&self, token_hash: &AuthTokenHash)
    -> Result<Option<Authentication>>;

    async fn create_authentication(&self, authentication: &Authentication) -> Result<()>;

    async fn fetch_groups(&self) -> Result<Vec<Group>>;

    async fn fetch_group(&self, group_id: Id<GroupMarker>) -> Result<Option<Group>>;

    async fn fetch_group_by_slug(&self, slug: &str) -> Result<Option<Group>>;

    async fn create_group(&self, group: &CreateGroup) -> Result<Group>;

    async fn count_posts(&self, filter: PostFilter) -> Result<u64>;

    /// Posts matching `filter`, newest first, restricted to `window`.
    async fn fetch_posts(&self, filter: PostFilter, window: PageWindow) -> Result<Vec<Post>>;

    /// The post with `post_id`, but only if `author` wrote it.
    async fn fetch_authored_post(
        &self,
        author: Id<UserMarker>,
        post_id: Id<PostMarker>,
    ) -> Result<Option<Post>>;

    async fn create_post(&self, post: &CreatePost) -> Result<Post>;

    async fn update_post(&self, post_id: Id<PostMarker>, update: &UpdatePost)
    -> Result<Option<Post>>;

    /// Comments on a post, oldest first.
    async fn fetch_comments(&self, post_id: Id<PostMarker>) -> Result<Vec<Comment>>;

    async fn create_comment(&self, comment: &CreateComment) -> Result<Comment>;

    /// Inserts the follow unless it exists. Returns whether a row was added.
    async fn ensure_follow(&self, follow: Follow) -> Result<bool>;

    /// Deletes the follow if it exists. Returns whether a row was removed.
    async fn remove_follow(&self, follow: Follow) -> Result<bool>;

    async fn is_following(&self, follow: Follow) -> Result<bool>;

    async fn follow_counts(&self, user_id: Id<UserMarker>) -> Result<FollowCounts>;
}
