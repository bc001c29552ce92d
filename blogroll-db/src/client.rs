use crate::record::{
    AuthenticationRecord, CommentRecord, FullPostRecord, GroupRecord, UserRecord,
};
use crate::store::{Result, Store, StoreError};
use async_trait::async_trait;
use blogroll_common::model::{
    Id,
    auth::{AuthTokenHash, Authentication},
    comment::{Comment, CreateComment},
    follow::{Follow, FollowCounts},
    group::{CreateGroup, Group, GroupMarker},
    post::{CreatePost, Post, PostFilter, PostMarker, UpdatePost},
    user::{CreateUser, User, UserMarker},
};
use blogroll_common::pagination::PageWindow;
use sqlx::{PgPool, postgres::PgPoolOptions, query, query_as, query_scalar};
use time::PrimitiveDateTime;
use tracing::{debug, info};

const SELECT_FULL_POST: &str = "
    SELECT
        posts.post_id,
        posts.text,
        posts.pub_date,
        posts.image,
        users.user_id,
        users.username,
        groups.group_id,
        groups.title AS group_title,
        groups.slug AS group_slug,
        groups.description AS group_description
    FROM
        posts.posts
        JOIN users.users ON users.user_id = posts.author_id
        LEFT JOIN posts.groups ON groups.group_id = posts.group_id
";

/// Every filter binds the same three nullable parameters, so one statement
/// serves all listings.
const POST_FILTER_CLAUSE: &str = "
    WHERE
        ($1::BIGINT IS NULL OR posts.group_id = $1)
        AND ($2::BIGINT IS NULL OR posts.author_id = $2)
        AND ($3::BIGINT IS NULL OR posts.author_id IN (
            SELECT follows.author_id FROM users.follows WHERE follows.user_id = $3
        ))
";

#[derive(Clone, Debug)]
pub struct DbClient {
    pool: PgPool,
}

impl DbClient {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new().connect(database_url).await?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations applied");
        Ok(())
    }

    async fn fetch_post(&self, post_id: Id<PostMarker>) -> Result<Option<Post>> {
        let sql = format!("{SELECT_FULL_POST} WHERE posts.post_id = $1");
        let record = query_as::<_, FullPostRecord>(&sql)
            .bind(post_id.get())
            .fetch_optional(&self.pool)
            .await?;

        Ok(record.map(Post::try_from).transpose()?)
    }
}

fn filter_params(filter: PostFilter) -> (Option<i64>, Option<i64>, Option<i64>) {
    match filter {
        PostFilter::All => (None, None, None),
        PostFilter::Group(group_id) => (Some(group_id.get()), None, None),
        PostFilter::Author(author) => (None, Some(author.get()), None),
        PostFilter::FollowedBy(user) => (None, None, Some(user.get())),
    }
}

fn map_unique_violation(err: sqlx::Error, entity: &'static str) -> StoreError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            StoreError::Duplicate(entity)
        }
        sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
            StoreError::MissingReference(entity)
        }
        _ => StoreError::Sqlx(err),
    }
}

fn as_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[async_trait]
impl Store for DbClient {
    async fn fetch_user(&self, user_id: Id<UserMarker>) -> Result<Option<User>> {
        let record = query_as::<_, UserRecord>(
            "
            SELECT users.user_id, users.username
            FROM users.users
            WHERE users.user_id = $1
            ",
        )
        .bind(user_id.get())
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(User::try_from).transpose()?)
    }

    async fn fetch_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let record = query_as::<_, UserRecord>(
            "
            SELECT users.user_id, users.username
            FROM users.users
            WHERE users.username = $1
            ",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(User::try_from).transpose()?)
    }

    async fn create_user(&self, user: &CreateUser) -> Result<User> {
        let record = query_as::<_, UserRecord>(
            "
            INSERT INTO users.users (username)
            VALUES ($1)
            RETURNING users.user_id, users.username
            ",
        )
        .bind(user.username.get())
        .fetch_one(&self.pool)
        .await
        .map_err(|err| map_unique_violation(err, "user"))?;

        Ok(User::try_from(record)?)
    }

    async fn fetch_authentication(
        &self,
        token_hash: &AuthTokenHash,
    ) -> Result<Option<Authentication>> {
        let record = query_as::<_, AuthenticationRecord>(
            "
            SELECT
                authentications.user_id,
                authentications.token_hash,
                authentications.created_at,
                authentications.expires_after_seconds
            FROM users.authentications
            WHERE authentications.token_hash = $1
            ",
        )
        .bind(token_hash.0.as_slice())
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(Authentication::try_from).transpose()?)
    }

    async fn create_authentication(&self, authentication: &Authentication) -> Result<()> {
        let created_at = PrimitiveDateTime::new(
            authentication.created_at.date(),
            authentication.created_at.time(),
        );

        query(
            "
            INSERT INTO users.authentications (token_hash, user_id, created_at, expires_after_seconds)
            VALUES ($1, $2, $3, $4)
            ",
        )
        .bind(authentication.token_hash.0.as_slice())
        .bind(authentication.user.get())
        .bind(created_at)
        .bind(
            authentication
                .expires_after
                .map(|lifetime| lifetime.get().whole_seconds()),
        )
        .execute(&self.pool)
        .await
        .map_err(|err| map_unique_violation(err, "authentication"))?;

        Ok(())
    }

    async fn fetch_groups(&self) -> Result<Vec<Group>> {
        let records = query_as::<_, GroupRecord>(
            "
            SELECT groups.group_id, groups.title, groups.slug, groups.description
            FROM posts.groups
            ORDER BY groups.title, groups.group_id
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(records
            .into_iter()
            .map(Group::try_from)
            .collect::<Result<_, _>>()?)
    }

    async fn fetch_group(&self, group_id: Id<GroupMarker>) -> Result<Option<Group>> {
        let record = query_as::<_, GroupRecord>(
            "
            SELECT groups.group_id, groups.title, groups.slug, groups.description
            FROM posts.groups
            WHERE groups.group_id = $1
            ",
        )
        .bind(group_id.get())
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(Group::try_from).transpose()?)
    }

    async fn fetch_group_by_slug(&self, slug: &str) -> Result<Option<Group>> {
        let record = query_as::<_, GroupRecord>(
            "
            SELECT groups.group_id, groups.title, groups.slug, groups.description
            FROM posts.groups
            WHERE groups.slug = $1
            ",
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(Group::try_from).transpose()?)
    }

    async fn create_group(&self, group: &CreateGroup) -> Result<Group> {
        let record = query_as::<_, GroupRecord>(
            "
            INSERT INTO posts.groups (title, slug, description)
            VALUES ($1, $2, $3)
            RETURNING groups.group_id, groups.title, groups.slug, groups.description
            ",
        )
        .bind(&group.title)
        .bind(group.slug.get())
        .bind(&group.description)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| map_unique_violation(err, "group"))?;

        Ok(Group::try_from(record)?)
    }

    async fn count_posts(&self, filter: PostFilter) -> Result<u64> {
        let (group_id, author_id, follower_id) = filter_params(filter);

        let sql = format!("SELECT COUNT(*) FROM posts.posts {POST_FILTER_CLAUSE}");
        let count = query_scalar::<_, i64>(&sql)
            .bind(group_id)
            .bind(author_id)
            .bind(follower_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count.try_into().unwrap_or_default())
    }

    async fn fetch_posts(&self, filter: PostFilter, window: PageWindow) -> Result<Vec<Post>> {
        let (group_id, author_id, follower_id) = filter_params(filter);

        let sql = format!(
            "{SELECT_FULL_POST} {POST_FILTER_CLAUSE}
            ORDER BY posts.pub_date DESC, posts.post_id DESC
            LIMIT $4 OFFSET $5"
        );
        let records = query_as::<_, FullPostRecord>(&sql)
            .bind(group_id)
            .bind(author_id)
            .bind(follower_id)
            .bind(as_i64(window.limit()))
            .bind(as_i64(window.offset()))
            .fetch_all(&self.pool)
            .await?;

        debug!(?filter, fetched = records.len(), "Fetched posts");

        Ok(records
            .into_iter()
            .map(Post::try_from)
            .collect::<Result<_, _>>()?)
    }

    async fn fetch_authored_post(
        &self,
        author: Id<UserMarker>,
        post_id: Id<PostMarker>,
    ) -> Result<Option<Post>> {
        let sql = format!("{SELECT_FULL_POST} WHERE posts.post_id = $1 AND posts.author_id = $2");
        let record = query_as::<_, FullPostRecord>(&sql)
            .bind(post_id.get())
            .bind(author.get())
            .fetch_optional(&self.pool)
            .await?;

        Ok(record.map(Post::try_from).transpose()?)
    }

    async fn create_post(&self, post: &CreatePost) -> Result<Post> {
        let post_id = query_scalar::<_, i64>(
            "
            INSERT INTO posts.posts (text, author_id, group_id, image)
            VALUES ($1, $2, $3, $4)
            RETURNING posts.post_id
            ",
        )
        .bind(&post.text)
        .bind(post.author.get())
        .bind(post.group.map(Id::get))
        .bind(post.image.as_deref())
        .fetch_one(&self.pool)
        .await
        .map_err(|err| map_unique_violation(err, "post"))?;

        self.fetch_post(post_id.into())
            .await?
            .ok_or(StoreError::MissingReference("post"))
    }

    async fn update_post(
        &self,
        post_id: Id<PostMarker>,
        update: &UpdatePost,
    ) -> Result<Option<Post>> {
        let updated = query(
            "
            UPDATE posts.posts
            SET text = $2, group_id = $3, image = $4
            WHERE posts.post_id = $1
            ",
        )
        .bind(post_id.get())
        .bind(&update.text)
        .bind(update.group.map(Id::get))
        .bind(update.image.as_deref())
        .execute(&self.pool)
        .await
        .map_err(|err| map_unique_violation(err, "group"))?
        .rows_affected();

        if updated == 0 {
            return Ok(None);
        }

        self.fetch_post(post_id).await
    }

    async fn fetch_comments(&self, post_id: Id<PostMarker>) -> Result<Vec<Comment>> {
        let records = query_as::<_, CommentRecord>(
            "
            SELECT
                comments.comment_id,
                comments.post_id,
                comments.text,
                comments.created,
                users.user_id,
                users.username
            FROM
                posts.comments
                JOIN users.users ON users.user_id = comments.author_id
            WHERE comments.post_id = $1
            ORDER BY comments.created, comments.comment_id
            ",
        )
        .bind(post_id.get())
        .fetch_all(&self.pool)
        .await?;

        Ok(records
            .into_iter()
            .map(Comment::try_from)
            .collect::<Result<_, _>>()?)
    }

    async fn create_comment(&self, comment: &CreateComment) -> Result<Comment> {
        let record = query_as::<_, CommentRecord>(
            "
            WITH inserted AS (
                INSERT INTO posts.comments (post_id, author_id, text)
                VALUES ($1, $2, $3)
                RETURNING comment_id, post_id, author_id, text, created
            )
            SELECT
                inserted.comment_id,
                inserted.post_id,
                inserted.text,
                inserted.created,
                users.user_id,
                users.username
            FROM inserted JOIN users.users ON users.user_id = inserted.author_id
            ",
        )
        .bind(comment.post.get())
        .bind(comment.author.get())
        .bind(&comment.text)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| map_unique_violation(err, "post"))?;

        Ok(Comment::try_from(record)?)
    }

    async fn ensure_follow(&self, follow: Follow) -> Result<bool> {
        let inserted = query(
            "
            INSERT INTO users.follows (user_id, author_id)
            VALUES ($1, $2)
            ON CONFLICT ON CONSTRAINT unique_follows DO NOTHING
            ",
        )
        .bind(follow.user.get())
        .bind(follow.author.get())
        .execute(&self.pool)
        .await
        .map_err(|err| map_unique_violation(err, "user"))?
        .rows_affected();

        Ok(inserted > 0)
    }

    async fn remove_follow(&self, follow: Follow) -> Result<bool> {
        let removed = query(
            "
            DELETE FROM users.follows
            WHERE follows.user_id = $1 AND follows.author_id = $2
            ",
        )
        .bind(follow.user.get())
        .bind(follow.author.get())
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(removed > 0)
    }

    async fn is_following(&self, follow: Follow) -> Result<bool> {
        let exists = query_scalar::<_, bool>(
            "
            SELECT EXISTS (
                SELECT 1 FROM users.follows
                WHERE follows.user_id = $1 AND follows.author_id = $2
            )
            ",
        )
        .bind(follow.user.get())
        .bind(follow.author.get())
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn follow_counts(&self, user_id: Id<UserMarker>) -> Result<FollowCounts> {
        let (followers, following) = query_as::<_, (i64, i64)>(
            "
            SELECT
                COUNT(*) FILTER (WHERE follows.author_id = $1),
                COUNT(*) FILTER (WHERE follows.user_id = $1)
            FROM users.follows
            ",
        )
        .bind(user_id.get())
        .fetch_one(&self.pool)
        .await?;

        Ok(FollowCounts {
            followers: followers.try_into().unwrap_or_default(),
            following: following.try_into().unwrap_or_default(),
        })
    }
}
