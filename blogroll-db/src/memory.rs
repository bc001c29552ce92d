//! Process-local [`Store`] used when no database is configured, and by tests.
//!
//! Enforces the unique and foreign-key constraints of the SQL schema. Rows
//! are never deleted apart from follows.

use crate::store::{Result, Store, StoreError};
use async_trait::async_trait;
use blogroll_common::model::{
    Id,
    auth::{AuthTokenHash, Authentication},
    comment::{Comment, CommentMarker, CreateComment},
    follow::{Follow, FollowCounts},
    group::{CreateGroup, Group, GroupMarker},
    post::{CreatePost, Post, PostFilter, PostMarker, UpdatePost},
    user::{CreateUser, User, UserMarker},
};
use blogroll_common::pagination::PageWindow;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use time::UtcDateTime;

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

#[derive(Debug, Default)]
struct Tables {
    users: BTreeMap<Id<UserMarker>, User>,
    authentications: HashMap<AuthTokenHash, Authentication>,
    groups: BTreeMap<Id<GroupMarker>, Group>,
    posts: BTreeMap<Id<PostMarker>, PostRow>,
    comments: BTreeMap<Id<CommentMarker>, CommentRow>,
    follows: BTreeSet<Follow>,
    last_id: i64,
}

#[derive(Clone, Debug)]
struct PostRow {
    text: String,
    pub_date: UtcDateTime,
    author: Id<UserMarker>,
    group: Option<Id<GroupMarker>>,
    image: Option<String>,
}

#[derive(Clone, Debug)]
struct CommentRow {
    post: Id<PostMarker>,
    author: Id<UserMarker>,
    text: String,
    created: UtcDateTime,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Tables {
    fn next_id<Marker>(&mut self) -> Id<Marker> {
        self.last_id += 1;
        Id::new(self.last_id)
    }

    fn user(&self, user_id: Id<UserMarker>) -> Result<&User> {
        self.users
            .get(&user_id)
            .ok_or(StoreError::MissingReference("user"))
    }

    fn check_group(&self, group: Option<Id<GroupMarker>>) -> Result<()> {
        match group {
            Some(group_id) if !self.groups.contains_key(&group_id) => {
                Err(StoreError::MissingReference("group"))
            }
            _ => Ok(()),
        }
    }

    fn post(&self, post_id: Id<PostMarker>, row: &PostRow) -> Result<Post> {
        Ok(Post {
            id: post_id,
            text: row.text.clone(),
            pub_date: row.pub_date,
            author: self.user(row.author)?.clone(),
            group: row.group.and_then(|id| self.groups.get(&id)).cloned(),
            image: row.image.clone(),
        })
    }

    fn matches(&self, filter: PostFilter, row: &PostRow) -> bool {
        match filter {
            PostFilter::All => true,
            PostFilter::Group(group_id) => row.group == Some(group_id),
            PostFilter::Author(author) => row.author == author,
            PostFilter::FollowedBy(user) => self.follows.contains(&Follow {
                user,
                author: row.author,
            }),
        }
    }

    /// Matching posts, newest first with the higher id winning ties.
    fn listing(&self, filter: PostFilter) -> Vec<(Id<PostMarker>, &PostRow)> {
        let mut rows: Vec<_> = self
            .posts
            .iter()
            .filter(|(_, row)| self.matches(filter, row))
            .map(|(id, row)| (*id, row))
            .collect();
        rows.sort_by(|(a_id, a), (b_id, b)| b.pub_date.cmp(&a.pub_date).then(b_id.cmp(a_id)));
        rows
    }
}

fn as_usize(value: u64) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

#[async_trait]
impl Store for MemoryStore {
    async fn fetch_user(&self, user_id: Id<UserMarker>) -> Result<Option<User>> {
        Ok(self.tables.lock().users.get(&user_id).cloned())
    }

    async fn fetch_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let tables = self.tables.lock();
        Ok(tables
            .users
            .values()
            .find(|user| user.username.get() == username)
            .cloned())
    }

    async fn create_user(&self, user: &CreateUser) -> Result<User> {
        let mut tables = self.tables.lock();
        if tables.users.values().any(|u| u.username == user.username) {
            return Err(StoreError::Duplicate("user"));
        }

        let user = User {
            id: tables.next_id(),
            username: user.username.clone(),
        };
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn fetch_authentication(
        &self,
        token_hash: &AuthTokenHash,
    ) -> Result<Option<Authentication>> {
        Ok(self.tables.lock().authentications.get(token_hash).cloned())
    }

    async fn create_authentication(&self, authentication: &Authentication) -> Result<()> {
        let mut tables = self.tables.lock();
        tables.user(authentication.user)?;
        if tables
            .authentications
            .contains_key(&authentication.token_hash)
        {
            return Err(StoreError::Duplicate("authentication"));
        }

        tables
            .authentications
            .insert(authentication.token_hash.clone(), authentication.clone());
        Ok(())
    }

    async fn fetch_groups(&self) -> Result<Vec<Group>> {
        let mut groups: Vec<_> = self.tables.lock().groups.values().cloned().collect();
        groups.sort_by(|a, b| a.title.cmp(&b.title).then(a.id.cmp(&b.id)));
        Ok(groups)
    }

    async fn fetch_group(&self, group_id: Id<GroupMarker>) -> Result<Option<Group>> {
        Ok(self.tables.lock().groups.get(&group_id).cloned())
    }

    async fn fetch_group_by_slug(&self, slug: &str) -> Result<Option<Group>> {
        let tables = self.tables.lock();
        Ok(tables
            .groups
            .values()
            .find(|group| group.slug.get() == slug)
            .cloned())
    }

    async fn create_group(&self, group: &CreateGroup) -> Result<Group> {
        let mut tables = self.tables.lock();
        if tables.groups.values().any(|g| g.slug == group.slug) {
            return Err(StoreError::Duplicate("group"));
        }

        let group = Group {
            id: tables.next_id(),
            title: group.title.clone(),
            slug: group.slug.clone(),
            description: group.description.clone(),
        };
        tables.groups.insert(group.id, group.clone());
        Ok(group)
    }

    async fn count_posts(&self, filter: PostFilter) -> Result<u64> {
        let tables = self.tables.lock();
        let count = tables
            .posts
            .values()
            .filter(|row| tables.matches(filter, row))
            .count();
        Ok(count as u64)
    }

    async fn fetch_posts(&self, filter: PostFilter, window: PageWindow) -> Result<Vec<Post>> {
        let tables = self.tables.lock();
        tables
            .listing(filter)
            .into_iter()
            .skip(as_usize(window.offset()))
            .take(as_usize(window.limit()))
            .map(|(id, row)| tables.post(id, row))
            .collect()
    }

    async fn fetch_authored_post(
        &self,
        author: Id<UserMarker>,
        post_id: Id<PostMarker>,
    ) -> Result<Option<Post>> {
        let tables = self.tables.lock();
        tables
            .posts
            .get(&post_id)
            .filter(|row| row.author == author)
            .map(|row| tables.post(post_id, row))
            .transpose()
    }

    async fn create_post(&self, post: &CreatePost) -> Result<Post> {
        let mut tables = self.tables.lock();
        tables.user(post.author)?;
        tables.check_group(post.group)?;

        let row = PostRow {
            text: post.text.clone(),
            pub_date: UtcDateTime::now(),
            author: post.author,
            group: post.group,
            image: post.image.clone(),
        };
        let post_id = tables.next_id();
        let post = tables.post(post_id, &row)?;
        tables.posts.insert(post_id, row);
        Ok(post)
    }

    async fn update_post(
        &self,
        post_id: Id<PostMarker>,
        update: &UpdatePost,
    ) -> Result<Option<Post>> {
        let mut tables = self.tables.lock();
        tables.check_group(update.group)?;

        let Some(row) = tables.posts.get_mut(&post_id) else {
            return Ok(None);
        };
        row.text.clone_from(&update.text);
        row.group = update.group;
        row.image.clone_from(&update.image);

        let row = row.clone();
        tables.post(post_id, &row).map(Some)
    }

    async fn fetch_comments(&self, post_id: Id<PostMarker>) -> Result<Vec<Comment>> {
        let tables = self.tables.lock();
        let mut comments = tables
            .comments
            .iter()
            .filter(|(_, row)| row.post == post_id)
            .map(|(id, row)| {
                Ok(Comment {
                    id: *id,
                    post: row.post,
                    author: tables.user(row.author)?.clone(),
                    text: row.text.clone(),
                    created: row.created,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        comments.sort_by(|a, b| a.created.cmp(&b.created).then(a.id.cmp(&b.id)));
        Ok(comments)
    }

    async fn create_comment(&self, comment: &CreateComment) -> Result<Comment> {
        let mut tables = self.tables.lock();
        let author = tables.user(comment.author)?.clone();
        if !tables.posts.contains_key(&comment.post) {
            return Err(StoreError::MissingReference("post"));
        }

        let row = CommentRow {
            post: comment.post,
            author: comment.author,
            text: comment.text.clone(),
            created: UtcDateTime::now(),
        };
        let comment = Comment {
            id: tables.next_id(),
            post: row.post,
            author,
            text: row.text.clone(),
            created: row.created,
        };
        tables.comments.insert(comment.id, row);
        Ok(comment)
    }

    async fn ensure_follow(&self, follow: Follow) -> Result<bool> {
        let mut tables = self.tables.lock();
        tables.user(follow.user)?;
        tables.user(follow.author)?;
        Ok(tables.follows.insert(follow))
    }

    async fn remove_follow(&self, follow: Follow) -> Result<bool> {
        Ok(self.tables.lock().follows.remove(&follow))
    }

    async fn is_following(&self, follow: Follow) -> Result<bool> {
        Ok(self.tables.lock().follows.contains(&follow))
    }

    async fn follow_counts(&self, user_id: Id<UserMarker>) -> Result<FollowCounts> {
        let tables = self.tables.lock();
        let mut counts = FollowCounts::default();
        for follow in &tables.follows {
            if follow.author == user_id {
                counts.followers += 1;
            }
            if follow.user == user_id {
                counts.following += 1;
            }
        }
        Ok(counts)
    }
}
