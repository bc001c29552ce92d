use blogroll_common::model::{
    ModelValidationError,
    auth::{Authentication, SessionLifetime},
    comment::Comment,
    group::{Group, Slug},
    post::Post,
    user::{User, Username},
};
use sqlx::FromRow;
use time::{Duration, PrimitiveDateTime};

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct UserRecord {
    pub user_id: i64,
    pub username: String,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct AuthenticationRecord {
    pub user_id: i64,
    pub token_hash: Vec<u8>,
    pub created_at: PrimitiveDateTime,
    pub expires_after_seconds: Option<i64>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct GroupRecord {
    pub group_id: i64,
    pub title: String,
    pub slug: String,
    pub description: String,
}

/// A post joined with its author and, if set, its group.
#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct FullPostRecord {
    pub post_id: i64,
    pub text: String,
    pub pub_date: PrimitiveDateTime,
    pub image: Option<String>,
    pub user_id: i64,
    pub username: String,
    pub group_id: Option<i64>,
    pub group_title: Option<String>,
    pub group_slug: Option<String>,
    pub group_description: Option<String>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct CommentRecord {
    pub comment_id: i64,
    pub post_id: i64,
    pub text: String,
    pub created: PrimitiveDateTime,
    pub user_id: i64,
    pub username: String,
}

impl TryFrom<UserRecord> for User {
    type Error = ModelValidationError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value.user_id.into(),
            username: Username::new(value.username)?,
        })
    }
}

impl TryFrom<AuthenticationRecord> for Authentication {
    type Error = ModelValidationError;

    fn try_from(value: AuthenticationRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            user: value.user_id.into(),
            token_hash: value.token_hash.try_into()?,
            created_at: value.created_at.as_utc(),
            expires_after: value
                .expires_after_seconds
                .map(|seconds| SessionLifetime::try_from(Duration::seconds(seconds)))
                .transpose()?,
        })
    }
}

impl TryFrom<GroupRecord> for Group {
    type Error = ModelValidationError;

    fn try_from(value: GroupRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value.group_id.into(),
            title: value.title,
            slug: Slug::new(value.slug)?,
            description: value.description,
        })
    }
}

impl TryFrom<FullPostRecord> for Post {
    type Error = ModelValidationError;

    fn try_from(value: FullPostRecord) -> Result<Self, Self::Error> {
        let group = match (
            value.group_id,
            value.group_title,
            value.group_slug,
            value.group_description,
        ) {
            (Some(group_id), Some(title), Some(slug), Some(description)) => {
                Some(Group::try_from(GroupRecord {
                    group_id,
                    title,
                    slug,
                    description,
                })?)
            }
            _ => None,
        };

        Ok(Self {
            id: value.post_id.into(),
            text: value.text,
            pub_date: value.pub_date.as_utc(),
            author: User {
                id: value.user_id.into(),
                username: Username::new(value.username)?,
            },
            group,
            image: value.image,
        })
    }
}

impl TryFrom<CommentRecord> for Comment {
    type Error = ModelValidationError;

    fn try_from(value: CommentRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value.comment_id.into(),
            post: value.post_id.into(),
            author: User {
                id: value.user_id.into(),
                username: Username::new(value.username)?,
            },
            text: value.text,
            created: value.created.as_utc(),
        })
    }
}
