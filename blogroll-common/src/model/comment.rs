use crate::model::{
    Id,
    post::PostMarker,
    serialize_timestamp,
    user::{User, UserMarker},
};
use serde::Serialize;
use time::UtcDateTime;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct CommentMarker;

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub struct Comment {
    pub id: Id<CommentMarker>,
    pub post: Id<PostMarker>,
    pub author: User,
    pub text: String,
    #[serde(serialize_with = "serialize_timestamp")]
    pub created: UtcDateTime,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct CreateComment {
    pub post: Id<PostMarker>,
    pub author: Id<UserMarker>,
    pub text: String,
}
