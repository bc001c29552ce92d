use crate::model::{
    Id,
    group::{Group, GroupMarker},
    serialize_timestamp,
    user::{User, UserMarker},
};
use serde::Serialize;
use time::UtcDateTime;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct PostMarker;

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub struct Post {
    pub id: Id<PostMarker>,
    pub text: String,
    #[serde(serialize_with = "serialize_timestamp")]
    pub pub_date: UtcDateTime,
    pub author: User,
    pub group: Option<Group>,
    pub image: Option<String>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct CreatePost {
    pub author: Id<UserMarker>,
    pub text: String,
    pub group: Option<Id<GroupMarker>>,
    pub image: Option<String>,
}

/// Replacement values for an existing post. The author and publication
/// date never change.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct UpdatePost {
    pub text: String,
    pub group: Option<Id<GroupMarker>>,
    pub image: Option<String>,
}

/// Which posts a listing contains.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum PostFilter {
    All,
    Group(Id<GroupMarker>),
    Author(Id<UserMarker>),
    /// Posts by every author the given user follows.
    FollowedBy(Id<UserMarker>),
}
