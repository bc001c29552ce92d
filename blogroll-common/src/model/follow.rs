use crate::model::{Id, user::UserMarker};
use serde::Serialize;

/// `user` reads the posts of `author` in their follow feed.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub struct Follow {
    pub user: Id<UserMarker>,
    pub author: Id<UserMarker>,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash, Serialize)]
pub struct FollowCounts {
    /// Accounts following this user.
    pub followers: u64,
    /// Accounts this user follows.
    pub following: u64,
}
