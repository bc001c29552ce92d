//! Who may change what. Runs after the target is resolved, so missing
//! targets are 404s before any permission check.

use crate::server::routes::{posts::PostPath, profiles::ProfilePath};
use blogroll_common::model::{post::Post, user::User};

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub enum Decision {
    Allowed,
    /// Silently send the requester to this path instead.
    DeniedRedirect(String),
}

/// Only the author may edit a post. Others land on its detail page.
#[must_use]
pub fn may_edit(requester: &User, post: &Post) -> Decision {
    if requester.id == post.author.id {
        Decision::Allowed
    } else {
        Decision::DeniedRedirect(PostPath::of(post).to_string())
    }
}

/// Nobody follows or unfollows themselves. Attempts land on the profile.
#[must_use]
pub fn may_follow(requester: &User, author: &User) -> Decision {
    if requester.id == author.id {
        Decision::DeniedRedirect(ProfilePath::of(author).to_string())
    } else {
        Decision::Allowed
    }
}
