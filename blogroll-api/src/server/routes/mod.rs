use crate::server::{Result, ServerError, ServerRouter, ServerState};
use axum::Router;
use blogroll_common::{
    model::{
        Id,
        post::{Post, PostFilter, PostMarker},
        user::User,
    },
    pagination::{Page, Paginator},
};
use blogroll_db::store::Store;
use serde::Deserialize;

pub mod about;
pub mod posts;
pub mod profiles;

pub const FEED_PAGE: Paginator = Paginator::new(10);
pub const PROFILE_PAGE: Paginator = Paginator::new(5);

pub fn routes(state: &ServerState) -> ServerRouter {
    Router::new()
        .merge(posts::routes(state))
        .merge(profiles::routes())
        .merge(about::routes())
}

/// `?page=` as sent. Invalid values are resolved by [`Paginator::locate`].
#[derive(Clone, Eq, PartialEq, Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
}

async fn paginate(
    store: &dyn Store,
    filter: PostFilter,
    paginator: Paginator,
    query: &PageQuery,
) -> Result<Page<Post>> {
    let count = store.count_posts(filter).await?;
    let window = paginator.locate(count, query.page.as_deref());
    let posts = store.fetch_posts(filter, window).await?;

    Ok(window.into_page(posts))
}

async fn fetch_author(store: &dyn Store, username: String) -> Result<User> {
    store
        .fetch_user_by_username(&username)
        .await?
        .ok_or(ServerError::UserByUsernameNotFound(username))
}

/// A post addressed through its author, so `/bob/{id}/` of alice's post is
/// not found.
async fn fetch_authored_post(
    store: &dyn Store,
    username: String,
    post_id: Id<PostMarker>,
) -> Result<Post> {
    let author = fetch_author(store, username).await?;

    store
        .fetch_authored_post(author.id, post_id)
        .await?
        .ok_or_else(|| ServerError::PostNotFound {
            username: author.username.into_inner(),
            post_id,
        })
}
