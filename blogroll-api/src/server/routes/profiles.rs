use crate::server::{
    Result, ServerError, ServerRouter,
    auth::AuthenticatedUser,
    guard::{self, Decision},
    render::Templates,
    routes::{FEED_PAGE, PROFILE_PAGE, PageQuery, fetch_author, paginate},
};
use axum::{
    extract::{Query, State},
    response::{Html, Redirect},
};
use axum_extra::routing::{RouterExt, TypedPath};
use blogroll_common::{
    model::{follow::Follow, post::Post, post::PostFilter, user::User},
    pagination::Page,
};
use blogroll_db::store::Store;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_get(follow_feed)
        .typed_get(profile)
        .typed_get(follow_author)
        .typed_get(unfollow_author)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/follow/", rejection(ServerError))]
pub struct FollowFeedPath();

#[derive(TypedPath, Deserialize)]
#[typed_path("/{username}/", rejection(ServerError))]
pub struct ProfilePath {
    pub username: String,
}

impl ProfilePath {
    #[must_use]
    pub fn of(user: &User) -> Self {
        Self {
            username: user.username.get().to_owned(),
        }
    }
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/{username}/follow/", rejection(ServerError))]
pub struct FollowPath {
    pub username: String,
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/{username}/unfollow/", rejection(ServerError))]
pub struct UnfollowPath {
    pub username: String,
}

#[derive(Serialize)]
struct FollowFeedContext<'a> {
    viewer: &'a User,
    page: Page<Post>,
    follow: bool,
}

async fn follow_feed(
    FollowFeedPath(): FollowFeedPath,
    State(store): State<Arc<dyn Store>>,
    State(templates): State<Templates>,
    user: AuthenticatedUser,
    Query(query): Query<PageQuery>,
) -> Result<Html<String>> {
    let filter = PostFilter::FollowedBy(user.user_id());
    let page = paginate(store.as_ref(), filter, FEED_PAGE, &query).await?;
    let context = FollowFeedContext {
        viewer: user.user(),
        page,
        follow: true,
    };

    Ok(templates.render("follow.html", &context)?)
}

#[derive(Serialize)]
struct ProfileContext<'a> {
    viewer: Option<&'a User>,
    author: &'a User,
    post_count: u64,
    followers_count: u64,
    following_count: u64,
    following: bool,
    page: Page<Post>,
}

async fn profile(
    ProfilePath { username }: ProfilePath,
    State(store): State<Arc<dyn Store>>,
    State(templates): State<Templates>,
    viewer: Option<AuthenticatedUser>,
    Query(query): Query<PageQuery>,
) -> Result<Html<String>> {
    let author = fetch_author(store.as_ref(), username).await?;
    let page = paginate(
        store.as_ref(),
        PostFilter::Author(author.id),
        PROFILE_PAGE,
        &query,
    )
    .await?;
    let counts = store.follow_counts(author.id).await?;
    let following = match &viewer {
        Some(viewer) => {
            store
                .is_following(Follow {
                    user: viewer.user_id(),
                    author: author.id,
                })
                .await?
        }
        None => false,
    };

    let context = ProfileContext {
        viewer: viewer.as_ref().map(AuthenticatedUser::user),
        author: &author,
        post_count: page.count,
        followers_count: counts.followers,
        following_count: counts.following,
        following,
        page,
    };

    Ok(templates.render("profile.html", &context)?)
}

async fn follow_author(
    FollowPath { username }: FollowPath,
    State(store): State<Arc<dyn Store>>,
    user: AuthenticatedUser,
) -> Result<Redirect> {
    let author = fetch_author(store.as_ref(), username).await?;
    let profile = ProfilePath::of(&author).to_string();
    if let Decision::DeniedRedirect(target) = guard::may_follow(user.user(), &author) {
        debug!(requester = %user.user().username, "Ignoring self-follow");
        return Ok(Redirect::to(&target));
    }

    let follow = Follow {
        user: user.user_id(),
        author: author.id,
    };
    if store.ensure_follow(follow).await? {
        info!(user = %user.user().username, author = %author.username, "Followed author");
    }

    Ok(Redirect::to(&profile))
}

async fn unfollow_author(
    UnfollowPath { username }: UnfollowPath,
    State(store): State<Arc<dyn Store>>,
    user: AuthenticatedUser,
) -> Result<Redirect> {
    let author = fetch_author(store.as_ref(), username).await?;
    let profile = ProfilePath::of(&author).to_string();
    if let Decision::DeniedRedirect(target) = guard::may_follow(user.user(), &author) {
        debug!(requester = %user.user().username, "Ignoring self-unfollow");
        return Ok(Redirect::to(&target));
    }

    let follow = Follow {
        user: user.user_id(),
        author: author.id,
    };
    if store.remove_follow(follow).await? {
        info!(user = %user.user().username, author = %author.username, "Unfollowed author");
    }

    Ok(Redirect::to(&profile))
}

#[cfg(test)]
mod tests {
    use crate::server::testing::TestApp;
    use axum::http::StatusCode;
    use blogroll_common::model::follow::Follow;
    use blogroll_db::store::Store;

    #[tokio::test]
    async fn profile_shows_counts_and_five_posts() {
        let app = TestApp::new();
        let (alice, _) = app.user("alice").await;
        let (bob, bob_session) = app.user("bob").await;
        let (carol, _) = app.user("carol").await;
        for i in 0..7 {
            app.post(&alice, &format!("post {i}"), None).await;
        }
        app.follow(&bob, &alice).await;
        app.follow(&carol, &alice).await;
        app.follow(&alice, &carol).await;

        let rendered = app.get("/alice/", Some(&bob_session)).await.rendered();
        assert_eq!(rendered.template(), "profile.html");
        let context = rendered.context();
        assert_eq!(context["author"]["username"], "alice");
        assert_eq!(context["post_count"], 7);
        assert_eq!(context["followers_count"], 2);
        assert_eq!(context["following_count"], 1);
        assert_eq!(context["following"], true);
        assert_eq!(context["page"]["items"].as_array().unwrap().len(), 5);
        assert_eq!(context["page"]["num_pages"], 2);

        let anonymous = app.get("/alice/?page=2", None).await.rendered();
        assert_eq!(anonymous.context()["following"], false);
        assert_eq!(anonymous.context()["page"]["items"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unknown_profile_is_not_found() {
        let app = TestApp::new();
        let response = app.get("/nobody/", None).await;
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(response.rendered().template(), "misc/404.html");
    }

    #[tokio::test]
    async fn following_twice_keeps_one_follow() {
        let app = TestApp::new();
        let (alice, session) = app.user("alice").await;
        let (bob, _) = app.user("bob").await;

        for _ in 0..2 {
            let response = app.get("/bob/follow/", Some(&session)).await;
            assert_eq!(response.status, StatusCode::SEE_OTHER);
            assert_eq!(response.location.as_deref(), Some("/bob/"));
        }

        let follow = Follow {
            user: alice.id,
            author: bob.id,
        };
        assert!(app.store.is_following(follow).await.unwrap());
        assert_eq!(app.store.follow_counts(bob.id).await.unwrap().followers, 1);
    }

    #[tokio::test]
    async fn unfollow_without_follow_still_redirects() {
        let app = TestApp::new();
        let (alice, session) = app.user("alice").await;
        let (bob, _) = app.user("bob").await;

        let response = app.get("/bob/unfollow/", Some(&session)).await;
        assert_eq!(response.status, StatusCode::SEE_OTHER);
        assert_eq!(response.location.as_deref(), Some("/bob/"));

        app.follow(&alice, &bob).await;
        app.get("/bob/unfollow/", Some(&session)).await;
        let follow = Follow {
            user: alice.id,
            author: bob.id,
        };
        assert!(!app.store.is_following(follow).await.unwrap());
    }

    #[tokio::test]
    async fn self_follow_is_ignored() {
        let app = TestApp::new();
        let (alice, session) = app.user("alice").await;

        let response = app.get("/alice/follow/", Some(&session)).await;
        assert_eq!(response.status, StatusCode::SEE_OTHER);
        assert_eq!(response.location.as_deref(), Some("/alice/"));
        assert_eq!(app.store.follow_counts(alice.id).await.unwrap().followers, 0);
    }

    #[tokio::test]
    async fn follow_requires_login_and_existing_author() {
        let app = TestApp::new();
        app.user("bob").await;
        let response = app.get("/bob/follow/", None).await;
        assert_eq!(response.status, StatusCode::SEE_OTHER);
        assert_eq!(
            response.location.as_deref(),
            Some("/auth/login/?next=/bob/follow/")
        );

        let (_, session) = app.user("alice").await;
        let response = app.get("/nobody/follow/", Some(&session)).await;
        assert_eq!(response.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn follow_feed_lists_followed_authors_only() {
        let app = TestApp::new();
        let (alice, session) = app.user("alice").await;
        let (bob, _) = app.user("bob").await;
        let (carol, _) = app.user("carol").await;
        app.post(&bob, "from bob", None).await;
        app.post(&carol, "from carol", None).await;
        app.post(&alice, "from alice", None).await;
        app.follow(&alice, &bob).await;

        let rendered = app.get("/follow/", Some(&session)).await.rendered();
        assert_eq!(rendered.template(), "follow.html");
        assert_eq!(rendered.context()["follow"], true);
        let items = rendered.context()["page"]["items"].as_array().unwrap().clone();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["text"], "from bob");

        let response = app.get("/follow/", None).await;
        assert_eq!(response.status, StatusCode::SEE_OTHER);
    }
}
