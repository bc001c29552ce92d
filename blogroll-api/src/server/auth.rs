use crate::server::{ServerError, Settings};
use axum::{
    extract::{FromRef, FromRequestParts, OptionalFromRequestParts},
    http::{Uri, request::Parts},
};
use blogroll_common::model::{
    Id,
    auth::SessionToken,
    user::{User, UserMarker},
};
use blogroll_db::store::Store;
use headers::{Cookie, HeaderMapExt};
use std::sync::Arc;
use time::UtcDateTime;
use tracing::debug;

/// Name of the cookie carrying the [`SessionToken`].
pub const SESSION_COOKIE: &str = "session";

/// The user behind a valid session cookie.
///
/// Extracting it on a request without one redirects to the login page, with
/// the requested path as the `next` parameter. Extract
/// `Option<AuthenticatedUser>` on pages anonymous users may see.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct AuthenticatedUser {
    user: User,
}

impl AuthenticatedUser {
    #[must_use]
    pub fn user(&self) -> &User {
        &self.user
    }

    #[must_use]
    pub fn user_id(&self) -> Id<UserMarker> {
        self.user.id
    }
}

/// `{login_url}?next={path}`, keeping slashes in `next` readable.
#[must_use]
pub fn login_redirect(login_url: &str, requested: &Uri) -> String {
    let path = requested
        .path_and_query()
        .map_or(requested.path(), |path_and_query| path_and_query.as_str());
    let next = urlencoding::encode(path).replace("%2F", "/");

    format!("{login_url}?next={next}")
}

async fn session_user<S>(parts: &mut Parts, state: &S) -> Result<Option<User>, ServerError>
where
    Arc<dyn Store>: FromRef<S>,
    S: Send + Sync,
{
    let Some(cookie) = parts.headers.typed_get::<Cookie>() else {
        return Ok(None);
    };
    let Some(raw_token) = cookie.get(SESSION_COOKIE) else {
        return Ok(None);
    };
    let token: SessionToken = match raw_token.parse() {
        Ok(token) => token,
        Err(e) => {
            debug!(error = %e, "Ignoring malformed session cookie");
            return Ok(None);
        }
    };

    let token_hash = token.digest()?;
    let store = Arc::<dyn Store>::from_ref(state);
    let Some(authentication) = store.fetch_authentication(&token_hash).await? else {
        debug!(user_id = %token.user_id, "Ignoring unknown session");
        return Ok(None);
    };

    if authentication.user != token.user_id {
        debug!(user_id = %token.user_id, "Ignoring session issued to another user");
        return Ok(None);
    }
    if authentication.is_expired_at(UtcDateTime::now()) {
        debug!(user_id = %token.user_id, "Ignoring expired session");
        return Ok(None);
    }

    Ok(store.fetch_user(authentication.user).await?)
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    Arc<dyn Store>: FromRef<S>,
    Arc<Settings>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match session_user(parts, state).await? {
            Some(user) => Ok(Self { user }),
            None => {
                let settings = Arc::<Settings>::from_ref(state);
                Err(ServerError::LoginRequired {
                    location: login_redirect(&settings.login_url, &parts.uri),
                })
            }
        }
    }
}

impl<S> OptionalFromRequestParts<S> for AuthenticatedUser
where
    Arc<dyn Store>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        Ok(session_user(parts, state)
            .await?
            .map(|user| Self { user }))
    }
}

#[cfg(test)]
mod tests {
    use super::login_redirect;
    use crate::server::testing::TestApp;
    use axum::http::{StatusCode, Uri};
    use time::{Duration, UtcDateTime};

    #[test]
    fn next_keeps_path_and_query() {
        let uri = Uri::from_static("/new/");
        assert_eq!(login_redirect("/auth/login/", &uri), "/auth/login/?next=/new/");

        let uri = Uri::from_static("/alice/3/edit/?x=1&y=2");
        assert_eq!(
            login_redirect("/auth/login/", &uri),
            "/auth/login/?next=/alice/3/edit/%3Fx%3D1%26y%3D2"
        );
    }

    #[tokio::test]
    async fn anonymous_is_sent_to_login() {
        let app = TestApp::new();
        let response = app.get("/new/", None).await;
        assert_eq!(response.status, StatusCode::SEE_OTHER);
        assert_eq!(
            response.location.as_deref(),
            Some("/auth/login/?next=/new/")
        );
    }

    #[tokio::test]
    async fn garbage_cookie_counts_as_anonymous() {
        let app = TestApp::new();
        let response = app.get("/new/", Some("not-a-token")).await;
        assert_eq!(response.status, StatusCode::SEE_OTHER);

        let response = app.get("/", Some("1:AAAA:BBBB")).await;
        assert_eq!(response.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn expired_session_is_rejected() {
        let app = TestApp::new();
        let created_at = UtcDateTime::now() - Duration::hours(2);
        let (_, session) = app
            .user_with_session("alice", created_at, Some(Duration::hours(1)))
            .await;
        let response = app.get("/new/", Some(&session)).await;
        assert_eq!(response.status, StatusCode::SEE_OTHER);
    }

    #[tokio::test]
    async fn valid_session_is_accepted() {
        let app = TestApp::new();
        let (_, session) = app.user("alice").await;
        let response = app.get("/new/", Some(&session)).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.rendered().template(), "new_post.html");
    }
}
