//! Drives the full router against in-memory collaborators.

use crate::server::{
    ServerState, Settings, app,
    auth::SESSION_COOKIE,
    cache::MemoryPageCache,
    media::FsMediaStore,
    render::{RecordingRenderer, Renderer, Templates},
};
use axum::{
    Router,
    body::{Body, Bytes},
    http::{Method, Request, StatusCode, header},
};
use blogroll_common::{
    model::{
        auth::{Authentication, SessionLifetime, SessionToken},
        follow::Follow,
        group::{CreateGroup, Group, Slug},
        post::{CreatePost, Post, PostFilter},
        user::{CreateUser, User, Username},
    },
    pagination::Paginator,
};
use blogroll_db::{memory::MemoryStore, store::Store};
use http_body_util::BodyExt;
use std::{sync::Arc, time::Duration};
use tempfile::TempDir;
use time::UtcDateTime;
use tower::ServiceExt;

/// A 2x1 GIF.
pub const SMALL_GIF: &[u8] = b"GIF89a\x02\x00\x01\x00\x80\x00\x00\x00\x00\x00\xff\xff\xff\
    \x21\xf9\x04\x00\x00\x00\x00\x00\x2c\x00\x00\x00\x00\x02\x00\x01\x00\x00\x02\x02\x0c\
    \x0a\x00\x3b";

const BOUNDARY: &str = "blogroll-test-boundary";

pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub page_cache: Arc<MemoryPageCache>,
    media_root: TempDir,
    router: Router,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub location: Option<String>,
    pub body: Bytes,
}

/// A body produced by [`RecordingRenderer`].
pub struct Rendered(serde_json::Value);

pub struct Part<'a> {
    name: &'a str,
    file_name: Option<&'a str>,
    content: &'a [u8],
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_renderer(Arc::new(RecordingRenderer))
    }

    pub fn with_renderer(renderer: Arc<dyn Renderer>) -> Self {
        let media_root = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let page_cache = Arc::new(MemoryPageCache::new());
        let settings = Settings {
            login_url: "/auth/login/".to_owned(),
            media_root: media_root.path().to_owned(),
            page_cache_ttl: Duration::from_secs(60),
            max_upload_bytes: 1024 * 1024,
        };
        let state = ServerState {
            store: store.clone(),
            templates: Templates::new(renderer),
            page_cache: page_cache.clone(),
            media: Arc::new(FsMediaStore::new(media_root.path())),
            settings: Arc::new(settings),
        };

        Self {
            store,
            page_cache,
            media_root,
            router: app(state),
        }
    }

    /// A new user with a session that never expires, and its cookie value.
    pub async fn user(&self, name: &str) -> (User, String) {
        self.user_with_session(name, UtcDateTime::now(), None).await
    }

    pub async fn user_with_session(
        &self,
        name: &str,
        created_at: UtcDateTime,
        lifetime: Option<time::Duration>,
    ) -> (User, String) {
        let username = Username::new(name.to_owned()).unwrap();
        let user = self.store.create_user(&CreateUser { username }).await.unwrap();

        let token = SessionToken::generate(user.id);
        let authentication = Authentication {
            user: user.id,
            token_hash: token.digest().unwrap(),
            created_at,
            expires_after: lifetime.map(|lifetime| SessionLifetime::try_from(lifetime).unwrap()),
        };
        self.store
            .create_authentication(&authentication)
            .await
            .unwrap();

        (user, token.to_string())
    }

    pub async fn group(&self, slug: &str) -> Group {
        let group = CreateGroup::new(
            slug.to_uppercase(),
            Slug::new(slug.to_owned()).unwrap(),
            format!("All about {slug}"),
        )
        .unwrap();
        self.store.create_group(&group).await.unwrap()
    }

    pub async fn post(&self, author: &User, text: &str, group: Option<&Group>) -> Post {
        let post = CreatePost {
            author: author.id,
            text: text.to_owned(),
            group: group.map(|group| group.id),
            image: None,
        };
        self.store.create_post(&post).await.unwrap()
    }

    pub async fn follow(&self, user: &User, author: &User) {
        let follow = Follow {
            user: user.id,
            author: author.id,
        };
        self.store.ensure_follow(follow).await.unwrap();
    }

    /// Everything `author` wrote, newest first.
    pub async fn posts_by(&self, author: &User) -> Vec<Post> {
        let filter = PostFilter::Author(author.id);
        let count = self.store.count_posts(filter).await.unwrap();
        let window = Paginator::new(1000).locate(count, None);
        self.store.fetch_posts(filter, window).await.unwrap()
    }

    pub fn read_media(&self, path: &str) -> Vec<u8> {
        std::fs::read(self.media_root.path().join(path)).unwrap()
    }

    pub async fn get(&self, uri: &str, session: Option<&str>) -> TestResponse {
        let request = request(Method::GET, uri, session).body(Body::empty()).unwrap();
        self.send(request).await
    }

    pub async fn post_form(&self, uri: &str, session: Option<&str>, body: &str) -> TestResponse {
        let request = request(Method::POST, uri, session)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_owned()))
            .unwrap();
        self.send(request).await
    }

    pub async fn post_multipart(
        &self,
        uri: &str,
        session: Option<&str>,
        parts: &[Part<'_>],
    ) -> TestResponse {
        let request = request(Method::POST, uri, session)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(parts)))
            .unwrap();
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let location = response
            .headers()
            .get(header::LOCATION)
            .map(|location| location.to_str().unwrap().to_owned());
        let body = response.into_body().collect().await.unwrap().to_bytes();

        TestResponse {
            status,
            location,
            body,
        }
    }
}

fn request(method: Method, uri: &str, session: Option<&str>) -> axum::http::request::Builder {
    let builder = Request::builder().method(method).uri(uri);
    match session {
        Some(session) => builder.header(header::COOKIE, format!("{SESSION_COOKIE}={session}")),
        None => builder,
    }
}

fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        let disposition = match part.file_name {
            Some(file_name) => format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{file_name}\"\r\n\
                Content-Type: application/octet-stream\r\n",
                part.name
            ),
            None => format!("Content-Disposition: form-data; name=\"{}\"\r\n", part.name),
        };
        body.extend_from_slice(disposition.as_bytes());
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(part.content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

impl TestResponse {
    pub fn rendered(&self) -> Rendered {
        Rendered(serde_json::from_slice(&self.body).unwrap())
    }
}

impl Rendered {
    pub fn template(&self) -> &str {
        self.0["template"].as_str().unwrap()
    }

    pub fn context(&self) -> &serde_json::Value {
        &self.0["context"]
    }
}

impl<'a> Part<'a> {
    pub fn text(name: &'a str, value: &'a str) -> Self {
        Self {
            name,
            file_name: None,
            content: value.as_bytes(),
        }
    }

    pub fn file(name: &'a str, file_name: &'a str, content: &'a [u8]) -> Self {
        Self {
            name,
            file_name: Some(file_name),
            content,
        }
    }
}
