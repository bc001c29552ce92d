//! Whole-page cache for anonymous `GET`s.
//!
//! Entries are only dropped by expiry or [`PageCache::clear`]; creating a
//! post does not invalidate a cached index page.

use crate::server::{ServerState, auth::SESSION_COOKIE};
use async_trait::async_trait;
use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{HeaderMap, Method, StatusCode, Uri},
    middleware::Next,
    response::{Html, IntoResponse, Response},
};
use headers::{Cookie, HeaderMapExt};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    fmt::Debug,
    time::{Duration, Instant},
};
use tracing::{debug, error};

#[async_trait]
pub trait PageCache: Debug + Send + Sync {
    async fn get(&self, key: &str) -> Option<Bytes>;

    async fn put(&self, key: String, body: Bytes, ttl: Duration);

    async fn clear(&self);
}

#[derive(Clone, Debug)]
struct CacheEntry {
    body: Bytes,
    created_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.created_at.elapsed() > self.ttl
    }
}

#[derive(Debug, Default)]
pub struct MemoryPageCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryPageCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PageCache for MemoryPageCache {
    async fn get(&self, key: &str) -> Option<Bytes> {
        let mut entries = self.entries.lock();
        if entries.get(key)?.is_expired() {
            entries.remove(key);
            return None;
        }

        entries.get(key).map(|entry| entry.body.clone())
    }

    async fn put(&self, key: String, body: Bytes, ttl: Duration) {
        let entry = CacheEntry {
            body,
            created_at: Instant::now(),
            ttl,
        };
        self.entries.lock().insert(key, entry);
    }

    async fn clear(&self) {
        self.entries.lock().clear();
    }
}

fn cache_key(uri: &Uri) -> String {
    match uri.query() {
        Some(query) if !query.is_empty() => format!("{}?{query}", uri.path()),
        _ => uri.path().to_owned(),
    }
}

fn has_session(headers: &HeaderMap) -> bool {
    headers
        .typed_get::<Cookie>()
        .is_some_and(|cookie| cookie.get(SESSION_COOKIE).is_some())
}

/// Serves repeated anonymous `GET`s of the wrapped routes from the
/// [`PageCache`] for [`Settings::page_cache_ttl`](crate::server::Settings).
pub async fn cache_anonymous_pages(
    State(state): State<ServerState>,
    request: Request,
    next: Next,
) -> Response {
    if request.method() != Method::GET || has_session(request.headers()) {
        return next.run(request).await;
    }

    let key = cache_key(request.uri());
    if let Some(body) = state.page_cache.get(&key).await {
        debug!(%key, "Serving page from cache");
        return Html(body).into_response();
    }

    let response = next.run(request).await;
    if response.status() != StatusCode::OK {
        return response;
    }

    let (parts, body) = response.into_parts();
    let body = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(body) => body,
        Err(e) => {
            error!(error = %e, %key, "Page body could not be buffered for caching");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    state
        .page_cache
        .put(key, body.clone(), state.settings.page_cache_ttl)
        .await;

    Response::from_parts(parts, Body::from(body))
}
