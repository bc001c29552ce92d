use axum::{
    Router,
    extract::{
        DefaultBodyLimit, FromRef, Request, State,
        multipart::{MultipartError, MultipartRejection},
        rejection::PathRejection,
    },
    http::{StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Redirect, Response},
};
use blogroll_common::model::{Id, auth::AuthTokenHashError, post::PostMarker};
use blogroll_db::store::{Store, StoreError};
use cache::PageCache;
use media::{MediaError, MediaStore};
use render::{RenderError, Templates};
use serde::Serialize;
use std::{any::Any, path::PathBuf, sync::Arc, time::Duration};
use thiserror::Error;
use tower_http::{catch_panic::CatchPanicLayer, services::ServeDir};
use tracing::{debug, error};

pub mod auth;
pub mod cache;
pub mod forms;
pub mod guard;
pub mod media;
pub mod render;
mod routes;
#[cfg(test)]
mod testing;

pub type ServerRouter = Router<ServerState>;

#[derive(Clone, Debug, FromRef)]
pub struct ServerState {
    pub store: Arc<dyn Store>,
    pub templates: Templates,
    pub page_cache: Arc<dyn PageCache>,
    pub media: Arc<dyn MediaStore>,
    pub settings: Arc<Settings>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct Settings {
    /// Where anonymous users are sent when a page needs a login.
    pub login_url: String,
    /// Served under `/media/`.
    pub media_root: PathBuf,
    pub page_cache_ttl: Duration,
    pub max_upload_bytes: usize,
}

/// The full application. Handlers get `state`, the outer layers render error
/// pages and convert handler panics into 500s.
pub fn app(state: ServerState) -> Router {
    routes::routes(&state)
        .nest_service("/media", ServeDir::new(&state.settings.media_root))
        .fallback(fallback)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            render_error_pages,
        ))
        .layer(DefaultBodyLimit::max(state.settings.max_upload_bytes))
        .with_state(state)
}

pub async fn fallback(request: Request) -> ServerError {
    ServerError::UnknownRoute(request.into_parts().0.uri)
}

fn panic_response(_payload: Box<dyn Any + Send + 'static>) -> Response {
    ServerError::Panic.into_response()
}

pub type Result<T, E = ServerError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Unknown route requested: {0}")]
    UnknownRoute(Uri),
    #[error("Path rejected: {0}")]
    PathRejection(#[from] PathRejection),
    #[error("Multipart body rejected: {0}")]
    MultipartRejection(#[from] MultipartRejection),
    #[error("Multipart body could not be read: {0}")]
    Multipart(#[from] MultipartError),
    #[error("Group with slug {0} was not found.")]
    GroupBySlugNotFound(String),
    #[error("User {0} was not found.")]
    UserByUsernameNotFound(String),
    #[error("Post {post_id} by {username} was not found.")]
    PostNotFound {
        username: String,
        post_id: Id<PostMarker>,
    },
    #[error("Login required, redirecting to {location}")]
    LoginRequired { location: String },
    #[error("The session token could not be hashed: {0}")]
    AuthTokenHash(#[from] AuthTokenHashError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error("A handler panicked")]
    Panic,
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::UnknownRoute(_)
            | ServerError::PathRejection(_)
            | ServerError::GroupBySlugNotFound(_)
            | ServerError::UserByUsernameNotFound(_)
            | ServerError::PostNotFound { .. } => StatusCode::NOT_FOUND,
            ServerError::LoginRequired { .. } => StatusCode::SEE_OTHER,
            ServerError::MultipartRejection(_) | ServerError::Multipart(_) => {
                StatusCode::BAD_REQUEST
            }
            ServerError::AuthTokenHash(_)
            | ServerError::Store(_)
            | ServerError::Render(_)
            | ServerError::Media(_)
            | ServerError::Panic => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Marks a response whose body should be replaced by a rendered error page.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
struct ErrorPage;

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        if let ServerError::LoginRequired { location } = &self {
            debug!(%location, "Redirecting to login");
            return Redirect::to(location).into_response();
        }

        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, %status, "Replying with error");
        } else {
            debug!(error = %self, %status, "Replying with error");
        }

        let mut response = (status, status.canonical_reason().unwrap_or_default()).into_response();
        if matches!(
            status,
            StatusCode::NOT_FOUND | StatusCode::INTERNAL_SERVER_ERROR
        ) {
            response.extensions_mut().insert(ErrorPage);
        }
        response
    }
}

#[derive(Serialize)]
struct ErrorPageContext<'a> {
    path: &'a str,
}

async fn render_error_pages(
    State(templates): State<Templates>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_owned();
    let response = next.run(request).await;
    if response.extensions().get::<ErrorPage>().is_none() {
        return response;
    }

    let status = response.status();
    let template = if status == StatusCode::NOT_FOUND {
        "misc/404.html"
    } else {
        "misc/500.html"
    };

    match templates.render(template, &ErrorPageContext { path: &path }) {
        Ok(page) => (status, page).into_response(),
        Err(e) => {
            error!(error = %e, template, "Error page could not be rendered");
            (status, status.canonical_reason().unwrap_or_default()).into_response()
        }
    }
}
