use blogroll_common::model::{
    auth::{AuthTokenHashError, Authentication, SessionToken},
    user::{CreateUser, InvalidUsernameError, Username},
};
use blogroll_db::{
    client::DbClient,
    memory::MemoryStore,
    store::{Store, StoreError},
};
use serde::Deserialize;
use server::{
    ServerState, Settings,
    auth::SESSION_COOKIE,
    cache::MemoryPageCache,
    media::FsMediaStore,
    render::{MiniJinjaRenderer, RenderError, Templates},
};
use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};
use thiserror::Error;
use time::UtcDateTime;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod server;

#[derive(Debug, Error)]
enum InitError {
    #[error("Error parsing .env file: {0}")]
    Dotenv(#[from] dotenvy::Error),
    #[error("Error parsing environment: {0}")]
    Envy(#[from] envy::Error),
    #[error("Error setting up the store: {0}")]
    Store(#[from] StoreError),
    #[error("DEV_SESSION_USER is not a valid username: {0}")]
    DevSessionUser(#[from] InvalidUsernameError),
    #[error("Error hashing the development session token: {0}")]
    DevSessionToken(#[from] AuthTokenHashError),
    #[error("Error loading templates: {0}")]
    Templates(#[from] RenderError),
    #[error("Error binding tcp listener: {0}")]
    TcpBind(std::io::Error),
    #[error("Error serving server: {0}")]
    TcpServe(std::io::Error),
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
struct Env {
    server_address: IpAddr,
    server_port: u16,
    /// Without a database everything lives in memory and is lost on exit.
    database_url: Option<String>,
    #[serde(default = "default_media_root")]
    media_root: PathBuf,
    #[serde(default = "default_login_url")]
    login_url: String,
    #[serde(default = "default_page_cache_ttl_seconds")]
    page_cache_ttl_seconds: u64,
    #[serde(default = "default_max_upload_bytes")]
    max_upload_bytes: usize,
    /// Creates this user with a session in the in-memory store.
    dev_session_user: Option<String>,
}

fn default_media_root() -> PathBuf {
    PathBuf::from("media")
}

fn default_login_url() -> String {
    "/auth/login/".to_owned()
}

fn default_page_cache_ttl_seconds() -> u64 {
    20
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

fn install_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "blogroll_api=debug,blogroll_common=debug,blogroll_db=debug,\
                tower_http=debug,axum::rejection=trace,sqlx=debug"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn get_env() -> Result<Env, InitError> {
    if let Err(e) = dotenvy::dotenv() {
        if e.not_found() {
            debug!("No .dotenv file found");
        } else {
            return Err(e.into());
        }
    }

    envy::from_env().map_err(InitError::from)
}

async fn open_store(
    database_url: Option<&str>,
    dev_session_user: Option<&str>,
) -> Result<Arc<dyn Store>, InitError> {
    let Some(database_url) = database_url else {
        warn!(
            "DATABASE_URL is not set, keeping all data in memory. \
            Sessions only exist for DEV_SESSION_USER"
        );
        let store = MemoryStore::new();
        if let Some(username) = dev_session_user {
            let token = seed_dev_session(&store, username).await?;
            warn!(
                %username,
                cookie = %format!("{SESSION_COOKIE}={token}"),
                "Created development session"
            );
        }
        return Ok(Arc::new(store));
    };

    if dev_session_user.is_some() {
        warn!("DEV_SESSION_USER is ignored when a database is configured");
    }

    let client = DbClient::connect(database_url).await?;
    client.migrate().await?;
    info!("Connected to database and applied migrations");

    Ok(Arc::new(client))
}

/// Creates `username` with a session that never expires.
async fn seed_dev_session(store: &dyn Store, username: &str) -> Result<SessionToken, InitError> {
    let username = Username::new(username.to_owned())?;
    let user = store.create_user(&CreateUser { username }).await?;

    let token = SessionToken::generate(user.id);
    let authentication = Authentication {
        user: user.id,
        token_hash: token.digest()?,
        created_at: UtcDateTime::now(),
        expires_after: None,
    };
    store.create_authentication(&authentication).await?;

    Ok(token)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Could not listen for shutdown signal");
        return;
    }
    info!("Shutting down");
}

#[tokio::main]
async fn main() -> Result<(), InitError> {
    install_tracing();
    let env = get_env()?;

    let store = open_store(env.database_url.as_deref(), env.dev_session_user.as_deref()).await?;
    let templates = Templates::new(Arc::new(MiniJinjaRenderer::new()?));
    let settings = Settings {
        login_url: env.login_url,
        media_root: env.media_root.clone(),
        page_cache_ttl: Duration::from_secs(env.page_cache_ttl_seconds),
        max_upload_bytes: env.max_upload_bytes,
    };
    let state = ServerState {
        store,
        templates,
        page_cache: Arc::new(MemoryPageCache::new()),
        media: Arc::new(FsMediaStore::new(env.media_root)),
        settings: Arc::new(settings),
    };

    let tracing_layer = TraceLayer::new_for_http();
    let app = server::app(state).layer(tracing_layer);

    let server_address = SocketAddr::new(env.server_address, env.server_port);
    let listener = tokio::net::TcpListener::bind(server_address)
        .await
        .map_err(InitError::TcpBind)?;
    info!(%server_address, "Listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(InitError::TcpServe)?;

    Ok(())
}
