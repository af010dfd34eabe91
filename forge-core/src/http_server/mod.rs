//! Git smart HTTP gateway.

pub mod access;
pub mod files;
pub mod routes;
pub mod service;

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderName, HeaderValue, Method, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::AppError;
use crate::paths::is_clean_request_path;
use crate::store::ForgeStore;
use access::{check_access, AccessContext, AccessRequest};
use files::{send_file, CachePolicy};
use routes::{GitRoute, RouteTable, SUSPICIOUS_PATH};
use service::{info_refs, service_rpc, Service};

const CORS_HEADERS: [HeaderName; 3] = [header::CONTENT_TYPE, header::AUTHORIZATION, header::USER_AGENT];
const CORS_HEADERS_VALUE: &str = "Content-Type, Authorization, User-Agent";

/// Shared state for the HTTP server
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn ForgeStore>,
    pub repos_path: PathBuf,
    pub routes: Arc<RouteTable>,
}

impl AppState {
    pub fn new(config: Arc<Config>, store: Arc<dyn ForgeStore>, repos_path: PathBuf) -> Result<Self, regex::Error> {
        Ok(AppState {
            config,
            store,
            repos_path,
            routes: Arc::new(RouteTable::new()?),
        })
    }
}

/// A request that passed the access gate and the route table
#[derive(Debug, Clone)]
pub struct GitRequest {
    pub access: AccessContext,
    /// Existing repository directory
    pub repo_dir: PathBuf,
    /// Requested file relative to `repo_dir`
    pub file: String,
}

#[derive(Debug, Deserialize)]
pub struct GitQuery {
    service: Option<String>,
}

fn cors_layer(origin: &str) -> Option<CorsLayer> {
    if origin.is_empty() {
        return None;
    }

    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(CORS_HEADERS);

    if origin == "*" {
        return Some(layer.allow_origin(Any));
    }
    match HeaderValue::from_str(origin) {
        Ok(value) => Some(layer.allow_origin(value)),
        Err(e) => {
            warn!("Ignoring invalid access_control_allow_origin {:?}: {}", origin, e);
            None
        }
    }
}

/// Create the HTTP router
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.access_control_allow_origin);

    let app = Router::new()
        .route("/:username/:reponame/*action", any(serve_git))
        .with_state(state);

    match cors {
        Some(cors) => app.layer(cors),
        None => app,
    }
}

async fn serve_git(
    State(state): State<AppState>,
    Path((username, reponame, action)): Path<(String, String, String)>,
    Query(query): Query<GitQuery>,
    request: Request<Body>,
) -> Response {
    let cors = !state.config.access_control_allow_origin.is_empty();

    let mut response = if cors && request.method() == Method::OPTIONS {
        StatusCode::OK.into_response()
    } else {
        handle_git(&state, &username, &reponame, &action, query.service.as_deref(), request)
            .await
            .unwrap_or_else(IntoResponse::into_response)
    };

    if cors {
        response
            .headers_mut()
            .entry(header::ACCESS_CONTROL_ALLOW_HEADERS)
            .or_insert(HeaderValue::from_static(CORS_HEADERS_VALUE));
    }
    response
}

async fn handle_git(
    state: &AppState,
    username: &str,
    reponame: &str,
    action: &str,
    service: Option<&str>,
    request: Request<Body>,
) -> Result<Response, AppError> {
    let path = request.uri().path().to_string();
    if !is_clean_request_path(&path) {
        warn!("Rejecting suspicious request path {:?}", path);
        return Err(AppError::bad_request(SUSPICIOUS_PATH));
    }

    let method = request.method().clone();
    let access = check_access(
        state.store.as_ref(),
        state.config.require_signin_view,
        &AccessRequest {
            username,
            reponame,
            action,
            method: &method,
            service,
            path: &path,
            headers: request.headers(),
        },
    )
    .await?;

    let dispatch = state
        .routes
        .dispatch(&method, &path, &state.repos_path, state.config.disable_http_git)?;

    match tokio::fs::metadata(&dispatch.repo_dir).await {
        Ok(metadata) if metadata.is_dir() => {}
        _ => return Err(AppError::not_found("Repository does not exist")),
    }

    let git = GitRequest {
        access,
        repo_dir: dispatch.repo_dir,
        file: dispatch.file,
    };
    let config = state.config.as_ref();

    match dispatch.route {
        GitRoute::UploadPack => service_rpc(config, Service::UploadPack, &git, request).await,
        GitRoute::ReceivePack => service_rpc(config, Service::ReceivePack, &git, request).await,
        GitRoute::InfoRefs => info_refs(config, &git, service, request.headers()).await,
        GitRoute::TextFile => send_file(&git.repo_dir, &git.file, "text/plain", CachePolicy::NoCache).await,
        GitRoute::InfoPacks => {
            send_file(&git.repo_dir, &git.file, "text/plain; charset=utf-8", CachePolicy::NoCache).await
        }
        GitRoute::LooseObject => {
            send_file(&git.repo_dir, &git.file, "application/x-git-loose-object", CachePolicy::Forever).await
        }
        GitRoute::PackFile => {
            send_file(&git.repo_dir, &git.file, "application/x-git-packed-objects", CachePolicy::Forever).await
        }
        GitRoute::PackIndex => {
            send_file(&git.repo_dir, &git.file, "application/x-git-packed-objects-toc", CachePolicy::Forever).await
        }
    }
}

/// Run the HTTP server
pub async fn run_http_server(
    config: Arc<Config>,
    store: Arc<dyn ForgeStore>,
    repos_path: PathBuf,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let state = AppState::new(config.clone(), store, repos_path)?;

    let app = create_router(state);
    let addr = format!("{}:{}", config.http_addr, config.http_port);

    info!("HTTP server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
