//! Authentication and authorization of git HTTP requests.

use axum::http::{header, HeaderMap, Method};
use base64::Engine;
use tracing::{debug, error};

use crate::error::AppError;
use crate::store::{authorize, AccessMode, ForgeStore, Repository, StoreError, User};

const TWO_FACTOR_MESSAGE: &str = "Users with two-factor authentication enabled cannot use their password \
for git over HTTP. Create a personal access token and use it instead of the password.";

/// What the gate needs to know about an incoming request
#[derive(Debug, Clone)]
pub struct AccessRequest<'a> {
    pub username: &'a str,
    pub reponame: &'a str,
    /// Path below the repository, e.g. `info/refs`
    pub action: &'a str,
    pub method: &'a Method,
    /// `service` query parameter
    pub service: Option<&'a str>,
    pub path: &'a str,
    pub headers: &'a HeaderMap,
}

/// Outcome of a successful access check
#[derive(Debug, Clone)]
pub struct AccessContext {
    pub owner: User,
    pub repo: Repository,
    /// None for anonymous pulls
    pub actor: Option<User>,
    pub is_pull: bool,
}

fn is_git_action(action: &str) -> bool {
    ["git-", "info/", "HEAD", "objects/"]
        .iter()
        .any(|needle| action.contains(needle))
}

/// Credentials of a `Basic` authorization header
pub fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let credentials = String::from_utf8(decoded).ok()?;
    let (user, password) = credentials.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

/// Resolve owner and repository, authenticate the client unless the request
/// is an anonymous pull of a public repository, then check permissions.
pub async fn check_access(
    store: &dyn ForgeStore,
    require_signin_view: bool,
    req: &AccessRequest<'_>,
) -> Result<AccessContext, AppError> {
    let repo_name = req.reponame.strip_suffix(".git").unwrap_or(req.reponame);
    let repo_name = repo_name.strip_suffix(".wiki").unwrap_or(repo_name);

    let owner = store
        .get_user_by_name(req.username)
        .await?
        .ok_or_else(|| AppError::not_found("Repository owner does not exist"))?;
    let repo = store
        .get_repository(owner.id, repo_name)
        .await?
        .ok_or_else(|| AppError::not_found("Repository does not exist"))?;

    let is_push = req.service == Some("git-receive-pack") || req.path.ends_with("git-receive-pack");
    let is_pull = !is_push
        && (req.service == Some("git-upload-pack")
            || req.path.ends_with("git-upload-pack")
            || *req.method == Method::GET);

    if is_pull && !repo.is_private && !require_signin_view {
        return Ok(AccessContext {
            owner,
            repo,
            actor: None,
            is_pull,
        });
    }

    if !is_git_action(req.action) {
        return Err(AppError::bad_request("Unrecognized action"));
    }

    let Some((username, password)) = basic_credentials(req.headers) else {
        return Err(AppError::unauthenticated("Unauthorized"));
    };

    let actor = match store.authenticate(&username, &password).await {
        Ok(user) => {
            if user.two_factor_enabled {
                return Err(AppError::unauthenticated(TWO_FACTOR_MESSAGE));
            }
            user
        }
        Err(StoreError::BadCredentials) => authenticate_by_token(store, &username, &password).await?,
        Err(e) => return Err(e.into()),
    };
    debug!("Authenticated {} for {}/{}", actor.name, owner.name, repo.name);

    let mode = if is_pull {
        AccessMode::Read
    } else {
        AccessMode::Write
    };
    if !authorize(store, Some(actor.id), &repo, mode).await? {
        debug!("{} lacks {} access to {}/{}", actor.name, mode, owner.name, repo.name);
        return Err(AppError::forbidden_with_challenge("User permission denied"));
    }

    if !is_pull && repo.is_mirror {
        return Err(AppError::forbidden("Mirror repository is read-only"));
    }

    Ok(AccessContext {
        owner,
        repo,
        actor: Some(actor),
        is_pull,
    })
}

/// Access tokens may be sent either as the username or as the password.
async fn authenticate_by_token(store: &dyn ForgeStore, username: &str, password: &str) -> Result<User, AppError> {
    let token = match store.access_token_by_secret(username).await? {
        Some(token) => Some(token),
        None => store.access_token_by_secret(password).await?,
    };
    let Some(token) = token else {
        return Err(AppError::unauthenticated("Unauthorized"));
    };

    if let Err(e) = store.touch_access_token(token.id).await {
        error!("Failed to touch access token {}: {}", token.id, e);
    }

    store
        .get_user_by_id(token.user_id)
        .await?
        .ok_or_else(|| AppError::internal(format!("Access token {} belongs to a missing user", token.id)))
}
