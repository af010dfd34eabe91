//! Bridge between git smart HTTP requests and `git` subprocesses.

use std::io::Write as _;
use std::path::Path;
use std::process::Stdio;

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, Request, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use flate2::write::GzDecoder;
use futures_util::{future, stream, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, warn};

use super::access::AccessContext;
use super::files::{apply_cache_policy, send_file, CachePolicy};
use super::GitRequest;
use crate::config::Config;
use crate::error::AppError;
use crate::store::{sha256_hex, User};

const STDOUT_CHUNK: usize = 32 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    UploadPack,
    ReceivePack,
}

impl Service {
    /// Subcommand name passed to git
    pub fn name(self) -> &'static str {
        match self {
            Service::UploadPack => "upload-pack",
            Service::ReceivePack => "receive-pack",
        }
    }

    /// Parse the `service` query parameter of `info/refs`
    pub fn from_query(service: Option<&str>) -> Option<Self> {
        match service? {
            "git-upload-pack" => Some(Service::UploadPack),
            "git-receive-pack" => Some(Service::ReceivePack),
            _ => None,
        }
    }

    fn request_type(self) -> &'static str {
        match self {
            Service::UploadPack => "application/x-git-upload-pack-request",
            Service::ReceivePack => "application/x-git-receive-pack-request",
        }
    }

    fn result_type(self) -> &'static str {
        match self {
            Service::UploadPack => "application/x-git-upload-pack-result",
            Service::ReceivePack => "application/x-git-receive-pack-result",
        }
    }

    fn advertisement_type(self) -> &'static str {
        match self {
            Service::UploadPack => "application/x-git-upload-pack-advertisement",
            Service::ReceivePack => "application/x-git-receive-pack-advertisement",
        }
    }
}

/// Frame `payload` as a git pkt-line
pub fn pkt_line(payload: &str) -> String {
    format!("{:04x}{}", payload.len() + 4, payload)
}

/// Value of the `Git-Protocol` header, if present and well formed
pub fn git_protocol(headers: &HeaderMap) -> Option<String> {
    let value = headers.get("git-protocol")?.to_str().ok()?;
    let valid = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "=:._-".contains(c));
    valid.then(|| value.to_string())
}

/// Environment consumed by the repository hooks during a push
pub fn hook_env(actor: &User, access: &AccessContext, repo_dir: &Path) -> Vec<(&'static str, String)> {
    vec![
        ("SSH_ORIGINAL_COMMAND", "1".to_string()),
        ("FORGE_AUTH_USER_ID", actor.id.to_string()),
        ("FORGE_AUTH_USER_NAME", actor.name.clone()),
        ("FORGE_AUTH_USER_EMAIL", actor.email.clone()),
        ("FORGE_REPO_OWNER_NAME", access.owner.name.clone()),
        ("FORGE_REPO_OWNER_SALT_SHA256", sha256_hex(&access.owner.salt)),
        ("FORGE_REPO_ID", access.repo.id.to_string()),
        ("FORGE_REPO_NAME", access.repo.name.clone()),
        (
            "FORGE_REPO_CUSTOM_HOOKS_PATH",
            repo_dir.join("custom_hooks").display().to_string(),
        ),
    ]
}

fn no_cache_response(body: Body, content_type: &'static str) -> Response {
    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    apply_cache_policy(headers, CachePolicy::NoCache);
    response
}

/// Handle a stateless `git-upload-pack` / `git-receive-pack` POST.
pub async fn service_rpc(
    config: &Config,
    service: Service,
    git: &GitRequest,
    request: Request<Body>,
) -> Result<Response, AppError> {
    let pusher = match (service, &git.access.actor) {
        (Service::ReceivePack, None) => {
            warn!(
                "Refusing anonymous push to {}/{}",
                git.access.owner.name, git.access.repo.name
            );
            return Err(AppError::unauthenticated("Unauthorized"));
        }
        (Service::ReceivePack, Some(actor)) => Some(actor),
        (Service::UploadPack, _) => None,
    };

    let headers = request.headers();
    let content_type = headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok());
    if content_type != Some(service.request_type()) {
        return Ok(StatusCode::UNAUTHORIZED.into_response());
    }
    let gzip = headers
        .get(header::CONTENT_ENCODING)
        .is_some_and(|v| v.as_bytes() == b"gzip");
    let protocol = git_protocol(headers);

    let mut cmd = Command::new(&config.git_binary);
    cmd.arg(service.name())
        .arg("--stateless-rpc")
        .arg(&git.repo_dir)
        .current_dir(&git.repo_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(actor) = pusher {
        cmd.envs(hook_env(actor, &git.access, &git.repo_dir));
    }
    if let Some(protocol) = protocol {
        cmd.env("GIT_PROTOCOL", protocol);
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| AppError::upstream(format!("Failed to spawn git {}: {}", service.name(), e)))?;
    let (Some(mut stdin), Some(stdout), Some(mut stderr)) =
        (child.stdin.take(), child.stdout.take(), child.stderr.take())
    else {
        return Err(AppError::internal("git subprocess is missing a pipe"));
    };

    let mut body = request.into_body().into_data_stream();
    tokio::spawn(async move {
        let mut decoder = gzip.then(|| GzDecoder::new(Vec::new()));
        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!("Failed to read request body: {}", e);
                    return;
                }
            };
            let data = match decoder.as_mut() {
                Some(decoder) => {
                    if let Err(e) = decoder.write_all(&chunk) {
                        warn!("Failed to decompress request body: {}", e);
                        return;
                    }
                    Bytes::from(std::mem::take(decoder.get_mut()))
                }
                None => chunk,
            };
            if !data.is_empty() && stdin.write_all(&data).await.is_err() {
                // git exited early; its status decides the response
                return;
            }
        }
        if let Some(decoder) = decoder {
            match decoder.finish() {
                Ok(rest) if !rest.is_empty() => {
                    let _ = stdin.write_all(&rest).await;
                }
                Ok(_) => {}
                Err(e) => warn!("Truncated gzip request body: {}", e),
            }
        }
    });

    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stderr.read_to_end(&mut buf).await;
        String::from_utf8_lossy(&buf).into_owned()
    });

    let mut stdout = ReaderStream::with_capacity(stdout, STDOUT_CHUNK);
    let first = match stdout.next().await {
        Some(Ok(first)) => first,
        Some(Err(e)) => return Err(AppError::upstream(format!("Failed to read git {} output: {}", service.name(), e))),
        None => {
            let status = child.wait().await?;
            let stderr = stderr_task.await.unwrap_or_default();
            if !status.success() {
                return Err(AppError::upstream(format!(
                    "git {} exited with {}: {}",
                    service.name(),
                    status,
                    stderr.trim()
                )));
            }
            return Ok(no_cache_response(Body::empty(), service.result_type()));
        }
    };

    let name = service.name();
    let tail = stream::once(async move {
        match child.wait().await {
            Ok(status) if status.success() => None,
            Ok(status) => {
                let stderr = stderr_task.await.unwrap_or_default();
                error!("git {} exited with {} mid-stream: {}", name, status, stderr.trim());
                Some(Err(std::io::Error::other(format!("git {} exited with {}", name, status))))
            }
            Err(e) => {
                error!("Failed to wait for git {}: {}", name, e);
                Some(Err(e))
            }
        }
    })
    .filter_map(future::ready);

    let body = stream::once(future::ready(Ok(first))).chain(stdout).chain(tail);
    Ok(no_cache_response(Body::from_stream(body), service.result_type()))
}

/// Run a short-lived git command in `dir`, bounded by the configured timeout.
async fn run_git(config: &Config, dir: &Path, args: &[&str], protocol: Option<&str>) -> Result<Vec<u8>, AppError> {
    let mut cmd = Command::new(&config.git_binary);
    cmd.args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .kill_on_drop(true);
    if let Some(protocol) = protocol {
        cmd.env("GIT_PROTOCOL", protocol);
    }

    let output = tokio::time::timeout(config.git_timeout(), cmd.output())
        .await
        .map_err(|_| AppError::upstream(format!("git {} timed out after {:?}", args.join(" "), config.git_timeout())))??;

    if !output.status.success() {
        return Err(AppError::upstream(format!(
            "git {} exited with {}: {}",
            args.join(" "),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(output.stdout)
}

/// `GET info/refs`: smart advertisement when a known service is requested,
/// the dumb protocol refs file otherwise.
pub async fn info_refs(config: &Config, git: &GitRequest, service: Option<&str>, headers: &HeaderMap) -> Result<Response, AppError> {
    let Some(service) = Service::from_query(service) else {
        if let Err(e) = run_git(config, &git.repo_dir, &["update-server-info"], None).await {
            error!("update-server-info failed for {}: {}", git.repo_dir.display(), e);
        }
        return send_file(&git.repo_dir, &git.file, "text/plain; charset=utf-8", CachePolicy::NoCache).await;
    };

    let protocol = git_protocol(headers);
    let refs = run_git(
        config,
        &git.repo_dir,
        &[service.name(), "--stateless-rpc", "--advertise-refs", "."],
        protocol.as_deref(),
    )
    .await?;
    debug!("Advertised {} bytes of refs for {}", refs.len(), git.repo_dir.display());

    let mut body = pkt_line(&format!("# service=git-{}\n", service.name())).into_bytes();
    body.extend_from_slice(b"0000");
    body.extend_from_slice(&refs);

    Ok(no_cache_response(Body::from(body), service.advertisement_type()))
}
