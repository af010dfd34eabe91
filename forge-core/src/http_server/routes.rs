//! Ordered table mapping git HTTP paths to handlers.

use std::path::{Path, PathBuf};

use axum::http::Method;
use regex::Regex;

use crate::error::AppError;
use crate::paths::clean_path;

pub const SUSPICIOUS_PATH: &str = "Request path contains suspicious characters";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitRoute {
    UploadPack,
    ReceivePack,
    InfoRefs,
    TextFile,
    InfoPacks,
    LooseObject,
    PackFile,
    PackIndex,
}

struct RouteEntry {
    pattern: Regex,
    method: Method,
    route: GitRoute,
}

/// Result of matching a request path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub route: GitRoute,
    /// Repository directory on disk (not yet checked for existence)
    pub repo_dir: PathBuf,
    /// Path of the requested file relative to the repository, original case
    pub file: String,
}

pub struct RouteTable {
    entries: Vec<RouteEntry>,
}

impl RouteTable {
    pub fn new() -> Result<Self, regex::Error> {
        let table = [
            (r"(.*?)/git-upload-pack$", Method::POST, GitRoute::UploadPack),
            (r"(.*?)/git-receive-pack$", Method::POST, GitRoute::ReceivePack),
            (r"(.*?)/info/refs$", Method::GET, GitRoute::InfoRefs),
            (r"(.*?)/head$", Method::GET, GitRoute::TextFile),
            (r"(.*?)/objects/info/alternates$", Method::GET, GitRoute::TextFile),
            (r"(.*?)/objects/info/http-alternates$", Method::GET, GitRoute::TextFile),
            (r"(.*?)/objects/info/packs$", Method::GET, GitRoute::InfoPacks),
            (r"(.*?)/objects/info/[^/]*$", Method::GET, GitRoute::TextFile),
            (r"(.*?)/objects/[0-9a-f]{2}/[0-9a-f]{38}$", Method::GET, GitRoute::LooseObject),
            (r"(.*?)/objects/pack/pack-[0-9a-f]{40}\.pack$", Method::GET, GitRoute::PackFile),
            (r"(.*?)/objects/pack/pack-[0-9a-f]{40}\.idx$", Method::GET, GitRoute::PackIndex),
        ];

        let entries = table
            .into_iter()
            .map(|(pattern, method, route)| {
                Ok(RouteEntry {
                    pattern: Regex::new(pattern)?,
                    method,
                    route,
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;

        Ok(RouteTable { entries })
    }

    /// Find the handler for `path`. The first matching pattern wins.
    pub fn dispatch(
        &self,
        method: &Method,
        path: &str,
        repos_root: &Path,
        http_git_disabled: bool,
    ) -> Result<Dispatch, AppError> {
        let lower = path.to_ascii_lowercase();

        for entry in &self.entries {
            let Some(captures) = entry.pattern.captures(&lower) else {
                continue;
            };

            if http_git_disabled {
                return Err(AppError::forbidden(
                    "Interacting with repositories by HTTP protocol is disabled",
                ));
            }
            if entry.method != *method {
                return Err(AppError::not_found("Not found"));
            }

            let prefix = captures.get(1).map(|m| m.as_str()).unwrap_or("");
            let cleaned = clean_path(&format!("/{}", prefix));
            let cleaned = cleaned.trim_matches('/');
            if prefix != format!("/{}", cleaned) {
                return Err(AppError::bad_request(SUSPICIOUS_PATH));
            }

            let file = path.get(prefix.len() + 1..).unwrap_or("").to_string();
            let dir = if cleaned.ends_with(".git") {
                cleaned.to_string()
            } else {
                format!("{}.git", cleaned)
            };

            return Ok(Dispatch {
                route: entry.route,
                repo_dir: repos_root.join(dir),
                file,
            });
        }

        Err(AppError::not_found("Not found"))
    }
}
