//! Pull request metadata: merge base, commit range and changed file count
//! between a base branch and a head branch, possibly living in different
//! repositories.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::{debug, error};

use crate::git_ops::{CommitInfo, GitError, GitModule};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PullRequestMeta {
    pub merge_base: String,
    /// Commits on the head branch since the merge base, newest first
    pub commits: Vec<CommitInfo>,
    pub num_files: usize,
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid compare expression: {0}")]
pub struct InvalidCompareSpec(String);

/// `<base>...[<head-owner>:]<head>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompareSpec {
    pub base_branch: String,
    pub head_owner: Option<String>,
    pub head_branch: String,
}

impl CompareSpec {
    pub fn parse(expr: &str) -> Result<Self, InvalidCompareSpec> {
        let invalid = || InvalidCompareSpec(expr.to_string());

        let (base, head) = expr.split_once("...").ok_or_else(invalid)?;
        if base.is_empty() || head.contains("...") {
            return Err(invalid());
        }

        let (head_owner, head_branch) = match head.split_once(':') {
            Some((owner, branch)) if !owner.is_empty() => (Some(owner.to_string()), branch),
            Some(_) => return Err(invalid()),
            None => (None, head),
        };
        if head_branch.is_empty() {
            return Err(invalid());
        }

        Ok(CompareSpec {
            base_branch: base.to_string(),
            head_owner,
            head_branch: head_branch.to_string(),
        })
    }
}

/// One lock per head repository. Cross repository comparisons add and remove
/// a remote in the head repository's configuration, which must not happen
/// concurrently for the same repository.
#[derive(Debug, Default)]
pub struct RemoteLocks {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl RemoteLocks {
    fn lock_for(&self, repo_path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(repo_path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the entry for `repo_path` unless another comparison still holds
    /// or waits on it.
    fn release(&self, repo_path: &Path, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // The map and `lock` itself
        if Arc::strong_count(&lock) <= 2 {
            locks.remove(repo_path);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Removes the temporary remote when dropped.
struct RemoteCleanup<'a> {
    git: &'a dyn GitModule,
    repo_path: &'a Path,
    name: String,
}

impl Drop for RemoteCleanup<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.git.remote_remove(self.repo_path, &self.name) {
            error!(
                "Failed to remove temporary remote {} from {}: {}",
                self.name,
                self.repo_path.display(),
                e
            );
        }
    }
}

fn temp_remote_name() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
        .to_string()
}

/// Computes pull request metadata through a [`GitModule`].
pub struct Comparer {
    git: Arc<dyn GitModule>,
    locks: RemoteLocks,
}

impl Comparer {
    pub fn new(git: Arc<dyn GitModule>) -> Self {
        Comparer {
            git,
            locks: RemoteLocks::default(),
        }
    }

    /// Metadata for merging `head_branch` of `head_path` into `base_branch`
    /// of `base_path`. Never cached.
    pub fn pull_request_meta(
        &self,
        head_path: &Path,
        base_path: &Path,
        head_branch: &str,
        base_branch: &str,
    ) -> Result<PullRequestMeta, GitError> {
        if head_path == base_path {
            return self.meta_between(head_path, base_branch, head_branch);
        }

        let lock = self.locks.lock_for(head_path);
        let result = {
            let _held = lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.meta_across(head_path, base_path, head_branch, base_branch)
        };
        self.locks.release(head_path, lock);
        result
    }

    /// Caller holds the remote lock of `head_path`.
    fn meta_across(
        &self,
        head_path: &Path,
        base_path: &Path,
        head_branch: &str,
        base_branch: &str,
    ) -> Result<PullRequestMeta, GitError> {
        let url = base_path.to_str().ok_or_else(|| {
            GitError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("repository path {} is not valid UTF-8", base_path.display()),
            ))
        })?;

        let cleanup = RemoteCleanup {
            git: self.git.as_ref(),
            repo_path: head_path,
            name: temp_remote_name(),
        };
        debug!(
            "Adding temporary remote {} to {} for {}",
            cleanup.name,
            head_path.display(),
            url
        );
        self.git.remote_add(head_path, &cleanup.name, url, true)?;

        let base_ref = format!("remotes/{}/{}", cleanup.name, base_branch);
        self.meta_between(head_path, &base_ref, head_branch)
    }

    fn meta_between(&self, repo_path: &Path, base_ref: &str, head_branch: &str) -> Result<PullRequestMeta, GitError> {
        let merge_base = self.git.merge_base(repo_path, base_ref, head_branch)?;
        let commits = self
            .git
            .log(repo_path, &format!("{}...{}", merge_base, head_branch))?;
        let files = self.git.diff_name_only(repo_path, base_ref, head_branch, true)?;

        Ok(PullRequestMeta {
            merge_base,
            commits,
            num_files: files.len(),
        })
    }
}
