//! Cursor based pagination over a repository's tags.
//!
//! Tags are always ordered newest first. A page is identified by the tag that
//! precedes it (`after`); an empty cursor means "start from the newest tag".

use std::path::Path;

use serde::Serialize;

use crate::git_ops::{GitError, GitModule};

/// A window over the full, newest-first tag list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TagsPage {
    pub tags: Vec<String>,
    /// The page contains the newest tag
    pub has_latest: bool,
    /// Older tags exist beyond this page
    pub has_next: bool,
    /// Cursor that leads back towards the newer tags, empty when that is the first page
    pub previous_after: String,
}

impl TagsPage {
    /// Cursor to request the page following this one, if any.
    pub fn next_after(&self) -> Option<&str> {
        if self.has_next {
            self.tags.last().map(String::as_str)
        } else {
            None
        }
    }
}

/// Window `all` (newest first) after the `after` cursor, returning at most
/// `limit` tags. A `limit` of 0 means no limit.
pub fn paginate_tags(all: &[String], after: &str, limit: usize) -> TagsPage {
    let total = all.len();

    if after.is_empty() && limit == 0 {
        return TagsPage {
            tags: all.to_vec(),
            has_latest: true,
            ..Default::default()
        };
    }

    if after.is_empty() {
        let end = limit.min(total);
        return TagsPage {
            tags: all[..end].to_vec(),
            has_latest: true,
            has_next: limit < total,
            previous_after: String::new(),
        };
    }

    let (remaining, found, previous_after) = match all.iter().position(|tag| tag == after) {
        Some(i) => {
            let previous_after = if limit > 0 && i >= limit {
                all[i - limit].clone()
            } else if limit > 0 && i > 0 {
                all[0].clone()
            } else {
                String::new()
            };
            (&all[i + 1..], true, previous_after)
        }
        None => (all, false, String::new()),
    };

    if limit == 0 || remaining.len() <= limit {
        return TagsPage {
            tags: remaining.to_vec(),
            has_latest: !found,
            has_next: false,
            previous_after,
        };
    }

    TagsPage {
        tags: remaining[..limit].to_vec(),
        has_latest: !found,
        has_next: true,
        previous_after,
    }
}

/// Read the tags of the repository at `repo_path` and paginate them.
pub fn list_tags_after(
    git: &dyn GitModule,
    repo_path: &Path,
    after: &str,
    limit: usize,
) -> Result<TagsPage, GitError> {
    let all = git.repo_tags(repo_path)?;
    Ok(paginate_tags(&all, after, limit))
}
