//! Git operations using the git2 crate instead of subprocess calls.
//! The comparison engine talks to repositories through [`GitModule`] so the
//! analysis can be driven by a stub in tests.

use chrono::{DateTime, FixedOffset};
use git2::{
    Commit, DiffFindOptions, DiffFormat, DiffOptions, ErrorCode, Oid, Repository,
    RepositoryInitOptions, Sort,
};
use serde::Serialize;
use std::path::Path;
use std::time::{Duration, Instant};

use crate::diff::{decode, detect_encoding, parse_diff, Diff, DiffLimits};

/// Error type for git operations
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid reference: {0}")]
    InvalidRef(String),
    #[error("No merge base found between {base} and {head}")]
    NoMergeBase { base: String, head: String },
    #[error("Git operation timed out after {0:?}")]
    Timeout(Duration),
}

impl GitError {
    pub fn is_no_merge_base(&self) -> bool {
        matches!(self, GitError::NoMergeBase { .. })
    }
}

/// Commit information
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitInfo {
    pub hash: String,
    pub short_hash: String,
    pub author: String,
    pub email: String,
    pub date: String,
    pub message: String,
}

/// Repository primitives the comparison engine depends on.
pub trait GitModule: Send + Sync {
    /// Best common ancestor of `base` and `head`.
    fn merge_base(&self, repo_path: &Path, base: &str, head: &str) -> Result<String, GitError>;

    /// Commits selected by a revision expression: `rev`, `a..b` or `a...b`.
    /// Newest first.
    fn log(&self, repo_path: &Path, rev: &str) -> Result<Vec<CommitInfo>, GitError>;

    /// Paths touched between `base` and `head`. With `needs_merge_base` the
    /// comparison starts at their merge base instead of `base` itself.
    fn diff_name_only(
        &self,
        repo_path: &Path,
        base: &str,
        head: &str,
        needs_merge_base: bool,
    ) -> Result<Vec<String>, GitError>;

    fn remote_add(&self, repo_path: &Path, name: &str, url: &str, fetch: bool) -> Result<(), GitError>;

    fn remote_remove(&self, repo_path: &Path, name: &str) -> Result<(), GitError>;

    /// Tag names, newest first.
    fn repo_tags(&self, repo_path: &Path) -> Result<Vec<String>, GitError>;

    /// Parsed diff between `base` and `head`. An empty `base` compares
    /// `head` against its first parent.
    fn diff(&self, repo_path: &Path, base: &str, head: &str, limits: &DiffLimits) -> Result<Diff, GitError>;
}

/// [`GitModule`] backed by libgit2
#[derive(Debug, Clone, Copy, Default)]
pub struct Git2Module;

fn open_repo(repo_path: &Path) -> Result<Repository, GitError> {
    Ok(Repository::open_bare(repo_path).or_else(|_| Repository::open(repo_path))?)
}

fn resolve_commit<'r>(repo: &'r Repository, rev: &str) -> Result<Commit<'r>, GitError> {
    let obj = repo.revparse_single(rev).map_err(|e| match e.code() {
        ErrorCode::NotFound | ErrorCode::InvalidSpec | ErrorCode::Ambiguous => {
            GitError::InvalidRef(rev.to_string())
        }
        _ => GitError::Git(e),
    })?;
    Ok(obj.peel_to_commit()?)
}

fn merge_base_oid(repo: &Repository, base: &Commit, head: &Commit, names: (&str, &str)) -> Result<Oid, GitError> {
    repo.merge_base(base.id(), head.id()).map_err(|e| {
        if e.code() == ErrorCode::NotFound {
            GitError::NoMergeBase {
                base: names.0.to_string(),
                head: names.1.to_string(),
            }
        } else {
            GitError::Git(e)
        }
    })
}

impl GitModule for Git2Module {
    fn merge_base(&self, repo_path: &Path, base: &str, head: &str) -> Result<String, GitError> {
        let repo = open_repo(repo_path)?;
        let base_commit = resolve_commit(&repo, base)?;
        let head_commit = resolve_commit(&repo, head)?;
        let oid = merge_base_oid(&repo, &base_commit, &head_commit, (base, head))?;
        Ok(oid.to_string())
    }

    fn log(&self, repo_path: &Path, rev: &str) -> Result<Vec<CommitInfo>, GitError> {
        let repo = open_repo(repo_path)?;
        let mut revwalk = repo.revwalk()?;

        if let Some((left, right)) = rev.split_once("...") {
            let left = resolve_commit(&repo, left)?.id();
            let right = resolve_commit(&repo, right)?.id();
            revwalk.push(left)?;
            revwalk.push(right)?;
            match repo.merge_bases(left, right) {
                Ok(bases) => {
                    for base in bases.iter() {
                        revwalk.hide(*base)?;
                    }
                }
                Err(e) if e.code() == ErrorCode::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        } else if let Some((left, right)) = rev.split_once("..") {
            revwalk.push(resolve_commit(&repo, right)?.id())?;
            revwalk.hide(resolve_commit(&repo, left)?.id())?;
        } else {
            revwalk.push(resolve_commit(&repo, rev)?.id())?;
        }

        revwalk.set_sorting(Sort::TIME)?;

        let mut commits = Vec::new();
        for oid in revwalk {
            let commit = repo.find_commit(oid?)?;
            commits.push(commit_to_info(&commit));
        }
        Ok(commits)
    }

    fn diff_name_only(
        &self,
        repo_path: &Path,
        base: &str,
        head: &str,
        needs_merge_base: bool,
    ) -> Result<Vec<String>, GitError> {
        let repo = open_repo(repo_path)?;
        let base_commit = resolve_commit(&repo, base)?;
        let head_commit = resolve_commit(&repo, head)?;

        let from = if needs_merge_base {
            let oid = merge_base_oid(&repo, &base_commit, &head_commit, (base, head))?;
            repo.find_commit(oid)?
        } else {
            base_commit
        };

        let diff = repo.diff_tree_to_tree(Some(&from.tree()?), Some(&head_commit.tree()?), None)?;
        let names = diff
            .deltas()
            .filter_map(|delta| {
                delta
                    .new_file()
                    .path()
                    .or_else(|| delta.old_file().path())
                    .map(|p| p.to_string_lossy().to_string())
            })
            .collect();
        Ok(names)
    }

    fn remote_add(&self, repo_path: &Path, name: &str, url: &str, fetch: bool) -> Result<(), GitError> {
        let repo = open_repo(repo_path)?;
        let mut remote = repo.remote(name, url)?;
        if fetch {
            remote.fetch(&[] as &[&str], None, None)?;
        }
        Ok(())
    }

    fn remote_remove(&self, repo_path: &Path, name: &str) -> Result<(), GitError> {
        let repo = open_repo(repo_path)?;
        repo.remote_delete(name)?;
        Ok(())
    }

    fn repo_tags(&self, repo_path: &Path) -> Result<Vec<String>, GitError> {
        let repo = open_repo(repo_path)?;
        let names = repo.tag_names(None)?;

        let mut tags: Vec<(i64, String)> = names
            .iter()
            .flatten()
            .map(|name| (tag_time(&repo, name), name.to_string()))
            .collect();
        tags.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));

        Ok(tags.into_iter().map(|(_, name)| name).collect())
    }

    fn diff(&self, repo_path: &Path, base: &str, head: &str, limits: &DiffLimits) -> Result<Diff, GitError> {
        let repo = open_repo(repo_path)?;
        let head_commit = resolve_commit(&repo, head)?;
        let new_tree = head_commit.tree()?;
        let old_tree = if base.is_empty() {
            match head_commit.parent(0) {
                Ok(parent) => Some(parent.tree()?),
                Err(_) => None,
            }
        } else {
            Some(resolve_commit(&repo, base)?.tree()?)
        };

        let mut opts = DiffOptions::new();
        opts.context_lines(3);
        let mut diff = repo.diff_tree_to_tree(old_tree.as_ref(), Some(&new_tree), Some(&mut opts))?;
        diff.find_similar(Some(DiffFindOptions::new().renames(true)))?;

        let deadline = Instant::now() + limits.timeout;
        let mut files: Vec<RawFilePatch> = Vec::new();
        let mut timed_out = false;
        let printed = diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
            if Instant::now() > deadline {
                timed_out = true;
                return false;
            }
            match line.origin() {
                'F' => files.push(RawFilePatch {
                    parts: vec![(false, line.content().to_vec())],
                }),
                'H' | 'B' => {
                    if let Some(file) = files.last_mut() {
                        file.parts.push((false, line.content().to_vec()));
                    }
                }
                origin @ ('+' | '-' | ' ') => {
                    if let Some(file) = files.last_mut() {
                        let mut bytes = Vec::with_capacity(line.content().len() + 1);
                        bytes.push(origin as u8);
                        bytes.extend_from_slice(line.content());
                        file.parts.push((true, bytes));
                    }
                }
                _ => {}
            }
            true
        });

        if timed_out {
            return Err(GitError::Timeout(limits.timeout));
        }
        printed?;

        let mut patch = String::new();
        for file in &files {
            file.render(&mut patch);
        }
        Ok(parse_diff(&patch, limits))
    }
}

/// Patch bytes of one file in output order. Hunk lines are flagged so they
/// can be decoded with the charset detected for that file.
struct RawFilePatch {
    parts: Vec<(bool, Vec<u8>)>,
}

impl RawFilePatch {
    fn render(&self, out: &mut String) {
        let content: Vec<u8> = self
            .parts
            .iter()
            .filter(|(is_content, _)| *is_content)
            .flat_map(|(_, bytes)| bytes.iter().copied())
            .collect();
        let encoding = detect_encoding(&content);
        for (is_content, bytes) in &self.parts {
            if *is_content {
                out.push_str(&decode(bytes, encoding));
            } else {
                out.push_str(&String::from_utf8_lossy(bytes));
            }
        }
    }
}

/// Creation time of a tag: the tagger date for annotated tags, the commit
/// date otherwise.
fn tag_time(repo: &Repository, name: &str) -> i64 {
    let Ok(reference) = repo.find_reference(&format!("refs/tags/{}", name)) else {
        return 0;
    };
    if let Ok(tag) = reference.peel_to_tag() {
        if let Some(tagger) = tag.tagger() {
            return tagger.when().seconds();
        }
    }
    reference
        .peel_to_commit()
        .map(|c| c.time().seconds())
        .unwrap_or(0)
}

/// Initialize a bare git repository with a default branch
pub fn init_bare_repo(path: &Path, default_branch: &str) -> Result<Repository, GitError> {
    let mut opts = RepositoryInitOptions::new();
    opts.bare(true);
    opts.initial_head(default_branch);

    let repo = Repository::init_opts(path, &opts)?;
    Ok(repo)
}

/// Convert a git2 Commit to CommitInfo
fn commit_to_info(commit: &Commit) -> CommitInfo {
    let hash = commit.id().to_string();
    let short_hash = hash[..7.min(hash.len())].to_string();
    let author = commit.author();

    let time = commit.time();
    let date = FixedOffset::east_opt(time.offset_minutes() * 60)
        .and_then(|offset| {
            DateTime::from_timestamp(time.seconds(), 0).map(|utc| utc.with_timezone(&offset))
        })
        .map(|date| date.to_rfc3339())
        .unwrap_or_default();

    CommitInfo {
        hash,
        short_hash,
        author: author.name().unwrap_or("Unknown").to_string(),
        email: author.email().unwrap_or("").to_string(),
        date,
        message: commit.summary().unwrap_or("").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::{Signature, Time};
    use tempfile::TempDir;

    /// Commit `files` on top of `parent` and point `branch` at the result.
    fn commit(repo: &Repository, branch: &str, parent: Option<Oid>, files: &[(&str, &str)], when: i64) -> Oid {
        let sig = Signature::new("Tester", "tester@example.com", &Time::new(when, 0)).unwrap();
        let parent = parent.map(|oid| repo.find_commit(oid).unwrap());
        let base_tree = parent.as_ref().map(|c| c.tree().unwrap());
        let mut builder = repo.treebuilder(base_tree.as_ref()).unwrap();
        for (name, content) in files {
            let blob = repo.blob(content.as_bytes()).unwrap();
            builder.insert(name, blob, 0o100644).unwrap();
        }
        let tree = repo.find_tree(builder.write().unwrap()).unwrap();
        let parents: Vec<&Commit> = parent.iter().collect();
        repo.commit(
            Some(format!("refs/heads/{}", branch).as_str()),
            &sig,
            &sig,
            &format!("update {}", files[0].0),
            &tree,
            &parents,
        )
        .unwrap()
    }

    /// master: c1 - c2, feature: c1 - f1 - f2
    fn forked_repo() -> (TempDir, Oid) {
        let temp_dir = TempDir::new().unwrap();
        let repo = init_bare_repo(&temp_dir.path().join("test.git"), "master").unwrap();
        let c1 = commit(&repo, "master", None, &[("README.md", "# demo\n")], 1_000);
        commit(&repo, "master", Some(c1), &[("base.txt", "base\n")], 2_000);
        let f1 = commit(&repo, "feature", Some(c1), &[("a.txt", "a\n")], 3_000);
        commit(&repo, "feature", Some(f1), &[("b.txt", "b\n")], 4_000);
        (temp_dir, c1)
    }

    #[test]
    fn test_init_bare_repo() {
        let temp_dir = TempDir::new().unwrap();
        let repo_path = temp_dir.path().join("test.git");

        let repo = init_bare_repo(&repo_path, "main").unwrap();
        assert!(repo.is_bare());
        assert!(repo_path.exists());
    }

    #[test]
    fn test_merge_base_and_three_dot_log() {
        let (dir, c1) = forked_repo();
        let path = dir.path().join("test.git");
        let git = Git2Module;

        assert_eq!(git.merge_base(&path, "master", "feature").unwrap(), c1.to_string());

        let commits = git.log(&path, &format!("{}...feature", c1)).unwrap();
        let messages: Vec<_> = commits.iter().map(|c| c.message.as_str()).collect();
        assert_eq!(messages, vec!["update b.txt", "update a.txt"]);
        assert_eq!(commits[0].author, "Tester");
        assert_eq!(commits[0].short_hash.len(), 7);
        assert!(commits[0].date.starts_with("1970-01-01T01:06:40"));
    }

    #[test]
    fn test_two_dot_log() {
        let (dir, _) = forked_repo();
        let path = dir.path().join("test.git");
        let commits = Git2Module.log(&path, "feature..master").unwrap();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].message, "update base.txt");
    }

    #[test]
    fn test_diff_name_only_from_merge_base() {
        let (dir, _) = forked_repo();
        let path = dir.path().join("test.git");
        let git = Git2Module;

        let mut names = git.diff_name_only(&path, "master", "feature", true).unwrap();
        names.sort();
        assert_eq!(names, vec!["a.txt", "b.txt"]);

        let mut names = git.diff_name_only(&path, "master", "feature", false).unwrap();
        names.sort();
        assert_eq!(names, vec!["a.txt", "b.txt", "base.txt"]);
    }

    #[test]
    fn test_unrelated_histories_have_no_merge_base() {
        let (dir, _) = forked_repo();
        let path = dir.path().join("test.git");
        let repo = Repository::open_bare(&path).unwrap();
        commit(&repo, "orphan", None, &[("other.txt", "x\n")], 5_000);

        let err = Git2Module.merge_base(&path, "master", "orphan").unwrap_err();
        assert!(err.is_no_merge_base());

        let err = Git2Module.diff_name_only(&path, "master", "orphan", true).unwrap_err();
        assert!(err.is_no_merge_base());
    }

    #[test]
    fn test_unknown_ref_is_invalid() {
        let (dir, _) = forked_repo();
        let path = dir.path().join("test.git");
        let err = Git2Module.merge_base(&path, "master", "nope").unwrap_err();
        assert!(matches!(err, GitError::InvalidRef(r) if r == "nope"));
    }

    #[test]
    fn test_repo_tags_newest_first() {
        let (dir, c1) = forked_repo();
        let path = dir.path().join("test.git");
        let repo = Repository::open_bare(&path).unwrap();

        let master = repo.revparse_single("master").unwrap();
        let feature = repo.revparse_single("feature").unwrap();
        let first = repo.find_object(c1, None).unwrap();
        repo.tag_lightweight("v1.0.0", &first, false).unwrap();
        repo.tag_lightweight("v1.1.0", &master, false).unwrap();
        let tagger = Signature::new("Tester", "tester@example.com", &Time::new(9_000, 0)).unwrap();
        repo.tag("v2.0.0", &first, &tagger, "annotated", false).unwrap();
        repo.tag_lightweight("v1.2.0", &feature, false).unwrap();
        repo.tag_lightweight("v1.2.1", &feature, false).unwrap();

        let tags = Git2Module.repo_tags(&path).unwrap();
        assert_eq!(tags, vec!["v2.0.0", "v1.2.1", "v1.2.0", "v1.1.0", "v1.0.0"]);
    }

    #[test]
    fn test_diff_between_branches() {
        let (dir, _) = forked_repo();
        let path = dir.path().join("test.git");
        let diff = Git2Module
            .diff(&path, "master", "feature", &DiffLimits::default())
            .unwrap();

        let mut names: Vec<_> = diff.files.iter().map(|f| f.name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["a.txt", "b.txt", "base.txt"]);
        assert_eq!(diff.total_additions, 2);
        assert_eq!(diff.total_deletions, 1);
    }

    #[test]
    fn test_diff_against_parent() {
        let (dir, _) = forked_repo();
        let path = dir.path().join("test.git");
        let diff = Git2Module.diff(&path, "", "feature", &DiffLimits::default()).unwrap();
        assert_eq!(diff.num_files(), 1);
        assert_eq!(diff.files[0].name, "b.txt");
        assert_eq!(diff.files[0].sections[0].lines[1].content, "+b");
    }

    #[test]
    fn test_diff_decodes_non_utf8_files() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("latin1.git");
        let repo = init_bare_repo(&path, "master").unwrap();

        let sig = Signature::new("Tester", "tester@example.com", &Time::new(1_000, 0)).unwrap();
        let blob = repo
            .blob(b"Le caf\xe9 est tr\xe8s bon, la cr\xe8me br\xfbl\xe9e aussi.\n")
            .unwrap();
        let mut builder = repo.treebuilder(None).unwrap();
        builder.insert("menu.txt", blob, 0o100644).unwrap();
        let tree = repo.find_tree(builder.write().unwrap()).unwrap();
        repo.commit(Some("refs/heads/master"), &sig, &sig, "menu", &tree, &[])
            .unwrap();

        let diff = Git2Module.diff(&path, "", "master", &DiffLimits::default()).unwrap();
        let lines = &diff.files[0].sections[0].lines;
        assert_eq!(lines[1].content, "+Le café est très bon, la crème brûlée aussi.");
        assert!(!lines[1].content.contains('\u{FFFD}'));
    }

    #[test]
    fn test_remote_add_fetch_and_remove() {
        let (source, _) = forked_repo();
        let source_path = source.path().join("test.git");

        let target = TempDir::new().unwrap();
        let target_path = target.path().join("fork.git");
        init_bare_repo(&target_path, "master").unwrap();

        let git = Git2Module;
        let url = format!("file://{}", source_path.display());
        git.remote_add(&target_path, "upstream", &url, true).unwrap();

        let repo = Repository::open_bare(&target_path).unwrap();
        assert!(repo.revparse_single("remotes/upstream/master").is_ok());
        assert!(repo.revparse_single("remotes/upstream/feature").is_ok());

        git.remote_remove(&target_path, "upstream").unwrap();
        let repo = Repository::open_bare(&target_path).unwrap();
        assert!(repo.find_remote("upstream").is_err());
    }
}
