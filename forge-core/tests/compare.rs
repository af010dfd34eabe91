//! Integration tests for pull request comparison, tag pagination and diffs
//! against real repositories.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use git2::{build::RepoBuilder, Commit, Oid, Repository, Signature, Time};
use tempfile::TempDir;

use forge_core::compare::Comparer;
use forge_core::diff::{DiffFileKind, DiffLimits, HighlightOptions};
use forge_core::git_ops::{init_bare_repo, Git2Module, GitModule};
use forge_core::tags::list_tags_after;

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

struct Fork {
    _dir: TempDir,
    base: PathBuf,
    head: PathBuf,
    root: Oid,
    feature: [Oid; 2],
}

/// alice/demo has master c1 - c2; bob/demo is a fork taken at c1 with
/// feature c1 - f1 - f2.
fn fork() -> Fork {
    fork_under("alice")
}

fn fork_under(base_owner_dir: &str) -> Fork {
    let dir = TempDir::new().unwrap();
    let base = dir.path().join(base_owner_dir).join("demo.git");
    let head = dir.path().join("bob").join("demo.git");

    let base_repo = init_bare_repo(&base, "master").unwrap();
    let c1 = commit(&base_repo, "master", None, &[("README.md", "# demo\n")], 1_000);

    let head_repo = RepoBuilder::new()
        .bare(true)
        .clone(base.to_str().unwrap(), &head)
        .unwrap();
    let f1 = commit(&head_repo, "feature", Some(c1), &[("a.txt", "a\n")], 3_000);
    let f2 = commit(&head_repo, "feature", Some(f1), &[("README.md", "# demo fork\n")], 4_000);

    commit(&base_repo, "master", Some(c1), &[("base.txt", "base\n")], 2_000);

    Fork {
        _dir: dir,
        base,
        head,
        root: c1,
        feature: [f1, f2],
    }
}

fn remote_names(path: &Path) -> Vec<String> {
    let repo = Repository::open_bare(path).unwrap();
    let remotes = repo.remotes().unwrap();
    remotes.iter().flatten().map(str::to_string).collect()
}

#[test]
fn test_same_repository_comparison() {
    let fork = fork();
    let comparer = Comparer::new(Arc::new(Git2Module));

    let meta = comparer
        .pull_request_meta(&fork.head, &fork.head, "feature", "master")
        .unwrap();
    assert_eq!(meta.merge_base, fork.root.to_string());
    let hashes: Vec<_> = meta.commits.iter().map(|c| c.hash.clone()).collect();
    assert_eq!(hashes, vec![fork.feature[1].to_string(), fork.feature[0].to_string()]);
    assert_eq!(meta.num_files, 2);
}

#[test]
fn test_cross_repository_comparison_cleans_up_remote() {
    let fork = fork();
    let before = remote_names(&fork.head);
    let comparer = Comparer::new(Arc::new(Git2Module));

    let meta = comparer
        .pull_request_meta(&fork.head, &fork.base, "feature", "master")
        .unwrap();
    assert_eq!(meta.merge_base, fork.root.to_string());
    assert_eq!(meta.commits.len(), 2);
    assert_eq!(meta.commits[0].message, "update README.md");
    // base.txt only exists on the base side and is not part of the change
    assert_eq!(meta.num_files, 2);

    assert_eq!(remote_names(&fork.head), before);
}

#[test]
fn test_cross_repository_comparison_with_unusual_base_path() {
    let fork = fork_under("alice smith%20");
    let comparer = Comparer::new(Arc::new(Git2Module));

    let meta = comparer
        .pull_request_meta(&fork.head, &fork.base, "feature", "master")
        .unwrap();
    assert_eq!(meta.merge_base, fork.root.to_string());
    assert_eq!(meta.commits.len(), 2);
}

#[test]
fn test_unrelated_histories_have_no_merge_base() {
    let fork = fork();
    let other_dir = TempDir::new().unwrap();
    let other = other_dir.path().join("carol").join("demo.git");
    let repo = init_bare_repo(&other, "master").unwrap();
    commit(&repo, "master", None, &[("other.txt", "other\n")], 5_000);

    let before = remote_names(&fork.head);
    let comparer = Comparer::new(Arc::new(Git2Module));
    let err = comparer
        .pull_request_meta(&fork.head, &other, "feature", "master")
        .unwrap_err();
    assert!(err.is_no_merge_base(), "{}", err);
    assert_eq!(remote_names(&fork.head), before);
}

#[test]
fn test_tag_pages_from_repository() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tags.git");
    let repo = init_bare_repo(&path, "master").unwrap();

    let mut parent = None;
    for (i, name) in ["v1", "v2", "v3"].iter().enumerate() {
        let oid = commit(&repo, "master", parent, &[("VERSION", name)], 1_000 * (i as i64 + 1));
        let object = repo.find_object(oid, None).unwrap();
        repo.tag_lightweight(name, &object, false).unwrap();
        parent = Some(oid);
    }

    let first = list_tags_after(&Git2Module, &path, "", 2).unwrap();
    assert_eq!(first.tags, vec!["v3", "v2"]);
    assert!(first.has_latest);
    assert!(first.has_next);

    let second = list_tags_after(&Git2Module, &path, first.next_after().unwrap(), 2).unwrap();
    assert_eq!(second.tags, vec!["v1"]);
    assert!(!second.has_latest);
    assert!(!second.has_next);
    assert_eq!(second.previous_after, "v3");
}

#[test]
fn test_highlighted_repository_diff() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("diff.git");
    let repo = init_bare_repo(&path, "master").unwrap();
    let c1 = commit(&repo, "master", None, &[("main.rs", "fn main() {\n    println!(\"hello\");\n}\n")], 1_000);
    let c2 = commit(
        &repo,
        "master",
        Some(c1),
        &[("main.rs", "fn main() {\n    println!(\"hello there\");\n}\n")],
        2_000,
    );

    let diff = Git2Module
        .diff(&path, &c1.to_string(), &c2.to_string(), &DiffLimits::default())
        .unwrap();
    assert_eq!(diff.num_files(), 1);
    assert_eq!(diff.total_additions, 1);
    assert_eq!(diff.total_deletions, 1);

    let file = &diff.files[0];
    assert_eq!(file.kind, DiffFileKind::Changed);
    let section = &file.sections[0];
    let added = section
        .lines
        .iter()
        .find(|l| l.content.starts_with('+'))
        .unwrap();
    let html = section.computed_inline_diff_for(added, &HighlightOptions::default());
    assert_eq!(
        html,
        "+     println!(&#34;hello<span class=\"added-code\"> there</span>&#34;);"
    );
}
