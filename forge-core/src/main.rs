use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

use forge_core::compare::{CompareSpec, Comparer};
use forge_core::config::Config;
use forge_core::database::Database;
use forge_core::diff::{DiffLineKind, DiffSection, HighlightOptions};
use forge_core::git_ops::{self, Git2Module, GitModule};
use forge_core::http_server::run_http_server;
use forge_core::paths::{is_safe_path_component, repo_path};
use forge_core::store::{AccessMode, ForgeStore, Repository, User};
use forge_core::tags::list_tags_after;

#[derive(Parser)]
#[command(name = "forge-core")]
#[command(about = "Git smart HTTP gateway and repository comparison tools")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Path to the repositories directory
    #[arg(short, long, default_value = "repos")]
    repos_path: PathBuf,

    /// Path to the SQLite database
    #[arg(short, long, default_value = "forge.db")]
    database: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new user
    CreateUser {
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        /// Mark the account as using two-factor authentication
        #[arg(long)]
        two_factor: bool,
    },
    /// Create a new repository and initialize it on disk
    CreateRepo {
        /// Owner user name
        owner: String,
        /// Name of the repository
        name: String,
        #[arg(long)]
        private: bool,
        #[arg(long)]
        mirror: bool,
    },
    /// Create an access token; the secret is printed once
    CreateToken {
        /// Owner of the token
        user: String,
        /// Name of the token
        name: String,
    },
    /// Grant a user access to a repository
    Grant {
        user: String,
        /// Repository as owner/name
        repo: String,
        /// none, read, write, admin or owner
        mode: AccessMode,
    },
    /// Start the HTTP server
    Serve,
    /// Pull request metadata for `<base>...[<owner>:]<head>`
    Compare {
        /// Base repository as owner/name
        repo: String,
        /// Compare expression, e.g. master...bob:feature
        spec: String,
    },
    /// List tags, newest first
    Tags {
        /// Repository as owner/name
        repo: String,
        /// Return tags older than this one
        #[arg(long, default_value = "")]
        after: String,
        /// Page size, 0 for no limit
        #[arg(long, default_value_t = 0)]
        limit: usize,
    },
    /// Diff between two revisions
    Diff {
        /// Repository as owner/name
        repo: String,
        /// Base revision, empty for the head's first parent
        base: String,
        head: String,
        /// Emit inline-highlighted HTML for every line
        #[arg(long)]
        highlight: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        Config::load(&cli.config)?
    } else {
        warn!("Config file not found at {:?}, using defaults", cli.config);
        Config::default_config()
    };

    if !cli.repos_path.exists() {
        std::fs::create_dir_all(&cli.repos_path)?;
    }

    let db_url = format!("sqlite:{}?mode=rwc", cli.database.display());
    let db = Database::connect(&db_url).await?;
    db.init().await?;

    match cli.command {
        Commands::CreateUser {
            name,
            email,
            password,
            two_factor,
        } => {
            if !is_safe_path_component(&name) {
                return Err(format!("Invalid user name '{}'", name).into());
            }
            if db.get_user_by_name(&name).await?.is_some() {
                return Err(format!("User '{}' already exists", name).into());
            }
            let user = db.create_user(&name, &email, &password, two_factor).await?;
            info!("Created user '{}'", user.name);
            print_json(&user)?;
        }
        Commands::CreateRepo {
            owner,
            name,
            private,
            mirror,
        } => {
            let repo = create_repository(&db, &cli.repos_path, &owner, &name, private, mirror).await?;
            print_json(&repo)?;
        }
        Commands::CreateToken { user, name } => {
            let user = find_user(&db, &user).await?;
            let (token, secret) = db.create_access_token(user.id, &name).await?;
            info!("Created access token '{}' for '{}'", token.name, user.name);
            print_json(&serde_json::json!({ "token": token, "secret": secret }))?;
        }
        Commands::Grant { user, repo, mode } => {
            let user = find_user(&db, &user).await?;
            let (_, repo) = find_repository(&db, &repo).await?;
            db.grant_access(user.id, repo.id, mode).await?;
            info!("Granted {} on '{}' to '{}'", mode, repo.name, user.name);
        }
        Commands::Serve => {
            run_http_server(Arc::new(config), Arc::new(db), cli.repos_path)
                .await
                .map_err(|e| -> Box<dyn std::error::Error> { e })?;
        }
        Commands::Compare { repo, spec } => {
            let (base_owner, base_repo) = find_repository(&db, &repo).await?;
            let spec = CompareSpec::parse(&spec)?;
            let head_owner = match &spec.head_owner {
                Some(name) => find_user(&db, name).await?,
                None => base_owner.clone(),
            };
            let head_repo = db
                .get_repository(head_owner.id, &base_repo.name)
                .await?
                .ok_or_else(|| format!("Repository '{}/{}' does not exist", head_owner.name, base_repo.name))?;

            let base_path = repo_path(&cli.repos_path, &base_owner.name, &base_repo.name);
            let head_path = repo_path(&cli.repos_path, &head_owner.name, &head_repo.name);
            let meta = tokio::task::spawn_blocking(move || {
                Comparer::new(Arc::new(Git2Module)).pull_request_meta(
                    &head_path,
                    &base_path,
                    &spec.head_branch,
                    &spec.base_branch,
                )
            })
            .await??;
            print_json(&meta)?;
        }
        Commands::Tags { repo, after, limit } => {
            let (owner, repo) = find_repository(&db, &repo).await?;
            let path = repo_path(&cli.repos_path, &owner.name, &repo.name);
            let page = tokio::task::spawn_blocking(move || list_tags_after(&Git2Module, &path, &after, limit)).await??;
            print_json(&serde_json::json!({
                "tags": page.tags,
                "has_latest": page.has_latest,
                "has_next": page.has_next,
                "previous_after": page.previous_after,
                "next_after": page.next_after(),
            }))?;
        }
        Commands::Diff {
            repo,
            base,
            head,
            highlight,
        } => {
            let (owner, repo) = find_repository(&db, &repo).await?;
            let path = repo_path(&cli.repos_path, &owner.name, &repo.name);
            let limits = config.diff.limits();
            let diff =
                tokio::task::spawn_blocking(move || Git2Module.diff(&path, &base, &head, &limits)).await??;

            if highlight {
                let opts = config.diff.highlight();
                let files: Vec<_> = diff
                    .files
                    .iter()
                    .map(|file| {
                        serde_json::json!({
                            "name": file.name,
                            "kind": file.kind,
                            "sections": file
                                .sections
                                .iter()
                                .map(|section| highlight_section(section, &opts))
                                .collect::<Vec<_>>(),
                        })
                    })
                    .collect();
                print_json(&files)?;
            } else {
                print_json(&diff)?;
            }
        }
    }

    Ok(())
}

#[derive(Serialize)]
struct HighlightedLine {
    kind: DiffLineKind,
    left_line: usize,
    right_line: usize,
    html: String,
}

fn highlight_section(section: &DiffSection, opts: &HighlightOptions) -> Vec<HighlightedLine> {
    section
        .lines
        .iter()
        .map(|line| HighlightedLine {
            kind: line.kind,
            left_line: line.left_line,
            right_line: line.right_line,
            html: section.computed_inline_diff_for(line, opts),
        })
        .collect()
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn find_user(db: &Database, name: &str) -> Result<User, Box<dyn std::error::Error>> {
    db.get_user_by_name(name)
        .await?
        .ok_or_else(|| format!("User '{}' does not exist", name).into())
}

/// Resolve `owner/name` to its owner and repository records
async fn find_repository(db: &Database, full_name: &str) -> Result<(User, Repository), Box<dyn std::error::Error>> {
    let (owner, name) = full_name
        .split_once('/')
        .ok_or_else(|| format!("Expected owner/name, got '{}'", full_name))?;
    let owner = find_user(db, owner).await?;
    let name = name.strip_suffix(".git").unwrap_or(name);
    let repo = db
        .get_repository(owner.id, name)
        .await?
        .ok_or_else(|| format!("Repository '{}/{}' does not exist", owner.name, name))?;
    Ok((owner, repo))
}

async fn create_repository(
    db: &Database,
    repos_path: &Path,
    owner: &str,
    name: &str,
    is_private: bool,
    is_mirror: bool,
) -> Result<Repository, Box<dyn std::error::Error>> {
    if !is_safe_path_component(name) {
        return Err(format!("Invalid repository name '{}'", name).into());
    }
    let owner = find_user(db, owner).await?;

    if db.get_repository(owner.id, name).await?.is_some() {
        return Err(format!("Repository '{}/{}' already exists", owner.name, name).into());
    }

    let path = repo_path(repos_path, &owner.name, name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    git_ops::init_bare_repo(&path, "master")
        .map_err(|e| format!("Failed to initialize bare git repository: {}", e))?;

    let repo = db.create_repository(owner.id, name, is_private, is_mirror).await?;

    info!("Created repository '{}/{}' at {:?}", owner.name, name, path);

    Ok(repo)
}
