use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::store::{
    generate_secret, hash_password, sha256_hex, AccessMode, AccessToken, ForgeStore, Repository,
    StoreError, User,
};

/// SQLite backed forge store
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connect to the SQLite database
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = SqlitePool::connect(database_url).await?;
        Ok(Database { pool })
    }

    /// Initialize the database schema
    pub async fn init(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                lower_name TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL DEFAULT '',
                password_hash TEXT NOT NULL,
                salt TEXT NOT NULL,
                two_factor_enabled INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS repositories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                lower_name TEXT NOT NULL,
                is_private INTEGER NOT NULL DEFAULT 0,
                is_mirror INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(owner_id, lower_name),
                FOREIGN KEY (owner_id) REFERENCES users(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS access_tokens (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                sha256 TEXT NOT NULL UNIQUE,
                updated_at INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (user_id) REFERENCES users(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS accesses (
                user_id INTEGER NOT NULL,
                repo_id INTEGER NOT NULL,
                mode INTEGER NOT NULL,
                PRIMARY KEY (user_id, repo_id),
                FOREIGN KEY (user_id) REFERENCES users(id),
                FOREIGN KEY (repo_id) REFERENCES repositories(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ============ User Methods ============

    /// Create a user with a freshly salted password
    pub async fn create_user(
        &self,
        name: &str,
        email: &str,
        password: &str,
        two_factor_enabled: bool,
    ) -> Result<User, sqlx::Error> {
        let salt = generate_secret();
        let result = sqlx::query(
            "INSERT INTO users (name, lower_name, email, password_hash, salt, two_factor_enabled) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(name)
        .bind(name.to_lowercase())
        .bind(email)
        .bind(hash_password(&salt, password))
        .bind(&salt)
        .bind(two_factor_enabled)
        .execute(&self.pool)
        .await?;

        Ok(User {
            id: result.last_insert_rowid(),
            name: name.to_string(),
            email: email.to_string(),
            salt,
            two_factor_enabled,
        })
    }

    // ============ Repository Methods ============

    /// Create a new repository entry
    pub async fn create_repository(
        &self,
        owner_id: i64,
        name: &str,
        is_private: bool,
        is_mirror: bool,
    ) -> Result<Repository, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO repositories (owner_id, name, lower_name, is_private, is_mirror) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(owner_id)
        .bind(name)
        .bind(name.to_lowercase())
        .bind(is_private)
        .bind(is_mirror)
        .execute(&self.pool)
        .await?;

        Ok(Repository {
            id: result.last_insert_rowid(),
            owner_id,
            name: name.to_string(),
            is_private,
            is_mirror,
        })
    }

    // ============ Token and Access Methods ============

    /// Create an access token and return it together with its secret. Only
    /// the secret's hash is stored.
    pub async fn create_access_token(&self, user_id: i64, name: &str) -> Result<(AccessToken, String), sqlx::Error> {
        let secret = generate_secret();
        let result = sqlx::query("INSERT INTO access_tokens (user_id, name, sha256) VALUES (?, ?, ?)")
            .bind(user_id)
            .bind(name)
            .bind(sha256_hex(&secret))
            .execute(&self.pool)
            .await?;

        let token = AccessToken {
            id: result.last_insert_rowid(),
            user_id,
            name: name.to_string(),
        };
        Ok((token, secret))
    }

    /// Grant `mode` on a repository, replacing any previous grant
    pub async fn grant_access(&self, user_id: i64, repo_id: i64, mode: AccessMode) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO accesses (user_id, repo_id, mode) VALUES (?, ?, ?)
             ON CONFLICT(user_id, repo_id) DO UPDATE SET mode = excluded.mode",
        )
        .bind(user_id)
        .bind(repo_id)
        .bind(mode.as_i64())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn user_from_row(r: &SqliteRow) -> User {
    User {
        id: r.get("id"),
        name: r.get("name"),
        email: r.get("email"),
        salt: r.get("salt"),
        two_factor_enabled: r.get("two_factor_enabled"),
    }
}

fn repository_from_row(r: &SqliteRow) -> Repository {
    Repository {
        id: r.get("id"),
        owner_id: r.get("owner_id"),
        name: r.get("name"),
        is_private: r.get("is_private"),
        is_mirror: r.get("is_mirror"),
    }
}

#[async_trait]
impl ForgeStore for Database {
    async fn get_user_by_name(&self, name: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT id, name, email, salt, two_factor_enabled FROM users WHERE lower_name = ?")
            .bind(name.to_lowercase())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn get_user_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT id, name, email, salt, two_factor_enabled FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn get_repository(&self, owner_id: i64, name: &str) -> Result<Option<Repository>, StoreError> {
        let row = sqlx::query(
            "SELECT id, owner_id, name, is_private, is_mirror FROM repositories WHERE owner_id = ? AND lower_name = ?",
        )
        .bind(owner_id)
        .bind(name.to_lowercase())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(repository_from_row))
    }

    async fn authenticate(&self, username: &str, password: &str) -> Result<User, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, email, salt, two_factor_enabled, password_hash FROM users WHERE lower_name = ?",
        )
        .bind(username.to_lowercase())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Err(StoreError::BadCredentials);
        };
        let user = user_from_row(&row);
        let stored: String = row.get("password_hash");
        if hash_password(&user.salt, password) != stored {
            return Err(StoreError::BadCredentials);
        }
        Ok(user)
    }

    async fn access_token_by_secret(&self, secret: &str) -> Result<Option<AccessToken>, StoreError> {
        let row = sqlx::query("SELECT id, user_id, name FROM access_tokens WHERE sha256 = ?")
            .bind(sha256_hex(secret))
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| AccessToken {
            id: r.get("id"),
            user_id: r.get("user_id"),
            name: r.get("name"),
        }))
    }

    async fn touch_access_token(&self, token_id: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE access_tokens SET updated_at = ? WHERE id = ?")
            .bind(chrono::Utc::now().timestamp())
            .bind(token_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn access_mode(&self, user_id: i64, repo_id: i64) -> Result<AccessMode, StoreError> {
        let row = sqlx::query("SELECT mode FROM accesses WHERE user_id = ? AND repo_id = ?")
            .bind(user_id)
            .bind(repo_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row
            .map(|r| AccessMode::from_i64(r.get("mode")))
            .unwrap_or(AccessMode::None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_db(dir: &TempDir) -> Database {
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("forge.db").display());
        let db = Database::connect(&url).await.unwrap();
        db.init().await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_users_and_authentication() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir).await;

        let alice = db.create_user("Alice", "alice@example.com", "hunter2", false).await.unwrap();
        let found = db.get_user_by_name("alice").await.unwrap().unwrap();
        assert_eq!(found, alice);
        assert_eq!(db.get_user_by_id(alice.id).await.unwrap(), Some(alice.clone()));

        let authed = db.authenticate("ALICE", "hunter2").await.unwrap();
        assert_eq!(authed.id, alice.id);

        assert!(matches!(
            db.authenticate("alice", "wrong").await,
            Err(StoreError::BadCredentials)
        ));
        assert!(matches!(
            db.authenticate("nobody", "hunter2").await,
            Err(StoreError::BadCredentials)
        ));
    }

    #[tokio::test]
    async fn test_repositories_are_case_insensitive() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir).await;

        let owner = db.create_user("bob", "bob@example.com", "pw", false).await.unwrap();
        let repo = db.create_repository(owner.id, "Demo", true, false).await.unwrap();

        assert_eq!(db.get_repository(owner.id, "demo").await.unwrap(), Some(repo));
        assert_eq!(db.get_repository(owner.id + 1, "demo").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_access_tokens() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir).await;

        let user = db.create_user("carol", "carol@example.com", "pw", true).await.unwrap();
        let (token, secret) = db.create_access_token(user.id, "ci").await.unwrap();

        let found = db.access_token_by_secret(&secret).await.unwrap().unwrap();
        assert_eq!(found, token);
        assert!(db.access_token_by_secret("not-a-token").await.unwrap().is_none());

        assert_eq!(last_used(&db, token.id).await, 0);
        db.touch_access_token(token.id).await.unwrap();
        assert!(last_used(&db, token.id).await > 0);
    }

    async fn last_used(db: &Database, token_id: i64) -> i64 {
        sqlx::query_scalar("SELECT updated_at FROM access_tokens WHERE id = ?")
            .bind(token_id)
            .fetch_one(&db.pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_grants_replace_previous_mode() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir).await;

        let owner = db.create_user("dave", "dave@example.com", "pw", false).await.unwrap();
        let other = db.create_user("erin", "erin@example.com", "pw", false).await.unwrap();
        let repo = db.create_repository(owner.id, "demo", true, false).await.unwrap();

        assert_eq!(db.access_mode(other.id, repo.id).await.unwrap(), AccessMode::None);
        db.grant_access(other.id, repo.id, AccessMode::Read).await.unwrap();
        db.grant_access(other.id, repo.id, AccessMode::Write).await.unwrap();
        assert_eq!(db.access_mode(other.id, repo.id).await.unwrap(), AccessMode::Write);
    }
}
