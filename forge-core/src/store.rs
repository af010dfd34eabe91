//! Accounts, repositories, tokens and permission grants as seen by the
//! HTTP gateway.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};

/// Level of access a user holds on a repository, ordered from least to most.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    None,
    Read,
    Write,
    Admin,
    Owner,
}

impl AccessMode {
    pub fn from_i64(value: i64) -> Self {
        match value {
            1 => AccessMode::Read,
            2 => AccessMode::Write,
            3 => AccessMode::Admin,
            4 => AccessMode::Owner,
            _ => AccessMode::None,
        }
    }

    pub fn as_i64(self) -> i64 {
        self as i64
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AccessMode::None => "none",
            AccessMode::Read => "read",
            AccessMode::Write => "write",
            AccessMode::Admin => "admin",
            AccessMode::Owner => "owner",
        };
        f.write_str(name)
    }
}

impl FromStr for AccessMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(AccessMode::None),
            "read" => Ok(AccessMode::Read),
            "write" => Ok(AccessMode::Write),
            "admin" => Ok(AccessMode::Admin),
            "owner" => Ok(AccessMode::Owner),
            other => Err(format!("unknown access mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    #[serde(skip)]
    pub salt: String,
    pub two_factor_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Repository {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub is_private: bool,
    pub is_mirror: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessToken {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Invalid username or password")]
    BadCredentials,
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Lookups the gateway performs against the forge's account data.
#[async_trait]
pub trait ForgeStore: Send + Sync {
    async fn get_user_by_name(&self, name: &str) -> Result<Option<User>, StoreError>;

    async fn get_user_by_id(&self, id: i64) -> Result<Option<User>, StoreError>;

    async fn get_repository(&self, owner_id: i64, name: &str) -> Result<Option<Repository>, StoreError>;

    /// Verify a username and password. Unknown users and wrong passwords both
    /// yield [`StoreError::BadCredentials`].
    async fn authenticate(&self, username: &str, password: &str) -> Result<User, StoreError>;

    async fn access_token_by_secret(&self, secret: &str) -> Result<Option<AccessToken>, StoreError>;

    /// Record that the token was just used.
    async fn touch_access_token(&self, token_id: i64) -> Result<(), StoreError>;

    /// Explicitly granted access mode, `AccessMode::None` when nothing was granted.
    async fn access_mode(&self, user_id: i64, repo_id: i64) -> Result<AccessMode, StoreError>;
}

/// Effective access of `user_id` (None for anonymous) on `repo`.
pub async fn effective_access_mode(
    store: &dyn ForgeStore,
    user_id: Option<i64>,
    repo: &Repository,
) -> Result<AccessMode, StoreError> {
    let base = if repo.is_private {
        AccessMode::None
    } else {
        AccessMode::Read
    };

    let Some(user_id) = user_id else {
        return Ok(base);
    };
    if user_id == repo.owner_id {
        return Ok(AccessMode::Owner);
    }

    let granted = store.access_mode(user_id, repo.id).await?;
    Ok(base.max(granted))
}

/// Whether `user_id` holds at least `desired` on `repo`.
pub async fn authorize(
    store: &dyn ForgeStore,
    user_id: Option<i64>,
    repo: &Repository,
    desired: AccessMode,
) -> Result<bool, StoreError> {
    Ok(effective_access_mode(store, user_id, repo).await? >= desired)
}

/// Hex encoded SHA-512 of salt followed by password
pub fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn sha256_hex(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

/// Random hex string suitable for salts and token secrets
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 20];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct GrantsOnly {
        grants: HashMap<(i64, i64), AccessMode>,
    }

    #[async_trait]
    impl ForgeStore for GrantsOnly {
        async fn get_user_by_name(&self, _name: &str) -> Result<Option<User>, StoreError> {
            Ok(None)
        }
        async fn get_user_by_id(&self, _id: i64) -> Result<Option<User>, StoreError> {
            Ok(None)
        }
        async fn get_repository(&self, _owner_id: i64, _name: &str) -> Result<Option<Repository>, StoreError> {
            Ok(None)
        }
        async fn authenticate(&self, _username: &str, _password: &str) -> Result<User, StoreError> {
            Err(StoreError::BadCredentials)
        }
        async fn access_token_by_secret(&self, _secret: &str) -> Result<Option<AccessToken>, StoreError> {
            Ok(None)
        }
        async fn touch_access_token(&self, _token_id: i64) -> Result<(), StoreError> {
            Ok(())
        }
        async fn access_mode(&self, user_id: i64, repo_id: i64) -> Result<AccessMode, StoreError> {
            Ok(self.grants.get(&(user_id, repo_id)).copied().unwrap_or(AccessMode::None))
        }
    }

    fn repo(is_private: bool) -> Repository {
        Repository {
            id: 7,
            owner_id: 1,
            name: "demo".to_string(),
            is_private,
            is_mirror: false,
        }
    }

    #[test]
    fn test_access_mode_ordering_and_parsing() {
        assert!(AccessMode::None < AccessMode::Read);
        assert!(AccessMode::Read < AccessMode::Write);
        assert!(AccessMode::Write < AccessMode::Admin);
        assert!(AccessMode::Admin < AccessMode::Owner);
        assert_eq!("Write".parse::<AccessMode>().unwrap(), AccessMode::Write);
        assert!("root".parse::<AccessMode>().is_err());
        for mode in [AccessMode::None, AccessMode::Read, AccessMode::Write, AccessMode::Admin, AccessMode::Owner] {
            assert_eq!(AccessMode::from_i64(mode.as_i64()), mode);
        }
    }

    #[tokio::test]
    async fn test_effective_access() {
        let mut store = GrantsOnly::default();
        store.grants.insert((2, 7), AccessMode::Write);

        let private = repo(true);
        let public = repo(false);

        assert_eq!(effective_access_mode(&store, None, &public).await.unwrap(), AccessMode::Read);
        assert_eq!(effective_access_mode(&store, None, &private).await.unwrap(), AccessMode::None);
        assert_eq!(effective_access_mode(&store, Some(1), &private).await.unwrap(), AccessMode::Owner);
        assert_eq!(effective_access_mode(&store, Some(2), &private).await.unwrap(), AccessMode::Write);
        assert_eq!(effective_access_mode(&store, Some(3), &public).await.unwrap(), AccessMode::Read);

        assert!(authorize(&store, Some(2), &private, AccessMode::Write).await.unwrap());
        assert!(!authorize(&store, Some(3), &private, AccessMode::Read).await.unwrap());
        assert!(!authorize(&store, Some(3), &public, AccessMode::Write).await.unwrap());
    }

    #[test]
    fn test_hash_password_is_salted() {
        let a = hash_password("salt-a", "secret");
        let b = hash_password("salt-b", "secret");
        assert_eq!(a.len(), 128);
        assert_ne!(a, b);
        assert_eq!(a, hash_password("salt-a", "secret"));
    }

    #[test]
    fn test_generate_secret() {
        let a = generate_secret();
        assert_eq!(a.len(), 40);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, generate_secret());
        assert_eq!(sha256_hex("abc").len(), 64);
    }
}
