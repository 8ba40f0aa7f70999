//! Data models
//!
//! Rust structs representing database entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::Principal;

// =============================================================================
// User
// =============================================================================

/// A local user, keyed by the GitHub id it signed in with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    /// GitHub user id (unique)
    pub github_uid: i64,
    /// GitHub login, refreshed on each sign-in
    pub login: String,
    /// Avatar URL, refreshed on each sign-in
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Session payload for this user
    pub fn principal(&self) -> Principal {
        Principal {
            id: self.id,
            github_uid: self.github_uid,
            login: self.login.clone(),
            avatar_url: self.avatar_url.clone().unwrap_or_default(),
        }
    }
}

/// Fields needed to create a user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub github_uid: i64,
    pub login: String,
    pub avatar_url: Option<String>,
}

/// Profile fields refreshed from the identity provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfileUpdate {
    pub id: i64,
    pub login: String,
    pub avatar_url: Option<String>,
}
