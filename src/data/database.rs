//! SQLite database operations
//!
//! All database access goes through this module.

use axum::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::time::Duration;

use super::migrate::{MigrationReport, Migrator};
use super::models::*;
use crate::error::{AppError, Result};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Storage for local user records, keyed by GitHub id
///
/// The login flow depends on this trait only, so it can be driven
/// without a database in tests.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn get_user_by_github_uid(&self, github_uid: i64) -> Result<Option<User>>;

    /// Insert a user. A duplicate `github_uid` fails with a unique violation
    /// (see [`is_unique_violation`]).
    async fn create_user(&self, user: &NewUser) -> Result<User>;

    async fn update_user(&self, update: &UserProfileUpdate) -> Result<User>;
}

/// Whether `error` is a uniqueness constraint failure from the database
pub fn is_unique_violation(error: &AppError) -> bool {
    match error {
        AppError::Database(sqlx::Error::Database(db_error)) => db_error.is_unique_violation(),
        _ => false,
    }
}

/// Database connection pool wrapper.
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    // =========================================================================
    // Connection
    // =========================================================================

    /// Connect to SQLite database
    ///
    /// Creates the database file if it doesn't exist, then applies pending
    /// migrations before the pool is handed to anyone else.
    ///
    /// # Errors
    /// Returns error if connection or migration fails
    pub async fn connect(path: &Path, migrations_dir: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::Database(sqlx::Error::Io(e)))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        let report = Migrator::new(migrations_dir).apply(&pool).await?;
        tracing::info!(
            path = %path.display(),
            applied = report.applied.len(),
            "Database connected and migrated successfully"
        );

        Ok(Self { pool })
    }

    /// Re-run the migrator against this database
    pub async fn migrate(&self, migrations_dir: &Path) -> Result<MigrationReport> {
        Migrator::new(migrations_dir).apply(&self.pool).await
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    // =========================================================================
    // Users
    // =========================================================================

    pub async fn count_users(&self) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn get_user(&self, id: i64) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, github_uid, login, avatar_url, created_at, updated_at FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }
}

#[async_trait]
impl UserRepository for Database {
    async fn get_user_by_github_uid(&self, github_uid: i64) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, github_uid, login, avatar_url, created_at, updated_at FROM users WHERE github_uid = ?",
        )
        .bind(github_uid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn create_user(&self, user: &NewUser) -> Result<User> {
        let now = Utc::now();
        let created = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (github_uid, login, avatar_url, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id, github_uid, login, avatar_url, created_at, updated_at
            "#,
        )
        .bind(user.github_uid)
        .bind(&user.login)
        .bind(&user.avatar_url)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    async fn update_user(&self, update: &UserProfileUpdate) -> Result<User> {
        let updated = sqlx::query_as::<_, User>(
            r#"
            UPDATE users SET login = ?, avatar_url = ?, updated_at = ?
            WHERE id = ?
            RETURNING id, github_uid, login, avatar_url, created_at, updated_at
            "#,
        )
        .bind(&update.login)
        .bind(&update.avatar_url)
        .bind(Utc::now())
        .bind(update.id)
        .fetch_one(&self.pool)
        .await?;
        Ok(updated)
    }
}
