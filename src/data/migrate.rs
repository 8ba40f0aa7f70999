//! Schema migrations
//!
//! Applies `*.sql` scripts from a directory in filename order and records
//! each applied filename in `schema_migrations`. Forward-only: nothing is
//! ever rolled back or removed from the applied set.
//!
//! Each script runs together with its applied-set row in one transaction,
//! so scripts must not contain their own `BEGIN`/`COMMIT`. Only one process
//! may run migrations against a database at a time; a second runner racing
//! on the same fresh database fails on the applied-set primary key instead
//! of recording a script twice.

use sqlx::{Executor, SqlitePool};
use std::collections::HashSet;
use std::path::PathBuf;

use crate::error::AppError;
use crate::metrics::MIGRATIONS_APPLIED_TOTAL;

/// File extension recognized as a migration script
pub const MIGRATION_EXTENSION: &str = "sql";

const APPLIED_TABLE: &str = "schema_migrations";

/// A script found in the migration directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationScript {
    /// File name; both the ordering key and the applied-set key
    pub filename: String,
    pub path: PathBuf,
}

/// Outcome of one migration run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Scripts applied by this run, in application order
    pub applied: Vec<String>,
    /// Scripts already present in the applied set
    pub skipped: usize,
}

/// Runs pending migration scripts from a directory
#[derive(Debug, Clone)]
pub struct Migrator {
    dir: PathBuf,
}

impl Migrator {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Apply every script not yet in the applied set
    ///
    /// Stops at the first failing script. Scripts applied earlier in the
    /// same run stay applied.
    ///
    /// # Errors
    /// Returns `AppError::Migration` naming the failing step or file
    pub async fn apply(&self, pool: &SqlitePool) -> Result<MigrationReport, AppError> {
        let applied = applied_set(pool)
            .await
            .map_err(|e| AppError::Migration(format!("failed to read applied migrations: {e}")))?;
        let scripts = self.discover().await?;

        ensure_applied_table(pool)
            .await
            .map_err(|e| AppError::Migration(format!("failed to create {APPLIED_TABLE}: {e}")))?;

        let mut report = MigrationReport::default();
        for script in scripts {
            if applied.contains(&script.filename) {
                report.skipped += 1;
                continue;
            }

            tracing::info!(filename = %script.filename, "Running migration");
            apply_script(pool, &script).await?;
            MIGRATIONS_APPLIED_TOTAL.inc();
            tracing::info!(filename = %script.filename, "Migration completed");

            report.applied.push(script.filename);
        }

        if report.applied.is_empty() {
            tracing::debug!(skipped = report.skipped, "Schema is up to date");
        } else {
            tracing::info!(
                applied = report.applied.len(),
                skipped = report.skipped,
                "All migrations completed"
            );
        }

        Ok(report)
    }

    /// List migration scripts sorted by filename
    ///
    /// Directory enumeration order is never relied on.
    pub async fn discover(&self) -> Result<Vec<MigrationScript>, AppError> {
        let read_error = |e: std::io::Error| {
            AppError::Migration(format!(
                "failed to read migration directory {}: {e}",
                self.dir.display()
            ))
        };

        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(read_error)?;
        let mut scripts = Vec::new();

        while let Some(entry) = entries.next_entry().await.map_err(read_error)? {
            let file_type = entry.file_type().await.map_err(read_error)?;
            if !file_type.is_file() {
                continue;
            }

            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(MIGRATION_EXTENSION) {
                continue;
            }

            let Some(filename) = entry.file_name().to_str().map(ToOwned::to_owned) else {
                tracing::warn!(path = %path.display(), "Skipping migration with non UTF-8 name");
                continue;
            };

            scripts.push(MigrationScript { filename, path });
        }

        scripts.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(scripts)
    }
}

/// Filenames already recorded; empty when the table does not exist yet
async fn applied_set(pool: &SqlitePool) -> Result<HashSet<String>, sqlx::Error> {
    let exists: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(APPLIED_TABLE)
            .fetch_one(pool)
            .await?;

    if exists == 0 {
        return Ok(HashSet::new());
    }

    let filenames: Vec<String> =
        sqlx::query_scalar(&format!("SELECT filename FROM {APPLIED_TABLE}"))
            .fetch_all(pool)
            .await?;

    Ok(filenames.into_iter().collect())
}

async fn ensure_applied_table(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    pool.execute(
        format!(
            "CREATE TABLE IF NOT EXISTS {APPLIED_TABLE} (
                filename TEXT PRIMARY KEY NOT NULL,
                applied_at TEXT NOT NULL
            )"
        )
        .as_str(),
    )
    .await?;
    Ok(())
}

async fn apply_script(pool: &SqlitePool, script: &MigrationScript) -> Result<(), AppError> {
    let failed = |step: &str, e: &dyn std::fmt::Display| {
        tracing::error!(filename = %script.filename, error = %e, "Migration {step} failed");
        AppError::Migration(format!("{step} {}: {e}", script.filename))
    };

    let sql = tokio::fs::read_to_string(&script.path)
        .await
        .map_err(|e| failed("read", &e))?;

    let mut tx = pool.begin().await.map_err(|e| failed("begin", &e))?;

    (&mut *tx)
        .execute(sql.as_str())
        .await
        .map_err(|e| failed("execute", &e))?;

    sqlx::query(&format!(
        "INSERT INTO {APPLIED_TABLE} (filename, applied_at) VALUES (?, ?)"
    ))
    .bind(&script.filename)
    .bind(chrono::Utc::now().to_rfc3339())
    .execute(&mut *tx)
    .await
    .map_err(|e| failed("record", &e))?;

    tx.commit().await.map_err(|e| failed("commit", &e))?;
    Ok(())
}
