//! Applies the SQL scripts under `db.bootstrap_path` at startup.
//!
//! Scripts live in one folder per stage and run in stage order, then file name
//! order. Every script runs in its own transaction and must be idempotent.

use std::cmp::Ordering;
use std::ffi::OsStr;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use sqlx::PgPool;
use thiserror::Error;
use tracing::{debug, info, warn};

use shared::config::DatabaseConfig;

const STAGES: &[ScriptStage] = &[ScriptStage::Schema, ScriptStage::Indexes];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScriptStage {
    Schema,
    Indexes,
}

impl ScriptStage {
    fn label(self) -> &'static str {
        match self {
            ScriptStage::Schema => "schema",
            ScriptStage::Indexes => "indexes",
        }
    }
}

impl fmt::Display for ScriptStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Failures while applying or verifying the bootstrap scripts.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// `db.bootstrap_path` does not exist.
    #[error("database bootstrap directory does not exist: {0}")]
    MissingRoot(PathBuf),
    /// A stage folder is absent.
    #[error("database bootstrap stage '{stage}' missing at {path}")]
    MissingStage {
        /// Stage name.
        stage: &'static str,
        /// Expected folder.
        path: PathBuf,
    },
    /// A stage folder could not be listed.
    #[error("failed to read directory {path}: {source}")]
    ReadDir {
        /// Folder being listed.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// A script could not be read.
    #[error("failed to read file {path}: {source}")]
    ReadFile {
        /// Script path.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// A script failed to execute.
    #[error("database error executing {path}: {source}")]
    Sql {
        /// Script path.
        path: PathBuf,
        /// Driver error.
        #[source]
        source: sqlx::Error,
    },
    /// The bootstrap finished but the messages table is absent.
    #[error("messages table is missing after bootstrap")]
    NotReady,
}

/// Execute all bootstrap SQL scripts in stage order.
///
/// # Errors
/// Fails on a missing directory, an unreadable script, or a failing statement.
pub async fn run(pool: &PgPool, config: &DatabaseConfig) -> Result<(), BootstrapError> {
    let root = &config.bootstrap_path;
    let plan = plan(root)?;

    info!(path = %root.display(), scripts = plan.len(), "running database bootstrap");
    for (stage, path) in plan {
        debug!(%stage, script = %path.display(), "applying bootstrap script");
        apply_script(pool, &path).await?;
    }

    Ok(())
}

/// Simple liveness check used during startup.
///
/// # Errors
/// Returns the driver error when the database cannot be reached.
pub async fn ensure_liveness(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await.map(|_| ())
}

/// Readiness check: the messages table must exist.
///
/// # Errors
/// Returns [`BootstrapError::NotReady`] when the table is absent.
pub async fn ensure_readiness(pool: &PgPool) -> Result<(), BootstrapError> {
    let present: bool =
        sqlx::query_scalar("SELECT to_regclass('direct_messages') IS NOT NULL")
            .fetch_one(pool)
            .await
            .map_err(|source| BootstrapError::Sql {
                path: PathBuf::from("<readiness>"),
                source,
            })?;

    if present {
        Ok(())
    } else {
        Err(BootstrapError::NotReady)
    }
}

fn plan(root: &Path) -> Result<Vec<(ScriptStage, PathBuf)>, BootstrapError> {
    if !root.exists() {
        return Err(BootstrapError::MissingRoot(root.to_path_buf()));
    }

    let mut scripts = Vec::new();
    for stage in STAGES {
        let stage_path = root.join(stage.label());
        if !stage_path.exists() {
            return Err(BootstrapError::MissingStage {
                stage: stage.label(),
                path: stage_path,
            });
        }

        let files = collect_sql_files(&stage_path)?;
        if files.is_empty() {
            debug!(stage = %stage, "no bootstrap scripts found for stage");
        }
        scripts.extend(files.into_iter().map(|path| (*stage, path)));
    }
    Ok(scripts)
}

fn collect_sql_files(dir: &Path) -> Result<Vec<PathBuf>, BootstrapError> {
    let mut entries = Vec::new();
    let read_dir = fs::read_dir(dir).map_err(|source| BootstrapError::ReadDir {
        path: dir.to_path_buf(),
        source,
    })?;

    for entry in read_dir {
        let entry = entry.map_err(|source| BootstrapError::ReadDir {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path
            .extension()
            .and_then(OsStr::to_str)
            .is_some_and(|ext| ext.eq_ignore_ascii_case("sql"))
        {
            entries.push(path);
        }
    }

    entries.sort_by(|a, b| compare_paths(a, b));
    Ok(entries)
}

fn compare_paths(a: &Path, b: &Path) -> Ordering {
    match (a.file_name(), b.file_name()) {
        (Some(a_name), Some(b_name)) => a_name.cmp(b_name),
        _ => Ordering::Equal,
    }
}

async fn apply_script(pool: &PgPool, path: &Path) -> Result<(), BootstrapError> {
    let sql = fs::read_to_string(path).map_err(|source| BootstrapError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;

    let trimmed = sql.trim();
    if trimmed.is_empty() {
        warn!(path = %path.display(), "skipping empty bootstrap script");
        return Ok(());
    }

    let sql_error = |source| BootstrapError::Sql {
        path: path.to_path_buf(),
        source,
    };

    let mut transaction = pool.begin().await.map_err(sql_error)?;
    sqlx::raw_sql(trimmed)
        .execute(&mut *transaction)
        .await
        .map_err(sql_error)?;
    transaction.commit().await.map_err(sql_error)
}
