//! Applies the SQL scripts shipped under `db/` before the Postgres store is
//! handed out.

use std::{
    fs,
    path::{Path, PathBuf},
};

use shared::config::server::DatabaseConfig;
use sqlx::PgPool;
use thiserror::Error;
use tracing::{debug, info};

/// Script folders in the order they are applied.
const STAGES: [&str; 3] = ["schema", "procedures", "indexes"];

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("bootstrap path {0} does not exist")]
    Missing(PathBuf),
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("script {path} failed: {source}")]
    Sql {
        path: PathBuf,
        #[source]
        source: sqlx::Error,
    },
}

/// Runs every stage folder under `bootstrap_path`. Scripts are idempotent, so
/// this runs on every start.
pub async fn run(pool: &PgPool, config: &DatabaseConfig) -> Result<(), BootstrapError> {
    let root = &config.bootstrap_path;
    if !root.is_dir() {
        return Err(BootstrapError::Missing(root.clone()));
    }

    for stage in STAGES {
        let scripts = stage_scripts(&root.join(stage))?;
        info!(stage, count = scripts.len(), "applying bootstrap scripts");
        for script in scripts {
            apply(pool, &script).await?;
        }
    }
    Ok(())
}

/// Calls the health procedure installed by the `procedures` stage.
pub async fn ensure_ready(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("CALL marketchat.sp_healthz()")
        .execute(pool)
        .await
        .map(|_| ())
}

/// `.sql` files of one stage, sorted by file name.
fn stage_scripts(dir: &Path) -> Result<Vec<PathBuf>, BootstrapError> {
    let io_error = |source| BootstrapError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut scripts = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_error)? {
        let path = entry.map_err(io_error)?.path();
        if path.extension().is_some_and(|ext| ext == "sql") {
            scripts.push(path);
        }
    }
    scripts.sort();
    Ok(scripts)
}

async fn apply(pool: &PgPool, script: &Path) -> Result<(), BootstrapError> {
    let sql = fs::read_to_string(script).map_err(|source| BootstrapError::Io {
        path: script.to_path_buf(),
        source,
    })?;
    let sql_error = |source| BootstrapError::Sql {
        path: script.to_path_buf(),
        source,
    };

    debug!(script = %script.display(), "executing");
    let mut tx = pool.begin().await.map_err(sql_error)?;
    // Multi-statement scripts need the simple query protocol.
    sqlx::raw_sql(&sql)
        .execute(&mut *tx)
        .await
        .map_err(sql_error)?;
    tx.commit().await.map_err(sql_error)
}
