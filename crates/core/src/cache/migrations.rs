//! Database schema migrations.
//!
//! A `_migrations` table records the highest applied version; pending
//! migrations run in order inside one transaction.

use super::Error;
use tokio_rusqlite::{Connection, params};

/// Migration list: (version, SQL).
///
/// Versions must be strictly increasing. Every script is idempotent
/// (CREATE ... IF NOT EXISTS).
const MIGRATIONS: &[(i64, &str)] = &[(1, include_str!("../../migrations/001_assets.sql"))];

/// Apply every migration newer than the recorded schema version.
///
/// # Errors
///
/// Returns `Error::MigrationFailed` if a migration script fails to execute.
pub async fn run(conn: &Connection) -> Result<(), Error> {
    let applied = conn
        .call(|conn| -> Result<Vec<i64>, Error> {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS _migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at TEXT NOT NULL
                )",
                [],
            )?;

            let current: i64 =
                conn.query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |row| row.get(0))?;

            let tx = conn.transaction()?;
            let mut applied = Vec::new();
            for &(version, sql) in MIGRATIONS.iter().filter(|(version, _)| *version > current) {
                tx.execute_batch(sql)
                    .map_err(|e| Error::MigrationFailed(format!("version {version}: {e}")))?;
                tx.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, ?2)",
                    params![version, chrono::Utc::now().to_rfc3339()],
                )?;
                applied.push(version);
            }
            tx.commit()?;

            Ok(applied)
        })
        .await
        .map_err(Error::from)?;

    if !applied.is_empty() {
        tracing::debug!(?applied, "applied asset store migrations");
    }

    Ok(())
}
