//! Database migration management.
//!
//! Migrations are embedded into the binary at compile time and extracted to
//! a temporary directory at runtime, so distributed binaries don't need the
//! migrations directory alongside the executable.

use include_dir::{include_dir, Dir};
use sqlx::{Pool, Sqlite};
use tempfile::TempDir;

static MIGRATIONS_DIR: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/migrations");

/// Runs SQLx migrations embedded in the binary.
///
/// In development builds the source migrations directory is used directly;
/// otherwise the embedded copy is extracted to a temp directory first.
/// Running twice is a no-op (sqlx tracks applied versions).
pub async fn run_migrations(pool: &Pool<Sqlite>) -> Result<(), anyhow::Error> {
    let source_migrations = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");

    if source_migrations.exists() {
        let migrator = sqlx::migrate::Migrator::new(source_migrations.as_path()).await?;
        migrator.run(pool).await?;
        Ok(())
    } else {
        // temp_dir must outlive the migrator run
        let temp_dir = TempDir::new()?;
        let migrations_path = temp_dir.path().join("migrations");
        std::fs::create_dir_all(&migrations_path)?;

        for file in MIGRATIONS_DIR.files() {
            let file_path = migrations_path.join(file.path());
            if let Some(parent) = file_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&file_path, file.contents())?;
        }

        let migrator = sqlx::migrate::Migrator::new(migrations_path.as_path()).await?;
        migrator.run(pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> Pool<Sqlite> {
        // A single connection keeps every query on the same in-memory database.
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create test pool")
    }

    #[tokio::test]
    async fn test_run_migrations_creates_schema() {
        let pool = memory_pool().await;

        run_migrations(&pool).await.expect("Migrations should run");

        let table_exists: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='metadata_records'",
        )
        .fetch_one(&pool)
        .await
        .expect("Failed to query sqlite_master");
        assert_eq!(table_exists, 1);
    }

    #[tokio::test]
    async fn test_run_migrations_idempotent() {
        let pool = memory_pool().await;

        run_migrations(&pool).await.expect("First run should succeed");
        run_migrations(&pool).await.expect("Second run should succeed");
    }

    #[tokio::test]
    async fn test_unique_url_index_exists() {
        let pool = memory_pool().await;
        run_migrations(&pool).await.expect("Migrations should run");

        let index_exists: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='index' AND name='uq_metadata_url'",
        )
        .fetch_one(&pool)
        .await
        .expect("Failed to query sqlite_master");
        assert_eq!(index_exists, 1);
    }
}
