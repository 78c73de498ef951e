//! SQLite-backed metadata ledger shared by all services.
//!
//! Holds the six entity tables: devices, array configs, member devices,
//! files, chunks, chunk locations, plus the append-only healing audit log.
//! Each service receives a clone of the pool and owns its own queries.

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

/// Connect to the given SQLite database and initialize the schema.
pub async fn connect(db_url: &str) -> sqlx::Result<SqlitePool> {
    let pool = SqlitePool::connect(db_url).await?;
    init_schema(&pool).await?;
    Ok(pool)
}

/// Single-connection in-memory database (for tests and the demo server).
///
/// SQLite in-memory databases are per-connection, so the pool is pinned to
/// exactly one connection that is never recycled.
pub async fn connect_in_memory() -> sqlx::Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .min_connections(1)
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;
    init_schema(&pool).await?;
    Ok(pool)
}

async fn init_schema(pool: &SqlitePool) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS devices (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            platform TEXT NOT NULL,
            capacity_bytes INTEGER,
            available_bytes INTEGER,
            last_heartbeat INTEGER NOT NULL,
            registered_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_devices_owner ON devices(owner_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS array_configs (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            raid_level INTEGER NOT NULL,
            chunk_size INTEGER NOT NULL,
            active INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // At most one active configuration per owner, enforced by the store
    // rather than any in-process state.
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_configs_one_active \
         ON array_configs(owner_id) WHERE active = 1",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS member_devices (
            config_id TEXT NOT NULL,
            device_id TEXT NOT NULL,
            priority INTEGER NOT NULL,
            PRIMARY KEY (config_id, device_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            name TEXT NOT NULL,
            size_bytes INTEGER NOT NULL,
            content_hash TEXT NOT NULL,
            raid_level INTEGER NOT NULL,
            chunk_size INTEGER NOT NULL,
            stripe_width INTEGER,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_owner ON files(owner_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            file_id TEXT NOT NULL,
            idx INTEGER NOT NULL,
            size_bytes INTEGER NOT NULL,
            content_hash TEXT NOT NULL,
            is_parity INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE (file_id, idx)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_file ON chunks(file_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_locations (
            id TEXT PRIMARY KEY,
            chunk_id TEXT NOT NULL,
            device_id TEXT NOT NULL,
            storage_reference TEXT NOT NULL,
            status TEXT NOT NULL,
            verified_at INTEGER,
            UNIQUE (chunk_id, device_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_locations_chunk ON chunk_locations(chunk_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_locations_device ON chunk_locations(device_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_locations_status ON chunk_locations(status)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS healing_events (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            config_id TEXT NOT NULL,
            triggered_by TEXT NOT NULL,
            offline_devices INTEGER NOT NULL,
            online_devices INTEGER NOT NULL,
            total_devices INTEGER NOT NULL,
            chunks_marked INTEGER NOT NULL,
            affected_chunk_ids TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_owner ON healing_events(owner_id)")
        .execute(pool)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_schema_initializes() {
        let pool = connect_in_memory().await.unwrap();

        // All tables present and queryable.
        for table in [
            "devices",
            "array_configs",
            "member_devices",
            "files",
            "chunks",
            "chunk_locations",
            "healing_events",
        ] {
            sqlx::query(&format!("SELECT COUNT(*) FROM {table}"))
                .fetch_one(&pool)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_one_active_config_per_owner() {
        let pool = connect_in_memory().await.unwrap();

        sqlx::query(
            "INSERT INTO array_configs (id, owner_id, raid_level, chunk_size, active, created_at) \
             VALUES ('c1', 'alice', 5, 1048576, 1, 0)",
        )
        .execute(&pool)
        .await
        .unwrap();

        // Second active row for the same owner violates the partial index.
        let dup = sqlx::query(
            "INSERT INTO array_configs (id, owner_id, raid_level, chunk_size, active, created_at) \
             VALUES ('c2', 'alice', 1, 1048576, 1, 0)",
        )
        .execute(&pool)
        .await;
        assert!(dup.is_err());

        // Inactive history rows are fine.
        sqlx::query(
            "INSERT INTO array_configs (id, owner_id, raid_level, chunk_size, active, created_at) \
             VALUES ('c3', 'alice', 1, 1048576, 0, 0)",
        )
        .execute(&pool)
        .await
        .unwrap();
    }
}
