use crate::array::error::{ArrayError, ArrayResult};
use crate::array::types::{
    ArrayConfig, ArrayStatus, ChunkStats, MemberDevice, MemberStatus, RaidLevel,
    DEFAULT_CHUNK_SIZE,
};
use crate::device::registry::map_device;
use crate::device::{Device, HeartbeatMonitor};
use crate::heal::HealthEvaluator;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;

/// Per-owner RAID policy and membership.
///
/// The one-active-config-per-owner invariant lives in the storage layer (a
/// partial unique index), not in process memory: configure() deactivates the
/// prior config and inserts the new one in a single transaction.
pub struct ArrayManager {
    pool: SqlitePool,
    monitor: HeartbeatMonitor,
}

impl ArrayManager {
    pub fn new(pool: SqlitePool, monitor: HeartbeatMonitor) -> Self {
        Self { pool, monitor }
    }

    /// Create and activate a new configuration.
    ///
    /// The device list order becomes member priority and drives round-robin
    /// and pairing at distribution time.
    pub async fn configure(
        &self,
        owner: &str,
        level: u8,
        chunk_size: Option<i64>,
        device_ids: &[String],
    ) -> ArrayResult<ArrayConfig> {
        let level = RaidLevel::from_number(level)
            .ok_or_else(|| ArrayError::Validation(format!("unsupported RAID level {level}")))?;

        let chunk_size = chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE);
        if chunk_size <= 0 {
            return Err(ArrayError::Validation(format!(
                "chunk size must be positive, got {chunk_size}"
            )));
        }

        let unique: HashSet<&String> = device_ids.iter().collect();
        if unique.len() != device_ids.len() {
            return Err(ArrayError::Validation(
                "duplicate device ids in membership list".to_string(),
            ));
        }

        let minimum = level.minimum_devices();
        if device_ids.len() < minimum {
            return Err(ArrayError::Validation(format!(
                "RAID level {} requires at least {minimum} devices, got {}",
                level.number(),
                device_ids.len()
            )));
        }

        // Every member must belong to the caller. Checked before any write.
        let rows = sqlx::query("SELECT id FROM devices WHERE owner_id = ?")
            .bind(owner)
            .fetch_all(&self.pool)
            .await?;
        let owned: HashSet<String> = rows
            .iter()
            .map(|r| r.try_get::<String, _>("id"))
            .collect::<Result<_, _>>()?;
        for id in device_ids {
            if !owned.contains(id) {
                return Err(ArrayError::DeviceNotFound(id.clone()));
            }
        }

        let config = ArrayConfig {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner.to_string(),
            level,
            chunk_size,
            active: true,
            created_at: chrono::Utc::now().timestamp(),
        };

        let mut tx = self.pool.begin().await?;

        // Deactivate, never delete: configuration history is retained.
        sqlx::query("UPDATE array_configs SET active = 0 WHERE owner_id = ? AND active = 1")
            .bind(owner)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO array_configs (id, owner_id, raid_level, chunk_size, active, created_at) \
             VALUES (?, ?, ?, ?, 1, ?)",
        )
        .bind(&config.id)
        .bind(owner)
        .bind(config.level.number() as i64)
        .bind(config.chunk_size)
        .bind(config.created_at)
        .execute(&mut *tx)
        .await?;

        for (priority, device_id) in device_ids.iter().enumerate() {
            sqlx::query(
                "INSERT INTO member_devices (config_id, device_id, priority) VALUES (?, ?, ?)",
            )
            .bind(&config.id)
            .bind(device_id)
            .bind(priority as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::info!(
            owner = %owner,
            config_id = %config.id,
            level = config.level.number(),
            members = device_ids.len(),
            "array configured"
        );

        Ok(config)
    }

    /// The owner's active configuration, if any.
    pub async fn active_config(&self, owner: &str) -> ArrayResult<Option<ArrayConfig>> {
        let row = sqlx::query("SELECT * FROM array_configs WHERE owner_id = ? AND active = 1")
            .bind(owner)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| map_config(&r)).transpose().map_err(Into::into)
    }

    /// Member rows of a configuration, in priority order.
    pub async fn members(&self, config_id: &str) -> ArrayResult<Vec<MemberDevice>> {
        let rows =
            sqlx::query("SELECT * FROM member_devices WHERE config_id = ? ORDER BY priority")
                .bind(config_id)
                .fetch_all(&self.pool)
                .await?;

        rows.iter()
            .map(|r| {
                Ok(MemberDevice {
                    config_id: r.try_get("config_id")?,
                    device_id: r.try_get("device_id")?,
                    priority: r.try_get("priority")?,
                })
            })
            .collect()
    }

    /// Member devices joined with their device rows, in priority order.
    pub async fn member_devices(&self, config_id: &str) -> ArrayResult<Vec<Device>> {
        let rows = sqlx::query(
            "SELECT d.* FROM member_devices m \
             JOIN devices d ON d.id = m.device_id \
             WHERE m.config_id = ? ORDER BY m.priority",
        )
        .bind(config_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| map_device(r).map_err(Into::into))
            .collect()
    }

    /// Current array snapshot. Health is recomputed from live heartbeat
    /// staleness on every call, so it flips on the very next read after the
    /// online count drops below the level's minimum.
    pub async fn status(&self, owner: &str) -> ArrayResult<ArrayStatus> {
        let chunk_stats = self.chunk_stats(owner).await?;

        let Some(config) = self.active_config(owner).await? else {
            return Ok(ArrayStatus {
                configured: false,
                config: None,
                members: Vec::new(),
                online_devices: 0,
                total_devices: 0,
                health: None,
                chunk_stats,
            });
        };

        let rows = sqlx::query(
            "SELECT d.*, m.priority FROM member_devices m \
             JOIN devices d ON d.id = m.device_id \
             WHERE m.config_id = ? ORDER BY m.priority",
        )
        .bind(&config.id)
        .fetch_all(&self.pool)
        .await?;

        let now = chrono::Utc::now().timestamp();
        let mut members = Vec::with_capacity(rows.len());
        for row in &rows {
            let device = map_device(row)?;
            members.push(MemberStatus {
                status: self.monitor.status_of(&device, now),
                minutes_since_seen: self.monitor.minutes_since_seen(&device, now),
                device_id: device.id,
                name: device.name,
                priority: row.try_get("priority")?,
            });
        }

        let online_devices = members.iter().filter(|m| m.status.is_online()).count();
        let health = HealthEvaluator::evaluate(config.minimum_devices(), online_devices);

        Ok(ArrayStatus {
            configured: true,
            online_devices,
            total_devices: members.len(),
            health: Some(health),
            config: Some(config),
            members,
            chunk_stats,
        })
    }

    /// Deactivate the active configuration (soft delete). Refused while the
    /// owner still has any chunk.
    pub async fn delete_config(&self, owner: &str) -> ArrayResult<()> {
        let row = sqlx::query(
            "SELECT COUNT(*) as count FROM chunks c \
             JOIN files f ON f.id = c.file_id WHERE f.owner_id = ?",
        )
        .bind(owner)
        .fetch_one(&self.pool)
        .await?;
        let count: i64 = row.try_get("count")?;
        if count > 0 {
            return Err(ArrayError::HasChunks);
        }

        let result =
            sqlx::query("UPDATE array_configs SET active = 0 WHERE owner_id = ? AND active = 1")
                .bind(owner)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(ArrayError::NotConfigured);
        }

        tracing::info!(owner = %owner, "array configuration deactivated");
        Ok(())
    }

    /// Aggregate chunk statistics for the owner's files.
    async fn chunk_stats(&self, owner: &str) -> ArrayResult<ChunkStats> {
        let mut stats = ChunkStats::default();

        let row = sqlx::query("SELECT COUNT(*) as count FROM files WHERE owner_id = ?")
            .bind(owner)
            .fetch_one(&self.pool)
            .await?;
        stats.files = row.try_get("count")?;

        let row = sqlx::query(
            "SELECT \
               COALESCE(SUM(CASE WHEN c.is_parity = 0 THEN 1 ELSE 0 END), 0) as data_chunks, \
               COALESCE(SUM(CASE WHEN c.is_parity = 1 THEN 1 ELSE 0 END), 0) as parity_chunks, \
               COALESCE(SUM(c.size_bytes), 0) as total_bytes \
             FROM chunks c JOIN files f ON f.id = c.file_id WHERE f.owner_id = ?",
        )
        .bind(owner)
        .fetch_one(&self.pool)
        .await?;
        stats.data_chunks = row.try_get("data_chunks")?;
        stats.parity_chunks = row.try_get("parity_chunks")?;
        stats.total_bytes = row.try_get("total_bytes")?;

        let rows = sqlx::query(
            "SELECT cl.status, COUNT(*) as count FROM chunk_locations cl \
             JOIN chunks c ON c.id = cl.chunk_id \
             JOIN files f ON f.id = c.file_id \
             WHERE f.owner_id = ? GROUP BY cl.status",
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;
        for row in rows {
            let status: String = row.try_get("status")?;
            let count: i64 = row.try_get("count")?;
            match status.as_str() {
                "pending" => stats.pending_locations = count,
                "stored" => stats.stored_locations = count,
                "corrupted" => stats.corrupted_locations = count,
                "missing" => stats.missing_locations = count,
                "needs_reconstruction" => stats.needs_reconstruction_locations = count,
                other => tracing::warn!(status = %other, "unknown chunk location status"),
            }
        }

        Ok(stats)
    }
}

fn map_config(row: &sqlx::sqlite::SqliteRow) -> Result<ArrayConfig, sqlx::Error> {
    let level: i64 = row.try_get("raid_level")?;
    let level = RaidLevel::from_number(level as u8)
        .ok_or_else(|| sqlx::Error::Decode(format!("unknown RAID level {level}").into()))?;

    Ok(ArrayConfig {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        level,
        chunk_size: row.try_get("chunk_size")?,
        active: row.try_get("active")?,
        created_at: row.try_get("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::device::DeviceRegistry;
    use crate::heal::ArrayHealth;

    async fn setup() -> (ArrayManager, DeviceRegistry, SqlitePool) {
        let pool = db::connect_in_memory().await.unwrap();
        let monitor = HeartbeatMonitor::default();
        (
            ArrayManager::new(pool.clone(), monitor),
            DeviceRegistry::new(pool.clone(), monitor),
            pool,
        )
    }

    async fn register_devices(registry: &DeviceRegistry, owner: &str, n: usize) -> Vec<String> {
        let mut ids = Vec::new();
        for i in 0..n {
            let d = registry
                .register(owner, &format!("dev-{i}"), "desktop", "linux", None, None)
                .await
                .unwrap();
            ids.push(d.id);
        }
        ids
    }

    #[tokio::test]
    async fn test_configure_boundary_counts() {
        let (manager, registry, _pool) = setup().await;
        let ids = register_devices(&registry, "alice", 4).await;

        // Exact minimums are accepted.
        assert!(manager.configure("alice", 1, None, &ids[..2]).await.is_ok());
        assert!(manager.configure("alice", 5, None, &ids[..3]).await.is_ok());
        assert!(manager.configure("alice", 10, None, &ids[..4]).await.is_ok());

        // One below each minimum is rejected.
        for (level, count) in [(1u8, 1usize), (5, 2), (10, 3)] {
            let result = manager.configure("alice", level, None, &ids[..count]).await;
            assert!(
                matches!(result, Err(ArrayError::Validation(_))),
                "level {level} with {count} devices"
            );
        }
    }

    #[tokio::test]
    async fn test_configure_rejects_bad_level_and_foreign_devices() {
        let (manager, registry, _pool) = setup().await;
        let ids = register_devices(&registry, "alice", 2).await;
        let foreign = register_devices(&registry, "bob", 1).await;

        let result = manager.configure("alice", 6, None, &ids).await;
        assert!(matches!(result, Err(ArrayError::Validation(_))));

        let mut mixed = ids.clone();
        mixed.push(foreign[0].clone());
        let result = manager.configure("alice", 5, None, &mixed).await;
        assert!(matches!(result, Err(ArrayError::DeviceNotFound(_))));

        let dup = vec![ids[0].clone(), ids[0].clone(), ids[1].clone()];
        let result = manager.configure("alice", 5, None, &dup).await;
        assert!(matches!(result, Err(ArrayError::Validation(_))));
    }

    #[tokio::test]
    async fn test_reconfigure_deactivates_prior() {
        let (manager, registry, _pool) = setup().await;
        let ids = register_devices(&registry, "alice", 3).await;

        let first = manager.configure("alice", 1, None, &ids[..2]).await.unwrap();
        let second = manager.configure("alice", 5, None, &ids).await.unwrap();

        let active = manager.active_config("alice").await.unwrap().unwrap();
        assert_eq!(active.id, second.id);

        // The prior config is history, not gone.
        let row = sqlx::query("SELECT active FROM array_configs WHERE id = ?")
            .bind(&first.id)
            .fetch_one(&manager.pool)
            .await
            .unwrap();
        let active_flag: bool = row.try_get("active").unwrap();
        assert!(!active_flag);
    }

    #[tokio::test]
    async fn test_member_priority_follows_list_order() {
        let (manager, registry, _pool) = setup().await;
        let mut ids = register_devices(&registry, "alice", 3).await;
        ids.reverse();

        let config = manager.configure("alice", 5, None, &ids).await.unwrap();
        let members = manager.members(&config.id).await.unwrap();

        let ordered: Vec<String> = members.into_iter().map(|m| m.device_id).collect();
        assert_eq!(ordered, ids);
    }

    #[tokio::test]
    async fn test_status_health_flips_without_lag() {
        let (manager, registry, pool) = setup().await;
        let ids = register_devices(&registry, "alice", 3).await;
        manager.configure("alice", 5, None, &ids).await.unwrap();

        let status = manager.status("alice").await.unwrap();
        assert_eq!(status.health, Some(ArrayHealth::Healthy));
        assert_eq!(status.online_devices, 3);

        // Make one member stale; the very next status() call reports
        // degraded.
        sqlx::query("UPDATE devices SET last_heartbeat = last_heartbeat - 600 WHERE id = ?")
            .bind(&ids[1])
            .execute(&pool)
            .await
            .unwrap();

        let status = manager.status("alice").await.unwrap();
        assert_eq!(status.health, Some(ArrayHealth::Degraded));
        assert_eq!(status.online_devices, 2);
        assert_eq!(status.total_devices, 3);
    }

    #[tokio::test]
    async fn test_status_unconfigured() {
        let (manager, _registry, _pool) = setup().await;
        let status = manager.status("alice").await.unwrap();
        assert!(!status.configured);
        assert!(status.config.is_none());
        assert!(status.health.is_none());
    }

    #[tokio::test]
    async fn test_delete_config_refused_with_chunks() {
        let (manager, registry, pool) = setup().await;
        let ids = register_devices(&registry, "alice", 2).await;
        manager.configure("alice", 1, None, &ids).await.unwrap();

        sqlx::query(
            "INSERT INTO files (id, owner_id, name, size_bytes, content_hash, raid_level, chunk_size, created_at) \
             VALUES ('f1', 'alice', 'a.bin', 4, 'h', 1, 4, 0)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO chunks (id, file_id, idx, size_bytes, content_hash, is_parity, created_at) \
             VALUES ('c1', 'f1', 0, 4, 'h', 0, 0)",
        )
        .execute(&pool)
        .await
        .unwrap();

        let result = manager.delete_config("alice").await;
        assert!(matches!(result, Err(ArrayError::HasChunks)));

        sqlx::query("DELETE FROM chunks WHERE id = 'c1'")
            .execute(&pool)
            .await
            .unwrap();

        manager.delete_config("alice").await.unwrap();
        assert!(manager.active_config("alice").await.unwrap().is_none());

        let result = manager.delete_config("alice").await;
        assert!(matches!(result, Err(ArrayError::NotConfigured)));
    }
}
