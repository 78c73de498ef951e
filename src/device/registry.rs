use crate::device::error::{DeviceError, DeviceResult};
use crate::device::monitor::HeartbeatMonitor;
use crate::device::types::{Device, DeviceView};
use crate::metrics::recorder;
use sqlx::{Row, SqlitePool};

/// Registry of one owner's array member devices.
///
/// All mutations are owner-scoped; a caller can never see or touch another
/// owner's devices.
pub struct DeviceRegistry {
    pool: SqlitePool,
    monitor: HeartbeatMonitor,
}

impl DeviceRegistry {
    pub fn new(pool: SqlitePool, monitor: HeartbeatMonitor) -> Self {
        Self { pool, monitor }
    }

    pub fn monitor(&self) -> HeartbeatMonitor {
        self.monitor
    }

    /// Register a new device. It starts online: registration counts as its
    /// first heartbeat.
    pub async fn register(
        &self,
        owner: &str,
        name: &str,
        kind: &str,
        platform: &str,
        capacity_bytes: Option<i64>,
        available_bytes: Option<i64>,
    ) -> DeviceResult<Device> {
        let now = chrono::Utc::now().timestamp();
        let device = Device {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner.to_string(),
            name: name.to_string(),
            kind: kind.to_string(),
            platform: platform.to_string(),
            capacity_bytes,
            available_bytes,
            last_heartbeat: now,
            registered_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO devices
            (id, owner_id, name, kind, platform, capacity_bytes, available_bytes, last_heartbeat, registered_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&device.id)
        .bind(&device.owner_id)
        .bind(&device.name)
        .bind(&device.kind)
        .bind(&device.platform)
        .bind(device.capacity_bytes)
        .bind(device.available_bytes)
        .bind(device.last_heartbeat)
        .bind(device.registered_at)
        .execute(&self.pool)
        .await?;

        recorder::record_device_registered(&device.kind);
        tracing::info!(device_id = %device.id, owner = %owner, "device registered");

        Ok(device)
    }

    /// Record a heartbeat.
    ///
    /// Heartbeats may arrive out of order over flaky networks, so the stored
    /// timestamp only ever moves forward: `max(existing, now)`.
    pub async fn heartbeat(
        &self,
        owner: &str,
        device_id: &str,
        available_bytes: Option<i64>,
    ) -> DeviceResult<Device> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            UPDATE devices
            SET last_heartbeat = MAX(last_heartbeat, ?),
                available_bytes = COALESCE(?, available_bytes)
            WHERE id = ? AND owner_id = ?
            "#,
        )
        .bind(now)
        .bind(available_bytes)
        .bind(device_id)
        .bind(owner)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DeviceError::NotFound(device_id.to_string()));
        }

        recorder::record_heartbeat();
        self.get(owner, device_id).await
    }

    /// Fetch one device, owner-scoped.
    pub async fn get(&self, owner: &str, device_id: &str) -> DeviceResult<Device> {
        let row = sqlx::query("SELECT * FROM devices WHERE id = ? AND owner_id = ?")
            .bind(device_id)
            .bind(owner)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(map_device(&row)?),
            None => Err(DeviceError::NotFound(device_id.to_string())),
        }
    }

    /// List the owner's devices with status derived at call time.
    pub async fn list(&self, owner: &str) -> DeviceResult<Vec<DeviceView>> {
        let rows = sqlx::query("SELECT * FROM devices WHERE owner_id = ? ORDER BY registered_at")
            .bind(owner)
            .fetch_all(&self.pool)
            .await?;

        let now = chrono::Utc::now().timestamp();
        let mut views = Vec::with_capacity(rows.len());
        for row in rows {
            let device = map_device(&row)?;
            views.push(self.monitor.view(&device, now));
        }

        recorder::set_online_devices(views.iter().filter(|v| v.status.is_online()).count());
        Ok(views)
    }

    /// Remove a device. Refused while any chunk location still references
    /// it, so no stored copy can silently lose its ledger entry.
    pub async fn unregister(&self, owner: &str, device_id: &str) -> DeviceResult<()> {
        // Ownership check first: rejected requests leave no partial state.
        self.get(owner, device_id).await?;

        let row =
            sqlx::query("SELECT COUNT(*) as count FROM chunk_locations WHERE device_id = ?")
                .bind(device_id)
                .fetch_one(&self.pool)
                .await?;
        let count: i64 = row.try_get("count")?;
        if count > 0 {
            return Err(DeviceError::HasChunks(device_id.to_string()));
        }

        sqlx::query("DELETE FROM devices WHERE id = ? AND owner_id = ?")
            .bind(device_id)
            .bind(owner)
            .execute(&self.pool)
            .await?;

        tracing::info!(device_id = %device_id, owner = %owner, "device unregistered");
        Ok(())
    }
}

/// Map a `devices` row into a [`Device`].
pub(crate) fn map_device(row: &sqlx::sqlite::SqliteRow) -> Result<Device, sqlx::Error> {
    Ok(Device {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        name: row.try_get("name")?,
        kind: row.try_get("kind")?,
        platform: row.try_get("platform")?,
        capacity_bytes: row.try_get("capacity_bytes")?,
        available_bytes: row.try_get("available_bytes")?,
        last_heartbeat: row.try_get("last_heartbeat")?,
        registered_at: row.try_get("registered_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::device::types::DeviceStatus;

    async fn create_test_registry() -> DeviceRegistry {
        let pool = db::connect_in_memory().await.unwrap();
        DeviceRegistry::new(pool, HeartbeatMonitor::default())
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let registry = create_test_registry().await;

        let device = registry
            .register("alice", "desk", "desktop", "linux", Some(1 << 30), None)
            .await
            .unwrap();

        let loaded = registry.get("alice", &device.id).await.unwrap();
        assert_eq!(loaded.name, "desk");
        assert_eq!(loaded.capacity_bytes, Some(1 << 30));
        assert_eq!(loaded.last_heartbeat, device.registered_at);
    }

    #[tokio::test]
    async fn test_get_is_owner_scoped() {
        let registry = create_test_registry().await;

        let device = registry
            .register("alice", "desk", "desktop", "linux", None, None)
            .await
            .unwrap();

        let result = registry.get("bob", &device.id).await;
        assert!(matches!(result, Err(DeviceError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_heartbeat_updates_available_bytes() {
        let registry = create_test_registry().await;

        let device = registry
            .register("alice", "phone", "phone", "android", Some(1024), Some(1024))
            .await
            .unwrap();

        let updated = registry
            .heartbeat("alice", &device.id, Some(512))
            .await
            .unwrap();
        assert_eq!(updated.available_bytes, Some(512));

        // A heartbeat without a capacity report keeps the last value.
        let updated = registry.heartbeat("alice", &device.id, None).await.unwrap();
        assert_eq!(updated.available_bytes, Some(512));
    }

    #[tokio::test]
    async fn test_heartbeat_never_moves_backwards() {
        let registry = create_test_registry().await;

        let device = registry
            .register("alice", "desk", "desktop", "linux", None, None)
            .await
            .unwrap();

        // Push the stored heartbeat into the future; a new (older) heartbeat
        // must not rewind it.
        let future = chrono::Utc::now().timestamp() + 1_000;
        sqlx::query("UPDATE devices SET last_heartbeat = ? WHERE id = ?")
            .bind(future)
            .bind(&device.id)
            .execute(&registry.pool)
            .await
            .unwrap();

        let updated = registry.heartbeat("alice", &device.id, None).await.unwrap();
        assert_eq!(updated.last_heartbeat, future);
    }

    #[tokio::test]
    async fn test_heartbeat_unknown_device() {
        let registry = create_test_registry().await;
        let result = registry.heartbeat("alice", "missing", None).await;
        assert!(matches!(result, Err(DeviceError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_derives_status() {
        let registry = create_test_registry().await;

        let fresh = registry
            .register("alice", "desk", "desktop", "linux", None, None)
            .await
            .unwrap();
        let stale = registry
            .register("alice", "phone", "phone", "ios", None, None)
            .await
            .unwrap();

        sqlx::query("UPDATE devices SET last_heartbeat = last_heartbeat - 600 WHERE id = ?")
            .bind(&stale.id)
            .execute(&registry.pool)
            .await
            .unwrap();

        let views = registry.list("alice").await.unwrap();
        assert_eq!(views.len(), 2);

        let by_id = |id: &str| views.iter().find(|v| v.device.id == id).unwrap();
        assert_eq!(by_id(&fresh.id).status, DeviceStatus::Online);
        assert_eq!(by_id(&stale.id).status, DeviceStatus::Offline);
        assert!(by_id(&stale.id).minutes_since_seen >= 10);
    }

    #[tokio::test]
    async fn test_unregister_refused_with_locations() {
        let registry = create_test_registry().await;

        let device = registry
            .register("alice", "desk", "desktop", "linux", None, None)
            .await
            .unwrap();

        sqlx::query(
            "INSERT INTO chunk_locations (id, chunk_id, device_id, storage_reference, status) \
             VALUES ('l1', 'c1', ?, 'f/c1', 'stored')",
        )
        .bind(&device.id)
        .execute(&registry.pool)
        .await
        .unwrap();

        let result = registry.unregister("alice", &device.id).await;
        assert!(matches!(result, Err(DeviceError::HasChunks(_))));

        sqlx::query("DELETE FROM chunk_locations WHERE id = 'l1'")
            .execute(&registry.pool)
            .await
            .unwrap();

        registry.unregister("alice", &device.id).await.unwrap();
        assert!(matches!(
            registry.get("alice", &device.id).await,
            Err(DeviceError::NotFound(_))
        ));
    }
}
