//! Healing passes
//!
//! A healing pass scans the active configuration's members, finds the
//! chunk copies stranded on offline devices, marks them
//! `needs_reconstruction`, and appends an audit event. It never moves
//! bytes; rebuilding is the reconstruction engine's job.

use crate::device::registry::map_device;
use crate::device::{Device, HeartbeatMonitor};
use crate::heal::error::{HealError, HealResult};
use crate::heal::types::{HealingEvent, HealingOutcome};
use crate::metrics::recorder;
use sqlx::{Row, SqlitePool};

pub struct HealingCoordinator {
    pool: SqlitePool,
    monitor: HeartbeatMonitor,
}

impl HealingCoordinator {
    pub fn new(pool: SqlitePool, monitor: HeartbeatMonitor) -> Self {
        Self { pool, monitor }
    }

    /// Run one healing pass for an owner.
    ///
    /// When every member is online this is a pure no-op: nothing is marked
    /// and no event is recorded.
    pub async fn heal(&self, owner: &str, triggered_by: &str) -> HealResult<HealingOutcome> {
        let config_row =
            sqlx::query("SELECT id FROM array_configs WHERE owner_id = ? AND active = 1")
                .bind(owner)
                .fetch_optional(&self.pool)
                .await?
                .ok_or(HealError::NotConfigured)?;
        let config_id: String = config_row.try_get("id")?;

        let rows = sqlx::query(
            "SELECT d.* FROM member_devices m \
             JOIN devices d ON d.id = m.device_id \
             WHERE m.config_id = ? ORDER BY m.priority",
        )
        .bind(&config_id)
        .fetch_all(&self.pool)
        .await?;
        let members: Vec<Device> = rows.iter().map(map_device).collect::<Result<_, _>>()?;

        let now = chrono::Utc::now().timestamp();
        let (online, offline) = self.monitor.partition(&members, now);
        if offline.is_empty() {
            return Ok(HealingOutcome {
                offline_count: 0,
                chunks_marked: 0,
                event_id: None,
            });
        }

        // Stored copies held by the offline members, owner-scoped.
        let placeholders = vec!["?"; offline.len()].join(", ");
        let sql = format!(
            "SELECT cl.id, cl.chunk_id FROM chunk_locations cl \
             JOIN chunks c ON c.id = cl.chunk_id \
             JOIN files f ON f.id = c.file_id \
             WHERE f.owner_id = ? AND cl.status = 'stored' AND cl.device_id IN ({placeholders})"
        );
        let mut query = sqlx::query(&sql).bind(owner);
        for device in &offline {
            query = query.bind(&device.id);
        }
        let stranded = query.fetch_all(&self.pool).await?;

        let mut affected: Vec<String> = Vec::new();
        let mut marked = 0usize;
        for row in &stranded {
            let location_id: String = row.try_get("id")?;
            let chunk_id: String = row.try_get("chunk_id")?;

            // Guarded: a concurrent pass or a damage mark wins the race.
            let result = sqlx::query(
                "UPDATE chunk_locations SET status = 'needs_reconstruction' \
                 WHERE id = ? AND status = 'stored'",
            )
            .bind(&location_id)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() > 0 {
                marked += 1;
                if !affected.contains(&chunk_id) {
                    affected.push(chunk_id);
                }
            }
        }

        let event_id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO healing_events \
             (id, owner_id, config_id, triggered_by, offline_devices, online_devices, \
              total_devices, chunks_marked, affected_chunk_ids, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event_id)
        .bind(owner)
        .bind(&config_id)
        .bind(triggered_by)
        .bind(offline.len() as i64)
        .bind(online.len() as i64)
        .bind(members.len() as i64)
        .bind(marked as i64)
        .bind(serde_json::to_string(&affected)?)
        .bind(now)
        .execute(&self.pool)
        .await?;

        recorder::record_healing_event();
        recorder::record_locations_marked(marked);
        tracing::info!(
            owner = %owner,
            event_id = %event_id,
            offline = offline.len(),
            marked,
            triggered_by = %triggered_by,
            "healing pass completed"
        );

        Ok(HealingOutcome {
            offline_count: offline.len(),
            chunks_marked: marked,
            event_id: Some(event_id),
        })
    }

    /// The owner's healing audit log, newest first.
    pub async fn list_events(&self, owner: &str) -> HealResult<Vec<HealingEvent>> {
        let rows = sqlx::query(
            "SELECT * FROM healing_events WHERE owner_id = ? ORDER BY created_at DESC, id",
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let affected: String = row.try_get("affected_chunk_ids")?;
            events.push(HealingEvent {
                id: row.try_get("id")?,
                owner_id: row.try_get("owner_id")?,
                config_id: row.try_get("config_id")?,
                triggered_by: row.try_get("triggered_by")?,
                offline_devices: row.try_get("offline_devices")?,
                online_devices: row.try_get("online_devices")?,
                total_devices: row.try_get("total_devices")?,
                chunks_marked: row.try_get("chunks_marked")?,
                affected_chunk_ids: serde_json::from_str(&affected)?,
                created_at: row.try_get("created_at")?,
            });
        }
        Ok(events)
    }
}
