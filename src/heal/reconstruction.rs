//! Chunk reconstruction
//!
//! Rebuilds the chunks a healing pass (or a failed verification) flagged,
//! using the redundancy the file was uploaded with: XOR of the surviving
//! stripe members at level 5, a surviving replica at levels 1 and 10.
//! Recovered bytes are verified against the chunk's trusted digest and
//! written back to an online member, so the array regains redundancy
//! instead of merely serving the read.

use crate::array::RaidLevel;
use crate::chunk::parity::ParityEngine;
use crate::chunk::store::{map_chunk, map_file, map_location};
use crate::chunk::types::{ChunkLocation, ChunkRecord, FileRecord, LocationStatus};
use crate::device::registry::map_device;
use crate::device::{Device, HeartbeatMonitor};
use crate::heal::error::{HealError, HealResult};
use crate::heal::types::{ReconstructionOutcome, RecoveryMethod};
use crate::integrity::IntegrityVerifier;
use crate::metrics::recorder;
use crate::physical::{ChunkTransform, DeviceStore, PhysicalError};
use bytes::Bytes;
use sqlx::{Row, SqlitePool};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

pub struct ReconstructionEngine {
    pool: SqlitePool,
    device_store: Arc<dyn DeviceStore>,
    transform: Arc<dyn ChunkTransform>,
    monitor: HeartbeatMonitor,
}

impl ReconstructionEngine {
    pub fn new(
        pool: SqlitePool,
        device_store: Arc<dyn DeviceStore>,
        transform: Arc<dyn ChunkTransform>,
        monitor: HeartbeatMonitor,
    ) -> Self {
        Self {
            pool,
            device_store,
            transform,
            monitor,
        }
    }

    /// Recover every chunk of a file that lost a copy.
    ///
    /// A chunk is recovered when it carries a copy flagged for
    /// reconstruction (or caught corrupted), or when no readable copy is
    /// left at all. Recovery always follows the level snapshotted on the
    /// file row, not the current configuration: the file was distributed
    /// under that geometry and only that geometry can put it back together.
    pub async fn reconstruct(
        &self,
        owner: &str,
        file_id: &str,
    ) -> HealResult<ReconstructionOutcome> {
        let started = Instant::now();

        let file = self.file_owned(owner, file_id).await?;
        let level = RaidLevel::from_number(file.raid_level).ok_or_else(|| {
            HealError::Unrecoverable(format!("file has unknown RAID level {}", file.raid_level))
        })?;

        let chunk_rows = sqlx::query("SELECT * FROM chunks WHERE file_id = ? ORDER BY idx")
            .bind(&file.id)
            .fetch_all(&self.pool)
            .await?;
        let chunks: Vec<ChunkRecord> = chunk_rows
            .iter()
            .map(map_chunk)
            .collect::<Result<_, _>>()?;

        let mut locations: HashMap<String, Vec<ChunkLocation>> = HashMap::new();
        for chunk in &chunks {
            let rows = sqlx::query("SELECT * FROM chunk_locations WHERE chunk_id = ?")
                .bind(&chunk.id)
                .fetch_all(&self.pool)
                .await?;
            let locs: Vec<ChunkLocation> =
                rows.iter().map(map_location).collect::<Result<_, _>>()?;
            locations.insert(chunk.id.clone(), locs);
        }

        let members = self.online_members(owner).await?;
        let online_ids: HashSet<&str> = members.iter().map(|d| d.id.as_str()).collect();

        let by_index: HashMap<i64, &ChunkRecord> =
            chunks.iter().map(|c| (c.index, c)).collect();

        let needs_recovery: Vec<&ChunkRecord> = chunks
            .iter()
            .filter(|chunk| {
                let locs = &locations[&chunk.id];
                let readable = locs.iter().any(|l| {
                    l.status == LocationStatus::Stored && online_ids.contains(l.device_id.as_str())
                });
                let flagged = locs.iter().any(|l| {
                    matches!(
                        l.status,
                        LocationStatus::NeedsReconstruction | LocationStatus::Corrupted
                    )
                });
                flagged || !readable
            })
            .collect();

        if needs_recovery.is_empty() {
            return Ok(ReconstructionOutcome {
                file_id: file.id,
                method: None,
                missing_count: 0,
                recovered_chunk_ids: Vec::new(),
            });
        }

        let method = match level {
            RaidLevel::Parity => RecoveryMethod::Parity,
            RaidLevel::Mirror | RaidLevel::MirroredStripes => RecoveryMethod::Mirror,
        };

        let mut recovered = Vec::with_capacity(needs_recovery.len());
        for chunk in &needs_recovery {
            // A surviving verified copy is always the cheapest source.
            let surviving = self
                .read_any_copy(chunk, &locations[&chunk.id], &online_ids)
                .await?;

            let bytes = match (surviving, method) {
                (Some(bytes), _) => bytes,
                (None, RecoveryMethod::Parity) => {
                    self.rebuild_from_stripe(&file, chunk, &by_index, &locations, &online_ids)
                        .await?
                }
                (None, RecoveryMethod::Mirror) => {
                    return Err(HealError::Unrecoverable(format!(
                        "chunk {} has no readable replica",
                        chunk.id
                    )));
                }
            };

            self.persist_recovered(&file, chunk, &bytes, &members, &locations[&chunk.id])
                .await?;

            // Copies stranded on offline devices stay unreadable; now that
            // the data lives elsewhere they are plain losses.
            sqlx::query(
                "UPDATE chunk_locations SET status = 'missing' \
                 WHERE chunk_id = ? AND status IN ('needs_reconstruction', 'corrupted')",
            )
            .bind(&chunk.id)
            .execute(&self.pool)
            .await?;

            recorder::record_chunk_reconstructed();
            recovered.push(chunk.id.clone());
        }

        recorder::record_reconstruction(started.elapsed());
        tracing::info!(
            owner = %owner,
            file_id = %file.id,
            method = method.as_str(),
            recovered = recovered.len(),
            "file reconstructed"
        );

        Ok(ReconstructionOutcome {
            file_id: file.id,
            method: Some(method),
            missing_count: needs_recovery.len(),
            recovered_chunk_ids: recovered,
        })
    }

    /// XOR the surviving members of the chunk's stripe back into the absent
    /// one. Every other member must be readable; single parity tolerates
    /// exactly one hole.
    async fn rebuild_from_stripe(
        &self,
        file: &FileRecord,
        chunk: &ChunkRecord,
        by_index: &HashMap<i64, &ChunkRecord>,
        locations: &HashMap<String, Vec<ChunkLocation>>,
        online_ids: &HashSet<&str>,
    ) -> HealResult<Bytes> {
        let width = file.stripe_width.ok_or_else(|| {
            HealError::Unrecoverable(format!("file {} has no stripe width", file.id))
        })?;
        if width <= 0 {
            return Err(HealError::Unrecoverable(format!(
                "file {} has invalid stripe width",
                file.id
            )));
        }

        let data_count = if file.chunk_size > 0 {
            (file.size_bytes + file.chunk_size - 1) / file.chunk_size
        } else {
            0
        };

        let stripe = if chunk.is_parity {
            chunk.index - data_count
        } else {
            chunk.index / width
        };

        let mut member_indices: Vec<i64> =
            (stripe * width..((stripe + 1) * width).min(data_count)).collect();
        member_indices.push(data_count + stripe);

        let mut survivors = Vec::with_capacity(member_indices.len() - 1);
        for index in member_indices {
            if index == chunk.index {
                continue;
            }
            let member = by_index.get(&index).ok_or_else(|| {
                HealError::Unrecoverable(format!(
                    "stripe member {index} of file {} has no chunk row",
                    file.id
                ))
            })?;
            let bytes = self
                .read_any_copy(member, &locations[&member.id], online_ids)
                .await?
                .ok_or_else(|| {
                    HealError::Unrecoverable(format!(
                        "stripe member {} is also unreadable, single parity cannot fill two holes",
                        member.id
                    ))
                })?;
            survivors.push(bytes);
        }

        // Shorter members were zero-padded into the parity, so the rebuilt
        // stripe-width buffer carries the original bytes in its prefix.
        let rebuilt = ParityEngine::reconstruct_missing(&survivors);
        let size = chunk.size_bytes as usize;
        if rebuilt.len() < size {
            return Err(HealError::Unrecoverable(format!(
                "rebuilt chunk {} is shorter than its recorded size",
                chunk.id
            )));
        }
        let rebuilt = rebuilt.slice(0..size);

        if !IntegrityVerifier::verify_hex(&rebuilt, &chunk.content_hash) {
            recorder::record_integrity_failure();
            return Err(HealError::Unrecoverable(format!(
                "rebuilt chunk {} failed its trusted digest",
                chunk.id
            )));
        }
        Ok(rebuilt)
    }

    /// First stored copy on an online device that passes the trusted
    /// digest. Unreadable copies found along the way are downgraded.
    async fn read_any_copy(
        &self,
        chunk: &ChunkRecord,
        locations: &[ChunkLocation],
        online_ids: &HashSet<&str>,
    ) -> HealResult<Option<Bytes>> {
        for location in locations {
            if location.status != LocationStatus::Stored
                || !online_ids.contains(location.device_id.as_str())
            {
                continue;
            }

            let raw = match self
                .device_store
                .get(&location.device_id, &location.storage_reference)
                .await
            {
                Ok(raw) => raw,
                Err(PhysicalError::NotFound { .. }) => {
                    self.set_status(&location.id, LocationStatus::Missing)
                        .await?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let bytes = self.transform.invert(raw);
            if IntegrityVerifier::verify_hex(&bytes, &chunk.content_hash) {
                return Ok(Some(bytes));
            }

            recorder::record_integrity_failure();
            tracing::warn!(
                chunk_id = %chunk.id,
                device_id = %location.device_id,
                "copy failed trusted digest during reconstruction"
            );
            self.set_status(&location.id, LocationStatus::Corrupted)
                .await?;
        }
        Ok(None)
    }

    /// Write recovered bytes to the highest-priority online member that
    /// holds no copy of the chunk, and record the new stored location.
    async fn persist_recovered(
        &self,
        file: &FileRecord,
        chunk: &ChunkRecord,
        bytes: &Bytes,
        online_members: &[Device],
        locations: &[ChunkLocation],
    ) -> HealResult<()> {
        let holders: HashSet<&str> = locations
            .iter()
            .filter(|l| l.status == LocationStatus::Stored)
            .map(|l| l.device_id.as_str())
            .collect();

        let Some(target) = online_members
            .iter()
            .find(|d| !holders.contains(d.id.as_str()))
        else {
            tracing::warn!(
                chunk_id = %chunk.id,
                "recovered bytes have no online member to land on"
            );
            return Ok(());
        };

        let reference = format!("{}/{}", file.id, chunk.id);
        self.device_store
            .put(&target.id, &reference, self.transform.apply(bytes.clone()))
            .await?;

        sqlx::query(
            "INSERT INTO chunk_locations (id, chunk_id, device_id, storage_reference, status, verified_at) \
             VALUES (?, ?, ?, ?, 'stored', ?) \
             ON CONFLICT (chunk_id, device_id) DO UPDATE \
             SET status = 'stored', storage_reference = excluded.storage_reference, \
                 verified_at = excluded.verified_at",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&chunk.id)
        .bind(&target.id)
        .bind(&reference)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        recorder::record_chunk_stored(bytes.len());
        Ok(())
    }

    /// The active configuration's online members, in priority order.
    async fn online_members(&self, owner: &str) -> HealResult<Vec<Device>> {
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
        Ok(members
            .into_iter()
            .filter(|d| self.monitor.is_online(d, now))
            .collect())
    }

    async fn file_owned(&self, owner: &str, file_id: &str) -> HealResult<FileRecord> {
        let row = sqlx::query("SELECT * FROM files WHERE id = ? AND owner_id = ?")
            .bind(file_id)
            .bind(owner)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(map_file(&row)?),
            None => Err(HealError::FileNotFound(file_id.to_string())),
        }
    }

    async fn set_status(&self, location_id: &str, status: LocationStatus) -> HealResult<()> {
        sqlx::query("UPDATE chunk_locations SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(location_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
