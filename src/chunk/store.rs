//! Chunk ledger and transfer pipeline
//!
//! Upload flow: split into chunks, compute stripe parity when the level
//! calls for it, hash every produced chunk, plan the distribution, and
//! commit file + chunk + pending location rows in one transaction, so a
//! split's output is never persisted without its complete plan. Physical
//! transfers then fan out with bounded concurrency, and a location is only
//! promoted to `stored` after the written bytes are read back and verified
//! against the chunk's trusted digest.

use crate::array::{DistributionPlanner, RaidLevel};
use crate::chunk::error::{ChunkError, ChunkResult};
use crate::chunk::parity::ParityEngine;
use crate::chunk::splitter::ChunkSplitter;
use crate::chunk::types::{
    ChunkLocation, ChunkRecord, ChunkSummary, FileRecord, LocationStatus, LocationSummary,
    StoredChunkReceipt, UploadReport, VerifyReport,
};
use crate::device::registry::map_device;
use crate::device::{Device, HeartbeatMonitor};
use crate::integrity::IntegrityVerifier;
use crate::metrics::recorder;
use crate::physical::{ChunkTransform, DeviceStore, PhysicalError};
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct ChunkStoreConfig {
    /// Budget for one physical put or get; expiry leaves the location
    /// `pending`.
    pub transfer_timeout: Duration,

    /// Concurrent physical transfers per upload.
    pub max_parallel_transfers: usize,
}

impl Default for ChunkStoreConfig {
    fn default() -> Self {
        Self {
            transfer_timeout: Duration::from_secs(30),
            max_parallel_transfers: num_cpus::get(),
        }
    }
}

/// One planned physical write.
struct TransferJob {
    location_id: String,
    chunk_id: String,
    device_id: String,
    reference: String,
    expected_hash: String,
    bytes: Bytes,
}

pub struct ChunkStore {
    pool: SqlitePool,
    device_store: Arc<dyn DeviceStore>,
    transform: Arc<dyn ChunkTransform>,
    monitor: HeartbeatMonitor,
    config: ChunkStoreConfig,
}

impl ChunkStore {
    pub fn new(
        pool: SqlitePool,
        device_store: Arc<dyn DeviceStore>,
        transform: Arc<dyn ChunkTransform>,
        monitor: HeartbeatMonitor,
        config: ChunkStoreConfig,
    ) -> Self {
        Self {
            pool,
            device_store,
            transform,
            monitor,
            config,
        }
    }

    /// Upload a whole file under the owner's active configuration.
    pub async fn upload_file(
        &self,
        owner: &str,
        name: &str,
        data: Bytes,
    ) -> ChunkResult<UploadReport> {
        let started = Instant::now();
        let now = chrono::Utc::now().timestamp();

        let mut tx = self.pool.begin().await?;

        // The active-config read and every planned location row commit
        // together; a concurrent reconfigure either sees all of this
        // upload's rows or none.
        let config_row =
            sqlx::query("SELECT * FROM array_configs WHERE owner_id = ? AND active = 1")
                .bind(owner)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(crate::array::ArrayError::NotConfigured)?;
        let config_id: String = config_row.try_get("id")?;
        let level_number: i64 = config_row.try_get("raid_level")?;
        let level = RaidLevel::from_number(level_number as u8).ok_or_else(|| {
            sqlx::Error::Decode(format!("unknown RAID level {level_number}").into())
        })?;
        let chunk_size: i64 = config_row.try_get("chunk_size")?;

        let member_rows = sqlx::query(
            "SELECT d.* FROM member_devices m \
             JOIN devices d ON d.id = m.device_id \
             WHERE m.config_id = ? ORDER BY m.priority",
        )
        .bind(&config_id)
        .fetch_all(&mut *tx)
        .await?;
        let members: Vec<Device> = member_rows
            .iter()
            .map(map_device)
            .collect::<Result<_, _>>()?;

        let eligible: Vec<String> = members
            .iter()
            .filter(|d| {
                self.monitor.is_online(d, now) && d.available_bytes.map_or(true, |a| a > 0)
            })
            .map(|d| d.id.clone())
            .collect();

        let data_slices = ChunkSplitter::split(&data, chunk_size as usize);
        let plan = DistributionPlanner::plan(level, &eligible, data_slices.len())?;

        let mut produced: Vec<(usize, Bytes, bool)> = data_slices
            .iter()
            .enumerate()
            .map(|(i, b)| (i, b.clone(), false))
            .collect();
        if let Some(width) = plan.stripe_width {
            for s in 0..plan.parity_chunk_count {
                let start = s * width;
                let end = ((s + 1) * width).min(data_slices.len());
                let parity = ParityEngine::parity(&data_slices[start..end]);
                produced.push((data_slices.len() + s, parity, true));
            }
        }

        let file_id = uuid::Uuid::new_v4().to_string();
        let file_hash = IntegrityVerifier::digest_hex(&data);

        sqlx::query(
            "INSERT INTO files \
             (id, owner_id, name, size_bytes, content_hash, raid_level, chunk_size, stripe_width, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&file_id)
        .bind(owner)
        .bind(name)
        .bind(data.len() as i64)
        .bind(&file_hash)
        .bind(level.number() as i64)
        .bind(chunk_size)
        .bind(plan.stripe_width.map(|w| w as i64))
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let mut jobs = Vec::with_capacity(plan.location_count());
        for (index, bytes, is_parity) in &produced {
            let chunk_id = uuid::Uuid::new_v4().to_string();
            let hash = IntegrityVerifier::digest_hex(bytes);

            sqlx::query(
                "INSERT INTO chunks (id, file_id, idx, size_bytes, content_hash, is_parity, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&chunk_id)
            .bind(&file_id)
            .bind(*index as i64)
            .bind(bytes.len() as i64)
            .bind(&hash)
            .bind(*is_parity)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            let reference = format!("{file_id}/{chunk_id}");
            for device_id in &plan.assignments[index] {
                let location_id = uuid::Uuid::new_v4().to_string();
                sqlx::query(
                    "INSERT INTO chunk_locations (id, chunk_id, device_id, storage_reference, status) \
                     VALUES (?, ?, ?, ?, 'pending')",
                )
                .bind(&location_id)
                .bind(&chunk_id)
                .bind(device_id)
                .bind(&reference)
                .execute(&mut *tx)
                .await?;

                jobs.push(TransferJob {
                    location_id,
                    chunk_id: chunk_id.clone(),
                    device_id: device_id.clone(),
                    reference: reference.clone(),
                    expected_hash: hash.clone(),
                    bytes: bytes.clone(),
                });
            }
        }

        tx.commit().await?;

        // Physical transfers run outside the transaction: a failed or
        // stalled target simply keeps its `pending` row and can be retried
        // without disturbing siblings.
        let locations_planned = jobs.len();
        let transfers: Vec<_> = jobs.iter().map(|job| self.transfer_one(job)).collect();
        let locations_stored = stream::iter(transfers)
            .buffer_unordered(self.config.max_parallel_transfers)
            .filter(|stored| futures::future::ready(*stored))
            .count()
            .await;

        recorder::record_upload(started.elapsed(), data.len());
        tracing::info!(
            owner = %owner,
            file_id = %file_id,
            data_chunks = data_slices.len(),
            parity_chunks = plan.parity_chunk_count,
            locations_stored,
            locations_planned,
            "file uploaded"
        );

        Ok(UploadReport {
            file_id,
            name: name.to_string(),
            size_bytes: data.len() as i64,
            content_hash: file_hash,
            data_chunks: data_slices.len(),
            parity_chunks: plan.parity_chunk_count,
            locations_planned,
            locations_stored,
        })
    }

    /// Upload one chunk to one device (the chunk-level wire operation).
    ///
    /// Creates the chunk row on first sight; afterwards the recorded digest
    /// is authoritative and re-supplied bytes must match it.
    pub async fn put_chunk(
        &self,
        owner: &str,
        chunk_id: &str,
        file_id: &str,
        index: i64,
        device_id: &str,
        bytes: Bytes,
    ) -> ChunkResult<StoredChunkReceipt> {
        let file = self.file_owned(owner, file_id).await?;
        self.device_owned(owner, device_id).await?;

        let hash = IntegrityVerifier::digest_hex(&bytes);
        let existing = sqlx::query("SELECT * FROM chunks WHERE id = ?")
            .bind(chunk_id)
            .fetch_optional(&self.pool)
            .await?;

        let hash = match existing {
            Some(row) => {
                let chunk = map_chunk(&row)?;
                if chunk.file_id != file.id {
                    return Err(ChunkError::ChunkNotFound(chunk_id.to_string()));
                }
                if !IntegrityVerifier::verify_hex(&bytes, &chunk.content_hash) {
                    recorder::record_integrity_failure();
                    return Err(ChunkError::HashMismatch {
                        chunk_id: chunk_id.to_string(),
                        device_id: device_id.to_string(),
                    });
                }
                chunk.content_hash
            }
            None => {
                let data_chunks = if file.chunk_size > 0 {
                    (file.size_bytes + file.chunk_size - 1) / file.chunk_size
                } else {
                    0
                };
                let is_parity = index >= data_chunks;
                sqlx::query(
                    "INSERT INTO chunks (id, file_id, idx, size_bytes, content_hash, is_parity, created_at) \
                     VALUES (?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(chunk_id)
                .bind(&file.id)
                .bind(index)
                .bind(bytes.len() as i64)
                .bind(&hash)
                .bind(is_parity)
                .bind(chrono::Utc::now().timestamp())
                .execute(&self.pool)
                .await?;
                hash
            }
        };

        let reference = format!("{file_id}/{chunk_id}");
        self.write_verified(chunk_id, device_id, &reference, &bytes, &hash)
            .await?;

        sqlx::query(
            "INSERT INTO chunk_locations (id, chunk_id, device_id, storage_reference, status, verified_at) \
             VALUES (?, ?, ?, ?, 'stored', ?) \
             ON CONFLICT (chunk_id, device_id) DO UPDATE \
             SET status = 'stored', storage_reference = excluded.storage_reference, \
                 verified_at = excluded.verified_at",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(chunk_id)
        .bind(device_id)
        .bind(&reference)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        recorder::record_chunk_stored(bytes.len());

        Ok(StoredChunkReceipt {
            chunk_id: chunk_id.to_string(),
            hash,
            size: bytes.len(),
        })
    }

    /// Read one copy back and check it against the trusted digest.
    ///
    /// A mismatch marks that location `corrupted` (the chunk row and its
    /// other copies are untouched) and surfaces as an integrity error.
    pub async fn download(
        &self,
        owner: &str,
        chunk_id: &str,
        device_id: &str,
    ) -> ChunkResult<(Bytes, String)> {
        let chunk = self.chunk_owned(owner, chunk_id).await?;
        let location = self.location_of(chunk_id, device_id).await?;
        let device = self.device_owned(owner, device_id).await?;

        let now = chrono::Utc::now().timestamp();
        if !self.monitor.is_online(&device, now) {
            return Err(ChunkError::DeviceOffline(device_id.to_string()));
        }

        let raw = match tokio::time::timeout(
            self.config.transfer_timeout,
            self.device_store.get(device_id, &location.storage_reference),
        )
        .await
        {
            Err(_) => return Err(ChunkError::TransferTimeout(device_id.to_string())),
            Ok(Err(e @ PhysicalError::NotFound { .. })) => {
                self.set_location_status(&location.id, LocationStatus::Missing)
                    .await?;
                return Err(e.into());
            }
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok(raw)) => raw,
        };

        let bytes = self.transform.invert(raw);
        if !IntegrityVerifier::verify_hex(&bytes, &chunk.content_hash) {
            self.set_location_status(&location.id, LocationStatus::Corrupted)
                .await?;
            recorder::record_integrity_failure();
            tracing::warn!(chunk_id = %chunk_id, device_id = %device_id, "chunk failed trusted digest");
            return Err(ChunkError::HashMismatch {
                chunk_id: chunk_id.to_string(),
                device_id: device_id.to_string(),
            });
        }

        // A verified read refreshes verified_at and may confirm a pending
        // write; it never overrides a damage mark taken elsewhere.
        sqlx::query(
            "UPDATE chunk_locations SET status = 'stored', verified_at = ? \
             WHERE id = ? AND status IN ('pending', 'stored')",
        )
        .bind(now)
        .bind(&location.id)
        .execute(&self.pool)
        .await?;

        Ok((bytes, chunk.content_hash))
    }

    /// Verify one copy without returning its bytes.
    pub async fn verify(
        &self,
        owner: &str,
        chunk_id: &str,
        device_id: &str,
    ) -> ChunkResult<VerifyReport> {
        let valid = match self.download(owner, chunk_id, device_id).await {
            Ok(_) => true,
            Err(ChunkError::HashMismatch { .. }) => false,
            Err(ChunkError::Physical(PhysicalError::NotFound { .. })) => false,
            Err(e) => return Err(e),
        };

        Ok(VerifyReport {
            chunk_id: chunk_id.to_string(),
            device_id: device_id.to_string(),
            valid,
        })
    }

    /// Remove one copy: bytes first, then the ledger row.
    pub async fn delete_location(
        &self,
        owner: &str,
        chunk_id: &str,
        device_id: &str,
    ) -> ChunkResult<()> {
        self.chunk_owned(owner, chunk_id).await?;
        let location = self.location_of(chunk_id, device_id).await?;

        self.device_store
            .delete(device_id, &location.storage_reference)
            .await?;
        sqlx::query("DELETE FROM chunk_locations WHERE id = ?")
            .bind(&location.id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Remove every copy of a chunk, then the chunk row itself.
    pub async fn delete_chunk(&self, owner: &str, chunk_id: &str) -> ChunkResult<()> {
        let chunk = self.chunk_owned(owner, chunk_id).await?;
        self.delete_chunk_rows(&chunk).await
    }

    /// Delete a file: every chunk's copies and rows, then the file row.
    pub async fn delete_file(&self, owner: &str, file_id: &str) -> ChunkResult<()> {
        let file = self.file_owned(owner, file_id).await?;

        let rows = sqlx::query("SELECT * FROM chunks WHERE file_id = ?")
            .bind(&file.id)
            .fetch_all(&self.pool)
            .await?;
        for row in rows {
            let chunk = map_chunk(&row)?;
            self.delete_chunk_rows(&chunk).await?;
        }

        sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(&file.id)
            .execute(&self.pool)
            .await?;

        tracing::info!(owner = %owner, file_id = %file_id, "file deleted");
        Ok(())
    }

    /// A file's chunks with their per-device fan-out, ordered by index.
    pub async fn list_for_file(&self, owner: &str, file_id: &str) -> ChunkResult<Vec<ChunkSummary>> {
        let file = self.file_owned(owner, file_id).await?;

        let rows = sqlx::query("SELECT * FROM chunks WHERE file_id = ? ORDER BY idx")
            .bind(&file.id)
            .fetch_all(&self.pool)
            .await?;

        let mut summaries = Vec::with_capacity(rows.len());
        for row in rows {
            summaries.push(self.summarize(map_chunk(&row)?).await?);
        }
        Ok(summaries)
    }

    /// All of the owner's chunks holding a copy marked for reconstruction.
    pub async fn list_needing_reconstruction(&self, owner: &str) -> ChunkResult<Vec<ChunkSummary>> {
        let rows = sqlx::query(
            "SELECT DISTINCT c.* FROM chunks c \
             JOIN files f ON f.id = c.file_id \
             JOIN chunk_locations cl ON cl.chunk_id = c.id \
             WHERE f.owner_id = ? AND cl.status = 'needs_reconstruction' \
             ORDER BY c.file_id, c.idx",
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        let mut summaries = Vec::with_capacity(rows.len());
        for row in rows {
            summaries.push(self.summarize(map_chunk(&row)?).await?);
        }
        Ok(summaries)
    }

    /// Fetch a file owned by the caller.
    pub async fn file_owned(&self, owner: &str, file_id: &str) -> ChunkResult<FileRecord> {
        let row = sqlx::query("SELECT * FROM files WHERE id = ? AND owner_id = ?")
            .bind(file_id)
            .bind(owner)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(map_file(&row)?),
            None => Err(ChunkError::FileNotFound(file_id.to_string())),
        }
    }

    async fn chunk_owned(&self, owner: &str, chunk_id: &str) -> ChunkResult<ChunkRecord> {
        let row = sqlx::query(
            "SELECT c.* FROM chunks c JOIN files f ON f.id = c.file_id \
             WHERE c.id = ? AND f.owner_id = ?",
        )
        .bind(chunk_id)
        .bind(owner)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(map_chunk(&row)?),
            None => Err(ChunkError::ChunkNotFound(chunk_id.to_string())),
        }
    }

    async fn device_owned(&self, owner: &str, device_id: &str) -> ChunkResult<Device> {
        let row = sqlx::query("SELECT * FROM devices WHERE id = ? AND owner_id = ?")
            .bind(device_id)
            .bind(owner)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(map_device(&row)?),
            None => Err(ChunkError::DeviceNotFound(device_id.to_string())),
        }
    }

    async fn location_of(&self, chunk_id: &str, device_id: &str) -> ChunkResult<ChunkLocation> {
        let row = sqlx::query("SELECT * FROM chunk_locations WHERE chunk_id = ? AND device_id = ?")
            .bind(chunk_id)
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(map_location(&row)?),
            None => Err(ChunkError::LocationNotFound {
                chunk_id: chunk_id.to_string(),
                device_id: device_id.to_string(),
            }),
        }
    }

    async fn summarize(&self, chunk: ChunkRecord) -> ChunkResult<ChunkSummary> {
        let rows = sqlx::query(
            "SELECT * FROM chunk_locations WHERE chunk_id = ? ORDER BY device_id",
        )
        .bind(&chunk.id)
        .fetch_all(&self.pool)
        .await?;

        let mut locations = Vec::with_capacity(rows.len());
        for row in rows {
            let location = map_location(&row)?;
            locations.push(LocationSummary {
                device_id: location.device_id,
                status: location.status,
                verified_at: location.verified_at,
            });
        }

        Ok(ChunkSummary {
            chunk_id: chunk.id,
            file_id: chunk.file_id,
            index: chunk.index,
            size_bytes: chunk.size_bytes,
            content_hash: chunk.content_hash,
            is_parity: chunk.is_parity,
            locations,
        })
    }

    async fn delete_chunk_rows(&self, chunk: &ChunkRecord) -> ChunkResult<()> {
        let rows = sqlx::query("SELECT * FROM chunk_locations WHERE chunk_id = ?")
            .bind(&chunk.id)
            .fetch_all(&self.pool)
            .await?;
        for row in rows {
            let location = map_location(&row)?;
            // Best-effort physical cleanup; a vanished device must not
            // block the ledger delete.
            if let Err(e) = self
                .device_store
                .delete(&location.device_id, &location.storage_reference)
                .await
            {
                tracing::warn!(
                    chunk_id = %chunk.id,
                    device_id = %location.device_id,
                    error = %e,
                    "physical delete failed"
                );
            }
        }

        sqlx::query("DELETE FROM chunk_locations WHERE chunk_id = ?")
            .bind(&chunk.id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM chunks WHERE id = ?")
            .bind(&chunk.id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn set_location_status(
        &self,
        location_id: &str,
        status: LocationStatus,
    ) -> ChunkResult<()> {
        sqlx::query("UPDATE chunk_locations SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(location_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Write, read back, and verify one payload on one device.
    async fn write_verified(
        &self,
        chunk_id: &str,
        device_id: &str,
        reference: &str,
        bytes: &Bytes,
        expected_hash: &str,
    ) -> ChunkResult<()> {
        let payload = self.transform.apply(bytes.clone());
        tokio::time::timeout(
            self.config.transfer_timeout,
            self.device_store.put(device_id, reference, payload),
        )
        .await
        .map_err(|_| ChunkError::TransferTimeout(device_id.to_string()))??;

        let raw = tokio::time::timeout(
            self.config.transfer_timeout,
            self.device_store.get(device_id, reference),
        )
        .await
        .map_err(|_| ChunkError::TransferTimeout(device_id.to_string()))??;

        let read_back = self.transform.invert(raw);
        if !IntegrityVerifier::verify_hex(&read_back, expected_hash) {
            recorder::record_integrity_failure();
            return Err(ChunkError::HashMismatch {
                chunk_id: chunk_id.to_string(),
                device_id: device_id.to_string(),
            });
        }
        Ok(())
    }

    /// Run one upload transfer; returns whether the location was promoted.
    async fn transfer_one(&self, job: &TransferJob) -> bool {
        if let Err(e) = self
            .write_verified(
                &job.chunk_id,
                &job.device_id,
                &job.reference,
                &job.bytes,
                &job.expected_hash,
            )
            .await
        {
            tracing::warn!(
                chunk_id = %job.chunk_id,
                device_id = %job.device_id,
                error = %e,
                "transfer failed, location stays pending"
            );
            return false;
        }

        let promoted = sqlx::query(
            "UPDATE chunk_locations SET status = 'stored', verified_at = ? \
             WHERE id = ? AND status = 'pending'",
        )
        .bind(chrono::Utc::now().timestamp())
        .bind(&job.location_id)
        .execute(&self.pool)
        .await;

        match promoted {
            Ok(result) if result.rows_affected() > 0 => {
                recorder::record_chunk_stored(job.bytes.len());
                true
            }
            Ok(_) => false,
            Err(e) => {
                tracing::warn!(location_id = %job.location_id, error = %e, "promotion failed");
                false
            }
        }
    }
}

pub(crate) fn map_file(row: &sqlx::sqlite::SqliteRow) -> Result<FileRecord, sqlx::Error> {
    Ok(FileRecord {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        name: row.try_get("name")?,
        size_bytes: row.try_get("size_bytes")?,
        content_hash: row.try_get("content_hash")?,
        raid_level: row.try_get::<i64, _>("raid_level")? as u8,
        chunk_size: row.try_get("chunk_size")?,
        stripe_width: row.try_get("stripe_width")?,
        created_at: row.try_get("created_at")?,
    })
}

pub(crate) fn map_chunk(row: &sqlx::sqlite::SqliteRow) -> Result<ChunkRecord, sqlx::Error> {
    Ok(ChunkRecord {
        id: row.try_get("id")?,
        file_id: row.try_get("file_id")?,
        index: row.try_get("idx")?,
        size_bytes: row.try_get("size_bytes")?,
        content_hash: row.try_get("content_hash")?,
        is_parity: row.try_get("is_parity")?,
        created_at: row.try_get("created_at")?,
    })
}

pub(crate) fn map_location(row: &sqlx::sqlite::SqliteRow) -> Result<ChunkLocation, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let status = LocationStatus::parse(&status)
        .ok_or_else(|| sqlx::Error::Decode(format!("unknown location status {status}").into()))?;

    Ok(ChunkLocation {
        id: row.try_get("id")?,
        chunk_id: row.try_get("chunk_id")?,
        device_id: row.try_get("device_id")?,
        storage_reference: row.try_get("storage_reference")?,
        status,
        verified_at: row.try_get("verified_at")?,
    })
}
