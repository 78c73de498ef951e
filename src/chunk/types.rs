//! Chunk ledger types

use serde::{Deserialize, Serialize};

/// State of one physical copy of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationStatus {
    /// Planned; bytes not yet confirmed on the device.
    Pending,
    /// Bytes written and verified against the chunk's trusted digest.
    Stored,
    /// Device served bytes failing the trusted digest.
    Corrupted,
    /// Bytes are gone from the device.
    Missing,
    /// Marked by a healing pass: the holding device went offline.
    NeedsReconstruction,
}

impl LocationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationStatus::Pending => "pending",
            LocationStatus::Stored => "stored",
            LocationStatus::Corrupted => "corrupted",
            LocationStatus::Missing => "missing",
            LocationStatus::NeedsReconstruction => "needs_reconstruction",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(LocationStatus::Pending),
            "stored" => Some(LocationStatus::Stored),
            "corrupted" => Some(LocationStatus::Corrupted),
            "missing" => Some(LocationStatus::Missing),
            "needs_reconstruction" => Some(LocationStatus::NeedsReconstruction),
            _ => None,
        }
    }

    /// Transition rank for racing updates: damage outranks stored, stored
    /// outranks pending.
    pub fn severity(&self) -> u8 {
        match self {
            LocationStatus::Pending => 0,
            LocationStatus::Stored => 1,
            LocationStatus::Corrupted
            | LocationStatus::Missing
            | LocationStatus::NeedsReconstruction => 2,
        }
    }
}

/// A stored file's metadata row.
///
/// The RAID level, chunk size and stripe width in force at upload time are
/// snapshotted here: later reconfiguration must never change how an old
/// file is read back or recovered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub size_bytes: i64,
    pub content_hash: String,
    pub raid_level: u8,
    pub chunk_size: i64,
    pub stripe_width: Option<i64>,
    pub created_at: i64,
}

/// One chunk row. Immutable once created; its `content_hash` is the
/// authoritative digest every read is checked against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: String,
    pub file_id: String,
    pub index: i64,
    pub size_bytes: i64,
    pub content_hash: String,
    pub is_parity: bool,
    pub created_at: i64,
}

/// One physical copy of a chunk on one device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkLocation {
    pub id: String,
    pub chunk_id: String,
    pub device_id: String,
    pub storage_reference: String,
    pub status: LocationStatus,
    pub verified_at: Option<i64>,
}

/// Result of a whole-file upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadReport {
    pub file_id: String,
    pub name: String,
    pub size_bytes: i64,
    pub content_hash: String,
    pub data_chunks: usize,
    pub parity_chunks: usize,
    pub locations_planned: usize,
    pub locations_stored: usize,
}

/// Receipt for a single chunk-level upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredChunkReceipt {
    pub chunk_id: String,
    pub hash: String,
    pub size: usize,
}

/// Result of verifying one location against the trusted digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyReport {
    pub chunk_id: String,
    pub device_id: String,
    pub valid: bool,
}

/// Location fan-out inside a [`ChunkSummary`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationSummary {
    pub device_id: String,
    pub status: LocationStatus,
    pub verified_at: Option<i64>,
}

/// A chunk with its per-device copies, as returned by listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkSummary {
    pub chunk_id: String,
    pub file_id: String,
    pub index: i64,
    pub size_bytes: i64,
    pub content_hash: String,
    pub is_parity: bool,
    pub locations: Vec<LocationSummary>,
}
