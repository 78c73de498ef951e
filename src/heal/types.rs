//! Healing and reconstruction record types

use serde::{Deserialize, Serialize};

/// One append-only entry in the healing audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingEvent {
    pub id: String,
    pub owner_id: String,
    pub config_id: String,
    /// What started the pass, e.g. "manual" or "api".
    pub triggered_by: String,
    pub offline_devices: i64,
    pub online_devices: i64,
    pub total_devices: i64,
    pub chunks_marked: i64,
    pub affected_chunk_ids: Vec<String>,
    pub created_at: i64,
}

/// Result of one healing pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingOutcome {
    pub offline_count: usize,
    pub chunks_marked: usize,
    /// Absent when every member was online and nothing was recorded.
    pub event_id: Option<String>,
}

/// How a chunk's bytes were recovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryMethod {
    /// XOR of the surviving stripe members (level 5).
    Parity,
    /// Copied from a surviving replica (levels 1 and 10).
    Mirror,
}

impl RecoveryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryMethod::Parity => "parity",
            RecoveryMethod::Mirror => "mirror",
        }
    }
}

/// Result of reconstructing one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconstructionOutcome {
    pub file_id: String,
    /// Absent when no chunk needed recovery.
    pub method: Option<RecoveryMethod>,
    pub missing_count: usize,
    pub recovered_chunk_ids: Vec<String>,
}
