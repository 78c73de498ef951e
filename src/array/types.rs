//! Array configuration types
//!
//! The RAID level is a closed variant: minimum membership, redundancy and
//! efficiency are pure functions of it, never free-form strings or columns.

use crate::device::DeviceStatus;
use crate::heal::ArrayHealth;
use serde::{Deserialize, Serialize};

/// Default chunk size: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: i64 = 1024 * 1024;

/// Supported redundancy policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum RaidLevel {
    /// Level 1: every chunk mirrored to every member.
    Mirror,
    /// Level 5: round-robin data placement with rotating XOR parity.
    Parity,
    /// Level 10: consecutive mirror pairs, striped.
    MirroredStripes,
}

impl RaidLevel {
    pub fn from_number(level: u8) -> Option<Self> {
        match level {
            1 => Some(RaidLevel::Mirror),
            5 => Some(RaidLevel::Parity),
            10 => Some(RaidLevel::MirroredStripes),
            _ => None,
        }
    }

    pub fn number(&self) -> u8 {
        match self {
            RaidLevel::Mirror => 1,
            RaidLevel::Parity => 5,
            RaidLevel::MirroredStripes => 10,
        }
    }

    /// Smallest membership the level can operate with.
    pub fn minimum_devices(&self) -> usize {
        match self {
            RaidLevel::Mirror => 2,
            RaidLevel::Parity => 3,
            RaidLevel::MirroredStripes => 4,
        }
    }

    /// Usable fraction of raw capacity with `device_count` members.
    pub fn efficiency(&self, device_count: usize) -> f64 {
        match self {
            RaidLevel::Mirror => 1.0 / device_count as f64,
            RaidLevel::Parity => (device_count - 1) as f64 / device_count as f64,
            RaidLevel::MirroredStripes => 0.5,
        }
    }
}

impl TryFrom<u8> for RaidLevel {
    type Error = String;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        RaidLevel::from_number(level).ok_or_else(|| format!("unsupported RAID level {level}"))
    }
}

impl From<RaidLevel> for u8 {
    fn from(level: RaidLevel) -> u8 {
        level.number()
    }
}

/// One owner's RAID policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArrayConfig {
    pub id: String,
    pub owner_id: String,
    pub level: RaidLevel,
    pub chunk_size: i64,
    pub active: bool,
    pub created_at: i64,
}

impl ArrayConfig {
    pub fn minimum_devices(&self) -> usize {
        self.level.minimum_devices()
    }
}

/// Membership row: priority is the list position at configure time and
/// drives round-robin and pairing order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberDevice {
    pub config_id: String,
    pub device_id: String,
    pub priority: i64,
}

/// Per-member detail inside an [`ArrayStatus`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberStatus {
    pub device_id: String,
    pub name: String,
    pub priority: i64,
    pub status: DeviceStatus,
    pub minutes_since_seen: i64,
}

/// Aggregate chunk statistics for one owner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkStats {
    pub files: i64,
    pub data_chunks: i64,
    pub parity_chunks: i64,
    pub total_bytes: i64,
    pub pending_locations: i64,
    pub stored_locations: i64,
    pub corrupted_locations: i64,
    pub missing_locations: i64,
    pub needs_reconstruction_locations: i64,
}

/// Snapshot of the array as seen by `status()`. Health and member status
/// are recomputed on every call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArrayStatus {
    pub configured: bool,
    pub config: Option<ArrayConfig>,
    pub members: Vec<MemberStatus>,
    pub online_devices: usize,
    pub total_devices: usize,
    pub health: Option<ArrayHealth>,
    pub chunk_stats: ChunkStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_numbers_round_trip() {
        for n in [1u8, 5, 10] {
            let level = RaidLevel::from_number(n).unwrap();
            assert_eq!(level.number(), n);
        }
        assert!(RaidLevel::from_number(0).is_none());
        assert!(RaidLevel::from_number(6).is_none());
    }

    #[test]
    fn test_minimum_devices() {
        assert_eq!(RaidLevel::Mirror.minimum_devices(), 2);
        assert_eq!(RaidLevel::Parity.minimum_devices(), 3);
        assert_eq!(RaidLevel::MirroredStripes.minimum_devices(), 4);
    }

    #[test]
    fn test_efficiency() {
        assert!((RaidLevel::Mirror.efficiency(4) - 0.25).abs() < f64::EPSILON);
        assert!((RaidLevel::Parity.efficiency(4) - 0.75).abs() < f64::EPSILON);
        assert!((RaidLevel::MirroredStripes.efficiency(6) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_serde_as_number() {
        let json = serde_json::to_string(&RaidLevel::Parity).unwrap();
        assert_eq!(json, "5");

        let level: RaidLevel = serde_json::from_str("10").unwrap();
        assert_eq!(level, RaidLevel::MirroredStripes);

        assert!(serde_json::from_str::<RaidLevel>("2").is_err());
    }
}
