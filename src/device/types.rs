//! Device records and derived-status views

use serde::{Deserialize, Serialize};

/// A registered array member device.
///
/// Liveness is never stored: `last_heartbeat` is the only offline signal,
/// and online/offline is derived from it on every read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// Unique device identifier
    pub id: String,

    /// Owner this device belongs to
    pub owner_id: String,

    /// Human-readable device name
    pub name: String,

    /// Device kind (desktop, phone, browser, ...)
    pub kind: String,

    /// Platform the device runs on
    pub platform: String,

    /// Total capacity in bytes, if reported
    pub capacity_bytes: Option<i64>,

    /// Spare capacity in bytes, if reported (updated by heartbeats)
    pub available_bytes: Option<i64>,

    /// Unix timestamp of the most recent heartbeat
    pub last_heartbeat: i64,

    /// Unix timestamp of registration
    pub registered_at: i64,
}

/// Derived liveness of a device at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
}

impl DeviceStatus {
    pub fn is_online(&self) -> bool {
        matches!(self, DeviceStatus::Online)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Online => "online",
            DeviceStatus::Offline => "offline",
        }
    }
}

/// A device record together with its status as computed at read time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceView {
    #[serde(flatten)]
    pub device: Device,

    /// Status derived from heartbeat staleness at the time of the read
    pub status: DeviceStatus,

    /// Whole minutes since the device was last seen
    pub minutes_since_seen: i64,
}
