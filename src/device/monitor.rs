//! Heartbeat staleness derivation
//!
//! Devices disappear without any graceful-shutdown notification, so the only
//! offline signal is heartbeat absence. The monitor derives online/offline
//! from `now - last_heartbeat` against a single server-owned threshold and
//! never caches the result.

use crate::device::types::{Device, DeviceStatus, DeviceView};

/// Server-side staleness threshold.
///
/// One parameter for the whole server, independent of each client's own send
/// cadence (battery-constrained clients may legitimately send every 15
/// minutes and spend most of their life "offline").
#[derive(Debug, Clone, Copy)]
pub struct StalenessPolicy {
    /// Heartbeats older than this make a device offline
    pub threshold: chrono::Duration,
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self {
            threshold: chrono::Duration::minutes(5),
        }
    }
}

impl StalenessPolicy {
    pub fn new(threshold: chrono::Duration) -> Self {
        Self { threshold }
    }
}

/// Pure online/offline derivation over a [`StalenessPolicy`].
#[derive(Debug, Clone, Copy, Default)]
pub struct HeartbeatMonitor {
    policy: StalenessPolicy,
}

impl HeartbeatMonitor {
    pub fn new(policy: StalenessPolicy) -> Self {
        Self { policy }
    }

    /// Whether the device counts as online at `now` (unix seconds).
    pub fn is_online(&self, device: &Device, now: i64) -> bool {
        now - device.last_heartbeat < self.policy.threshold.num_seconds()
    }

    pub fn status_of(&self, device: &Device, now: i64) -> DeviceStatus {
        if self.is_online(device, now) {
            DeviceStatus::Online
        } else {
            DeviceStatus::Offline
        }
    }

    /// Whole minutes since the device last heartbeated (never negative).
    pub fn minutes_since_seen(&self, device: &Device, now: i64) -> i64 {
        (now - device.last_heartbeat).max(0) / 60
    }

    /// Snapshot a device together with its derived status.
    pub fn view(&self, device: &Device, now: i64) -> DeviceView {
        DeviceView {
            status: self.status_of(device, now),
            minutes_since_seen: self.minutes_since_seen(device, now),
            device: device.clone(),
        }
    }

    /// Split a device list into (online, offline) at `now`.
    pub fn partition<'a>(
        &self,
        devices: &'a [Device],
        now: i64,
    ) -> (Vec<&'a Device>, Vec<&'a Device>) {
        devices.iter().partition(|d| self.is_online(d, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device_with_heartbeat(last_heartbeat: i64) -> Device {
        Device {
            id: "dev-1".to_string(),
            owner_id: "alice".to_string(),
            name: "desktop".to_string(),
            kind: "desktop".to_string(),
            platform: "linux".to_string(),
            capacity_bytes: Some(1024),
            available_bytes: Some(512),
            last_heartbeat,
            registered_at: 0,
        }
    }

    #[test]
    fn test_fresh_heartbeat_is_online() {
        let monitor = HeartbeatMonitor::default();
        let device = device_with_heartbeat(1_000);

        assert!(monitor.is_online(&device, 1_000));
        assert!(monitor.is_online(&device, 1_000 + 299));
        assert_eq!(monitor.status_of(&device, 1_000), DeviceStatus::Online);
    }

    #[test]
    fn test_stale_heartbeat_is_offline() {
        let monitor = HeartbeatMonitor::default();
        let device = device_with_heartbeat(1_000);

        // Exactly at the threshold is already offline (strict less-than).
        assert!(!monitor.is_online(&device, 1_000 + 300));
        assert_eq!(
            monitor.status_of(&device, 1_000 + 301),
            DeviceStatus::Offline
        );
    }

    #[test]
    fn test_custom_threshold() {
        let monitor = HeartbeatMonitor::new(StalenessPolicy::new(chrono::Duration::minutes(15)));
        let device = device_with_heartbeat(0);

        assert!(monitor.is_online(&device, 14 * 60));
        assert!(!monitor.is_online(&device, 15 * 60));
    }

    #[test]
    fn test_minutes_since_seen() {
        let monitor = HeartbeatMonitor::default();
        let device = device_with_heartbeat(600);

        assert_eq!(monitor.minutes_since_seen(&device, 600), 0);
        assert_eq!(monitor.minutes_since_seen(&device, 600 + 125), 2);
        // Heartbeats from the future (clock skew) never go negative.
        assert_eq!(monitor.minutes_since_seen(&device, 0), 0);
    }

    #[test]
    fn test_partition() {
        let monitor = HeartbeatMonitor::default();
        let now = 10_000;
        let devices = vec![
            device_with_heartbeat(now),
            device_with_heartbeat(now - 400),
            device_with_heartbeat(now - 10),
        ];

        let (online, offline) = monitor.partition(&devices, now);
        assert_eq!(online.len(), 2);
        assert_eq!(offline.len(), 1);
        assert_eq!(offline[0].last_heartbeat, now - 400);
    }
}
