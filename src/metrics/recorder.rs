//! Metrics recorder for array operations

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize metric descriptions (call once at startup)
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return; // Already initialized
    }

    // Device fleet
    describe_counter!(
        "raidmesh_devices_registered_total",
        "Total number of device registrations"
    );
    describe_counter!(
        "raidmesh_heartbeats_total",
        "Total number of heartbeats received"
    );
    describe_gauge!(
        "raidmesh_online_devices",
        "Devices currently within the staleness threshold"
    );

    // Chunk pipeline
    describe_counter!(
        "raidmesh_uploads_total",
        "Total number of file uploads accepted"
    );
    describe_counter!(
        "raidmesh_chunks_stored_total",
        "Total number of chunk copies written and verified"
    );
    describe_counter!(
        "raidmesh_bytes_stored_total",
        "Total chunk bytes written and verified"
    );

    // Integrity
    describe_counter!(
        "raidmesh_integrity_failures_total",
        "Total number of trusted-digest failures"
    );

    // Healing
    describe_counter!(
        "raidmesh_healing_events_total",
        "Total number of healing passes recorded"
    );
    describe_counter!(
        "raidmesh_locations_marked_total",
        "Total chunk locations marked for reconstruction"
    );
    describe_counter!(
        "raidmesh_chunks_reconstructed_total",
        "Total chunks rebuilt from parity or a surviving replica"
    );

    // Histograms
    describe_histogram!(
        "raidmesh_upload_duration_seconds",
        "Time to split, plan and store one file"
    );
    describe_histogram!("raidmesh_upload_size_bytes", "Uploaded file sizes");
    describe_histogram!(
        "raidmesh_reconstruction_duration_seconds",
        "Time to reconstruct one file"
    );
}

// ============== Device Fleet ==============

/// Record a device registration
pub fn record_device_registered(kind: &str) {
    counter!("raidmesh_devices_registered_total", "kind" => kind.to_string()).increment(1);
}

/// Record a heartbeat
pub fn record_heartbeat() {
    counter!("raidmesh_heartbeats_total").increment(1);
}

/// Update the online-device gauge
pub fn set_online_devices(count: usize) {
    gauge!("raidmesh_online_devices").set(count as f64);
}

// ============== Chunk Pipeline ==============

/// Record a completed upload
pub fn record_upload(duration: Duration, bytes: usize) {
    counter!("raidmesh_uploads_total").increment(1);
    histogram!("raidmesh_upload_duration_seconds").record(duration.as_secs_f64());
    histogram!("raidmesh_upload_size_bytes").record(bytes as f64);
}

/// Record one chunk copy written and verified
pub fn record_chunk_stored(bytes: usize) {
    counter!("raidmesh_chunks_stored_total").increment(1);
    counter!("raidmesh_bytes_stored_total").increment(bytes as u64);
}

// ============== Integrity ==============

/// Record a trusted-digest failure
pub fn record_integrity_failure() {
    counter!("raidmesh_integrity_failures_total").increment(1);
}

// ============== Healing ==============

/// Record a healing pass
pub fn record_healing_event() {
    counter!("raidmesh_healing_events_total").increment(1);
}

/// Record locations marked for reconstruction
pub fn record_locations_marked(count: usize) {
    counter!("raidmesh_locations_marked_total").increment(count as u64);
}

/// Record one chunk rebuilt
pub fn record_chunk_reconstructed() {
    counter!("raidmesh_chunks_reconstructed_total").increment(1);
}

/// Record a reconstruction pass duration
pub fn record_reconstruction(duration: Duration) {
    histogram!("raidmesh_reconstruction_duration_seconds").record(duration.as_secs_f64());
}
