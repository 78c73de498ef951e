//! Metrics and observability
//!
//! Prometheus-compatible metrics for the array core.
//!
//! Key metrics exposed:
//! - Device fleet (registrations, heartbeats, online count)
//! - Chunk pipeline (stored chunks and bytes, upload durations)
//! - Integrity (digest failures)
//! - Healing (events, marked locations, reconstructed chunks)

pub mod exporter;
pub mod recorder;

pub use exporter::{metrics_route, render_metrics, start_metrics_server, MetricsConfig};
pub use recorder::init_metrics;
