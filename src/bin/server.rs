use anyhow::Context;
use raidmesh::api::{create_api_server, AppState};
use raidmesh::array::ArrayManager;
use raidmesh::chunk::{ChunkStore, ChunkStoreConfig};
use raidmesh::db;
use raidmesh::device::{DeviceRegistry, HeartbeatMonitor};
use raidmesh::heal::{HealingCoordinator, ReconstructionEngine};
use raidmesh::metrics::{start_metrics_server, MetricsConfig};
use raidmesh::physical::{
    ChunkTransform, DeviceStore, FsDeviceStore, MemoryDeviceStore, PassthroughTransform,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("\n╔══════════════════════════════════════════════════════════════════╗");
    println!("║          raidmesh - Personal Device RAID Server                  ║");
    println!("╚══════════════════════════════════════════════════════════════════╝\n");

    println!("🚀 Initializing system components...\n");

    // Metadata ledger: SQLite file, or in-memory when unset.
    let pool = match std::env::var("RAIDMESH_DB") {
        Ok(url) => {
            println!("💾 Metadata Ledger: {url}");
            db::connect(&url)
                .await
                .with_context(|| format!("failed to open database {url}"))?
        }
        Err(_) => {
            println!("💾 Metadata Ledger: in-memory SQLite (set RAIDMESH_DB to persist)");
            db::connect_in_memory()
                .await
                .context("failed to open in-memory database")?
        }
    };

    // Chunk payloads: directory-per-device on disk, or in-memory.
    let device_store: Arc<dyn DeviceStore> = match std::env::var("RAIDMESH_DATA_DIR") {
        Ok(dir) => {
            println!("📦 Device Store: filesystem at {dir}");
            Arc::new(
                FsDeviceStore::new(&dir)
                    .with_context(|| format!("failed to open data directory {dir}"))?,
            )
        }
        Err(_) => {
            println!("📦 Device Store: in-memory (set RAIDMESH_DATA_DIR to persist)");
            Arc::new(MemoryDeviceStore::new())
        }
    };

    println!("🔒 Integrity: BLAKE3 trusted digests on every read and write");
    let transform: Arc<dyn ChunkTransform> = Arc::new(PassthroughTransform);

    println!("💓 Heartbeat Monitor: 5 minute staleness threshold");
    let monitor = HeartbeatMonitor::default();

    println!("📈 Metrics: Prometheus exporter on 0.0.0.0:9090");
    start_metrics_server(MetricsConfig::default())
        .map_err(|e| anyhow::anyhow!("failed to start metrics exporter: {e}"))?;

    let state = AppState {
        devices: Arc::new(DeviceRegistry::new(pool.clone(), monitor)),
        arrays: Arc::new(ArrayManager::new(pool.clone(), monitor)),
        chunks: Arc::new(ChunkStore::new(
            pool.clone(),
            device_store.clone(),
            transform.clone(),
            monitor,
            ChunkStoreConfig::default(),
        )),
        healer: Arc::new(HealingCoordinator::new(pool.clone(), monitor)),
        reconstructor: Arc::new(ReconstructionEngine::new(
            pool,
            device_store,
            transform,
            monitor,
        )),
    };

    println!("🌐 API Layer: REST endpoints under /api/v1");
    let app = create_api_server(state);

    let addr = std::env::var("RAIDMESH_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    println!("\n📡 Starting server...");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    println!("\n✅ raidmesh server is running!\n");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("📍 Server Address:  http://{addr}");
    println!("🏥 Health Check:    http://{addr}/health");
    println!("📈 Metrics:         http://{addr}/metrics");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("\n📚 API Endpoints (all require an x-owner-id header):");
    println!("   POST   /api/v1/devices                          - Register device");
    println!("   GET    /api/v1/devices                          - List devices with status");
    println!("   POST   /api/v1/devices/:id/heartbeat            - Heartbeat");
    println!("   DELETE /api/v1/devices/:id                      - Unregister device");
    println!("   POST   /api/v1/array                            - Configure RAID array");
    println!("   GET    /api/v1/array                            - Array status and health");
    println!("   POST   /api/v1/array/heal                       - Run healing pass");
    println!("   POST   /api/v1/array/reconstruct/:file_id       - Reconstruct a file");
    println!("   GET    /api/v1/array/events                     - Healing audit log");
    println!("   POST   /api/v1/files                            - Upload file (multipart)");
    println!("   GET    /api/v1/files/:id/chunks                 - Chunk fan-out for a file");
    println!("   PUT    /api/v1/chunks/:cid/devices/:did         - Store one chunk copy");
    println!("   GET    /api/v1/chunks/:cid/devices/:did         - Download and verify a copy");
    println!("\n🛑 Press Ctrl+C to stop the server\n");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
