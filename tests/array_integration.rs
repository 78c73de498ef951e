//! End-to-end array lifecycle tests over an in-memory ledger and device
//! store: register a fleet, configure RAID, upload, lose a device, heal,
//! and reconstruct.

use bytes::Bytes;
use rand::RngCore;
use raidmesh::array::ArrayManager;
use raidmesh::chunk::{ChunkStore, ChunkStoreConfig, LocationStatus};
use raidmesh::db;
use raidmesh::device::{DeviceError, DeviceRegistry, HeartbeatMonitor};
use raidmesh::heal::{ArrayHealth, HealingCoordinator, ReconstructionEngine, RecoveryMethod};
use raidmesh::physical::{ChunkTransform, MemoryDeviceStore, PassthroughTransform};
use sqlx::SqlitePool;
use std::sync::Arc;

struct Array {
    registry: DeviceRegistry,
    arrays: ArrayManager,
    store: ChunkStore,
    healer: HealingCoordinator,
    reconstructor: ReconstructionEngine,
    pool: SqlitePool,
}

async fn create_array() -> Array {
    let pool = db::connect_in_memory().await.unwrap();
    let monitor = HeartbeatMonitor::default();
    let device_store = Arc::new(MemoryDeviceStore::new());
    let transform: Arc<dyn ChunkTransform> = Arc::new(PassthroughTransform);

    Array {
        registry: DeviceRegistry::new(pool.clone(), monitor),
        arrays: ArrayManager::new(pool.clone(), monitor),
        store: ChunkStore::new(
            pool.clone(),
            device_store.clone(),
            transform.clone(),
            monitor,
            ChunkStoreConfig::default(),
        ),
        healer: HealingCoordinator::new(pool.clone(), monitor),
        reconstructor: ReconstructionEngine::new(pool.clone(), device_store, transform, monitor),
        pool,
    }
}

async fn register_fleet(array: &Array, owner: &str, n: usize) -> Vec<String> {
    let mut ids = Vec::new();
    for i in 0..n {
        let device = array
            .registry
            .register(
                owner,
                &format!("device-{i}"),
                "desktop",
                "linux",
                Some(1 << 30),
                Some(1 << 30),
            )
            .await
            .unwrap();
        ids.push(device.id);
    }
    ids
}

async fn take_offline(pool: &SqlitePool, device_id: &str) {
    sqlx::query("UPDATE devices SET last_heartbeat = last_heartbeat - 600 WHERE id = ?")
        .bind(device_id)
        .execute(pool)
        .await
        .unwrap();
}

#[tokio::test]
async fn level5_upload_distributes_data_and_parity() {
    let array = create_array().await;
    let devices = register_fleet(&array, "alice", 3).await;
    array
        .arrays
        .configure("alice", 5, Some(4), &devices)
        .await
        .unwrap();

    let report = array
        .store
        .upload_file("alice", "demo.bin", Bytes::from_static(b"ABCDEFGH"))
        .await
        .unwrap();

    assert_eq!(report.data_chunks, 2);
    assert_eq!(report.parity_chunks, 1);
    assert_eq!(report.locations_stored, 3);
    assert_eq!(
        report.content_hash,
        hex::encode(blake3::hash(b"ABCDEFGH").as_bytes())
    );

    // "ABCD" on device 1, "EFGH" on device 2, parity on device 3, every
    // copy verified and stored.
    let chunks = array
        .store
        .list_for_file("alice", &report.file_id)
        .await
        .unwrap();
    assert_eq!(chunks.len(), 3);
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.locations.len(), 1);
        assert_eq!(chunk.locations[0].device_id, devices[i]);
        assert_eq!(chunk.locations[0].status, LocationStatus::Stored);
        assert!(chunk.locations[0].verified_at.is_some());
    }
    assert!(chunks[2].is_parity);

    let (first, _) = array
        .store
        .download("alice", &chunks[0].chunk_id, &devices[0])
        .await
        .unwrap();
    assert_eq!(&first[..], b"ABCD");

    // Three members online, level 5 needs three: healthy.
    let status = array.arrays.status("alice").await.unwrap();
    assert_eq!(status.health, Some(ArrayHealth::Healthy));
    assert_eq!(status.online_devices, 3);
    assert_eq!(status.chunk_stats.data_chunks, 2);
    assert_eq!(status.chunk_stats.parity_chunks, 1);
    assert_eq!(status.chunk_stats.stored_locations, 3);
}

#[tokio::test]
async fn device_loss_degrades_and_heals() {
    let array = create_array().await;
    let devices = register_fleet(&array, "alice", 3).await;
    array
        .arrays
        .configure("alice", 5, Some(4), &devices)
        .await
        .unwrap();
    let report = array
        .store
        .upload_file("alice", "demo.bin", Bytes::from_static(b"ABCDEFGH"))
        .await
        .unwrap();

    take_offline(&array.pool, &devices[1]).await;

    // Status reflects the loss on the very next read.
    let status = array.arrays.status("alice").await.unwrap();
    assert_eq!(status.health, Some(ArrayHealth::Degraded));
    assert_eq!(status.online_devices, 2);
    assert_eq!(status.total_devices, 3);

    // Healing marks the stranded copy and appends exactly one event.
    let outcome = array.healer.heal("alice", "manual").await.unwrap();
    assert_eq!(outcome.offline_count, 1);
    assert_eq!(outcome.chunks_marked, 1);
    assert!(outcome.event_id.is_some());

    let events = array.healer.list_events("alice").await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].chunks_marked, 1);
    assert_eq!(events[0].affected_chunk_ids.len(), 1);

    let flagged = array.store.list_needing_reconstruction("alice").await.unwrap();
    assert_eq!(flagged.len(), 1);
    assert_eq!(flagged[0].file_id, report.file_id);
    assert!(!flagged[0].is_parity);
}

#[tokio::test]
async fn parity_reconstruction_restores_lost_chunk() {
    let array = create_array().await;
    let devices = register_fleet(&array, "alice", 3).await;
    array
        .arrays
        .configure("alice", 5, Some(4), &devices)
        .await
        .unwrap();
    let report = array
        .store
        .upload_file("alice", "demo.bin", Bytes::from_static(b"ABCDEFGH"))
        .await
        .unwrap();

    take_offline(&array.pool, &devices[1]).await;
    array.healer.heal("alice", "manual").await.unwrap();

    let outcome = array
        .reconstructor
        .reconstruct("alice", &report.file_id)
        .await
        .unwrap();
    assert_eq!(outcome.method, Some(RecoveryMethod::Parity));
    assert_eq!(outcome.missing_count, 1);
    assert_eq!(outcome.recovered_chunk_ids.len(), 1);

    // "EFGH" came back from ABCD xor parity and landed on device 1.
    let chunk_id = &outcome.recovered_chunk_ids[0];
    let (bytes, _) = array
        .store
        .download("alice", chunk_id, &devices[0])
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"EFGH");

    // Nothing left flagged; the stranded copy is recorded as missing.
    assert!(array
        .store
        .list_needing_reconstruction("alice")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn mirror_upload_survives_device_loss_without_parity() {
    let array = create_array().await;
    let devices = register_fleet(&array, "alice", 2).await;
    array
        .arrays
        .configure("alice", 1, Some(1024), &devices)
        .await
        .unwrap();

    // A multi-chunk random payload.
    let mut payload = vec![0u8; 3 * 1024 + 17];
    rand::thread_rng().fill_bytes(&mut payload);
    let payload = Bytes::from(payload);

    let report = array
        .store
        .upload_file("alice", "random.bin", payload.clone())
        .await
        .unwrap();
    assert_eq!(report.data_chunks, 4);
    assert_eq!(report.parity_chunks, 0);
    assert_eq!(report.locations_stored, 8);

    // One mirror dies; every chunk is still readable from the other.
    take_offline(&array.pool, &devices[0]).await;
    let chunks = array
        .store
        .list_for_file("alice", &report.file_id)
        .await
        .unwrap();
    let mut reassembled = Vec::new();
    for chunk in &chunks {
        let (bytes, _) = array
            .store
            .download("alice", &chunk.chunk_id, &devices[1])
            .await
            .unwrap();
        reassembled.extend_from_slice(&bytes);
    }
    assert_eq!(Bytes::from(reassembled), payload);
}

#[tokio::test]
async fn unregister_is_refused_until_file_deleted() {
    let array = create_array().await;
    let devices = register_fleet(&array, "alice", 3).await;
    array
        .arrays
        .configure("alice", 5, Some(4), &devices)
        .await
        .unwrap();
    let report = array
        .store
        .upload_file("alice", "demo.bin", Bytes::from_static(b"ABCDEFGH"))
        .await
        .unwrap();

    // Holding a chunk copy blocks unregistration.
    let result = array.registry.unregister("alice", &devices[0]).await;
    assert!(matches!(result, Err(DeviceError::HasChunks(_))));

    array.store.delete_file("alice", &report.file_id).await.unwrap();
    array.registry.unregister("alice", &devices[0]).await.unwrap();
}

#[tokio::test]
async fn owners_never_see_each_other() {
    let array = create_array().await;
    let alice_devices = register_fleet(&array, "alice", 3).await;
    let bob_devices = register_fleet(&array, "bob", 2).await;

    array
        .arrays
        .configure("alice", 5, Some(4), &alice_devices)
        .await
        .unwrap();
    array
        .arrays
        .configure("bob", 1, Some(4), &bob_devices)
        .await
        .unwrap();

    let report = array
        .store
        .upload_file("alice", "demo.bin", Bytes::from_static(b"ABCDEFGH"))
        .await
        .unwrap();

    // Bob cannot read, list or delete Alice's file.
    assert!(array.store.file_owned("bob", &report.file_id).await.is_err());
    assert!(array.store.delete_file("bob", &report.file_id).await.is_err());

    // Each owner keeps an independent active configuration.
    let alice_config = array.arrays.active_config("alice").await.unwrap().unwrap();
    let bob_config = array.arrays.active_config("bob").await.unwrap().unwrap();
    assert_ne!(alice_config.id, bob_config.id);
    assert_eq!(alice_config.level.number(), 5);
    assert_eq!(bob_config.level.number(), 1);
}

#[tokio::test]
async fn reconfigure_keeps_old_files_readable() {
    let array = create_array().await;
    let devices = register_fleet(&array, "alice", 4).await;
    array
        .arrays
        .configure("alice", 5, Some(4), &devices[..3])
        .await
        .unwrap();
    let report = array
        .store
        .upload_file("alice", "demo.bin", Bytes::from_static(b"ABCDEFGH"))
        .await
        .unwrap();

    // Switch the array to mirrored stripes; the old file keeps its
    // level-5 geometry snapshot.
    array
        .arrays
        .configure("alice", 10, Some(4), &devices)
        .await
        .unwrap();

    let file = array.store.file_owned("alice", &report.file_id).await.unwrap();
    assert_eq!(file.raid_level, 5);
    assert_eq!(file.stripe_width, Some(2));

    // Reconstruction after a loss still uses parity, not the new level.
    take_offline(&array.pool, &devices[1]).await;
    array.healer.heal("alice", "manual").await.unwrap();
    let outcome = array
        .reconstructor
        .reconstruct("alice", &report.file_id)
        .await
        .unwrap();
    assert_eq!(outcome.method, Some(RecoveryMethod::Parity));

    let chunk_id = &outcome.recovered_chunk_ids[0];
    let (bytes, _) = array
        .store
        .download("alice", chunk_id, &devices[0])
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"EFGH");
}
