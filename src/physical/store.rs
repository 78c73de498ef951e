//! Per-device physical byte stores
//!
//! A [`DeviceStore`] stands in for the real device-side agent that holds
//! chunk payloads. The core only needs four operations against a
//! (device_id, storage_reference) address space; everything else about the
//! device side lives outside this crate.

use crate::physical::error::{PhysicalError, PhysicalResult};
use bytes::Bytes;
use dashmap::DashMap;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Byte-addressable store for one fleet of devices.
pub trait DeviceStore: Send + Sync {
    /// Write a chunk payload to a device under a storage reference.
    fn put<'a>(
        &'a self,
        device_id: &'a str,
        reference: &'a str,
        data: Bytes,
    ) -> BoxFuture<'a, PhysicalResult<()>>;

    /// Read a chunk payload back.
    fn get<'a>(
        &'a self,
        device_id: &'a str,
        reference: &'a str,
    ) -> BoxFuture<'a, PhysicalResult<Bytes>>;

    /// Remove one payload. Removing an absent payload is not an error.
    fn delete<'a>(
        &'a self,
        device_id: &'a str,
        reference: &'a str,
    ) -> BoxFuture<'a, PhysicalResult<()>>;

    /// Drop everything a device holds.
    fn delete_device<'a>(&'a self, device_id: &'a str) -> BoxFuture<'a, PhysicalResult<()>>;
}

/// In-memory store for tests and the demo server.
#[derive(Default)]
pub struct MemoryDeviceStore {
    chunks: DashMap<(String, String), Bytes>,
}

impl MemoryDeviceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bytes held for one device.
    pub fn usage(&self, device_id: &str) -> u64 {
        self.chunks
            .iter()
            .filter(|e| e.key().0 == device_id)
            .map(|e| e.value().len() as u64)
            .sum()
    }
}

impl DeviceStore for MemoryDeviceStore {
    fn put<'a>(
        &'a self,
        device_id: &'a str,
        reference: &'a str,
        data: Bytes,
    ) -> BoxFuture<'a, PhysicalResult<()>> {
        Box::pin(async move {
            self.chunks
                .insert((device_id.to_string(), reference.to_string()), data);
            Ok(())
        })
    }

    fn get<'a>(
        &'a self,
        device_id: &'a str,
        reference: &'a str,
    ) -> BoxFuture<'a, PhysicalResult<Bytes>> {
        Box::pin(async move {
            self.chunks
                .get(&(device_id.to_string(), reference.to_string()))
                .map(|e| e.value().clone())
                .ok_or_else(|| PhysicalError::NotFound {
                    device_id: device_id.to_string(),
                    reference: reference.to_string(),
                })
        })
    }

    fn delete<'a>(
        &'a self,
        device_id: &'a str,
        reference: &'a str,
    ) -> BoxFuture<'a, PhysicalResult<()>> {
        Box::pin(async move {
            self.chunks
                .remove(&(device_id.to_string(), reference.to_string()));
            Ok(())
        })
    }

    fn delete_device<'a>(&'a self, device_id: &'a str) -> BoxFuture<'a, PhysicalResult<()>> {
        Box::pin(async move {
            self.chunks.retain(|key, _| key.0 != device_id);
            Ok(())
        })
    }
}

/// Filesystem-backed store: `<root>/<device_id>/<reference>` files with a
/// per-device usage tally.
pub struct FsDeviceStore {
    root: PathBuf,
    used: RwLock<HashMap<String, u64>>,
}

impl FsDeviceStore {
    pub fn new(root: impl AsRef<Path>) -> PhysicalResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            used: RwLock::new(HashMap::new()),
        })
    }

    fn chunk_path(&self, device_id: &str, reference: &str) -> PathBuf {
        self.root.join(device_id).join(reference)
    }

    /// Bytes written for one device since this store was opened.
    pub fn usage(&self, device_id: &str) -> u64 {
        self.used.read().get(device_id).copied().unwrap_or(0)
    }
}

impl DeviceStore for FsDeviceStore {
    fn put<'a>(
        &'a self,
        device_id: &'a str,
        reference: &'a str,
        data: Bytes,
    ) -> BoxFuture<'a, PhysicalResult<()>> {
        Box::pin(async move {
            let path = self.chunk_path(device_id, reference);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, &data).await?;

            *self.used.write().entry(device_id.to_string()).or_insert(0) += data.len() as u64;
            Ok(())
        })
    }

    fn get<'a>(
        &'a self,
        device_id: &'a str,
        reference: &'a str,
    ) -> BoxFuture<'a, PhysicalResult<Bytes>> {
        Box::pin(async move {
            let path = self.chunk_path(device_id, reference);
            match tokio::fs::read(&path).await {
                Ok(data) => Ok(Bytes::from(data)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    Err(PhysicalError::NotFound {
                        device_id: device_id.to_string(),
                        reference: reference.to_string(),
                    })
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    fn delete<'a>(
        &'a self,
        device_id: &'a str,
        reference: &'a str,
    ) -> BoxFuture<'a, PhysicalResult<()>> {
        Box::pin(async move {
            let path = self.chunk_path(device_id, reference);
            let size = match tokio::fs::metadata(&path).await {
                Ok(meta) => meta.len(),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                Err(e) => return Err(e.into()),
            };
            tokio::fs::remove_file(&path).await?;

            let mut used = self.used.write();
            if let Some(total) = used.get_mut(device_id) {
                *total = total.saturating_sub(size);
            }
            Ok(())
        })
    }

    fn delete_device<'a>(&'a self, device_id: &'a str) -> BoxFuture<'a, PhysicalResult<()>> {
        Box::pin(async move {
            let dir = self.root.join(device_id);
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            self.used.write().remove(device_id);
            Ok(())
        })
    }
}
