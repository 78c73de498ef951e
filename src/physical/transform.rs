//! At-rest transform seam
//!
//! The external encryption layer sits outside this core: chunk bytes pass
//! through a [`ChunkTransform`] on their way to a device and are inverted on
//! the way back. Digests are always computed over the pre-transform bytes,
//! so the ledger's trusted hashes stay independent of whatever the transform
//! does.

use bytes::Bytes;

pub trait ChunkTransform: Send + Sync {
    /// Transform bytes before they reach a device.
    fn apply(&self, data: Bytes) -> Bytes;

    /// Undo [`apply`](Self::apply) on bytes read back from a device.
    fn invert(&self, data: Bytes) -> Bytes;
}

/// Identity transform, used when no at-rest encryption is plugged in.
pub struct PassthroughTransform;

impl ChunkTransform for PassthroughTransform {
    fn apply(&self, data: Bytes) -> Bytes {
        data
    }

    fn invert(&self, data: Bytes) -> Bytes {
        data
    }
}
