use thiserror::Error;

/// Result type for chunk ledger and pipeline operations
pub type ChunkResult<T> = Result<T, ChunkError>;

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Chunk not found: {0}")]
    ChunkNotFound(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("No location for chunk {chunk_id} on device {device_id}")]
    LocationNotFound { chunk_id: String, device_id: String },

    #[error("Chunk {chunk_id} on device {device_id} failed its trusted digest")]
    HashMismatch { chunk_id: String, device_id: String },

    #[error("Device {0} is offline")]
    DeviceOffline(String),

    #[error("Transfer to device {0} timed out")]
    TransferTimeout(String),

    #[error(transparent)]
    Array(#[from] crate::array::ArrayError),

    #[error(transparent)]
    Physical(#[from] crate::physical::PhysicalError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
