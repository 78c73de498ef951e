use thiserror::Error;

/// Result type for device registry operations
pub type DeviceResult<T> = Result<T, DeviceError>;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Device {0} still holds chunk copies")]
    HasChunks(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
