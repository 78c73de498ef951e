use thiserror::Error;

/// Result type for array configuration and planning operations
pub type ArrayResult<T> = Result<T, ArrayError>;

#[derive(Debug, Error)]
pub enum ArrayError {
    #[error("Invalid configuration: {0}")]
    Validation(String),

    #[error("No active array configuration")]
    NotConfigured,

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Configuration cannot be deleted while the owner has stored chunks")]
    HasChunks,

    #[error("No eligible devices for distribution")]
    NoEligibleDevices,

    #[error("RAID level {level} needs at least {needed} eligible devices, have {available}")]
    TooFewDevices {
        level: u8,
        needed: usize,
        available: usize,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
