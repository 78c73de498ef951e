use thiserror::Error;

/// Result type for physical byte-store operations
pub type PhysicalResult<T> = Result<T, PhysicalError>;

#[derive(Debug, Error)]
pub enum PhysicalError {
    #[error("No stored bytes for {reference} on device {device_id}")]
    NotFound { device_id: String, reference: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
