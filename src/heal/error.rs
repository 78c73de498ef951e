use crate::physical::PhysicalError;
use thiserror::Error;

pub type HealResult<T> = Result<T, HealError>;

#[derive(Debug, Error)]
pub enum HealError {
    #[error("No active array configuration")]
    NotConfigured,

    #[error("File not found: {0}")]
    FileNotFound(String),

    /// Too few surviving copies or stripe members to rebuild the data.
    #[error("Unrecoverable: {0}")]
    Unrecoverable(String),

    #[error("Physical store error: {0}")]
    Physical(#[from] PhysicalError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
