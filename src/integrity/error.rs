use thiserror::Error;

#[derive(Error, Debug)]
pub enum IntegrityError {
    #[error("Digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("Malformed digest: {0}")]
    MalformedDigest(String),
}

pub type IntegrityResult<T> = Result<T, IntegrityError>;
