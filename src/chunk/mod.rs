pub mod error;
pub mod parity;
pub mod splitter;
pub mod store;
pub mod types;

pub use error::{ChunkError, ChunkResult};
pub use parity::ParityEngine;
pub use splitter::ChunkSplitter;
pub use store::{ChunkStore, ChunkStoreConfig};
pub use types::{
    ChunkLocation, ChunkRecord, ChunkSummary, FileRecord, LocationStatus, LocationSummary,
    StoredChunkReceipt, UploadReport, VerifyReport,
};
