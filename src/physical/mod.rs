pub mod error;
pub mod store;
pub mod transform;

pub use error::{PhysicalError, PhysicalResult};
pub use store::{DeviceStore, FsDeviceStore, MemoryDeviceStore};
pub use transform::{ChunkTransform, PassthroughTransform};
