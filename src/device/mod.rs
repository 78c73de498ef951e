pub mod error;
pub mod monitor;
pub mod registry;
pub mod types;

pub use error::{DeviceError, DeviceResult};
pub use monitor::{HeartbeatMonitor, StalenessPolicy};
pub use registry::DeviceRegistry;
pub use types::{Device, DeviceStatus, DeviceView};
