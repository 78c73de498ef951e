pub mod error;
pub mod manager;
pub mod planner;
pub mod types;

pub use error::{ArrayError, ArrayResult};
pub use manager::ArrayManager;
pub use planner::{DistributionPlan, DistributionPlanner};
pub use types::{
    ArrayConfig, ArrayStatus, ChunkStats, MemberDevice, MemberStatus, RaidLevel,
    DEFAULT_CHUNK_SIZE,
};
