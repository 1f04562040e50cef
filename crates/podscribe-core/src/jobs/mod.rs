//! Background job processing: the local worker pool, the distributed
//! coordinator, and progress throttling.

pub mod coordinator;
pub mod manager;
pub mod progress;

pub use coordinator::{CoordinatorStatus, DistributedCoordinator};
pub use manager::{WorkerContext, WorkerManager, WorkerState, WorkerStatus};
pub use progress::ProgressThrottle;
