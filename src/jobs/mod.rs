//! Asynchronous job processing: a bounded queue, a fixed-size worker pool
//! and the submission service in front of both.

pub mod executor;
pub mod queue;
pub mod service;
pub mod workers;

pub use executor::ValidationExecutor;
pub use queue::{JobQueue, JobReceiver, JobSlot};
pub use service::ValidationService;
pub use workers::JobWorkers;
