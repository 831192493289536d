pub mod job;
pub mod pool;

pub use job::{Job, WorkerMessage};
pub use pool::WorkerPool;
