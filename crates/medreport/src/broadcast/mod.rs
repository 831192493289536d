//! Broadcasting for real-time progress streaming.
//!
//! UI consumers subscribe to a broadcaster; the batch controller publishes
//! through [`crate::pipeline::BroadcastProgress`].

pub mod batch_progress;

pub use batch_progress::BatchProgressBroadcaster;
