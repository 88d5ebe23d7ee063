//! Background work: progress tracking of forwarded tasks.
//!
//! - [`tracker`] holds the tracking job, the per-job poll loop and the
//!   worker pool that drains the tracking queue
//! - [`registry`] maps worker ids to cancellation tokens so a client cancel
//!   can stop its tracker
//! - [`manager`] spawns long-running units with shutdown handling

pub mod manager;
pub mod registry;
pub mod tracker;

pub use manager::spawn_cancellable_task;
pub use registry::TrackerRegistry;
pub use tracker::{TrackerTask, TrackingJob, TrackingOutcome, track_task_progress};
