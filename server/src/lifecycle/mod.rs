//! Lease lifecycle: creation, guarded retrieval, and every path to deletion.
//!
//! - `engine`: the state machine the HTTP layer calls into
//! - `scheduler`: grace-period deletion after the last permitted download
//! - `reaper`: periodic sweep that backstops lost scheduled deletions

pub mod engine;
pub mod reaper;
pub mod scheduler;

pub use engine::{Download, EngineSettings, LifecycleEngine, SweepReport};
pub use scheduler::{DeletionScheduler, DeletionTarget};
