//! Data persistence.

pub mod storage;

pub use storage::{RunRecorder, RunSummary, RunWriter, SavedTo};
