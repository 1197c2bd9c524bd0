//! Pipeline orchestration for docforest.
//!
//! This crate drives the fetch, normalize and decompose stages over an
//! [`ArtifactStore`](docforest_storage::ArtifactStore), using a fixed-size
//! [`WorkPool`] per stage.

pub mod pipeline;
pub mod pool;

pub use pipeline::{
    Pipeline, PipelineReport, ProgressReporter, SilentProgress, Stage, run_pipeline,
};
pub use pool::{FailurePolicy, Handled, ItemOutcome, ItemReport, PhaseReport, WorkPool};
