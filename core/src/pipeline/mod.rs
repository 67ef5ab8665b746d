//! The transaction pipeline: a fixed stage graph driven by the run engine.
//!
//! ```text
//! extract ──▶ clean ──┐
//!                     ├──▶ transform ──▶ load ──▶ query ──▶ notify
//! create_schema ──────┘
//! ```

mod coordinator;
mod report;
mod stages;
mod transform;

pub use coordinator::{PipelineDeps, RunCoordinator};
pub use report::{FailedTask, PipelineReport, RunOutcome, Trigger};
pub use stages::{RunContext, Stage, StageRunner};
pub use transform::{reporting_offset, to_warehouse_row, transform_batch};
