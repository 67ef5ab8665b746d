//! Task dependency graph (DAG) execution
//!
//! This module provides the run engine used by the pipeline coordinator.
//! It supports:
//! - Task dependency graph construction and validation
//! - Topological sorting into parallel stages, ties broken by task id
//! - Circular dependency detection
//! - Bounded-parallel dispatch with per-task timeout and retry policy
//! - Cooperative cancellation
//!
//! # Architecture
//!
//! ```text
//! Vec<Task>
//!   ↓
//! TaskGraph::build() → from_tasks(), validate()
//!   ↓
//! TaskGraph { nodes, edges, reverse_edges }
//!   ↓
//! RunEngine::execute() → RunReport
//! ```

mod engine;
mod graph;
mod state;
pub mod traits;
pub mod types;

pub use engine::RunEngine;
pub use graph::TaskGraph;
pub use state::{SkipReason, TaskState};
pub use traits::RetryStrategyPlugin;
pub use types::*;
