//! Core domain models for convoy scheduling.
//!
//! This module contains the fundamental data structures used throughout
//! the scheduler: tasks, the dependency graph, and execution waves.

pub mod dag;
pub mod task;
pub mod wave;

pub use dag::{DependencyEdge, TaskGraph};
pub use task::{FailurePolicy, Task, TaskId, TaskStatus};
pub use wave::{Wave, WaveBuilder};
