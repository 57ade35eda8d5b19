//! Utility helpers: handle arenas, logging spans, data-parallel loops, and step profiling.

pub mod allocator;
pub mod logging;
pub mod parallel;
pub mod profiling;

pub use allocator::{Arena, GenerationalId, ShapeId};
pub use profiling::{SolverStats, StepTimers};
