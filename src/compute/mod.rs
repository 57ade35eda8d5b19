//! Compute resource abstraction.
//!
//! The solver itself runs on the CPU (optionally across the Rayon pool). A
//! [`ComputeBackend`] is consulted before every step and may refuse it, which
//! surfaces as [`FatalError`] and leaves the world untouched.

use std::mem::size_of;

use glam::Vec3;

use crate::error::FatalError;

/// Sizes of the buffers a step is about to touch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StepWorkload {
    pub particle_count: usize,
    pub spring_count: usize,
    pub shape_count: usize,
    pub substeps: u32,
}

impl StepWorkload {
    /// Rough upper bound on the working memory of one step, in bytes.
    pub fn estimated_bytes(&self) -> usize {
        // Committed copy, working copy, predicted and deltas.
        let per_particle = 4 * (3 * size_of::<Vec3>() + 2 * size_of::<f32>() + 2 * size_of::<u32>());
        let per_spring = 2 * size_of::<u32>() + 2 * size_of::<f32>();
        self.particle_count * per_particle + self.spring_count * per_spring
    }
}

/// Trait implemented by compute backends that host the step.
pub trait ComputeBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Called once per step before any buffer is touched.
    fn prepare_step(&self, _workload: &StepWorkload) -> Result<(), FatalError> {
        Ok(())
    }
}

/// Default backend that keeps all work on the CPU.
#[derive(Debug, Default, Clone)]
pub struct CpuBackend {
    memory_limit: Option<usize>,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuses steps whose estimated working set exceeds `bytes`.
    pub fn with_memory_limit(bytes: usize) -> Self {
        Self {
            memory_limit: Some(bytes),
        }
    }

    pub fn memory_limit(&self) -> Option<usize> {
        self.memory_limit
    }
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &str {
        "cpu"
    }

    fn prepare_step(&self, workload: &StepWorkload) -> Result<(), FatalError> {
        let requested = workload.estimated_bytes();
        match self.memory_limit {
            Some(limit) if requested > limit => Err(FatalError::Allocation {
                buffer: "step working set",
                requested,
            }),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_cpu_backend_accepts_any_step() {
        let workload = StepWorkload {
            particle_count: 1_000_000,
            spring_count: 10,
            shape_count: 1,
            substeps: 5,
        };
        assert!(CpuBackend::new().prepare_step(&workload).is_ok());
    }

    #[test]
    fn memory_limit_is_enforced() {
        let workload = StepWorkload {
            particle_count: 100,
            ..StepWorkload::default()
        };
        let backend = CpuBackend::with_memory_limit(16);
        let err = backend.prepare_step(&workload).unwrap_err();
        assert!(matches!(err, FatalError::Allocation { .. }));
    }
}
