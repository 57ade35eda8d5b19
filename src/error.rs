//! Error types for the solver.
//!
//! Configuration problems are rejected at assignment time with
//! [`ConfigError`]. Numerical trouble inside the solver never aborts a step;
//! it is recorded as a [`NumericalError`] and counted. Only a failing compute
//! resource surfaces as [`FatalError`], wrapped in [`StepError`].

use thiserror::Error;

/// Rejected parameter assignment or invalid world construction.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("parameter `{name}` = {value} is outside [{min}, {max}]")]
    OutOfRange {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("unknown parameter `{0}`")]
    UnknownParameter(String),
    #[error("parameter `{name}` expects a value of kind {expected}")]
    TypeMismatch {
        name: &'static str,
        expected: &'static str,
    },
    #[error("a particle world needs at least one particle")]
    NoParticles,
    #[error("particle diameter must be positive and finite, got {0}")]
    InvalidDiameter(f32),
    #[error("expected {expected} initial positions, got {actual}")]
    PositionCountMismatch { expected: usize, actual: usize },
    #[error("particle index {index} is out of range for {count} particles")]
    ParticleOutOfRange { index: usize, count: usize },
    #[error("mesh index {index} is out of range for {vertices} vertices")]
    MeshIndexOutOfRange { index: u32, vertices: usize },
    #[error("mesh has {expected} vertices but {actual} normals or bindings")]
    MeshBindingMismatch { expected: usize, actual: usize },
    #[error("value for `{0}` must be finite")]
    NonFinite(&'static str),
    #[error(transparent)]
    Resource(#[from] FatalError),
}

/// What went wrong while projecting a single constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericalErrorKind {
    /// The projection produced NaN or infinity.
    NonFiniteDelta,
    /// The constraint gradient or weight sum was too small to divide by.
    DegenerateGradient,
}

/// A constraint whose projection had to be discarded.
///
/// Never returned from [`crate::ParticleWorld::step`]; collected into
/// [`crate::SolverStats`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("constraint {constraint} produced a {kind:?} in substep {substep}")]
pub struct NumericalError {
    pub constraint: usize,
    pub substep: u32,
    pub kind: NumericalErrorKind,
}

/// Failure of the underlying compute resource. Aborts the whole step.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FatalError {
    #[error("failed to allocate {requested} elements for `{buffer}`")]
    Allocation {
        buffer: &'static str,
        requested: usize,
    },
    #[error("compute backend `{backend}` failed: {message}")]
    Backend { backend: String, message: String },
}

/// Outcome of an aborted step. The previously finalized state is untouched.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StepError {
    #[error(transparent)]
    Fatal(#[from] FatalError),
    #[error("step cancelled at the `{stage}` barrier")]
    Cancelled { stage: &'static str },
    #[error("time step must be positive and finite, got {0}")]
    InvalidTimeStep(f32),
    #[error("shape {id:?} is malformed: {source}")]
    InvalidShape {
        id: crate::utils::allocator::ShapeId,
        source: ConfigError,
    },
}

/// Convenient Result alias for step operations.
pub type StepResult<T> = std::result::Result<T, StepError>;
