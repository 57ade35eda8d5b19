//! Velvet Solver – substepped XPBD particle simulation for Rust.
//!
//! Particles are advanced in substeps: predict, hash into a spatial grid,
//! gather neighbors, create contacts against particles, triangle meshes and
//! signed distance fields, project springs and contacts with XPBD, then
//! re-derive velocities. [`ParticleWorld`] owns the committed state and
//! drives the pipeline; everything else is exposed for reuse and testing.
//!
//! ```no_run
//! use velvet_solver::{ParticleWorld, Spring, Vec3};
//!
//! let positions = [Vec3::new(0.0, 1.0, 0.0), Vec3::new(0.5, 1.0, 0.0)];
//! let mut world = ParticleWorld::initialize(2, 0.1, &positions)?;
//! world.add_spring(Spring::new(0, 1, 0.5, 0.0))?;
//! world.step(1.0 / 60.0)?;
//! println!("{:?}", world.positions());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod collision;
pub mod compute;
pub mod config;
pub mod core;
pub mod dynamics;
pub mod error;
pub mod utils;
pub mod world;

pub use glam::Vec3;

pub use collision::{CollisionDetector, NeighborFinder, NeighborLists, Permutation, SpatialHashGrid};
pub use compute::{ComputeBackend, CpuBackend, StepWorkload};
pub use config::{ParamKind, ParamSpec, ParamValue, ParamsHandle, RelaxationMode, SimParams};
pub use core::{
    mesh::ground_plane, Aabb, Contact, ContactTarget, CustomField, MeshBuilder, Shape,
    SignedDistanceField, Spring, SpringKind, TriangleMesh,
};
pub use dynamics::{Integrator, XpbdSolver};
pub use error::{ConfigError, FatalError, NumericalError, NumericalErrorKind, StepError, StepResult};
pub use utils::{
    allocator::{Arena, GenerationalId, ShapeId},
    profiling::{SolverStats, StepTimers},
};
pub use world::{BoundsTracker, CancelToken, ParticleWorld};
