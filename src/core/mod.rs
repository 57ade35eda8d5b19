//! Core data describing particles, constraints, and collision geometry.

pub mod constraints;
pub mod mesh;
pub mod particles;
pub mod shapes;

pub use constraints::{Contact, ContactTarget, Spring, SpringKind};
pub use mesh::{Aabb, MeshBuilder, TriangleMesh};
pub use particles::{ParticleBuffers, SolverScratch};
pub use shapes::{CustomField, Shape, SignedDistanceField};
