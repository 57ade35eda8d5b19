//! Spatial hashing, neighbor search, and contact generation.

pub mod detector;
pub mod grid;
pub mod neighbors;
pub mod queries;

pub use detector::{CollisionDetector, FieldCollider, MeshCollider};
pub use grid::{Permutation, SpatialHashGrid};
pub use neighbors::{NeighborFinder, NeighborLists};
pub use queries::{closest_point_on_triangle, triangle_normal};
