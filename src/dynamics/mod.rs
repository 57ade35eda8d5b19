//! Prediction, XPBD constraint projection, and velocity update.

pub mod coloring;
pub mod friction;
pub mod integrator;
pub mod solver;

pub use coloring::ColorGroups;
pub use friction::coulomb_friction;
pub use integrator::{DynamicMeshState, Integrator};
pub use solver::{SpringInstance, SubstepInput, XpbdSolver};
