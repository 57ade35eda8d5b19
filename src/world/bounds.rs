use glam::Vec3;

use crate::core::mesh::Aabb;

/// Tracks the box enclosing every particle, including its radius.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct BoundsTracker {
    bounds: Aabb,
}

impl BoundsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recomputes the bounds from finalized positions.
    pub fn update(&mut self, positions: &[Vec3], radii: &[f32]) -> Aabb {
        let max_radius = radii.iter().copied().fold(0.0f32, f32::max);
        self.bounds = Aabb::from_points(positions).expanded(max_radius);
        self.bounds
    }

    pub fn bounds(&self) -> Aabb {
        self.bounds
    }
}

impl From<Aabb> for BoundsTracker {
    fn from(bounds: Aabb) -> Self {
        Self { bounds }
    }
}
