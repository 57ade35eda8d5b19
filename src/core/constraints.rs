use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::utils::allocator::ShapeId;

/// Which compliance a spring draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SpringKind {
    /// Uses the spring's own compliance.
    #[default]
    Stretch,
    /// Uses the live `bend_compliance` parameter.
    Bend,
}

/// Distance constraint between two particles. Built at scene construction
/// and kept for the whole run; endpoints are original particle ids.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Spring {
    pub particle_a: u32,
    pub particle_b: u32,
    pub rest_length: f32,
    /// Inverse stiffness, 0 is rigid.
    pub compliance: f32,
    pub kind: SpringKind,
}

impl Spring {
    pub fn new(particle_a: u32, particle_b: u32, rest_length: f32, compliance: f32) -> Self {
        Self {
            particle_a,
            particle_b,
            rest_length,
            compliance,
            kind: SpringKind::Stretch,
        }
    }

    pub fn bend(particle_a: u32, particle_b: u32, rest_length: f32) -> Self {
        Self {
            particle_a,
            particle_b,
            rest_length,
            compliance: 0.0,
            kind: SpringKind::Bend,
        }
    }

    pub fn effective_compliance(&self, bend_compliance: f32) -> f32 {
        match self.kind {
            SpringKind::Stretch => self.compliance,
            SpringKind::Bend => bend_compliance,
        }
    }
}

/// What a contact pushes a particle away from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactTarget {
    /// A shape in the world's arena. Never owned by the contact.
    Shape(ShapeId),
    /// Another particle, by slot.
    Particle(u32),
}

/// Unilateral contact created by collision detection for one substep.
///
/// For shape targets the constraint is `normal · (x − point) ≥ offset`.
/// For particle targets it is `|x_a − x_b| ≥ offset`, and `normal`/`point`
/// only record the state at detection time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contact {
    /// Slot of the colliding particle.
    pub particle: u32,
    pub target: ContactTarget,
    pub point: Vec3,
    pub normal: Vec3,
    /// Separation the constraint maintains.
    pub offset: f32,
    /// How far inside `offset` the particle was when detected.
    pub penetration: f32,
    pub friction: f32,
}

impl Contact {
    pub fn other_particle(&self) -> Option<u32> {
        match self.target {
            ContactTarget::Particle(other) => Some(other),
            ContactTarget::Shape(_) => None,
        }
    }
}
