use glam::Vec3;

use crate::{
    collision::detector::MeshCollider,
    core::{
        mesh::{compute_vertex_normals, Aabb, TriangleMesh},
        particles::{ParticleBuffers, SolverScratch},
    },
    utils::{allocator::ShapeId, parallel},
};

/// Working copy of a particle-driven mesh for the duration of one step.
#[derive(Debug, Clone)]
pub struct DynamicMeshState<'a> {
    pub shape: ShapeId,
    pub mesh: &'a TriangleMesh,
    pub vertices: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub bounds: Aabb,
    pub members: Vec<u32>,
}

impl<'a> DynamicMeshState<'a> {
    pub fn new(shape: ShapeId, mesh: &'a TriangleMesh) -> Self {
        Self {
            shape,
            mesh,
            vertices: mesh.vertices.clone(),
            normals: mesh.normals.clone(),
            bounds: mesh.bounds,
            members: mesh.bound_particles(),
        }
    }

    pub fn collider(&self) -> MeshCollider<'_> {
        MeshCollider {
            shape: self.shape,
            mesh: self.mesh,
            vertices: &self.vertices,
            bounds: self.bounds,
            members: &self.members,
        }
    }
}

/// Advances particles through one substep: prediction before the solver,
/// velocity update and commit after it.
#[derive(Debug, Clone)]
pub struct Integrator {
    /// Substep length.
    pub dt: f32,
    pub substeps: u32,
    parallel: bool,
}

impl Integrator {
    pub fn new(dt: f32, substeps: u32) -> Self {
        let substeps = substeps.max(1);
        Self {
            dt: dt / substeps as f32,
            substeps,
            parallel: false,
        }
    }

    pub fn with_parallel(mut self, enabled: bool) -> Self {
        self.parallel = enabled;
        self
    }

    /// `predicted = x + v·dt·(1 − damping) + g·dt²`. Fixed particles keep
    /// their position.
    pub fn predict(&self, particles: &ParticleBuffers, predicted: &mut [Vec3], gravity: Vec3, damping: f32) {
        let dt = self.dt;
        let drag = 1.0 - damping;
        parallel::for_each_mut(self.parallel, predicted, |slot, out| {
            let position = particles.positions[slot];
            *out = if particles.inverse_masses[slot] == 0.0 {
                position
            } else {
                position + particles.velocities[slot] * (dt * drag) + gravity * (dt * dt)
            };
        });
    }

    /// Flushes residual deltas, then derives velocities from the positional
    /// change, clamped to `max_speed`.
    pub fn apply_deltas(&self, particles: &mut ParticleBuffers, scratch: &mut SolverScratch, max_speed: f32) {
        scratch.flush_deltas();

        let inv_dt = 1.0 / self.dt;
        let positions = &particles.positions;
        let inverse_masses = &particles.inverse_masses;
        let predicted = &scratch.predicted;
        parallel::for_each_mut(self.parallel, &mut particles.velocities, |slot, velocity| {
            if inverse_masses[slot] == 0.0 {
                *velocity = Vec3::ZERO;
                return;
            }
            *velocity = ((predicted[slot] - positions[slot]) * inv_dt).clamp_length_max(max_speed);
        });
    }

    /// Commits the predicted positions.
    pub fn finalize(&self, particles: &mut ParticleBuffers, scratch: &mut SolverScratch) {
        particles.positions.copy_from_slice(&scratch.predicted);
        scratch.deltas.fill(Vec3::ZERO);
    }

    /// Moves dynamic mesh vertices onto their particles.
    pub fn update_triangles(
        &self,
        meshes: &mut [DynamicMeshState<'_>],
        particles: &ParticleBuffers,
        predicted: &[Vec3],
    ) {
        for state in meshes.iter_mut() {
            let Some(binding) = state.mesh.particle_binding.as_deref() else {
                continue;
            };
            for (vertex, &original) in state.vertices.iter_mut().zip(binding) {
                *vertex = predicted[particles.slot(original)];
            }
            state.bounds = Aabb::from_points(&state.vertices);
        }
    }

    /// Recomputes area-weighted vertex normals and mirrors them into the
    /// per-particle normal buffer.
    pub fn update_normals(&self, meshes: &mut [DynamicMeshState<'_>], particles: &mut ParticleBuffers) {
        for state in meshes.iter_mut() {
            compute_vertex_normals(&state.vertices, &state.mesh.indices, &mut state.normals);
            let Some(binding) = state.mesh.particle_binding.as_deref() else {
                continue;
            };
            for (normal, &original) in state.normals.iter().zip(binding) {
                let slot = particles.slot(original);
                particles.normals[slot] = *normal;
            }
        }
    }
}
