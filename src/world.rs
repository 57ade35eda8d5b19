//! The particle world: owns committed particle state, springs, and collision
//! shapes, and advances them with the substepped XPBD pipeline.

pub mod bounds;

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};

use glam::Vec3;

pub use bounds::BoundsTracker;

use crate::{
    collision::{
        detector::{CollisionDetector, FieldCollider, MeshCollider},
        grid::SpatialHashGrid,
        neighbors::NeighborFinder,
    },
    compute::{ComputeBackend, CpuBackend, StepWorkload},
    config::{ParamValue, ParamsHandle, SimParams},
    core::{
        constraints::Spring,
        mesh::{Aabb, TriangleMesh},
        particles::{ParticleBuffers, SolverScratch},
        shapes::Shape,
    },
    dynamics::{
        integrator::{DynamicMeshState, Integrator},
        solver::{SpringInstance, SubstepInput, XpbdSolver},
    },
    error::{ConfigError, NumericalError, StepError, StepResult},
    utils::{
        allocator::{Arena, ShapeId},
        logging::{warn_if_frame_budget_exceeded, ScopedTimer},
        profiling::{SolverStats, StepTimers},
    },
};

/// Cooperative cancellation flag polled at every barrier of a step.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    fn check(&self, stage: &'static str) -> StepResult<()> {
        if self.is_cancelled() {
            return Err(StepError::Cancelled { stage });
        }
        Ok(())
    }
}

/// Everything a successful step produces, applied in one go.
struct StepOutput {
    particles: ParticleBuffers,
    meshes: Vec<(ShapeId, Vec<Vec3>, Vec<Vec3>)>,
    bounds: Aabb,
    timers: StepTimers,
    stats: SolverStats,
    errors: Vec<NumericalError>,
}

/// Central simulation container.
///
/// Readers only ever see committed state: a step works on private copies of
/// the particle buffers and swaps them in after its last barrier, so a
/// failed or cancelled step leaves the world exactly as it was.
pub struct ParticleWorld {
    particles: ParticleBuffers,
    springs: Vec<Spring>,
    shapes: Arena<Shape>,
    params: ParamsHandle,
    backend: Box<dyn ComputeBackend>,
    bounds: BoundsTracker,
    timers: StepTimers,
    stats: SolverStats,
    numerical_errors: Vec<NumericalError>,
    ordered_positions: Vec<Vec3>,
    ordered_velocities: Vec<Vec3>,
    ordered_normals: Vec<Vec3>,
    parallel_enabled: bool,
    frame_budget_ms: Option<f32>,
}

impl ParticleWorld {
    /// Creates a world of `num_particles` particles at `initial_positions`
    /// with default parameters.
    pub fn initialize(
        num_particles: usize,
        particle_diameter: f32,
        initial_positions: &[Vec3],
    ) -> Result<Self, ConfigError> {
        if num_particles == 0 {
            return Err(ConfigError::NoParticles);
        }
        if !(particle_diameter.is_finite() && particle_diameter > 0.0) {
            return Err(ConfigError::InvalidDiameter(particle_diameter));
        }
        if initial_positions.len() != num_particles {
            return Err(ConfigError::PositionCountMismatch {
                expected: num_particles,
                actual: initial_positions.len(),
            });
        }
        if initial_positions.iter().any(|p| !p.is_finite()) {
            return Err(ConfigError::NonFinite("initial_positions"));
        }

        let mut params = SimParams::default();
        params.set("particle_diameter", ParamValue::Float(particle_diameter))?;

        let mut particles = ParticleBuffers::allocate(num_particles)?;
        particles.seed(initial_positions, particle_diameter * 0.5);

        let mut bounds = BoundsTracker::new();
        bounds.update(&particles.positions, &particles.radii);

        log::info!(
            "initialized particle world: {} particles, diameter {}",
            num_particles,
            particle_diameter
        );

        Ok(Self {
            ordered_positions: particles.positions.clone(),
            ordered_velocities: particles.velocities.clone(),
            ordered_normals: particles.normals.clone(),
            particles,
            springs: Vec::new(),
            shapes: Arena::new(),
            params: ParamsHandle::new(params),
            backend: Box::new(CpuBackend::new()),
            bounds,
            timers: StepTimers::default(),
            stats: SolverStats::default(),
            numerical_errors: Vec::new(),
            parallel_enabled: cfg!(feature = "parallel"),
            frame_budget_ms: None,
        })
    }

    /// Replaces the parameter table after validating it. The particle
    /// diameter chosen at [`ParticleWorld::initialize`] is kept; change it
    /// through the handle if needed.
    pub fn with_params(self, params: SimParams) -> Result<Self, ConfigError> {
        self.params.update(|current| {
            let particle_diameter = current.particle_diameter;
            *current = params;
            current.particle_diameter = particle_diameter;
        })?;
        Ok(self)
    }

    pub fn particle_count(&self) -> usize {
        self.particles.len()
    }

    /// Positions in original particle order.
    pub fn positions(&self) -> &[Vec3] {
        &self.ordered_positions
    }

    pub fn velocities(&self) -> &[Vec3] {
        &self.ordered_velocities
    }

    /// Vertex normals of particles that belong to a dynamic mesh, zero for
    /// every other particle.
    pub fn normals(&self) -> &[Vec3] {
        &self.ordered_normals
    }

    pub fn inverse_mass(&self, index: usize) -> Option<f32> {
        let slot = *self.particles.slot_of.get(index)?;
        Some(self.particles.inverse_masses[slot as usize])
    }

    pub fn timers(&self) -> &StepTimers {
        &self.timers
    }

    pub fn stats(&self) -> &SolverStats {
        &self.stats
    }

    /// Projections discarded during the last step.
    pub fn numerical_errors(&self) -> &[NumericalError] {
        &self.numerical_errors
    }

    pub fn bounds(&self) -> Aabb {
        self.bounds.bounds()
    }

    pub fn params(&self) -> SimParams {
        self.params.snapshot()
    }

    /// Shared handle for a tuning front-end. Edits apply from the next step.
    pub fn params_handle(&self) -> ParamsHandle {
        self.params.clone()
    }

    pub fn set_parallel_enabled(&mut self, enabled: bool) {
        self.parallel_enabled = enabled;
    }

    pub fn parallel_enabled(&self) -> bool {
        self.parallel_enabled
    }

    pub fn set_compute_backend<B>(&mut self, backend: B)
    where
        B: ComputeBackend + 'static,
    {
        self.backend = Box::new(backend);
    }

    pub fn compute_backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Warn when a step takes longer than `budget_ms`.
    pub fn set_frame_budget(&mut self, budget_ms: Option<f32>) {
        self.frame_budget_ms = budget_ms;
    }

    fn check_index(&self, index: usize) -> Result<usize, ConfigError> {
        let count = self.particles.len();
        if index >= count {
            return Err(ConfigError::ParticleOutOfRange { index, count });
        }
        Ok(self.particles.slot(index as u32))
    }

    /// Zero pins the particle in place.
    pub fn set_inverse_mass(&mut self, index: usize, inverse_mass: f32) -> Result<(), ConfigError> {
        let slot = self.check_index(index)?;
        if !inverse_mass.is_finite() {
            return Err(ConfigError::NonFinite("inverse_mass"));
        }
        if inverse_mass < 0.0 {
            return Err(ConfigError::OutOfRange {
                name: "inverse_mass",
                value: inverse_mass as f64,
                min: 0.0,
                max: f64::INFINITY,
            });
        }
        self.particles.inverse_masses[slot] = inverse_mass;
        if inverse_mass == 0.0 {
            self.particles.velocities[slot] = Vec3::ZERO;
            self.ordered_velocities[index] = Vec3::ZERO;
        }
        Ok(())
    }

    pub fn set_velocity(&mut self, index: usize, velocity: Vec3) -> Result<(), ConfigError> {
        let slot = self.check_index(index)?;
        if !velocity.is_finite() {
            return Err(ConfigError::NonFinite("velocity"));
        }
        if self.particles.is_fixed(slot) {
            return Ok(());
        }
        self.particles.velocities[slot] = velocity;
        self.ordered_velocities[index] = velocity;
        Ok(())
    }

    /// Registers a spring between two original particle ids and returns its
    /// index.
    pub fn add_spring(&mut self, spring: Spring) -> Result<usize, ConfigError> {
        self.check_index(spring.particle_a as usize)?;
        self.check_index(spring.particle_b as usize)?;
        for (name, value) in [
            ("rest_length", spring.rest_length),
            ("compliance", spring.compliance),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::NonFinite(name));
            }
            if value < 0.0 {
                return Err(ConfigError::OutOfRange {
                    name,
                    value: value as f64,
                    min: 0.0,
                    max: f64::INFINITY,
                });
            }
        }
        self.springs.push(spring);
        Ok(self.springs.len() - 1)
    }

    pub fn springs(&self) -> &[Spring] {
        &self.springs
    }

    /// Adds a collision shape. Triangle meshes are checked for out-of-range
    /// indices and particle bindings first.
    pub fn add_shape(&mut self, shape: impl Into<Shape>) -> Result<ShapeId, ConfigError> {
        let shape = shape.into();
        if let Shape::TriangleMesh(mesh) = &shape {
            mesh.validate(self.particles.len())?;
        }
        Ok(self.shapes.insert(shape))
    }

    pub fn shape(&self, id: ShapeId) -> Option<&Shape> {
        self.shapes.get(id)
    }

    pub fn shape_mut(&mut self, id: ShapeId) -> Option<&mut Shape> {
        self.shapes.get_mut(id)
    }

    pub fn remove_shape(&mut self, id: ShapeId) -> Option<Shape> {
        self.shapes.remove(id)
    }

    pub fn shapes(&self) -> impl Iterator<Item = (ShapeId, &Shape)> + '_ {
        self.shapes.iter()
    }

    /// Adds a triangle mesh whose corners are particles (original ids). Its
    /// vertices and normals follow the particles every step.
    pub fn add_dynamic_mesh(&mut self, triangles: &[[u32; 3]]) -> Result<ShapeId, ConfigError> {
        for &index in triangles.iter().flatten() {
            self.check_index(index as usize)?;
        }
        let mesh = TriangleMesh::bound_to_particles(triangles, &self.ordered_positions);
        self.add_shape(mesh)
    }

    /// Advances the simulation by `dt`.
    pub fn step(&mut self, dt: f32) -> StepResult<()> {
        self.step_with_cancel(dt, &CancelToken::new())
    }

    /// Advances the simulation by `dt`, giving up at the first barrier after
    /// `cancel` is raised. On any error the committed state is unchanged.
    pub fn step_with_cancel(&mut self, dt: f32, cancel: &CancelToken) -> StepResult<()> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(StepError::InvalidTimeStep(dt));
        }
        let started = Instant::now();
        let params = self.params.snapshot();
        self.validate_shapes()?;

        let workload = StepWorkload {
            particle_count: self.particles.len(),
            spring_count: self.springs.len(),
            shape_count: self.shapes.len(),
            substeps: params.num_substeps,
        };

        let output = self
            .backend
            .prepare_step(&workload)
            .map_err(StepError::from)
            .and_then(|()| self.run_step(dt, &params, cancel))
            .and_then(|output| cancel.check("commit").map(|()| output));

        let output = match output {
            Ok(output) => output,
            Err(err) => {
                log::warn!("step aborted, previous state kept: {err}");
                return Err(err);
            }
        };

        self.commit(output);
        self.timers.report();
        if let Some(budget) = self.frame_budget_ms {
            warn_if_frame_budget_exceeded(started.elapsed(), budget);
        }
        Ok(())
    }

    /// Meshes edited through [`ParticleWorld::shape_mut`] are rechecked
    /// before they are used.
    fn validate_shapes(&self) -> StepResult<()> {
        for (id, shape) in self.shapes.iter() {
            if let Shape::TriangleMesh(mesh) = shape {
                mesh.validate(self.particles.len())
                    .map_err(|source| StepError::InvalidShape { id, source })?;
            }
        }
        Ok(())
    }

    fn commit(&mut self, output: StepOutput) {
        self.particles = output.particles;
        self.particles
            .gather_original(&self.particles.positions, &mut self.ordered_positions);
        self.particles
            .gather_original(&self.particles.velocities, &mut self.ordered_velocities);
        self.particles
            .gather_original(&self.particles.normals, &mut self.ordered_normals);

        for (id, vertices, normals) in output.meshes {
            if let Some(Shape::TriangleMesh(mesh)) = self.shapes.get_mut(id) {
                mesh.set_vertices(vertices, normals);
            }
        }

        self.bounds = BoundsTracker::from(output.bounds);
        self.timers = output.timers;
        self.stats = output.stats;
        self.numerical_errors = output.errors;
    }

    /// Runs every substep on private copies. Nothing in `self` changes here.
    fn run_step(&self, dt: f32, params: &SimParams, cancel: &CancelToken) -> StepResult<StepOutput> {
        let parallel = self.parallel_enabled;
        let count = self.particles.len();

        let mut particles = self.particles.try_clone()?;
        particles.radii.fill(params.particle_diameter * 0.5);
        let mut scratch = SolverScratch::allocate(count)?;
        let mut grid = SpatialHashGrid::new(params.cell_size(), count)?;

        let integrator = Integrator::new(dt, params.num_substeps).with_parallel(parallel);
        let solver = XpbdSolver::from_params(params).with_parallel(parallel);
        let detector =
            CollisionDetector::new(params.collision_margin, params.friction).with_parallel(parallel);
        let finder = NeighborFinder::new(params.neighbor_radius(), params.max_num_neighbors);

        let mut static_meshes = Vec::new();
        let mut dynamic_meshes = Vec::new();
        let mut fields = Vec::new();
        for (shape, entry) in self.shapes.iter() {
            match entry {
                Shape::TriangleMesh(mesh) if mesh.is_dynamic() => {
                    dynamic_meshes.push(DynamicMeshState::new(shape, mesh));
                }
                Shape::TriangleMesh(mesh) => static_meshes.push(MeshCollider::fixed(shape, mesh)),
                Shape::Field(field) => fields.push(FieldCollider { shape, field }),
            }
        }

        let mut timers = StepTimers::default();
        let mut stats = SolverStats {
            springs: self.springs.len(),
            ..SolverStats::default()
        };
        let mut errors = Vec::new();

        for substep in 0..integrator.substeps {
            cancel.check("predict")?;
            {
                let _timer = ScopedTimer::recording("predict", &mut timers.predict);
                integrator.predict(&particles, &mut scratch.predicted, params.gravity, params.damping);
            }
            {
                let _timer =
                    ScopedTimer::recording("create_cell_indices", &mut timers.create_cell_indices);
                grid.create_cell_indices(&scratch.predicted, parallel);
            }
            {
                let _timer =
                    ScopedTimer::recording("sort_cell_indices", &mut timers.sort_cell_indices);
                grid.sort_cell_indices(parallel);
            }
            {
                let _timer = ScopedTimer::recording("create_grid", &mut timers.create_grid);
                grid.create_grid();
            }
            if params.reorder_particles {
                let _timer = ScopedTimer::recording("reorder", &mut timers.reorder);
                let permutation = grid.sorted_permutation();
                particles.apply_permutation(&permutation);
                scratch.predicted = permutation.apply(&scratch.predicted);
                grid.mark_reordered();
            }

            cancel.check("collide")?;
            let mut contacts = Vec::new();
            {
                let _timer =
                    ScopedTimer::recording("collide_particles", &mut timers.collide_particles);
                let neighbors = finder.find(&grid, &scratch.predicted, parallel)?;
                stats.truncated_neighbor_lists += neighbors.truncated();
                let found = detector.collide_particles(&particles, &scratch.predicted, &neighbors);
                stats.particle_contacts = found.len();
                contacts.extend(found);
            }
            {
                let _timer =
                    ScopedTimer::recording("collide_triangles", &mut timers.collide_triangles);
                let colliders: Vec<MeshCollider<'_>> = static_meshes
                    .iter()
                    .copied()
                    .chain(dynamic_meshes.iter().map(|state| state.collider()))
                    .collect();
                let found = detector.collide_triangles(&particles, &scratch.predicted, &colliders);
                stats.triangle_contacts = found.len();
                contacts.extend(found);
            }
            {
                let _timer = ScopedTimer::recording("collide_fields", &mut timers.collide_fields);
                let found = detector.collide_fields(&particles, &scratch.predicted, &fields);
                stats.field_contacts = found.len();
                contacts.extend(found);
            }
            stats.contacts = contacts.len();

            cancel.check("solve")?;
            let springs = SpringInstance::resolve(&self.springs, &particles, params.bend_compliance);
            let input = SubstepInput {
                particles: &particles,
                springs: &springs,
                contacts: &contacts,
                dt: integrator.dt,
                substep,
            };
            errors.extend(solver.solve(&input, &mut scratch, &mut timers, &mut stats));

            cancel.check("integrate")?;
            {
                let _timer = ScopedTimer::recording("apply_deltas", &mut timers.apply_deltas);
                integrator.apply_deltas(&mut particles, &mut scratch, params.max_speed);
            }
            {
                let _timer =
                    ScopedTimer::recording("update_triangles", &mut timers.update_triangles);
                integrator.update_triangles(&mut dynamic_meshes, &particles, &scratch.predicted);
            }
            {
                let _timer = ScopedTimer::recording("update_normals", &mut timers.update_normals);
                integrator.update_normals(&mut dynamic_meshes, &mut particles);
            }
            {
                let _timer = ScopedTimer::recording("finalize", &mut timers.finalize);
                integrator.finalize(&mut particles, &mut scratch);
            }
            stats.substeps += 1;
        }

        let bounds = {
            let _timer = ScopedTimer::recording("update_bounds", &mut timers.update_bounds);
            BoundsTracker::new().update(&particles.positions, &particles.radii)
        };
        timers.sum_total();

        let meshes = dynamic_meshes
            .into_iter()
            .map(|state| (state.shape, state.vertices, state.normals))
            .collect();

        Ok(StepOutput {
            particles,
            meshes,
            bounds,
            timers,
            stats,
            errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn world_is_send_and_sync() {
        assert_send_sync::<ParticleWorld>();
        assert_send_sync::<CancelToken>();
    }

    #[test]
    fn rejects_invalid_construction() {
        assert_eq!(
            ParticleWorld::initialize(0, 0.1, &[]).err(),
            Some(ConfigError::NoParticles)
        );
        assert_eq!(
            ParticleWorld::initialize(1, 0.0, &[Vec3::ZERO]).err(),
            Some(ConfigError::InvalidDiameter(0.0))
        );
        assert!(matches!(
            ParticleWorld::initialize(2, 0.1, &[Vec3::ZERO]),
            Err(ConfigError::PositionCountMismatch {
                expected: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn invalid_time_step_is_rejected() {
        let mut world = ParticleWorld::initialize(1, 0.1, &[Vec3::ZERO]).expect("world");
        assert_eq!(world.step(0.0), Err(StepError::InvalidTimeStep(0.0)));
        assert!(world.step(f32::NAN).is_err());
    }

    #[test]
    fn scene_edits_are_range_checked() {
        let mut world = ParticleWorld::initialize(2, 0.1, &[Vec3::ZERO, Vec3::X]).expect("world");
        assert!(world.set_inverse_mass(5, 1.0).is_err());
        assert!(world.set_inverse_mass(0, -1.0).is_err());
        assert!(world.add_spring(Spring::new(0, 2, 1.0, 0.0)).is_err());
        assert_eq!(world.add_spring(Spring::new(0, 1, 1.0, 0.0)), Ok(0));
        assert!(world.add_dynamic_mesh(&[[0, 1, 7]]).is_err());
    }

    #[test]
    fn falling_particle_gains_speed() {
        let mut world = ParticleWorld::initialize(1, 0.1, &[Vec3::new(0.0, 1.0, 0.0)]).expect("world");
        world.step(1.0 / 60.0).expect("step");
        assert!(world.positions()[0].y < 1.0);
        assert!(world.velocities()[0].y < 0.0);
        assert_eq!(world.stats().substeps, 5);
    }
}
