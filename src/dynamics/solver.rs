//! XPBD constraint projection.
//!
//! Each substep starts every constraint from `λ = 0`. One iteration projects
//! all springs and then all contacts:
//!
//! ```text
//! Δλ = (−C − α̃λ) / (Σ w|∇C|² + α̃),   α̃ = compliance / dt²
//! Δx = w ∇C Δλ
//! ```
//!
//! Contacts are unilateral: their accumulated `λ` is clamped at zero so they
//! only ever push. `Sequential` mode writes every correction straight into
//! the predicted positions (Gauss–Seidel). `Batched` mode colours the
//! constraints into conflict-free groups, computes a group's corrections
//! concurrently into the delta buffer, and flushes it before the next group.

use glam::Vec3;

use super::{coloring::ColorGroups, friction};
use crate::{
    config::{RelaxationMode, SimParams},
    core::{
        constraints::{Contact, ContactTarget, Spring},
        particles::{ParticleBuffers, SolverScratch},
    },
    error::{NumericalError, NumericalErrorKind},
    utils::{
        logging::ScopedTimer,
        parallel,
        profiling::{SolverStats, StepTimers},
    },
};

/// Below this a gradient or weight sum counts as degenerate.
const DEGENERATE_EPSILON: f32 = 1.0e-9;

/// A spring with its endpoints resolved to the current slots.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpringInstance {
    pub a: usize,
    pub b: usize,
    pub rest_length: f32,
    pub compliance: f32,
}

impl SpringInstance {
    pub fn resolve(springs: &[Spring], particles: &ParticleBuffers, bend_compliance: f32) -> Vec<Self> {
        springs
            .iter()
            .map(|spring| Self {
                a: particles.slot(spring.particle_a),
                b: particles.slot(spring.particle_b),
                rest_length: spring.rest_length,
                compliance: spring.effective_compliance(bend_compliance),
            })
            .collect()
    }
}

/// Everything the solver reads during one substep.
pub struct SubstepInput<'a> {
    pub particles: &'a ParticleBuffers,
    pub springs: &'a [SpringInstance],
    pub contacts: &'a [Contact],
    pub dt: f32,
    pub substep: u32,
}

/// Result of projecting a single constraint against the current positions.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Projection {
    /// Nothing to do: both endpoints fixed, or the constraint is disabled.
    Skip,
    Degenerate,
    NonFinite,
    Apply {
        delta_lambda: f32,
        first: (usize, Vec3),
        second: Option<(usize, Vec3)>,
        friction_ratio: Option<f32>,
    },
}

/// Per-constraint multipliers for one substep.
#[derive(Debug, Clone, Default)]
struct Multipliers {
    lambda: Vec<f32>,
    disabled: Vec<bool>,
}

impl Multipliers {
    fn new(count: usize) -> Self {
        Self {
            lambda: vec![0.0; count],
            disabled: vec![false; count],
        }
    }
}

/// Bookkeeping shared by both passes of an iteration.
struct PassLog<'a> {
    stats: &'a mut SolverStats,
    errors: &'a mut Vec<NumericalError>,
    substep: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct XpbdSolver {
    pub iterations: u32,
    pub mode: RelaxationMode,
    pub relaxation_factor: f32,
    pub parallel: bool,
}

impl XpbdSolver {
    pub fn new(iterations: u32, mode: RelaxationMode, relaxation_factor: f32) -> Self {
        Self {
            iterations,
            mode,
            relaxation_factor,
            parallel: false,
        }
    }

    pub fn from_params(params: &SimParams) -> Self {
        Self::new(
            params.num_iterations,
            params.relaxation_mode,
            params.relaxation_factor,
        )
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Runs every iteration of one substep. Discarded projections are
    /// returned; they never abort the substep.
    pub fn solve(
        &self,
        input: &SubstepInput<'_>,
        scratch: &mut SolverScratch,
        timers: &mut StepTimers,
        stats: &mut SolverStats,
    ) -> Vec<NumericalError> {
        let particles = input.particles;
        let inverse_masses = &particles.inverse_masses;
        let previous = &particles.positions;
        let alpha_scale = 1.0 / (input.dt * input.dt);
        let relaxation = self.relaxation_factor;

        let mut spring_state = Multipliers::new(input.springs.len());
        let mut contact_state = Multipliers::new(input.contacts.len());
        let mut errors = Vec::new();

        let coloring = match self.mode {
            RelaxationMode::Sequential => None,
            RelaxationMode::Batched => {
                let is_fixed = |slot: usize| particles.is_fixed(slot);
                let springs = ColorGroups::build(
                    input.springs.iter().map(|s| (s.a, Some(s.b))),
                    particles.len(),
                    is_fixed,
                );
                let contacts = ColorGroups::build(
                    input
                        .contacts
                        .iter()
                        .map(|c| (c.particle as usize, c.other_particle().map(|o| o as usize))),
                    particles.len(),
                    is_fixed,
                );
                stats.color_groups = springs.len() + contacts.len();
                Some((springs, contacts))
            }
        };

        let spring_projection = |index: usize, predicted: &[Vec3], lambda: f32| {
            let spring = &input.springs[index];
            project_spring(spring, predicted, inverse_masses, lambda, alpha_scale, relaxation)
        };
        let contact_projection = |index: usize, predicted: &[Vec3], lambda: f32| {
            let contact = &input.contacts[index];
            project_contact(contact, predicted, previous, inverse_masses, lambda, relaxation)
        };

        let mut log = PassLog {
            stats,
            errors: &mut errors,
            substep: input.substep,
        };

        for _ in 0..self.iterations {
            {
                let _timer = ScopedTimer::recording("solve_springs", &mut timers.solve_springs);
                self.run_pass(
                    input.springs.len(),
                    0,
                    coloring.as_ref().map(|(springs, _)| springs),
                    &mut spring_state,
                    scratch,
                    &mut log,
                    &spring_projection,
                );
            }
            {
                let _timer = ScopedTimer::recording("solve_contacts", &mut timers.solve_contacts);
                self.run_pass(
                    input.contacts.len(),
                    input.springs.len(),
                    coloring.as_ref().map(|(_, contacts)| contacts),
                    &mut contact_state,
                    scratch,
                    &mut log,
                    &contact_projection,
                );
            }
        }

        errors
    }

    #[allow(clippy::too_many_arguments)]
    fn run_pass<F>(
        &self,
        count: usize,
        index_base: usize,
        groups: Option<&ColorGroups>,
        state: &mut Multipliers,
        scratch: &mut SolverScratch,
        log: &mut PassLog<'_>,
        project: &F,
    ) where
        F: Fn(usize, &[Vec3], f32) -> Projection + Sync,
    {
        let Some(groups) = groups else {
            for index in 0..count {
                self.project_in_place(index, index_base, state, scratch, log, project);
            }
            return;
        };

        for group in &groups.groups {
            let projections = {
                let predicted = &scratch.predicted;
                let state = &*state;
                parallel::map_indices(self.parallel, group.len(), |k| {
                    let index = group[k];
                    if state.disabled[index] {
                        Projection::Skip
                    } else {
                        project(index, predicted, state.lambda[index])
                    }
                })
            };
            for (&index, projection) in group.iter().zip(projections) {
                commit(index, index_base, projection, state, &mut scratch.deltas, log);
            }
            scratch.flush_deltas();
        }

        for &index in &groups.overflow {
            self.project_in_place(index, index_base, state, scratch, log, project);
        }
    }

    fn project_in_place<F>(
        &self,
        index: usize,
        index_base: usize,
        state: &mut Multipliers,
        scratch: &mut SolverScratch,
        log: &mut PassLog<'_>,
        project: &F,
    ) where
        F: Fn(usize, &[Vec3], f32) -> Projection,
    {
        if state.disabled[index] {
            return;
        }
        let projection = project(index, &scratch.predicted, state.lambda[index]);
        commit(index, index_base, projection, state, &mut scratch.predicted, log);
    }
}

fn commit(
    index: usize,
    index_base: usize,
    projection: Projection,
    state: &mut Multipliers,
    target: &mut [Vec3],
    log: &mut PassLog<'_>,
) {
    match projection {
        Projection::Skip => {}
        Projection::Degenerate => {
            log.stats.degenerate_skips += 1;
            log.stats.numerical_warnings += 1;
            let error = NumericalError {
                constraint: index_base + index,
                substep: log.substep,
                kind: NumericalErrorKind::DegenerateGradient,
            };
            log::debug!("{error}; skipped for this iteration");
            log.errors.push(error);
        }
        Projection::NonFinite => {
            state.disabled[index] = true;
            log.stats.numerical_warnings += 1;
            let error = NumericalError {
                constraint: index_base + index,
                substep: log.substep,
                kind: NumericalErrorKind::NonFiniteDelta,
            };
            log::warn!("{error}; disabled for the rest of the substep");
            log.errors.push(error);
        }
        Projection::Apply {
            delta_lambda,
            first,
            second,
            friction_ratio,
        } => {
            state.lambda[index] += delta_lambda;
            target[first.0] += first.1;
            if let Some((slot, delta)) = second {
                target[slot] += delta;
            }
            if let Some(ratio) = friction_ratio {
                log.stats.max_friction_ratio = log.stats.max_friction_ratio.max(ratio);
            }
        }
    }
}

fn all_finite(delta_lambda: f32, deltas: &[Vec3]) -> bool {
    delta_lambda.is_finite() && deltas.iter().all(|d| d.is_finite())
}

fn project_spring(
    spring: &SpringInstance,
    predicted: &[Vec3],
    inverse_masses: &[f32],
    lambda: f32,
    alpha_scale: f32,
    relaxation: f32,
) -> Projection {
    let (wa, wb) = (inverse_masses[spring.a], inverse_masses[spring.b]);
    let weight = wa + wb;
    if weight == 0.0 {
        return Projection::Skip;
    }

    let delta = predicted[spring.a] - predicted[spring.b];
    let length = delta.length();
    if length < DEGENERATE_EPSILON || weight < DEGENERATE_EPSILON {
        return Projection::Degenerate;
    }
    let gradient = delta / length;
    let c = length - spring.rest_length;
    let alpha = spring.compliance * alpha_scale;

    let delta_lambda = relaxation * (-c - alpha * lambda) / (weight + alpha);
    let da = gradient * (wa * delta_lambda);
    let db = gradient * (-wb * delta_lambda);
    if !all_finite(delta_lambda, &[da, db]) {
        return Projection::NonFinite;
    }

    Projection::Apply {
        delta_lambda,
        first: (spring.a, da),
        second: Some((spring.b, db)),
        friction_ratio: None,
    }
}

/// Contacts are rigid (`α̃ = 0`) and one-sided.
fn project_contact(
    contact: &Contact,
    predicted: &[Vec3],
    previous: &[Vec3],
    inverse_masses: &[f32],
    lambda: f32,
    relaxation: f32,
) -> Projection {
    let a = contact.particle as usize;
    let wa = inverse_masses[a];

    match contact.target {
        ContactTarget::Shape(_) => {
            if wa == 0.0 {
                return Projection::Skip;
            }
            let normal = contact.normal;
            let c = normal.dot(predicted[a] - contact.point) - contact.offset;
            let delta_lambda = clamp_unilateral(lambda, relaxation * -c / wa);
            if delta_lambda == 0.0 {
                return Projection::Skip;
            }

            let push = wa * delta_lambda;
            let mut da = normal * push;
            let mut friction_ratio = None;
            if delta_lambda > 0.0 {
                let moved = predicted[a] + da - previous[a];
                let tangential = friction::tangential_part(moved, normal);
                let correction = friction::coulomb_friction(tangential, push, contact.friction);
                if correction != Vec3::ZERO {
                    friction_ratio = Some(correction.length() / push);
                    da += correction;
                }
            }
            if !all_finite(delta_lambda, &[da]) {
                return Projection::NonFinite;
            }

            Projection::Apply {
                delta_lambda,
                first: (a, da),
                second: None,
                friction_ratio,
            }
        }
        ContactTarget::Particle(other) => {
            let b = other as usize;
            let wb = inverse_masses[b];
            let weight = wa + wb;
            if weight == 0.0 {
                return Projection::Skip;
            }

            let delta = predicted[a] - predicted[b];
            let length = delta.length();
            if length < DEGENERATE_EPSILON || weight < DEGENERATE_EPSILON {
                return Projection::Degenerate;
            }
            let normal = delta / length;
            let c = length - contact.offset;
            let delta_lambda = clamp_unilateral(lambda, relaxation * -c / weight);
            if delta_lambda == 0.0 {
                return Projection::Skip;
            }

            let mut da = normal * (wa * delta_lambda);
            let mut db = normal * (-wb * delta_lambda);
            let mut friction_ratio = None;
            if delta_lambda > 0.0 {
                let push = weight * delta_lambda;
                let relative = (predicted[a] + da - previous[a]) - (predicted[b] + db - previous[b]);
                let tangential = friction::tangential_part(relative, normal);
                let correction = friction::coulomb_friction(tangential, push, contact.friction);
                if correction != Vec3::ZERO {
                    friction_ratio = Some(correction.length() / push);
                    da += correction * (wa / weight);
                    db -= correction * (wb / weight);
                }
            }
            if !all_finite(delta_lambda, &[da, db]) {
                return Projection::NonFinite;
            }

            Projection::Apply {
                delta_lambda,
                first: (a, da),
                second: Some((b, db)),
                friction_ratio,
            }
        }
    }
}

/// Keeps the accumulated multiplier non-negative and returns the increment
/// that actually gets applied.
fn clamp_unilateral(lambda: f32, delta_lambda: f32) -> f32 {
    (lambda + delta_lambda).max(0.0) - lambda
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::allocator::Arena;
    use approx::assert_abs_diff_eq;

    fn two_particles(a: Vec3, b: Vec3) -> (ParticleBuffers, SolverScratch) {
        let mut particles = ParticleBuffers::allocate(2).expect("alloc");
        particles.seed(&[a, b], 0.05);
        let mut scratch = SolverScratch::allocate(2).expect("alloc");
        scratch.predicted.copy_from_slice(&[a, b]);
        (particles, scratch)
    }

    fn solve(
        solver: XpbdSolver,
        particles: &ParticleBuffers,
        springs: &[SpringInstance],
        contacts: &[Contact],
        scratch: &mut SolverScratch,
    ) -> (SolverStats, Vec<NumericalError>) {
        let mut timers = StepTimers::default();
        let mut stats = SolverStats::default();
        let input = SubstepInput {
            particles,
            springs,
            contacts,
            dt: 1.0 / 60.0,
            substep: 0,
        };
        let errors = solver.solve(&input, scratch, &mut timers, &mut stats);
        (stats, errors)
    }

    #[test]
    fn rigid_spring_reaches_rest_length() {
        let (particles, mut scratch) = two_particles(Vec3::ZERO, Vec3::new(1.5, 0.0, 0.0));
        let spring = SpringInstance {
            a: 0,
            b: 1,
            rest_length: 1.0,
            compliance: 0.0,
        };
        let solver = XpbdSolver::new(1, RelaxationMode::Sequential, 1.0);
        solve(solver, &particles, &[spring], &[], &mut scratch);

        let length = scratch.predicted[0].distance(scratch.predicted[1]);
        assert_abs_diff_eq!(length, 1.0, epsilon = 1e-5);
        assert_abs_diff_eq!(scratch.predicted[0].x + scratch.predicted[1].x, 1.5, epsilon = 1e-5);
    }

    #[test]
    fn fixed_endpoint_stays_put() {
        let (mut particles, mut scratch) = two_particles(Vec3::ZERO, Vec3::new(0.0, -2.0, 0.0));
        particles.inverse_masses[0] = 0.0;
        let spring = SpringInstance {
            a: 0,
            b: 1,
            rest_length: 1.0,
            compliance: 0.0,
        };
        let solver = XpbdSolver::new(3, RelaxationMode::Batched, 1.0);
        solve(solver, &particles, &[spring], &[], &mut scratch);

        assert_eq!(scratch.predicted[0], Vec3::ZERO);
        assert_abs_diff_eq!(scratch.predicted[1].y, -1.0, epsilon = 1e-5);
    }

    #[test]
    fn coincident_particles_are_degenerate() {
        let (particles, mut scratch) = two_particles(Vec3::ONE, Vec3::ONE);
        let spring = SpringInstance {
            a: 0,
            b: 1,
            rest_length: 1.0,
            compliance: 0.0,
        };
        let solver = XpbdSolver::new(2, RelaxationMode::Sequential, 1.0);
        let (stats, errors) = solve(solver, &particles, &[spring], &[], &mut scratch);
        assert_eq!(stats.degenerate_skips, 2);
        assert_eq!(stats.numerical_warnings, 2);
        assert_eq!(errors.len(), 2);
        assert!(errors
            .iter()
            .all(|e| e.kind == NumericalErrorKind::DegenerateGradient && e.constraint == 0));
        // Skipped, not disabled: nothing moved and nothing blew up.
        assert_eq!(scratch.predicted[0], Vec3::ONE);
    }

    #[test]
    fn non_finite_projection_is_discarded() {
        let (particles, mut scratch) = two_particles(Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0));
        let spring = SpringInstance {
            a: 0,
            b: 1,
            rest_length: f32::INFINITY,
            compliance: 0.0,
        };
        let solver = XpbdSolver::new(4, RelaxationMode::Sequential, 1.0);
        let (stats, errors) = solve(solver, &particles, &[spring], &[], &mut scratch);

        assert_eq!(errors.len(), 1);
        assert_eq!(stats.numerical_warnings, 1);
        assert_eq!(scratch.predicted[1], Vec3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn shape_contact_only_pushes() {
        let mut arena = Arena::new();
        let shape = arena.insert(());
        let (particles, mut scratch) = two_particles(Vec3::new(0.0, 0.1, 0.0), Vec3::new(5.0, 5.0, 5.0));
        scratch.predicted[0] = Vec3::new(0.0, 0.02, 0.0);
        let contact = Contact {
            particle: 0,
            target: ContactTarget::Shape(shape),
            point: Vec3::ZERO,
            normal: Vec3::Y,
            offset: 0.11,
            penetration: 0.09,
            friction: 0.0,
        };
        let solver = XpbdSolver::new(2, RelaxationMode::Sequential, 1.0);
        solve(solver, &particles, &[], &[contact], &mut scratch);
        assert_abs_diff_eq!(scratch.predicted[0].y, 0.11, epsilon = 1e-6);

        // Already separated: untouched.
        scratch.predicted[0] = Vec3::new(0.0, 0.5, 0.0);
        solve(solver, &particles, &[], &[contact], &mut scratch);
        assert_abs_diff_eq!(scratch.predicted[0].y, 0.5, epsilon = 1e-6);
    }

    #[test]
    fn friction_stays_inside_the_cone() {
        let mut arena = Arena::new();
        let shape = arena.insert(());
        let (particles, mut scratch) = two_particles(Vec3::new(0.0, 0.12, 0.0), Vec3::new(5.0, 5.0, 5.0));
        scratch.predicted[0] = Vec3::new(0.3, 0.08, 0.0);
        let contact = Contact {
            particle: 0,
            target: ContactTarget::Shape(shape),
            point: Vec3::ZERO,
            normal: Vec3::Y,
            offset: 0.11,
            penetration: 0.03,
            friction: 0.4,
        };
        let solver = XpbdSolver::new(1, RelaxationMode::Sequential, 1.0);
        let (stats, _) = solve(solver, &particles, &[], &[contact], &mut scratch);

        assert!(stats.max_friction_ratio > 0.0);
        assert!(stats.max_friction_ratio <= 0.4 + 1e-5);
        // Kinetic: slid 0.3, friction removed mu * 0.03.
        assert_abs_diff_eq!(scratch.predicted[0].x, 0.3 - 0.4 * 0.03, epsilon = 1e-5);
    }

    #[test]
    fn batched_groups_are_reported() {
        let mut particles = ParticleBuffers::allocate(3).expect("alloc");
        let positions = [Vec3::ZERO, Vec3::X * 2.0, Vec3::X * 4.0];
        particles.seed(&positions, 0.05);
        let mut scratch = SolverScratch::allocate(3).expect("alloc");
        scratch.predicted.copy_from_slice(&positions);
        let springs = [
            SpringInstance { a: 0, b: 1, rest_length: 1.0, compliance: 0.0 },
            SpringInstance { a: 1, b: 2, rest_length: 1.0, compliance: 0.0 },
        ];
        let solver = XpbdSolver::new(40, RelaxationMode::Batched, 1.0).with_parallel(true);
        let (stats, _) = solve(solver, &particles, &springs, &[], &mut scratch);

        assert_eq!(stats.color_groups, 2);
        assert_abs_diff_eq!(scratch.predicted[0].distance(scratch.predicted[1]), 1.0, epsilon = 1e-4);
        assert_abs_diff_eq!(scratch.predicted[1].distance(scratch.predicted[2]), 1.0, epsilon = 1e-4);
    }
}
