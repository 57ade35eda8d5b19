use serde::Serialize;
use std::time::Duration;

/// Per-stage timings of the last completed step. Stages that run once per
/// substep are summed over all substeps.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize)]
pub struct StepTimers {
    /// Time spent in prediction.
    pub predict: Duration,
    /// Time spent creating grid indices.
    pub create_cell_indices: Duration,
    /// Time spent sorting grid indices.
    pub sort_cell_indices: Duration,
    /// Time spent creating grid.
    pub create_grid: Duration,
    /// Time spent reordering particles.
    pub reorder: Duration,
    /// Time spent finding particle neighbors and particle contacts.
    pub collide_particles: Duration,
    /// Time spent colliding triangle shapes.
    pub collide_triangles: Duration,
    /// Time spent colliding signed distance field shapes.
    pub collide_fields: Duration,
    /// Time spent solving distance constraints.
    pub solve_springs: Duration,
    /// Time spent solving contact constraints.
    pub solve_contacts: Duration,
    /// Time spent adding position deltas to particles.
    pub apply_deltas: Duration,
    /// Time spent updating dynamic triangles.
    pub update_triangles: Duration,
    /// Time spent updating vertex normals.
    pub update_normals: Duration,
    /// Time spent finalizing state.
    pub finalize: Duration,
    /// Time spent updating particle bounds.
    pub update_bounds: Duration,
    /// Sum of all timers above.
    pub total: Duration,
}

impl StepTimers {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Named stages in pipeline order, excluding `total`.
    pub fn stages(&self) -> [(&'static str, Duration); 15] {
        [
            ("predict", self.predict),
            ("create_cell_indices", self.create_cell_indices),
            ("sort_cell_indices", self.sort_cell_indices),
            ("create_grid", self.create_grid),
            ("reorder", self.reorder),
            ("collide_particles", self.collide_particles),
            ("collide_triangles", self.collide_triangles),
            ("collide_fields", self.collide_fields),
            ("solve_springs", self.solve_springs),
            ("solve_contacts", self.solve_contacts),
            ("apply_deltas", self.apply_deltas),
            ("update_triangles", self.update_triangles),
            ("update_normals", self.update_normals),
            ("finalize", self.finalize),
            ("update_bounds", self.update_bounds),
        ]
    }

    pub(crate) fn sum_total(&mut self) {
        self.total = self.stages().iter().map(|(_, d)| *d).sum();
    }

    pub fn total_ms(&self) -> f32 {
        self.total.as_secs_f32() * 1000.0
    }

    pub fn report(&self) {
        let total_us = self.total.as_micros() as f32;
        if total_us < 1.0 {
            return;
        }

        log::debug!("--- Solver Profile: {:.3} ms ---", self.total_ms());
        for (name, duration) in self.stages() {
            log::debug!(
                "  {:<20} {:.3} ms ({:.1}%)",
                name,
                duration.as_secs_f32() * 1000.0,
                (duration.as_micros() as f32 / total_us) * 100.0
            );
        }
    }
}

/// Counters gathered over the last completed step.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct SolverStats {
    pub substeps: u32,
    pub springs: usize,
    /// Contacts created in the last substep.
    pub contacts: usize,
    pub particle_contacts: usize,
    pub triangle_contacts: usize,
    pub field_contacts: usize,
    /// Colour groups used by the batched solver in the last substep.
    pub color_groups: usize,
    /// Projections skipped because the gradient was degenerate.
    pub degenerate_skips: usize,
    /// Degenerate skips plus projections discarded for a non-finite delta.
    pub numerical_warnings: usize,
    /// Particles whose neighbor list hit the cap, summed over substeps.
    pub truncated_neighbor_lists: usize,
    /// Largest `|friction correction| / |normal correction|` seen on a
    /// contact that had friction applied.
    pub max_friction_ratio: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_is_the_sum_of_stages() {
        let mut timers = StepTimers {
            predict: Duration::from_micros(10),
            solve_springs: Duration::from_micros(30),
            finalize: Duration::from_micros(5),
            ..Default::default()
        };
        timers.sum_total();
        assert_eq!(timers.total, Duration::from_micros(45));

        timers.reset();
        assert_eq!(timers.total, Duration::ZERO);
    }
}
