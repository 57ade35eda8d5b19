use glam::Vec3;

use crate::{collision::grid::Permutation, error::FatalError};

/// Allocates a zero-initialised buffer, reporting allocation failure instead
/// of aborting.
pub(crate) fn try_filled<T: Clone>(
    buffer: &'static str,
    len: usize,
    value: T,
) -> Result<Vec<T>, FatalError> {
    let mut data = Vec::new();
    data.try_reserve_exact(len)
        .map_err(|_| FatalError::Allocation {
            buffer,
            requested: len,
        })?;
    data.resize(len, value);
    Ok(data)
}

/// Structure-of-Arrays storage for the particle set.
///
/// Buffers are indexed by *slot*. When the grid reorders particles for
/// locality the slots move, while `original_index`/`slot_of` keep the stable
/// identity that springs, meshes and render buffers refer to.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleBuffers {
    pub positions: Vec<Vec3>,
    pub velocities: Vec<Vec3>,
    pub inverse_masses: Vec<f32>,
    pub radii: Vec<f32>,
    /// Vertex normal for particles that belong to a dynamic mesh, zero otherwise.
    pub normals: Vec<Vec3>,
    /// slot -> original particle id
    pub original_index: Vec<u32>,
    /// original particle id -> slot
    pub slot_of: Vec<u32>,
}

impl ParticleBuffers {
    /// Allocates storage for `count` particles. Contents are zeroed, masses
    /// default to 1 and the slot mapping is the identity.
    pub fn allocate(count: usize) -> Result<Self, FatalError> {
        let mut original_index = try_filled("original_index", count, 0u32)?;
        for (slot, id) in original_index.iter_mut().enumerate() {
            *id = slot as u32;
        }
        Ok(Self {
            positions: try_filled("positions", count, Vec3::ZERO)?,
            velocities: try_filled("velocities", count, Vec3::ZERO)?,
            inverse_masses: try_filled("inverse_masses", count, 1.0)?,
            radii: try_filled("radii", count, 0.0)?,
            normals: try_filled("normals", count, Vec3::ZERO)?,
            slot_of: original_index.clone(),
            original_index,
        })
    }

    /// Writes initial positions and a uniform radius.
    pub fn seed(&mut self, positions: &[Vec3], radius: f32) {
        self.positions.copy_from_slice(positions);
        self.radii.iter_mut().for_each(|r| *r = radius);
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn slot(&self, original: u32) -> usize {
        self.slot_of[original as usize] as usize
    }

    pub fn is_fixed(&self, slot: usize) -> bool {
        self.inverse_masses[slot] == 0.0
    }

    /// Copies every buffer, reporting allocation failure.
    pub fn try_clone(&self) -> Result<Self, FatalError> {
        fn copy<T: Copy>(name: &'static str, src: &[T]) -> Result<Vec<T>, FatalError> {
            let mut data = Vec::new();
            data.try_reserve_exact(src.len())
                .map_err(|_| FatalError::Allocation {
                    buffer: name,
                    requested: src.len(),
                })?;
            data.extend_from_slice(src);
            Ok(data)
        }

        Ok(Self {
            positions: copy("positions", &self.positions)?,
            velocities: copy("velocities", &self.velocities)?,
            inverse_masses: copy("inverse_masses", &self.inverse_masses)?,
            radii: copy("radii", &self.radii)?,
            normals: copy("normals", &self.normals)?,
            original_index: copy("original_index", &self.original_index)?,
            slot_of: copy("slot_of", &self.slot_of)?,
        })
    }

    /// Moves every particle to its sorted slot. The original-index mapping
    /// travels with the data, so ids stay valid.
    pub fn apply_permutation(&mut self, permutation: &Permutation) {
        self.positions = permutation.apply(&self.positions);
        self.velocities = permutation.apply(&self.velocities);
        self.inverse_masses = permutation.apply(&self.inverse_masses);
        self.radii = permutation.apply(&self.radii);
        self.normals = permutation.apply(&self.normals);
        self.original_index = permutation.apply(&self.original_index);
        for (slot, &original) in self.original_index.iter().enumerate() {
            self.slot_of[original as usize] = slot as u32;
        }
    }

    /// Scatters a slot-ordered buffer into original particle order.
    pub fn gather_original<T: Copy>(&self, data: &[T], out: &mut Vec<T>) {
        out.clear();
        out.extend(self.slot_of.iter().map(|&slot| data[slot as usize]));
    }
}

/// Per-step working buffers that live only between two barriers of the
/// same step.
#[derive(Debug, Clone, Default)]
pub struct SolverScratch {
    pub predicted: Vec<Vec3>,
    /// Corrections accumulated by the solver, weighted by inverse mass.
    pub deltas: Vec<Vec3>,
}

impl SolverScratch {
    pub fn allocate(count: usize) -> Result<Self, FatalError> {
        Ok(Self {
            predicted: try_filled("predicted", count, Vec3::ZERO)?,
            deltas: try_filled("deltas", count, Vec3::ZERO)?,
        })
    }

    /// Adds accumulated deltas to the predicted positions and clears them.
    pub fn flush_deltas(&mut self) {
        for (predicted, delta) in self.predicted.iter_mut().zip(self.deltas.iter_mut()) {
            *predicted += *delta;
            *delta = Vec3::ZERO;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_starts_with_identity_mapping() {
        let buffers = ParticleBuffers::allocate(4).expect("small allocation");
        assert_eq!(buffers.original_index, vec![0, 1, 2, 3]);
        assert_eq!(buffers.slot_of, vec![0, 1, 2, 3]);
        assert!(buffers.inverse_masses.iter().all(|&w| w == 1.0));
    }

    #[test]
    fn permutation_keeps_identity_reachable() {
        let mut buffers = ParticleBuffers::allocate(3).expect("small allocation");
        buffers.seed(
            &[Vec3::X, Vec3::Y, Vec3::Z],
            0.5,
        );
        buffers.apply_permutation(&Permutation::from_order(vec![2, 0, 1]));

        assert_eq!(buffers.positions, vec![Vec3::Z, Vec3::X, Vec3::Y]);
        assert_eq!(buffers.positions[buffers.slot(0)], Vec3::X);
        assert_eq!(buffers.positions[buffers.slot(2)], Vec3::Z);

        let mut ordered = Vec::new();
        buffers.gather_original(&buffers.positions, &mut ordered);
        assert_eq!(ordered, vec![Vec3::X, Vec3::Y, Vec3::Z]);
    }

    #[test]
    fn flush_moves_deltas_into_prediction() {
        let mut scratch = SolverScratch::allocate(2).expect("small allocation");
        scratch.deltas[1] = Vec3::new(0.0, 0.5, 0.0);
        scratch.flush_deltas();
        assert_eq!(scratch.predicted[1], Vec3::new(0.0, 0.5, 0.0));
        assert_eq!(scratch.deltas[1], Vec3::ZERO);
    }
}
