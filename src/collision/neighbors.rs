use std::ops::Range;

use glam::Vec3;

use super::grid::SpatialHashGrid;
use crate::{core::particles::try_filled, error::FatalError, utils::parallel};

/// Per-particle neighbor lists in compressed row form.
///
/// The neighbors of slot `i` are `indices[offsets[i]..offsets[i + 1]]`, in
/// grid traversal order. Lists are capped; once a particle has collected
/// `max_neighbors` candidates the scan stops, keeping the first ones found.
#[derive(Debug, Clone, Default)]
pub struct NeighborLists {
    offsets: Vec<u32>,
    indices: Vec<u32>,
    truncated: usize,
}

impl NeighborLists {
    pub fn len(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn range(&self, slot: usize) -> Range<usize> {
        self.offsets[slot] as usize..self.offsets[slot + 1] as usize
    }

    pub fn neighbors(&self, slot: usize) -> &[u32] {
        &self.indices[self.range(slot)]
    }

    /// Particles whose list hit the cap.
    pub fn truncated(&self) -> usize {
        self.truncated
    }

    pub fn total(&self) -> usize {
        self.indices.len()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NeighborFinder {
    pub radius: f32,
    pub max_neighbors: usize,
}

impl NeighborFinder {
    pub fn new(radius: f32, max_neighbors: u32) -> Self {
        Self {
            radius,
            max_neighbors: max_neighbors as usize,
        }
    }

    /// Scans the 27 cells around every particle. `grid` must have been built
    /// from `predicted`, with slots matching the current buffer order.
    pub fn find(
        &self,
        grid: &SpatialHashGrid,
        predicted: &[Vec3],
        parallel: bool,
    ) -> Result<NeighborLists, FatalError> {
        let radius_sq = self.radius * self.radius;
        let cap = self.max_neighbors;

        let per_particle = parallel::map_indices(parallel, predicted.len(), |slot| {
            let position = predicted[slot];
            let mut found = Vec::new();
            let mut truncated = false;
            let (buckets, count) = grid.neighbor_buckets(position);
            'scan: for &bucket in &buckets[..count] {
                for other in grid.particles_in_bucket(bucket) {
                    if other as usize == slot {
                        continue;
                    }
                    if position.distance_squared(predicted[other as usize]) >= radius_sq {
                        continue;
                    }
                    if found.len() == cap {
                        truncated = true;
                        break 'scan;
                    }
                    found.push(other);
                }
            }
            (found, truncated)
        });

        let total: usize = per_particle.iter().map(|(list, _)| list.len()).sum();
        let mut offsets = try_filled("neighbor_offsets", predicted.len() + 1, 0u32)?;
        let mut indices: Vec<u32> = Vec::new();
        indices
            .try_reserve_exact(total)
            .map_err(|_| FatalError::Allocation {
                buffer: "neighbor_indices",
                requested: total,
            })?;

        let mut truncated = 0;
        for (slot, (list, hit_cap)) in per_particle.into_iter().enumerate() {
            indices.extend_from_slice(&list);
            offsets[slot + 1] = indices.len() as u32;
            truncated += usize::from(hit_cap);
        }

        if truncated > 0 {
            log::trace!("{truncated} neighbor lists truncated at {cap}");
        }

        Ok(NeighborLists {
            offsets,
            indices,
            truncated,
        })
    }
}
