use std::ops::Range;

use glam::{IVec3, Vec3};

use crate::{
    core::particles::try_filled,
    error::FatalError,
    utils::parallel,
};

const HASH_P1: u32 = 73_856_093;
const HASH_P2: u32 = 19_349_663;
const HASH_P3: u32 = 83_492_791;

/// Marks an empty bucket in the start/end tables.
const EMPTY: u32 = u32::MAX;

/// Total, invertible reordering: slot `i` of the output holds element
/// `order[i]` of the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permutation {
    order: Vec<u32>,
}

impl Permutation {
    pub fn identity(len: usize) -> Self {
        Self {
            order: (0..len as u32).collect(),
        }
    }

    pub fn from_order(order: Vec<u32>) -> Self {
        debug_assert!(Self::is_bijection(&order));
        Self { order }
    }

    fn is_bijection(order: &[u32]) -> bool {
        let mut seen = vec![false; order.len()];
        for &index in order {
            match seen.get_mut(index as usize) {
                Some(slot) if !*slot => *slot = true,
                _ => return false,
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn order(&self) -> &[u32] {
        &self.order
    }

    pub fn apply<T: Clone>(&self, data: &[T]) -> Vec<T> {
        self.order
            .iter()
            .map(|&source| data[source as usize].clone())
            .collect()
    }

    pub fn inverse(&self) -> Self {
        let mut inverse = vec![0u32; self.order.len()];
        for (target, &source) in self.order.iter().enumerate() {
            inverse[source as usize] = target as u32;
        }
        Self { order: inverse }
    }
}

/// Spatial hash grid rebuilt from predicted positions every substep.
///
/// Cells are `floor(p / cell_size)`, hashed into a power-of-two bucket
/// table. After [`SpatialHashGrid::create_grid`], the particles of a bucket
/// occupy the contiguous range `bucket_range(bucket)` of the sorted pairs.
#[derive(Debug, Clone)]
pub struct SpatialHashGrid {
    cell_size: f32,
    table_mask: u32,
    /// `(bucket, slot)` pairs, sorted by bucket after `sort_cell_indices`.
    cell_indices: Vec<(u32, u32)>,
    cell_start: Vec<u32>,
    cell_end: Vec<u32>,
}

impl SpatialHashGrid {
    /// Sizes the bucket table for `particle_count` particles.
    pub fn new(cell_size: f32, particle_count: usize) -> Result<Self, FatalError> {
        let table_size = (particle_count.max(1) * 2).next_power_of_two();
        Ok(Self {
            cell_size,
            table_mask: (table_size - 1) as u32,
            cell_indices: try_filled("cell_indices", particle_count, (0, 0))?,
            cell_start: try_filled("cell_start", table_size, EMPTY)?,
            cell_end: try_filled("cell_end", table_size, EMPTY)?,
        })
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    pub fn table_size(&self) -> usize {
        self.cell_start.len()
    }

    pub fn cell_coord(&self, position: Vec3) -> IVec3 {
        (position / self.cell_size).floor().as_ivec3()
    }

    pub fn bucket(&self, cell: IVec3) -> u32 {
        let x = (cell.x as u32).wrapping_mul(HASH_P1);
        let y = (cell.y as u32).wrapping_mul(HASH_P2);
        let z = (cell.z as u32).wrapping_mul(HASH_P3);
        (x ^ y ^ z) & self.table_mask
    }

    /// Emits one `(bucket, slot)` pair per particle.
    pub fn create_cell_indices(&mut self, predicted: &[Vec3], parallel: bool) {
        let grid = &*self;
        let pairs = parallel::map_indices(parallel, predicted.len(), |slot| {
            (grid.bucket(grid.cell_coord(predicted[slot])), slot as u32)
        });
        self.cell_indices = pairs;
    }

    /// Stable sort by bucket so particles sharing a bucket are contiguous and
    /// keep their relative order.
    pub fn sort_cell_indices(&mut self, parallel: bool) {
        parallel::sort_by_key(parallel, &mut self.cell_indices, |&(bucket, _)| bucket);
    }

    /// Counts particles per bucket, then an exclusive prefix sum turns the
    /// counts into `[start, end)` ranges over the sorted pairs.
    pub fn create_grid(&mut self) {
        self.cell_start.fill(EMPTY);
        self.cell_end.fill(EMPTY);

        let mut counts = vec![0u32; self.cell_start.len()];
        for &(bucket, _) in &self.cell_indices {
            counts[bucket as usize] += 1;
        }

        let mut offset = 0u32;
        for (bucket, &count) in counts.iter().enumerate() {
            if count > 0 {
                self.cell_start[bucket] = offset;
                self.cell_end[bucket] = offset + count;
            }
            offset += count;
        }
    }

    /// Sorted order as a permutation of particle slots.
    pub fn sorted_permutation(&self) -> Permutation {
        Permutation::from_order(self.cell_indices.iter().map(|&(_, slot)| slot).collect())
    }

    /// Records that particle buffers were permuted into sorted order, so
    /// sorted entry `i` now refers to slot `i`.
    pub fn mark_reordered(&mut self) {
        for (index, entry) in self.cell_indices.iter_mut().enumerate() {
            entry.1 = index as u32;
        }
    }

    pub fn bucket_range(&self, bucket: u32) -> Range<usize> {
        let start = self.cell_start[bucket as usize];
        if start == EMPTY {
            return 0..0;
        }
        start as usize..self.cell_end[bucket as usize] as usize
    }

    pub fn particles_in_bucket(&self, bucket: u32) -> impl Iterator<Item = u32> + '_ {
        self.cell_indices[self.bucket_range(bucket)]
            .iter()
            .map(|&(_, slot)| slot)
    }

    /// Distinct buckets of the 3×3×3 cell neighbourhood around `position`, in
    /// traversal order. Hash collisions can map two cells to one bucket; each
    /// bucket is reported once.
    pub fn neighbor_buckets(&self, position: Vec3) -> ([u32; 27], usize) {
        let center = self.cell_coord(position);
        let mut buckets = [0u32; 27];
        let mut count = 0;
        for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    let bucket = self.bucket(center + IVec3::new(dx, dy, dz));
                    if !buckets[..count].contains(&bucket) {
                        buckets[count] = bucket;
                        count += 1;
                    }
                }
            }
        }
        (buckets, count)
    }

    /// Runs all grid stages except reordering.
    pub fn rebuild(&mut self, predicted: &[Vec3], parallel: bool) {
        self.create_cell_indices(predicted, parallel);
        self.sort_cell_indices(parallel);
        self.create_grid();
    }
}
