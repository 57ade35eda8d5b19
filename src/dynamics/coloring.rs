/// Colours available through the per-particle bitmask.
const MAX_COLORS: usize = 64;

/// Conflict-free partition of a constraint list.
///
/// No two constraints in one group move the same particle, so a group can be
/// projected concurrently. Constraints that found no free colour land in
/// `overflow` and are projected one at a time after the groups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColorGroups {
    pub groups: Vec<Vec<usize>>,
    pub overflow: Vec<usize>,
}

impl ColorGroups {
    /// Greedy colouring in constraint order. `constraints` yields the particle
    /// slots each constraint touches. Fixed particles never move, so sharing
    /// one is not a conflict.
    pub fn build<I, F>(constraints: I, particle_count: usize, is_fixed: F) -> Self
    where
        I: IntoIterator<Item = (usize, Option<usize>)>,
        F: Fn(usize) -> bool,
    {
        let mut used: Vec<u64> = vec![0; particle_count];
        let mut result = Self::default();

        for (index, (a, b)) in constraints.into_iter().enumerate() {
            let a = (!is_fixed(a)).then_some(a);
            let b = b.filter(|&b| !is_fixed(b));

            let mask = a.map_or(0, |a| used[a]) | b.map_or(0, |b| used[b]);
            let color = (!mask).trailing_zeros() as usize;
            if color >= MAX_COLORS {
                result.overflow.push(index);
                continue;
            }

            if result.groups.len() <= color {
                result.groups.resize_with(color + 1, Vec::new);
            }
            result.groups[color].push(index);

            let bit = 1u64 << color;
            if let Some(a) = a {
                used[a] |= bit;
            }
            if let Some(b) = b {
                used[b] |= bit;
            }
        }

        result
    }

    pub fn len(&self) -> usize {
        self.groups.len() + usize::from(!self.overflow.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.overflow.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn groups_never_share_a_free_particle() {
        // A chain 0-1-2-3-4 plus a cross link.
        let pairs = vec![(0, Some(1)), (1, Some(2)), (2, Some(3)), (3, Some(4)), (0, Some(4))];
        let colors = ColorGroups::build(pairs.clone(), 5, |_| false);

        assert!(colors.overflow.is_empty());
        for group in &colors.groups {
            let mut seen = HashSet::new();
            for &index in group {
                let (a, b) = pairs[index];
                assert!(seen.insert(a));
                assert!(seen.insert(b.unwrap()));
            }
        }
        let total: usize = colors.groups.iter().map(Vec::len).sum();
        assert_eq!(total, pairs.len());
    }

    #[test]
    fn fixed_particles_do_not_conflict() {
        let pairs = vec![(0, Some(1)), (0, Some(2)), (0, None)];
        let colors = ColorGroups::build(pairs, 3, |slot| slot == 0);
        assert_eq!(colors.groups.len(), 1);
        assert_eq!(colors.groups[0], vec![0, 1, 2]);
    }

    #[test]
    fn excess_colours_spill_into_overflow() {
        // Every constraint touches particle 0, so each needs a fresh colour.
        let pairs: Vec<_> = (0..70).map(|_| (0, None)).collect();
        let colors = ColorGroups::build(pairs, 1, |_| false);
        assert_eq!(colors.groups.len(), MAX_COLORS);
        assert_eq!(colors.overflow.len(), 70 - MAX_COLORS);
        assert_eq!(colors.len(), MAX_COLORS + 1);
    }
}
