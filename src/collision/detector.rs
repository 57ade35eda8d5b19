use glam::Vec3;

use super::{
    neighbors::NeighborLists,
    queries::{closest_point_on_triangle, triangle_normal},
};
use crate::{
    core::{
        constraints::{Contact, ContactTarget},
        mesh::{Aabb, TriangleMesh},
        particles::ParticleBuffers,
        shapes::SignedDistanceField,
    },
    utils::{allocator::ShapeId, parallel},
};

/// A triangle mesh as seen by one substep. Dynamic meshes supply their
/// current particle-driven vertices instead of the stored ones.
#[derive(Debug, Clone, Copy)]
pub struct MeshCollider<'a> {
    pub shape: ShapeId,
    pub mesh: &'a TriangleMesh,
    pub vertices: &'a [Vec3],
    pub bounds: Aabb,
    /// Sorted original ids of the particles driving the mesh. They never
    /// collide with it; particle contacts cover self-collision.
    pub members: &'a [u32],
}

impl<'a> MeshCollider<'a> {
    /// Collider for a mesh that does not move with any particle.
    pub fn fixed(shape: ShapeId, mesh: &'a TriangleMesh) -> Self {
        Self {
            shape,
            mesh,
            vertices: &mesh.vertices,
            bounds: mesh.bounds,
            members: &[],
        }
    }

    fn drives(&self, original: u32) -> bool {
        self.members.binary_search(&original).is_ok()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FieldCollider<'a> {
    pub shape: ShapeId,
    pub field: &'a SignedDistanceField,
}

/// Creates unilateral contacts from predicted positions. Every call starts
/// from scratch; contacts only live for the substep that detected them.
#[derive(Debug, Clone, Copy)]
pub struct CollisionDetector {
    pub collision_margin: f32,
    pub friction: f32,
    pub parallel: bool,
}

impl CollisionDetector {
    pub fn new(collision_margin: f32, friction: f32) -> Self {
        Self {
            collision_margin,
            friction,
            parallel: false,
        }
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// One contact per unordered neighbor pair closer than the sum of their
    /// radii. Pairs of fixed particles are skipped.
    pub fn collide_particles(
        &self,
        particles: &ParticleBuffers,
        predicted: &[Vec3],
        neighbors: &NeighborLists,
    ) -> Vec<Contact> {
        let per_particle = parallel::map_indices(self.parallel, predicted.len(), |slot| {
            neighbors
                .neighbors(slot)
                .iter()
                .map(move |&other| ordered_pair(slot as u32, other))
                .collect::<Vec<_>>()
        });
        let mut pairs: Vec<(u32, u32)> = per_particle.into_iter().flatten().collect();
        // Lists are symmetric unless truncated, so each pair can appear twice.
        pairs.sort_unstable();
        pairs.dedup();

        pairs
            .into_iter()
            .filter_map(|(a, b)| {
                let (ia, ib) = (a as usize, b as usize);
                if particles.is_fixed(ia) && particles.is_fixed(ib) {
                    return None;
                }
                let offset = particles.radii[ia] + particles.radii[ib];
                let delta = predicted[ia] - predicted[ib];
                let distance = delta.length();
                if distance >= offset {
                    return None;
                }
                Some(Contact {
                    particle: a,
                    target: ContactTarget::Particle(b),
                    point: predicted[ib],
                    normal: delta.try_normalize().unwrap_or(Vec3::Y),
                    offset,
                    penetration: offset - distance,
                    friction: self.friction,
                })
            })
            .collect()
    }

    /// Particle against triangle meshes. For every mesh the closest qualifying
    /// triangle yields at most one contact per particle.
    pub fn collide_triangles(
        &self,
        particles: &ParticleBuffers,
        predicted: &[Vec3],
        meshes: &[MeshCollider<'_>],
    ) -> Vec<Contact> {
        if meshes.is_empty() {
            return Vec::new();
        }

        let per_particle = parallel::map_indices(self.parallel, predicted.len(), |slot| {
            if particles.is_fixed(slot) {
                return Vec::new();
            }
            let radius = particles.radii[slot];
            let previous = particles.positions[slot];
            let current = predicted[slot];
            let original = particles.original_index[slot];

            meshes
                .iter()
                .filter_map(|collider| {
                    self.closest_triangle_contact(collider, slot, original, radius, previous, current)
                })
                .collect()
        });

        per_particle.into_iter().flatten().collect()
    }

    fn closest_triangle_contact(
        &self,
        collider: &MeshCollider<'_>,
        slot: usize,
        original: u32,
        radius: f32,
        previous: Vec3,
        current: Vec3,
    ) -> Option<Contact> {
        if collider.drives(original) {
            return None;
        }
        let threshold = radius + self.collision_margin;
        let travel = (current - previous).length();
        let reach = threshold + travel;

        let swept = Aabb::from_points(&[previous, current]).expanded(reach);
        if !swept.overlaps(&collider.bounds) {
            return None;
        }

        let mut best: Option<(f32, Vec3, Vec3)> = None;
        for index in 0..collider.mesh.triangle_count() {
            let [a, b, c] = collider.mesh.triangle(index, collider.vertices);
            let Some(face) = triangle_normal(a, b, c) else {
                continue;
            };

            let closest = closest_point_on_triangle(current, a, b, c);
            let distance = (current - closest).length();
            if distance >= reach {
                continue;
            }

            // Face the side the particle came from.
            let normal = if face.dot(previous - closest) < 0.0 {
                -face
            } else {
                face
            };
            let signed = normal.dot(current - closest);
            let touching = distance < threshold;
            let crossed = signed < 0.0;
            if !touching && !crossed {
                continue;
            }

            if best.map_or(true, |(d, _, _)| distance < d) {
                best = Some((distance, closest, normal));
            }
        }

        best.map(|(_, point, normal)| Contact {
            particle: slot as u32,
            target: ContactTarget::Shape(collider.shape),
            point,
            normal,
            offset: threshold,
            penetration: threshold - normal.dot(current - point),
            friction: self.friction,
        })
    }

    /// Particle against signed distance fields.
    pub fn collide_fields(
        &self,
        particles: &ParticleBuffers,
        predicted: &[Vec3],
        fields: &[FieldCollider<'_>],
    ) -> Vec<Contact> {
        if fields.is_empty() {
            return Vec::new();
        }

        let per_particle = parallel::map_indices(self.parallel, predicted.len(), |slot| {
            if particles.is_fixed(slot) {
                return Vec::new();
            }
            let threshold = particles.radii[slot] + self.collision_margin;
            let position = predicted[slot];

            fields
                .iter()
                .filter_map(|collider| {
                    if let Some(bounds) = collider.field.bounds(threshold) {
                        if !bounds.contains(position) {
                            return None;
                        }
                    }
                    let value = collider.field.distance(position);
                    if !value.is_finite() || value >= threshold {
                        return None;
                    }
                    let normal = collider.field.gradient(position);
                    Some(Contact {
                        particle: slot as u32,
                        target: ContactTarget::Shape(collider.shape),
                        point: position - normal * value,
                        normal,
                        offset: threshold,
                        penetration: threshold - value,
                        friction: self.friction,
                    })
                })
                .collect()
        });

        per_particle.into_iter().flatten().collect()
    }
}

fn ordered_pair(a: u32, b: u32) -> (u32, u32) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        collision::{grid::SpatialHashGrid, neighbors::NeighborFinder},
        core::mesh::ground_plane,
        utils::allocator::Arena,
    };
    use approx::assert_abs_diff_eq;

    fn particles(positions: &[Vec3], radius: f32) -> ParticleBuffers {
        let mut buffers = ParticleBuffers::allocate(positions.len()).expect("alloc");
        buffers.seed(positions, radius);
        buffers
    }

    #[test]
    fn overlapping_particles_produce_one_contact() {
        let positions = [Vec3::ZERO, Vec3::new(0.08, 0.0, 0.0), Vec3::new(2.0, 0.0, 0.0)];
        let buffers = particles(&positions, 0.05);
        let mut grid = SpatialHashGrid::new(0.1, positions.len()).expect("alloc");
        grid.rebuild(&positions, false);
        let lists = NeighborFinder::new(0.1, 16)
            .find(&grid, &positions, false)
            .expect("alloc");

        let contacts = CollisionDetector::new(0.0, 0.0).collide_particles(&buffers, &positions, &lists);
        assert_eq!(contacts.len(), 1);
        let contact = contacts[0];
        assert_eq!(contact.particle, 0);
        assert_eq!(contact.target, ContactTarget::Particle(1));
        assert_abs_diff_eq!(contact.penetration, 0.02, epsilon = 1e-6);
    }

    #[test]
    fn fixed_pairs_are_skipped() {
        let positions = [Vec3::ZERO, Vec3::new(0.05, 0.0, 0.0)];
        let mut buffers = particles(&positions, 0.05);
        buffers.inverse_masses = vec![0.0, 0.0];
        let mut grid = SpatialHashGrid::new(0.1, 2).expect("alloc");
        grid.rebuild(&positions, false);
        let lists = NeighborFinder::new(0.1, 16)
            .find(&grid, &positions, false)
            .expect("alloc");
        assert!(CollisionDetector::new(0.0, 0.0)
            .collide_particles(&buffers, &positions, &lists)
            .is_empty());
    }

    #[test]
    fn ground_plane_contact_faces_up() {
        let mut arena = Arena::new();
        let mesh = ground_plane(0.0, 10.0);
        let id = arena.insert(());
        let collider = MeshCollider::fixed(id, &mesh);
        let mut buffers = particles(&[Vec3::new(0.5, 0.1, 0.5)], 0.05);
        let predicted = [Vec3::new(0.5, 0.04, 0.5)];

        let contacts = CollisionDetector::new(0.06, 0.1).collide_triangles(
            &buffers,
            &predicted,
            std::slice::from_ref(&collider),
        );
        assert_eq!(contacts.len(), 1);
        assert_abs_diff_eq!(contacts[0].normal.y, 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(contacts[0].offset, 0.11, epsilon = 1e-6);

        // Far above the plane: no contact.
        buffers.positions[0] = Vec3::new(0.5, 2.0, 0.5);
        let far = [Vec3::new(0.5, 1.9, 0.5)];
        assert!(CollisionDetector::new(0.06, 0.1)
            .collide_triangles(&buffers, &far, std::slice::from_ref(&collider))
            .is_empty());
    }

    #[test]
    fn mesh_ignores_the_particles_that_drive_it() {
        let mut arena = Arena::new();
        let mesh = ground_plane(0.0, 10.0);
        let members = [0u32];
        let collider = MeshCollider {
            members: &members,
            ..MeshCollider::fixed(arena.insert(()), &mesh)
        };
        let positions = [Vec3::new(0.5, 0.02, 0.5), Vec3::new(-0.5, 0.02, 0.5)];
        let buffers = particles(&positions, 0.05);

        let contacts = CollisionDetector::new(0.06, 0.0).collide_triangles(
            &buffers,
            &positions,
            std::slice::from_ref(&collider),
        );
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].particle, 1);
    }

    #[test]
    fn tunnelling_particle_is_caught() {
        let mut arena = Arena::new();
        let mesh = ground_plane(0.0, 10.0);
        let collider = MeshCollider::fixed(arena.insert(()), &mesh);
        let buffers = particles(&[Vec3::new(0.0, 0.3, 0.0)], 0.05);
        let predicted = [Vec3::new(0.0, -0.4, 0.0)];

        let contacts = CollisionDetector::new(0.01, 0.0).collide_triangles(
            &buffers,
            &predicted,
            std::slice::from_ref(&collider),
        );
        assert_eq!(contacts.len(), 1);
        assert!(contacts[0].normal.y > 0.99);
    }

    #[test]
    fn sphere_field_contact() {
        let mut arena = Arena::new();
        let field = SignedDistanceField::Sphere {
            center: Vec3::ZERO,
            radius: 1.0,
        };
        let collider = FieldCollider {
            shape: arena.insert(()),
            field: &field,
        };
        let buffers = particles(&[Vec3::new(0.0, 1.2, 0.0)], 0.05);
        let predicted = [Vec3::new(0.0, 1.02, 0.0)];

        let contacts = CollisionDetector::new(0.01, 0.0).collide_fields(
            &buffers,
            &predicted,
            std::slice::from_ref(&collider),
        );
        assert_eq!(contacts.len(), 1);
        assert_abs_diff_eq!(contacts[0].point.y, 1.0, epsilon = 1e-5);
        assert_abs_diff_eq!(contacts[0].penetration, 0.04, epsilon = 1e-5);
    }
}
