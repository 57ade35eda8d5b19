use std::collections::HashMap;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Axis-aligned bounding box used for mesh bounds and particle bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for Aabb {
    fn default() -> Self {
        Self::empty()
    }
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn empty() -> Self {
        Self {
            min: Vec3::splat(f32::INFINITY),
            max: Vec3::splat(f32::NEG_INFINITY),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min.cmpgt(self.max).any()
    }

    pub fn extend(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    /// Grows the box by `amount` on every side.
    pub fn expanded(&self, amount: f32) -> Aabb {
        Aabb {
            min: self.min - Vec3::splat(amount),
            max: self.max + Vec3::splat(amount),
        }
    }

    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.min.cmple(other.max).all() && other.min.cmple(self.max).all()
    }

    pub fn contains(&self, point: Vec3) -> bool {
        self.min.cmple(point).all() && point.cmple(self.max).all()
    }

    pub fn from_points(points: &[Vec3]) -> Self {
        let mut bounds = Self::empty();
        for &p in points {
            bounds.extend(p);
        }
        bounds
    }
}

/// Triangle mesh collision shape.
///
/// A static mesh owns its world-space vertices. A dynamic mesh carries a
/// `particle_binding` (vertex -> original particle id); its vertices are
/// rewritten from the particles after every step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriangleMesh {
    pub vertices: Vec<Vec3>,
    pub indices: Vec<[u32; 3]>,
    /// Area-weighted vertex normals.
    pub normals: Vec<Vec3>,
    pub bounds: Aabb,
    pub particle_binding: Option<Vec<u32>>,
}

impl TriangleMesh {
    /// Builds a mesh whose triangles are given as original particle ids.
    /// Vertices are numbered in order of first appearance.
    pub fn bound_to_particles(triangles: &[[u32; 3]], positions: &[Vec3]) -> Self {
        let mut remap: HashMap<u32, u32> = HashMap::new();
        let mut binding = Vec::new();
        let indices = triangles
            .iter()
            .map(|tri| {
                tri.map(|particle| {
                    *remap.entry(particle).or_insert_with(|| {
                        binding.push(particle);
                        (binding.len() - 1) as u32
                    })
                })
            })
            .collect();
        let vertices: Vec<Vec3> = binding.iter().map(|&p| positions[p as usize]).collect();

        let mut mesh = MeshBuilder::new(vertices, indices).build();
        mesh.particle_binding = Some(binding);
        mesh
    }

    pub fn is_dynamic(&self) -> bool {
        self.particle_binding.is_some()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len()
    }

    pub fn triangle(&self, index: usize, vertices: &[Vec3]) -> [Vec3; 3] {
        self.indices[index].map(|v| vertices[v as usize])
    }

    /// Sorted, deduplicated original ids of the particles driving the mesh.
    /// Empty for static meshes.
    pub fn bound_particles(&self) -> Vec<u32> {
        let mut members = self.particle_binding.clone().unwrap_or_default();
        members.sort_unstable();
        members.dedup();
        members
    }

    /// Checks that every index and binding is in range for a world of
    /// `particle_count` particles.
    pub fn validate(&self, particle_count: usize) -> Result<(), ConfigError> {
        if self.vertices.iter().any(|v| !v.is_finite()) {
            return Err(ConfigError::NonFinite("mesh vertices"));
        }
        let vertex_count = self.vertices.len();
        if let Some(&index) = self
            .indices
            .iter()
            .flatten()
            .find(|&&v| v as usize >= vertex_count)
        {
            return Err(ConfigError::MeshIndexOutOfRange {
                index,
                vertices: vertex_count,
            });
        }
        if self.normals.len() != vertex_count {
            return Err(ConfigError::MeshBindingMismatch {
                expected: vertex_count,
                actual: self.normals.len(),
            });
        }
        if let Some(binding) = &self.particle_binding {
            if binding.len() != vertex_count {
                return Err(ConfigError::MeshBindingMismatch {
                    expected: vertex_count,
                    actual: binding.len(),
                });
            }
            if let Some(&index) = binding.iter().find(|&&p| p as usize >= particle_count) {
                return Err(ConfigError::ParticleOutOfRange {
                    index: index as usize,
                    count: particle_count,
                });
            }
        }
        Ok(())
    }

    /// Replaces vertex positions and refreshes bounds and normals.
    pub fn set_vertices(&mut self, vertices: Vec<Vec3>, normals: Vec<Vec3>) {
        self.bounds = Aabb::from_points(&vertices);
        self.vertices = vertices;
        self.normals = normals;
    }
}

/// Accumulates area-weighted face normals onto vertices.
pub fn compute_vertex_normals(vertices: &[Vec3], indices: &[[u32; 3]], out: &mut Vec<Vec3>) {
    out.clear();
    out.resize(vertices.len(), Vec3::ZERO);
    for tri in indices {
        let [a, b, c] = tri.map(|v| vertices[v as usize]);
        // Unnormalised cross product weights by twice the area.
        let face = (b - a).cross(c - a);
        for &v in tri {
            out[v as usize] += face;
        }
    }
    for normal in out.iter_mut() {
        *normal = normal.normalize_or_zero();
    }
}

/// Helper used to cook triangle meshes from raw vertex/index buffers.
#[derive(Debug, Clone)]
pub struct MeshBuilder {
    vertices: Vec<Vec3>,
    indices: Vec<[u32; 3]>,
}

impl MeshBuilder {
    pub fn new(vertices: Vec<Vec3>, indices: Vec<[u32; 3]>) -> Self {
        Self { vertices, indices }
    }

    /// Deduplicates vertices using a quantized grid for stability.
    pub fn weld_vertices(mut self, epsilon: f32) -> Self {
        if epsilon <= 0.0 || self.vertices.is_empty() {
            return self;
        }

        let inv = 1.0 / epsilon;
        let mut map: HashMap<(i32, i32, i32), u32> = HashMap::new();
        let mut new_vertices: Vec<Vec3> = Vec::new();
        let mut remap: Vec<u32> = Vec::with_capacity(self.vertices.len());

        for v in &self.vertices {
            let key = (
                (v.x * inv).round() as i32,
                (v.y * inv).round() as i32,
                (v.z * inv).round() as i32,
            );
            let index = *map.entry(key).or_insert_with(|| {
                let idx = new_vertices.len() as u32;
                new_vertices.push(*v);
                idx
            });
            remap.push(index);
        }

        for tri in &mut self.indices {
            *tri = tri.map(|v| remap[v as usize]);
        }

        self.vertices = new_vertices;
        self
    }

    /// Drops triangles with repeated corners or zero area.
    pub fn remove_degenerate(mut self) -> Self {
        let vertices = &self.vertices;
        self.indices.retain(|&[a, b, c]| {
            if a == b || b == c || a == c {
                return false;
            }
            let [pa, pb, pc] = [a, b, c].map(|v| vertices[v as usize]);
            (pb - pa).cross(pc - pa).length_squared() > f32::EPSILON
        });
        self
    }

    pub fn build(self) -> TriangleMesh {
        let bounds = Aabb::from_points(&self.vertices);
        let mut normals = Vec::new();
        compute_vertex_normals(&self.vertices, &self.indices, &mut normals);
        TriangleMesh {
            vertices: self.vertices,
            indices: self.indices,
            normals,
            bounds,
            particle_binding: None,
        }
    }
}

/// Two triangles spanning a square of side `2 * half_extent` at height `y`,
/// facing +Y.
pub fn ground_plane(y: f32, half_extent: f32) -> TriangleMesh {
    let h = half_extent;
    let vertices = vec![
        Vec3::new(-h, y, -h),
        Vec3::new(h, y, -h),
        Vec3::new(h, y, h),
        Vec3::new(-h, y, h),
    ];
    MeshBuilder::new(vertices, vec![[0, 2, 1], [0, 3, 2]]).build()
}
