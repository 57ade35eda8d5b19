use std::{fmt, sync::Arc};

use glam::Vec3;

use super::mesh::{Aabb, TriangleMesh};

/// Step used for central-difference gradients.
const GRADIENT_EPSILON: f32 = 1.0e-4;

/// User-supplied distance function.
#[derive(Clone)]
pub struct CustomField(Arc<dyn Fn(Vec3) -> f32 + Send + Sync>);

impl CustomField {
    pub fn new<F>(field: F) -> Self
    where
        F: Fn(Vec3) -> f32 + Send + Sync + 'static,
    {
        Self(Arc::new(field))
    }
}

impl fmt::Debug for CustomField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CustomField(..)")
    }
}

/// Implicit collision shape: negative inside, positive outside.
#[derive(Debug, Clone)]
pub enum SignedDistanceField {
    /// Half-space `normal · p ≤ offset` is solid.
    Plane { normal: Vec3, offset: f32 },
    Sphere { center: Vec3, radius: f32 },
    Box { center: Vec3, half_extents: Vec3 },
    Custom(CustomField),
}

impl SignedDistanceField {
    pub fn plane(normal: Vec3, offset: f32) -> Self {
        Self::Plane {
            normal: normal.normalize_or_zero(),
            offset,
        }
    }

    pub fn distance(&self, point: Vec3) -> f32 {
        match self {
            Self::Plane { normal, offset } => normal.dot(point) - offset,
            Self::Sphere { center, radius } => (point - *center).length() - radius,
            Self::Box {
                center,
                half_extents,
            } => {
                let q = (point - *center).abs() - *half_extents;
                q.max(Vec3::ZERO).length() + q.max_element().min(0.0)
            }
            Self::Custom(field) => (field.0)(point),
        }
    }

    /// Unit gradient of the field, i.e. the outward surface normal near
    /// `point`. Falls back to +Y where the gradient vanishes.
    pub fn gradient(&self, point: Vec3) -> Vec3 {
        let gradient = match self {
            Self::Plane { normal, .. } => *normal,
            Self::Sphere { center, .. } => point - *center,
            _ => self.central_difference(point),
        };
        gradient.try_normalize().unwrap_or(Vec3::Y)
    }

    fn central_difference(&self, point: Vec3) -> Vec3 {
        let e = GRADIENT_EPSILON;
        Vec3::new(
            self.distance(point + Vec3::X * e) - self.distance(point - Vec3::X * e),
            self.distance(point + Vec3::Y * e) - self.distance(point - Vec3::Y * e),
            self.distance(point + Vec3::Z * e) - self.distance(point - Vec3::Z * e),
        )
    }

    /// Region where the field is below `band`, if bounded.
    pub fn bounds(&self, band: f32) -> Option<Aabb> {
        match self {
            Self::Sphere { center, radius } => Some(Aabb::new(
                *center - Vec3::splat(radius + band),
                *center + Vec3::splat(radius + band),
            )),
            Self::Box {
                center,
                half_extents,
            } => Some(Aabb::new(
                *center - *half_extents - Vec3::splat(band),
                *center + *half_extents + Vec3::splat(band),
            )),
            Self::Plane { .. } | Self::Custom(_) => None,
        }
    }
}

/// Geometry particles collide against. Owned by the world's shape arena and
/// referenced by handle from contacts.
#[derive(Debug, Clone)]
pub enum Shape {
    TriangleMesh(TriangleMesh),
    Field(SignedDistanceField),
}

impl Shape {
    pub fn as_mesh(&self) -> Option<&TriangleMesh> {
        match self {
            Shape::TriangleMesh(mesh) => Some(mesh),
            Shape::Field(_) => None,
        }
    }

    pub fn as_field(&self) -> Option<&SignedDistanceField> {
        match self {
            Shape::Field(field) => Some(field),
            Shape::TriangleMesh(_) => None,
        }
    }
}

impl From<TriangleMesh> for Shape {
    fn from(mesh: TriangleMesh) -> Self {
        Shape::TriangleMesh(mesh)
    }
}

impl From<SignedDistanceField> for Shape {
    fn from(field: SignedDistanceField) -> Self {
        Shape::Field(field)
    }
}
