//! Solver parameters, their defaults, and the declarative schema used by
//! tuning front-ends.
//!
//! [`SimParams::default`] is the host-side default table. Particle storage is
//! allocated separately (see [`crate::core::particles::ParticleBuffers`]), so
//! creating parameters never touches simulation buffers.

use std::sync::Arc;

use glam::Vec3;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default gravity vector applied to every particle (Y-up).
pub const DEFAULT_GRAVITY: [f32; 3] = [0.0, -9.8, 0.0];

/// Number of substeps a frame is split into.
pub const DEFAULT_NUM_SUBSTEPS: u32 = 5;

/// Number of constraint solver iterations performed per substep.
pub const DEFAULT_NUM_ITERATIONS: u32 = 5;

/// Upper bound on candidates gathered per particle by the neighbor search.
pub const DEFAULT_MAX_NUM_NEIGHBORS: u32 = 64;

pub const DEFAULT_BEND_COMPLIANCE: f32 = 10.0;

/// Viscous drag applied during prediction.
pub const DEFAULT_DAMPING: f32 = 0.25;

/// Coefficient of friction used when colliding against shapes and particles.
pub const DEFAULT_FRICTION: f32 = 0.1;

/// Distance particles maintain against shapes.
pub const DEFAULT_COLLISION_MARGIN: f32 = 0.06;

pub const DEFAULT_PARTICLE_DIAMETER: f32 = 0.1;

/// Velocities are clamped to this magnitude when they are re-derived.
pub const DEFAULT_MAX_SPEED: f32 = 100.0;

pub const DEFAULT_RELAXATION_FACTOR: f32 = 1.0;

/// Neighbor search radius, in particle diameters.
pub const DEFAULT_SUPPORT_FACTOR: f32 = 1.0;

/// How constraint corrections are accumulated inside one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RelaxationMode {
    /// Gauss–Seidel: each constraint sees the corrections made before it.
    #[default]
    Sequential,
    /// Constraints are graph-coloured into conflict-free groups. Members of a
    /// group are solved independently, groups are applied in order.
    Batched,
}

impl RelaxationMode {
    pub const OPTIONS: &'static [&'static str] = &["sequential", "batched"];

    fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::Sequential),
            1 => Some(Self::Batched),
            _ => None,
        }
    }

    fn index(self) -> usize {
        match self {
            Self::Sequential => 0,
            Self::Batched => 1,
        }
    }
}

/// Live-tunable solver configuration. Read-only for the duration of a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimParams {
    pub num_substeps: u32,
    /// Number of solver iterations to perform per substep.
    pub num_iterations: u32,
    pub max_num_neighbors: u32,
    /// Constant acceleration applied to all particles.
    pub gravity: Vec3,
    pub bend_compliance: f32,
    pub damping: f32,
    pub friction: f32,
    pub collision_margin: f32,
    /// The maximum interaction distance between two particles.
    pub particle_diameter: f32,
    pub max_speed: f32,
    pub relaxation_mode: RelaxationMode,
    /// Values greater than 1 over-relax and may lead to instability.
    pub relaxation_factor: f32,
    pub support_factor: f32,
    /// Physically sort particle buffers by grid cell every substep.
    pub reorder_particles: bool,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            num_substeps: DEFAULT_NUM_SUBSTEPS,
            num_iterations: DEFAULT_NUM_ITERATIONS,
            max_num_neighbors: DEFAULT_MAX_NUM_NEIGHBORS,
            gravity: Vec3::from_array(DEFAULT_GRAVITY),
            bend_compliance: DEFAULT_BEND_COMPLIANCE,
            damping: DEFAULT_DAMPING,
            friction: DEFAULT_FRICTION,
            collision_margin: DEFAULT_COLLISION_MARGIN,
            particle_diameter: DEFAULT_PARTICLE_DIAMETER,
            max_speed: DEFAULT_MAX_SPEED,
            relaxation_mode: RelaxationMode::Sequential,
            relaxation_factor: DEFAULT_RELAXATION_FACTOR,
            support_factor: DEFAULT_SUPPORT_FACTOR,
            reorder_particles: true,
        }
    }
}

/// Value category of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum ParamKind {
    Int,
    Float,
    /// Three floats, each constrained to the entry's range.
    Vec3,
    Bool,
    Choice(&'static [&'static str]),
}

impl ParamKind {
    fn label(self) -> &'static str {
        match self {
            ParamKind::Int => "int",
            ParamKind::Float => "float",
            ParamKind::Vec3 => "vec3",
            ParamKind::Bool => "bool",
            ParamKind::Choice(_) => "choice",
        }
    }
}

/// Declarative description of one parameter, enough for any presentation
/// layer to build a widget for it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ParamSpec {
    pub name: &'static str,
    pub label: &'static str,
    pub kind: ParamKind,
    pub min: f64,
    pub max: f64,
    /// The lower bound itself is not a valid value.
    pub min_exclusive: bool,
    /// Slider should use a logarithmic scale.
    pub logarithmic: bool,
    pub description: &'static str,
}

impl ParamSpec {
    const fn new(
        name: &'static str,
        label: &'static str,
        kind: ParamKind,
        min: f64,
        max: f64,
        description: &'static str,
    ) -> Self {
        Self {
            name,
            label,
            kind,
            min,
            max,
            min_exclusive: false,
            logarithmic: false,
            description,
        }
    }

    const fn exclusive_min(mut self) -> Self {
        self.min_exclusive = true;
        self
    }

    const fn logarithmic(mut self) -> Self {
        self.logarithmic = true;
        self
    }

    fn check(&self, value: f64) -> Result<(), ConfigError> {
        if !value.is_finite() {
            return Err(ConfigError::NonFinite(self.name));
        }
        let below = if self.min_exclusive {
            value <= self.min
        } else {
            value < self.min
        };
        if below || value > self.max {
            return Err(ConfigError::OutOfRange {
                name: self.name,
                value,
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }

    fn mismatch(&self) -> ConfigError {
        ConfigError::TypeMismatch {
            name: self.name,
            expected: self.kind.label(),
        }
    }
}

const SCHEMA: &[ParamSpec] = &[
    ParamSpec::new(
        "num_substeps",
        "Num Substeps",
        ParamKind::Int,
        1.0,
        20.0,
        "Number of substeps a frame is divided into",
    ),
    ParamSpec::new(
        "num_iterations",
        "Num Iterations",
        ParamKind::Int,
        1.0,
        20.0,
        "Number of solver iterations to perform per substep",
    ),
    ParamSpec::new(
        "max_num_neighbors",
        "Max Neighbors",
        ParamKind::Int,
        1.0,
        1024.0,
        "Neighbor candidates kept per particle; later candidates are dropped",
    ),
    ParamSpec::new(
        "gravity",
        "Gravity",
        ParamKind::Vec3,
        -50.0,
        50.0,
        "Constant acceleration applied to all particles",
    ),
    ParamSpec::new(
        "friction",
        "Friction",
        ParamKind::Float,
        0.0,
        1.0,
        "Coefficient of friction used when colliding",
    ),
    ParamSpec::new(
        "damping",
        "Damping",
        ParamKind::Float,
        0.0,
        1.0,
        "Viscous drag, opposite and proportional to particle velocity",
    ),
    ParamSpec::new(
        "collision_margin",
        "Collision Margin",
        ParamKind::Float,
        0.0,
        0.5,
        "Distance particles maintain against shapes",
    ),
    ParamSpec::new(
        "bend_compliance",
        "Bend Compliance",
        ParamKind::Float,
        0.0,
        100.0,
        "Inverse stiffness of bending springs, 0 is rigid",
    )
    .logarithmic(),
    ParamSpec::new(
        "particle_diameter",
        "Particle Diameter",
        ParamKind::Float,
        0.0,
        10.0,
        "The maximum interaction distance between particles",
    )
    .exclusive_min(),
    ParamSpec::new(
        "max_speed",
        "Max Speed",
        ParamKind::Float,
        0.0,
        1.0e4,
        "Particle speed is clamped to this value after each substep",
    )
    .exclusive_min(),
    ParamSpec::new(
        "relaxation_mode",
        "Relaxation Mode",
        ParamKind::Choice(RelaxationMode::OPTIONS),
        0.0,
        1.0,
        "How corrections are accumulated inside the solver",
    ),
    ParamSpec::new(
        "relaxation_factor",
        "Relaxation Factor",
        ParamKind::Float,
        0.0,
        2.0,
        "Scale applied to every constraint correction",
    )
    .exclusive_min(),
    ParamSpec::new(
        "support_factor",
        "Support Factor",
        ParamKind::Float,
        1.0,
        3.0,
        "Neighbor search radius in particle diameters",
    ),
    ParamSpec::new(
        "reorder_particles",
        "Reorder Particles",
        ParamKind::Bool,
        0.0,
        1.0,
        "Sort particle buffers by grid cell for memory locality",
    ),
];

/// A dynamically typed parameter value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Int(i64),
    Float(f32),
    Vec3(Vec3),
    Bool(bool),
    Choice(usize),
}

impl SimParams {
    /// Every tunable parameter, in presentation order.
    pub fn schema() -> &'static [ParamSpec] {
        SCHEMA
    }

    pub fn spec(name: &str) -> Option<&'static ParamSpec> {
        SCHEMA.iter().find(|spec| spec.name == name)
    }

    /// Reads a parameter by schema name.
    pub fn get(&self, name: &str) -> Option<ParamValue> {
        let value = match name {
            "num_substeps" => ParamValue::Int(self.num_substeps as i64),
            "num_iterations" => ParamValue::Int(self.num_iterations as i64),
            "max_num_neighbors" => ParamValue::Int(self.max_num_neighbors as i64),
            "gravity" => ParamValue::Vec3(self.gravity),
            "friction" => ParamValue::Float(self.friction),
            "damping" => ParamValue::Float(self.damping),
            "collision_margin" => ParamValue::Float(self.collision_margin),
            "bend_compliance" => ParamValue::Float(self.bend_compliance),
            "particle_diameter" => ParamValue::Float(self.particle_diameter),
            "max_speed" => ParamValue::Float(self.max_speed),
            "relaxation_mode" => ParamValue::Choice(self.relaxation_mode.index()),
            "relaxation_factor" => ParamValue::Float(self.relaxation_factor),
            "support_factor" => ParamValue::Float(self.support_factor),
            "reorder_particles" => ParamValue::Bool(self.reorder_particles),
            _ => return None,
        };
        Some(value)
    }

    /// Assigns a parameter by schema name. On error the previous value is kept.
    pub fn set(&mut self, name: &str, value: ParamValue) -> Result<(), ConfigError> {
        let spec =
            Self::spec(name).ok_or_else(|| ConfigError::UnknownParameter(name.to_string()))?;

        match (spec.kind, value) {
            (ParamKind::Int, ParamValue::Int(v)) => {
                spec.check(v as f64)?;
                let v = v as u32;
                match spec.name {
                    "num_substeps" => self.num_substeps = v,
                    "num_iterations" => self.num_iterations = v,
                    _ => self.max_num_neighbors = v,
                }
            }
            (ParamKind::Float, ParamValue::Float(v)) => {
                spec.check(v as f64)?;
                *self.float_field(spec.name) = v;
            }
            (ParamKind::Vec3, ParamValue::Vec3(v)) => {
                for component in v.to_array() {
                    spec.check(component as f64)?;
                }
                self.gravity = v;
            }
            (ParamKind::Bool, ParamValue::Bool(v)) => self.reorder_particles = v,
            (ParamKind::Choice(_), ParamValue::Choice(index)) => {
                self.relaxation_mode =
                    RelaxationMode::from_index(index).ok_or(ConfigError::OutOfRange {
                        name: spec.name,
                        value: index as f64,
                        min: spec.min,
                        max: spec.max,
                    })?;
            }
            _ => return Err(spec.mismatch()),
        }
        Ok(())
    }

    fn float_field(&mut self, name: &str) -> &mut f32 {
        match name {
            "friction" => &mut self.friction,
            "damping" => &mut self.damping,
            "collision_margin" => &mut self.collision_margin,
            "bend_compliance" => &mut self.bend_compliance,
            "particle_diameter" => &mut self.particle_diameter,
            "max_speed" => &mut self.max_speed,
            "relaxation_factor" => &mut self.relaxation_factor,
            _ => &mut self.support_factor,
        }
    }

    /// Checks every field against the schema.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut scratch = self.clone();
        for spec in SCHEMA {
            if let Some(value) = self.get(spec.name) {
                scratch.set(spec.name, value)?;
            }
        }
        Ok(())
    }

    pub fn set_num_substeps(&mut self, value: u32) -> Result<(), ConfigError> {
        self.set("num_substeps", ParamValue::Int(value as i64))
    }

    pub fn set_num_iterations(&mut self, value: u32) -> Result<(), ConfigError> {
        self.set("num_iterations", ParamValue::Int(value as i64))
    }

    pub fn set_gravity(&mut self, value: Vec3) -> Result<(), ConfigError> {
        self.set("gravity", ParamValue::Vec3(value))
    }

    pub fn set_friction(&mut self, value: f32) -> Result<(), ConfigError> {
        self.set("friction", ParamValue::Float(value))
    }

    pub fn set_damping(&mut self, value: f32) -> Result<(), ConfigError> {
        self.set("damping", ParamValue::Float(value))
    }

    pub fn set_collision_margin(&mut self, value: f32) -> Result<(), ConfigError> {
        self.set("collision_margin", ParamValue::Float(value))
    }

    pub fn set_bend_compliance(&mut self, value: f32) -> Result<(), ConfigError> {
        self.set("bend_compliance", ParamValue::Float(value))
    }

    pub fn set_relaxation_mode(&mut self, mode: RelaxationMode) {
        self.relaxation_mode = mode;
    }

    /// Edge length of a spatial hash cell. Never smaller than the neighbor
    /// search radius, so the 27-cell scan is complete.
    pub fn cell_size(&self) -> f32 {
        (self.particle_diameter + self.collision_margin).max(self.neighbor_radius())
    }

    pub fn neighbor_radius(&self) -> f32 {
        self.particle_diameter * self.support_factor
    }
}

/// Thread-safe handle through which a tuning front-end edits parameters.
///
/// The step runner takes a snapshot at the start of each step, so writes
/// land at the next step boundary.
#[derive(Debug, Clone, Default)]
pub struct ParamsHandle {
    inner: Arc<RwLock<SimParams>>,
}

impl ParamsHandle {
    pub fn new(params: SimParams) -> Self {
        Self {
            inner: Arc::new(RwLock::new(params)),
        }
    }

    pub fn snapshot(&self) -> SimParams {
        self.inner.read().clone()
    }

    pub fn get(&self, name: &str) -> Option<ParamValue> {
        self.inner.read().get(name)
    }

    pub fn set(&self, name: &str, value: ParamValue) -> Result<(), ConfigError> {
        self.inner.write().set(name, value)
    }

    /// Applies a batch of edits atomically; nothing is stored unless the
    /// edited parameters validate.
    pub fn update<F>(&self, edit: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut SimParams),
    {
        let mut guard = self.inner.write();
        let mut candidate = guard.clone();
        edit(&mut candidate);
        candidate.validate()?;
        *guard = candidate;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        SimParams::default()
            .validate()
            .expect("default table must be valid");
    }

    #[test]
    fn out_of_range_keeps_previous_value() {
        let mut params = SimParams::default();
        let err = params.set_num_substeps(0).unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { name: "num_substeps", .. }));
        assert_eq!(params.num_substeps, DEFAULT_NUM_SUBSTEPS);

        assert!(params.set_num_iterations(21).is_err());
        assert_eq!(params.num_iterations, DEFAULT_NUM_ITERATIONS);
    }

    #[test]
    fn exclusive_lower_bound_rejects_zero_diameter() {
        let mut params = SimParams::default();
        assert!(params
            .set("particle_diameter", ParamValue::Float(0.0))
            .is_err());
        assert!(params
            .set("particle_diameter", ParamValue::Float(0.2))
            .is_ok());
        assert_eq!(params.particle_diameter, 0.2);
    }

    #[test]
    fn gravity_components_are_range_checked() {
        let mut params = SimParams::default();
        assert!(params.set_gravity(Vec3::new(0.0, -60.0, 0.0)).is_err());
        assert_eq!(params.gravity, Vec3::from_array(DEFAULT_GRAVITY));
    }

    #[test]
    fn type_mismatch_is_reported() {
        let mut params = SimParams::default();
        let err = params
            .set("friction", ParamValue::Int(1))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::TypeMismatch {
                name: "friction",
                expected: "float"
            }
        );
    }

    #[test]
    fn schema_round_trips_every_field() {
        let params = SimParams::default();
        for spec in SimParams::schema() {
            let value = params.get(spec.name).expect("schema field readable");
            let mut copy = params.clone();
            copy.set(spec.name, value).expect("own value is valid");
            assert_eq!(copy, params, "{} changed on re-assignment", spec.name);
        }
    }

    #[test]
    fn handle_update_is_all_or_nothing() {
        let handle = ParamsHandle::new(SimParams::default());
        let result = handle.update(|p| {
            p.friction = 0.5;
            p.damping = 4.0;
        });
        assert!(result.is_err());
        assert_eq!(handle.snapshot().friction, DEFAULT_FRICTION);

        handle
            .update(|p| p.friction = 0.5)
            .expect("valid edit");
        assert_eq!(handle.snapshot().friction, 0.5);
    }

    #[test]
    fn cell_size_covers_search_radius() {
        let mut params = SimParams::default();
        params.support_factor = 2.5;
        assert!(params.cell_size() >= params.neighbor_radius());
    }
}
