use std::thread;

use velvet_solver::{
    ConfigError, ParamKind, ParamValue, ParamsHandle, ParticleWorld, RelaxationMode, SimParams,
    Vec3,
};

#[test]
fn test_defaults_match_documented_table() {
    let params = SimParams::default();
    assert_eq!(params.num_substeps, 5);
    assert_eq!(params.num_iterations, 5);
    assert_eq!(params.max_num_neighbors, 64);
    assert_eq!(params.gravity, Vec3::new(0.0, -9.8, 0.0));
    assert_eq!(params.bend_compliance, 10.0);
    assert_eq!(params.damping, 0.25);
    assert_eq!(params.friction, 0.1);
    assert_eq!(params.collision_margin, 0.06);
    assert_eq!(params.relaxation_mode, RelaxationMode::Sequential);
    params.validate().expect("defaults are valid");
}

#[test]
fn test_schema_covers_every_parameter() {
    let params = SimParams::default();
    let schema = SimParams::schema();
    assert_eq!(schema.len(), 14);
    for spec in schema {
        let value = params
            .get(spec.name)
            .unwrap_or_else(|| panic!("no getter for {}", spec.name));
        let matches_kind = matches!(
            (spec.kind, value),
            (ParamKind::Int, ParamValue::Int(_))
                | (ParamKind::Float, ParamValue::Float(_))
                | (ParamKind::Vec3, ParamValue::Vec3(_))
                | (ParamKind::Bool, ParamValue::Bool(_))
                | (ParamKind::Choice(_), ParamValue::Choice(_))
        );
        assert!(matches_kind, "{} has the wrong kind", spec.name);
        assert!(spec.min <= spec.max);
        assert!(!spec.description.is_empty());
    }
    assert!(SimParams::spec("bend_compliance").expect("spec").logarithmic);
}

#[test]
fn test_out_of_range_assignment_keeps_old_value() {
    let mut params = SimParams::default();
    let err = params
        .set("friction", ParamValue::Float(1.5))
        .expect_err("friction above 1");
    assert!(matches!(err, ConfigError::OutOfRange { name: "friction", .. }));
    assert_eq!(params.friction, 0.1);

    assert!(params.set("num_iterations", ParamValue::Int(0)).is_err());
    assert_eq!(params.num_iterations, 5);

    assert!(params.set_collision_margin(f32::NAN).is_err());
    assert_eq!(params.collision_margin, 0.06);

    params.set("num_iterations", ParamValue::Int(12)).expect("in range");
    assert_eq!(params.get("num_iterations"), Some(ParamValue::Int(12)));
}

#[test]
fn test_unknown_and_mistyped_parameters() {
    let mut params = SimParams::default();
    assert_eq!(
        params.set("viscosity", ParamValue::Float(0.1)),
        Err(ConfigError::UnknownParameter("viscosity".to_string()))
    );
    assert!(matches!(
        params.set("gravity", ParamValue::Float(1.0)),
        Err(ConfigError::TypeMismatch { name: "gravity", .. })
    ));
    assert!(params.get("viscosity").is_none());
}

#[test]
fn test_relaxation_mode_choice() {
    let mut params = SimParams::default();
    params
        .set("relaxation_mode", ParamValue::Choice(1))
        .expect("batched");
    assert_eq!(params.relaxation_mode, RelaxationMode::Batched);
    assert!(params.set("relaxation_mode", ParamValue::Choice(7)).is_err());
    assert_eq!(params.relaxation_mode, RelaxationMode::Batched);
}

#[test]
fn test_params_handle_updates_are_atomic() {
    let handle = ParamsHandle::new(SimParams::default());
    let result = handle.update(|p| {
        p.friction = 0.5;
        p.num_substeps = 99;
    });
    assert!(result.is_err());
    assert_eq!(handle.snapshot().friction, 0.1);

    handle
        .update(|p| {
            p.friction = 0.5;
            p.num_substeps = 8;
        })
        .expect("valid batch");
    assert_eq!(handle.snapshot().num_substeps, 8);
}

#[test]
fn test_handle_edits_apply_at_next_step() {
    let start = Vec3::new(0.0, 1.0, 0.0);
    let mut world = ParticleWorld::initialize(1, 0.1, &[start]).expect("world");
    let handle = world.params_handle();

    thread::spawn(move || {
        handle
            .set("gravity", ParamValue::Vec3(Vec3::ZERO))
            .expect("gravity in range");
    })
    .join()
    .expect("tuning thread");

    world.step(1.0 / 60.0).expect("step");
    assert_eq!(world.positions()[0], start);
    assert_eq!(world.params().gravity, Vec3::ZERO);
}

#[test]
fn test_with_params_rejects_invalid_table() {
    let world = ParticleWorld::initialize(1, 0.1, &[Vec3::ZERO]).expect("world");
    let params = SimParams {
        num_substeps: 0,
        ..SimParams::default()
    };
    assert!(world.with_params(params).is_err());
}
