use approx::assert_abs_diff_eq;
use velvet_solver::{ground_plane, ParticleWorld, RelaxationMode, SimParams, Spring, Vec3};

const DT: f32 = 1.0 / 60.0;

fn sliding_world(friction: f32) -> ParticleWorld {
    let params = SimParams {
        friction,
        damping: 0.0,
        ..SimParams::default()
    };
    let mut world = ParticleWorld::initialize(1, 0.1, &[Vec3::new(0.0, 0.11, 0.0)])
        .expect("world")
        .with_params(params)
        .expect("params");
    world.add_shape(ground_plane(0.0, 50.0)).expect("shape");
    world.set_velocity(0, Vec3::new(2.0, 0.0, 0.0)).expect("velocity");
    world
}

#[test]
fn test_friction_correction_stays_inside_cone() {
    let mu = 0.5;
    let mut world = sliding_world(mu);
    world.step(DT).expect("step");
    assert!(world.stats().max_friction_ratio > 0.0);
    for _ in 0..30 {
        world.step(DT).expect("step");
        let ratio = world.stats().max_friction_ratio;
        assert!(ratio <= mu + 1e-4, "friction ratio {ratio} exceeds {mu}");
    }
}

#[test]
fn test_friction_slows_sliding_particle() {
    let mut rough = sliding_world(0.5);
    let mut smooth = sliding_world(0.0);
    for _ in 0..30 {
        rough.step(DT).expect("step");
        smooth.step(DT).expect("step");
    }
    assert!(rough.positions()[0].x < smooth.positions()[0].x);
    assert!(rough.velocities()[0].x < smooth.velocities()[0].x);
    assert_eq!(smooth.stats().max_friction_ratio, 0.0);
    // Without friction or damping the slide keeps its speed.
    assert_abs_diff_eq!(smooth.velocities()[0].x, 2.0, epsilon = 1e-3);
}

fn hanging_chain(mode: RelaxationMode) -> ParticleWorld {
    let positions: Vec<Vec3> = (0..4).map(|i| Vec3::new(i as f32 * 0.2, 1.0, 0.0)).collect();
    let params = SimParams {
        num_substeps: 10,
        num_iterations: 10,
        relaxation_mode: mode,
        ..SimParams::default()
    };
    let mut world = ParticleWorld::initialize(4, 0.1, &positions)
        .expect("world")
        .with_params(params)
        .expect("params");
    world.set_inverse_mass(0, 0.0).expect("pin");
    for i in 0..3 {
        world.add_spring(Spring::new(i, i + 1, 0.2, 0.0)).expect("spring");
    }
    world
}

#[test]
fn test_sequential_and_batched_chains_both_converge() {
    for mode in [RelaxationMode::Sequential, RelaxationMode::Batched] {
        let mut world = hanging_chain(mode);
        for _ in 0..120 {
            world.step(DT).expect("step");
        }
        let p = world.positions();
        for i in 0..3 {
            let length = p[i].distance(p[i + 1]);
            assert_abs_diff_eq!(length, 0.2, epsilon = 1e-2);
        }
        // The chain swung down below its pin.
        assert!(p[3].y < 1.0, "{mode:?}: {:?}", p[3]);
        assert_eq!(p[0], Vec3::new(0.0, 1.0, 0.0));
        if mode == RelaxationMode::Batched {
            assert!(world.stats().color_groups >= 1);
        }
    }
}

#[test]
fn test_bend_springs_follow_live_compliance() {
    let positions = [Vec3::ZERO, Vec3::new(1.5, 0.0, 0.0)];
    let build = |bend_compliance: f32| {
        let params = SimParams {
            gravity: Vec3::ZERO,
            damping: 0.0,
            bend_compliance,
            ..SimParams::default()
        };
        let mut world = ParticleWorld::initialize(2, 0.1, &positions)
            .expect("world")
            .with_params(params)
            .expect("params");
        world.add_spring(Spring::bend(0, 1, 1.0)).expect("spring");
        world.step(DT).expect("step");
        world.positions()[0].distance(world.positions()[1])
    };

    assert_abs_diff_eq!(build(0.0), 1.0, epsilon = 1e-4);
    assert!(build(100.0) > 1.4);
}

#[test]
fn test_stats_count_springs_and_substeps() {
    let mut world = hanging_chain(RelaxationMode::Sequential);
    world.step(DT).expect("step");
    let stats = world.stats();
    assert_eq!(stats.springs, 3);
    assert_eq!(stats.substeps, 10);
    assert_eq!(stats.numerical_warnings, 0);
    assert!(world.numerical_errors().is_empty());
}

#[test]
fn test_timers_cover_pipeline() {
    let mut world = hanging_chain(RelaxationMode::Sequential);
    world.step(DT).expect("step");
    let timers = world.timers();
    let summed: std::time::Duration = timers.stages().iter().map(|(_, d)| *d).sum();
    assert_eq!(timers.total, summed);
    assert_eq!(timers.stages()[0].0, "predict");
    assert!(timers.total_ms() >= 0.0);
}
