//! Pours a block of loose particles onto the ground and reports the pile.

use velvet_solver::*;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let side = 10;
    let diameter = 0.1;
    let mut positions = Vec::with_capacity(side * side * side);
    for x in 0..side {
        for y in 0..side {
            for z in 0..side {
                // A slight shear so the block does not land as a perfect lattice.
                let jitter = (y as f32) * 0.01;
                positions.push(Vec3::new(
                    x as f32 * diameter * 1.1 + jitter,
                    0.5 + y as f32 * diameter * 1.1,
                    z as f32 * diameter * 1.1,
                ));
            }
        }
    }

    let mut world = ParticleWorld::initialize(positions.len(), diameter, &positions)?;
    world.set_frame_budget(Some(16.0));
    world.add_shape(ground_plane(0.0, 10.0))?;

    let handle = world.params_handle();
    for frame in 0..240 {
        if frame == 120 {
            // Make the pile slippery halfway through.
            handle.set("friction", ParamValue::Float(0.0))?;
        }
        world.step(1.0 / 60.0)?;
    }

    let bounds = world.bounds();
    println!(
        "Pile of {} particles spans {:?} .. {:?}",
        world.particle_count(),
        bounds.min,
        bounds.max
    );
    println!(
        "particle contacts = {}  truncated neighbor lists = {}",
        world.stats().particle_contacts,
        world.stats().truncated_neighbor_lists
    );
    Ok(())
}
