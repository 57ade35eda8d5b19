//! Drops a pinned cloth sheet onto a sphere and prints how far it sagged.

use velvet_solver::*;

const RESOLUTION: usize = 24;
const SPACING: f32 = 0.05;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let width = RESOLUTION + 1;
    let mut positions = Vec::with_capacity(width * width);
    for z in 0..width {
        for x in 0..width {
            positions.push(Vec3::new(
                (x as f32 - RESOLUTION as f32 * 0.5) * SPACING,
                1.5,
                (z as f32 - RESOLUTION as f32 * 0.5) * SPACING,
            ));
        }
    }

    let params = SimParams {
        num_substeps: 10,
        relaxation_mode: RelaxationMode::Batched,
        ..SimParams::default()
    };
    let mut world = ParticleWorld::initialize(positions.len(), SPACING, &positions)?
        .with_params(params)?;

    let index = |x: usize, z: usize| (z * width + x) as u32;
    for z in 0..width {
        for x in 0..width {
            if x + 1 < width {
                world.add_spring(Spring::new(index(x, z), index(x + 1, z), SPACING, 0.0))?;
            }
            if z + 1 < width {
                world.add_spring(Spring::new(index(x, z), index(x, z + 1), SPACING, 0.0))?;
            }
            if x + 2 < width {
                world.add_spring(Spring::bend(index(x, z), index(x + 2, z), SPACING * 2.0))?;
            }
            if z + 2 < width {
                world.add_spring(Spring::bend(index(x, z), index(x, z + 2), SPACING * 2.0))?;
            }
        }
    }
    world.set_inverse_mass(index(0, 0) as usize, 0.0)?;
    world.set_inverse_mass(index(RESOLUTION, 0) as usize, 0.0)?;

    let mut triangles = Vec::with_capacity(RESOLUTION * RESOLUTION * 2);
    for z in 0..RESOLUTION {
        for x in 0..RESOLUTION {
            let (a, b) = (index(x, z), index(x + 1, z));
            let (c, d) = (index(x, z + 1), index(x + 1, z + 1));
            triangles.push([a, c, b]);
            triangles.push([b, c, d]);
        }
    }
    world.add_dynamic_mesh(&triangles)?;

    world.add_shape(SignedDistanceField::Sphere {
        center: Vec3::new(0.0, 0.8, 0.2),
        radius: 0.3,
    })?;
    world.add_shape(ground_plane(0.0, 5.0))?;

    for frame in 0..180 {
        world.step(1.0 / 60.0)?;
        if frame % 60 == 59 {
            let lowest = world
                .positions()
                .iter()
                .map(|p| p.y)
                .fold(f32::INFINITY, f32::min);
            println!(
                "t = {:.1}s  lowest = {:.3}  contacts = {}  step = {:.2} ms",
                (frame + 1) as f32 / 60.0,
                lowest,
                world.stats().contacts,
                world.timers().total_ms()
            );
        }
    }

    println!("Simulated {} cloth particles for 3 seconds", world.particle_count());
    Ok(())
}
