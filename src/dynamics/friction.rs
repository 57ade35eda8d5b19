use glam::Vec3;

/// Positional Coulomb friction.
///
/// `tangential` is the tangential displacement accumulated over the substep
/// and `normal_correction` the size of the normal push that was just applied.
/// Returns the correction to add: it cancels the tangential motion outright
/// while that stays inside the cone (static friction), otherwise it opposes
/// the motion with magnitude `mu * normal_correction` (kinetic friction).
pub fn coulomb_friction(tangential: Vec3, normal_correction: f32, mu: f32) -> Vec3 {
    if mu <= 0.0 || normal_correction <= 0.0 {
        return Vec3::ZERO;
    }
    let slip = tangential.length();
    if slip <= f32::EPSILON {
        return Vec3::ZERO;
    }

    let limit = mu * normal_correction;
    if slip <= limit {
        -tangential
    } else {
        -tangential * (limit / slip)
    }
}

/// Removes the component of `displacement` along the unit `normal`.
pub fn tangential_part(displacement: Vec3, normal: Vec3) -> Vec3 {
    displacement - normal * displacement.dot(normal)
}
