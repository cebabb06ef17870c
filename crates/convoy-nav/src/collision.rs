use convoy_core::CollisionConfig;

use crate::occupancy::{Body, Occupant};

/// Damage exchanged by one impact.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Impact {
    /// Damage the mover deals to the occupant.
    pub dealt: f32,
    /// Damage the mover takes.
    pub taken: f32,
}

/// Impact of a mover with `body` at `speed` (cells per tick) running into
/// `other`, or `None` when collisions are off or the mover is too slow.
///
/// Both sides share the energy of the reduced mass at the closing speed;
/// each side's damage is divided by its own body size.
pub fn impact(cfg: &CollisionConfig, body: Body, speed: f32, other: &Occupant) -> Option<Impact> {
    if !cfg.enabled || speed < cfg.min_speed {
        return None;
    }
    let closing = if other.moving && !other.waiting {
        speed + other.speed
    } else {
        speed
    };
    let total_mass = (body.mass + other.body.mass).max(f32::EPSILON);
    let reduced = body.mass * other.body.mass / total_mass;
    let energy = cfg.damage_factor * reduced * closing;
    Some(Impact {
        dealt: energy / other.body.size.max(f32::EPSILON),
        taken: energy / body.size.max(f32::EPSILON),
    })
}
