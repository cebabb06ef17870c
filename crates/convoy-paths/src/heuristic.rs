use convoy_core::{Cell, SearchConfig};

/// Octile distance in tick costs.
#[inline]
pub fn octile_cost(a: Cell, b: Cell, cardinal: i32, diagonal: i32) -> i32 {
    let dx = (a.x - b.x).abs();
    let dz = (a.z - b.z).abs();
    cardinal * dx.max(dz) + (diagonal - cardinal) * dx.min(dz)
}

/// Heuristic multiplier by remaining distance: near targets get an
/// admissible estimate, far ones a greedier one.
#[inline]
pub(crate) fn distance_strength(cfg: &SearchConfig, distance: i32) -> f32 {
    let far = cfg.heuristic_far_distance.max(1) as f32;
    let t = (distance as f32 / far).clamp(0.0, 1.0);
    cfg.heuristic_strength_near + (cfg.heuristic_strength_far - cfg.heuristic_strength_near) * t
}

/// Heuristic weight by nodes opened so far. Starts near zero so the first
/// expansions behave like Dijkstra, and reaches full weight once the search
/// has clearly committed to a direction.
#[inline]
pub(crate) fn opened_ramp(cfg: &SearchConfig, opened: usize) -> f32 {
    let full = cfg.heuristic_ramp_nodes.max(1) as f32;
    (opened as f32 / full).clamp(cfg.heuristic_ramp_floor, 1.0)
}
