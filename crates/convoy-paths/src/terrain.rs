use convoy_core::{Cell, CellRect, FactionId, VehicleProfile};

/// A road segment under a cell. Public roads have no owner.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RoadInfo {
    pub owner: Option<FactionId>,
}

/// The host map, as far as routing needs to see it.
///
/// Deriving per-cell costs from terrain, weather and buildings is the host's
/// business; the router only caches the results per profile and asks for
/// the markings below while searching. Implementations are shared with the
/// background worker and must be safe to read from another thread.
pub trait MapTerrain: Send + Sync {
    /// The map rectangle.
    fn bounds(&self) -> CellRect;

    /// Extra traversal cost of `cell` for `profile`, or
    /// [`IMPASSABLE`](convoy_core::IMPASSABLE).
    fn cell_cost(&self, profile: &VehicleProfile, cell: Cell) -> i32;

    fn road_at(&self, _cell: Cell) -> Option<RoadInfo> {
        None
    }

    /// Faction that marked `cell` to be avoided, if any.
    fn avoid_at(&self, _cell: Cell) -> Option<FactionId> {
        None
    }

    /// Integrity of a destructible obstacle blocking `cell`.
    fn obstacle_at(&self, _cell: Cell) -> Option<i32> {
        None
    }

    fn hostile(&self, _a: FactionId, _b: FactionId) -> bool {
        false
    }
}
