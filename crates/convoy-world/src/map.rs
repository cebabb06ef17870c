use std::fmt;

use convoy_core::VehicleProfile;

/// Index of a world tile.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TileId(pub u32);

impl TileId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tile {}", self.0)
    }
}

/// The host's world, as far as tile routing needs to see it.
pub trait WorldMap {
    fn tile_count(&self) -> usize;

    /// Push the tiles adjacent to `tile` onto `out`.
    fn neighbours(&self, tile: TileId, out: &mut Vec<TileId>);

    /// Cost of crossing `tile` for `profile`, or
    /// [`IMPASSABLE`](convoy_core::IMPASSABLE).
    fn tile_cost(&self, profile: &VehicleProfile, tile: TileId) -> i32;
}
