//! World-scale reachability.
//!
//! The same sharing scheme the map layer uses, at world-tile granularity:
//! cost-equivalent profiles share one tile cost array and one flood-filled
//! region array, rebuilt once per simulated day. Two tiles are reachable
//! for a profile when they carry the same positive region id.

mod map;
mod pathing;
mod regions;

pub use map::{TileId, WorldMap};
pub use pathing::WorldPathing;
pub use regions::WORLD_IMPASSABLE;
