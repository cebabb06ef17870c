//! Routing algorithms for vehicles of arbitrary footprint.
//!
//! This crate provides the per-profile data a map caches and the search that
//! runs over it:
//!
//! - **Cost grids** per vehicle profile ([`CostGrid`])
//! - **Regions** with connectivity components and a region-level distance
//!   table ([`RegionData`])
//! - **Grid ownership** so cost-equivalent profiles share one set of
//!   regions ([`OwnershipRegistry`])
//! - **Footprint A\*** with turn, road, avoid and obstacle costs
//!   ([`Pathfinder`], [`SearchContext::find_path`])
//! - **Pooled paths** consumed node by node ([`Path`], [`PathPool`])
//!
//! Searches borrow scratch arrays from a [`ContextPool`], so concurrent
//! searches never share state and repeated queries allocate nothing after
//! warm-up.

mod astar;
mod cost_grid;
mod heuristic;
mod ownership;
mod path;
mod region;
mod request;
mod search;
mod terrain;

pub use astar::{PathGrids, Pathfinder};
pub use cost_grid::CostGrid;
pub use heuristic::octile_cost;
pub use ownership::{Deactivation, OwnershipRegistry};
pub use path::{Path, PathPool};
pub use region::{
    REGION_IMPASSABLE, REGION_UNIT, REGION_UNREGISTERED, Region, RegionData, RegionLink,
    octile_units,
};
pub use request::{Destination, EndMode, PathError, PathRequest};
pub use search::{ContextLease, ContextPool, SearchContext, UNREACHABLE};
pub use terrain::{MapTerrain, RoadInfo};
