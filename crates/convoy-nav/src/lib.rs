//! Per-map routing for convoy agents.
//!
//! [`MapPathing`] is the context a map keeps: one [`PathData`] per
//! registered profile, the grid ownership registry, deferred grid builds on
//! a background [`PathWorker`] and the completion queue the host drains once
//! per tick. [`PathFollower`] walks a single agent along the routes it gets
//! back, waiting for or re-routing around other agents recorded in an
//! [`Occupancy`].
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use convoy_core::{PathConfig, ProfileSet};
//! # use convoy_nav::{MapPathing, Urgency};
//! # fn demo(terrain: Arc<dyn convoy_paths::MapTerrain>, profiles: Arc<ProfileSet>) {
//! let mut map = MapPathing::new(terrain, profiles, PathConfig::default()).unwrap();
//! map.spawn_worker().unwrap();
//! map.request_grids_for(convoy_core::ProfileId(0), Urgency::Deferred);
//! // Once per tick:
//! for outcome in map.drain_completions() {
//!     let _ = outcome;
//! }
//! # }
//! ```

mod collision;
mod follower;
mod occupancy;
mod pathing;
mod worker;

pub use collision::{Impact, impact};
pub use follower::{
    Decision, FollowState, FollowerEvent, FollowerHost, FollowerSave, PathFollower, PathTarget,
};
pub use occupancy::{AgentId, Body, NavHost, Occupancy, Occupant};
pub use pathing::{
    MapPathing, PathData, PathOutcome, PathingEvent, ReadyCallback, RegionSlot, Urgency,
};
pub use worker::{PathWorker, Ticket, WorkerError};
