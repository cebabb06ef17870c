//! **convoy-core**: foundational types for footprint-aware grid routing.
//!
//! This crate provides the geometry primitives, the vehicle profile
//! registry, routing configuration and the cancellation token shared by the
//! rest of the *convoy* workspace.

pub mod config;
pub mod context;
pub mod geom;
pub mod profile;

pub use config::{CollisionConfig, ConfigError, FollowerConfig, GridConfig, PathConfig, SearchConfig};
pub use context::CancelToken;
pub use geom::{Cell, CellRect, Dir8, Rot4};
pub use profile::{
    FactionId, Footprint, IMPASSABLE, MobilityFlags, ProfileBuilder, ProfileError, ProfileId,
    ProfileSet, TraversalRules, VehicleProfile,
};
