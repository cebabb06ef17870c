//! Tunable thresholds for search, region building, grid generation and
//! path following.

use thiserror::Error;

/// Search tuning for the A* engine.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SearchConfig {
    /// Closed-node cap after which a search gives up.
    pub search_node_cap: usize,
    /// Opened-node count that triggers the region-heuristic restart.
    pub region_heuristic_threshold: usize,
    /// Extra cost per 45° of turning, for footprints larger than 1×1.
    pub turn_cost_per_octant: i32,
    /// Share of the footprint cost charged to the leading cell.
    pub footprint_lead_percent: i32,
    /// Road cost multiplier, in percent.
    pub road_cost_percent: i32,
    /// Flat surcharge for cells marked "avoid".
    pub avoid_surcharge: i32,
    /// Flat surcharge for ploughing through a destructible obstacle.
    pub obstacle_surcharge: i32,
    /// Share of obstacle integrity added on top of the surcharge, in percent.
    pub obstacle_integrity_percent: i32,
    pub heuristic_strength_near: f32,
    pub heuristic_strength_far: f32,
    /// Distance (in cells) at which the far strength is reached.
    pub heuristic_far_distance: i32,
    /// Opened nodes after which the heuristic carries full weight.
    pub heuristic_ramp_nodes: usize,
    /// Heuristic weight when the search has just started.
    pub heuristic_ramp_floor: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            search_node_cap: 160_000,
            region_heuristic_threshold: 100_000,
            turn_cost_per_octant: 4,
            footprint_lead_percent: 75,
            road_cost_percent: 50,
            avoid_surcharge: 600,
            obstacle_surcharge: 70,
            obstacle_integrity_percent: 20,
            heuristic_strength_near: 1.0,
            heuristic_strength_far: 2.8,
            heuristic_far_distance: 120,
            heuristic_ramp_nodes: 2_000,
            heuristic_ramp_floor: 0.05,
        }
    }
}

/// Region partitioning and grid lifecycle settings.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct GridConfig {
    /// Side length of the square sections regions are confined to.
    pub region_section_size: i32,
    /// Consecutive unused daily passes before a profile's grids are released.
    pub idle_release_passes: u32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            region_section_size: 16,
            idle_release_passes: 3,
        }
    }
}

/// Optional impact damage between moving agents.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CollisionConfig {
    pub enabled: bool,
    /// Minimum speed (cells per tick) at which impacts are checked.
    pub min_speed: f32,
    pub damage_factor: f32,
}

impl Default for CollisionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_speed: 0.05,
            damage_factor: 1.0,
        }
    }
}

/// Per-agent path consumption settings.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct FollowerConfig {
    /// Ticks spent in a single wait.
    pub wait_ticks: u32,
    /// Consecutive waits after which a new path is requested instead.
    pub max_consecutive_waits: u32,
    /// Upcoming nodes scanned for blockers, on top of the footprint size.
    pub lookahead_nodes: usize,
    /// Nodes-left / distance window in which reachability is re-checked.
    pub recheck_window: i32,
    /// Consumed nodes after which a region-heuristic path is replanned.
    pub stale_heuristic_nodes: usize,
    /// Share of the remaining distance a followed target may move before
    /// replanning, in percent.
    pub repath_distance_percent: i32,
    /// Radius searched when relocating an agent off an impassable cell.
    pub relocate_radius: i32,
    /// Failed searches around a stationary blocker, in a row, after which
    /// the follower gives up.
    pub max_blocked_replans: u32,
    pub collision: CollisionConfig,
}

impl Default for FollowerConfig {
    fn default() -> Self {
        Self {
            wait_ticks: 30,
            max_consecutive_waits: 4,
            lookahead_nodes: 3,
            recheck_window: 8,
            stale_heuristic_nodes: 75,
            repath_distance_percent: 15,
            relocate_radius: 8,
            max_blocked_replans: 8,
            collision: CollisionConfig::default(),
        }
    }
}

/// All routing configuration for one map.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PathConfig {
    pub search: SearchConfig,
    pub grids: GridConfig,
    pub follower: FollowerConfig,
}

/// A configuration value that breaks an ordering the router depends on.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("region heuristic threshold {threshold} must be below the search cap {cap}")]
    RegionThresholdAboveCap { threshold: usize, cap: usize },
    #[error("idle release must wait at least one daily pass")]
    ZeroIdlePasses,
    #[error("footprint lead share {0}% is outside 0..=100")]
    LeadPercent(i32),
    #[error("heuristic ramp floor {0} is outside (0, 1]")]
    RampFloor(f32),
    #[error("region section size {0} is below 2")]
    SectionSize(i32),
    #[error("wait ticks must be at least 1")]
    ZeroWaitTicks,
    #[error("road cost percent {0} must be positive")]
    RoadPercent(i32),
}

impl PathConfig {
    /// Check the relative orderings between thresholds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.search;
        if s.region_heuristic_threshold >= s.search_node_cap {
            return Err(ConfigError::RegionThresholdAboveCap {
                threshold: s.region_heuristic_threshold,
                cap: s.search_node_cap,
            });
        }
        if !(0..=100).contains(&s.footprint_lead_percent) {
            return Err(ConfigError::LeadPercent(s.footprint_lead_percent));
        }
        if !(s.heuristic_ramp_floor > 0.0 && s.heuristic_ramp_floor <= 1.0) {
            return Err(ConfigError::RampFloor(s.heuristic_ramp_floor));
        }
        if s.road_cost_percent <= 0 {
            return Err(ConfigError::RoadPercent(s.road_cost_percent));
        }
        if self.grids.idle_release_passes == 0 {
            return Err(ConfigError::ZeroIdlePasses);
        }
        if self.grids.region_section_size < 2 {
            return Err(ConfigError::SectionSize(self.grids.region_section_size));
        }
        if self.follower.wait_ticks == 0 {
            return Err(ConfigError::ZeroWaitTicks);
        }
        Ok(())
    }
}
