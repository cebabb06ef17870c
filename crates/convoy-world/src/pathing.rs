//! Per-profile tile costs and regions over the whole world.

use std::sync::Arc;

use convoy_core::{ProfileId, ProfileSet};
use convoy_paths::{Deactivation, OwnershipRegistry};

use crate::map::{TileId, WorldMap};
use crate::regions::{WORLD_IMPASSABLE, flood_fill};

#[derive(Clone, Debug, Default)]
struct Arrays {
    costs: Option<Arc<[i32]>>,
    regions: Option<Arc<[i32]>>,
}

/// Tile-level reachability for every profile.
///
/// Cost-equivalent profiles share their owner's cost and region arrays, so
/// the work per day scales with cost classes. Arrays are derived data:
/// [`daily_recalculate`](Self::daily_recalculate) rebuilds them from the
/// [`WorldMap`].
pub struct WorldPathing {
    profiles: Arc<ProfileSet>,
    ownership: OwnershipRegistry,
    arrays: Vec<Arrays>,
    days: u64,
}

impl WorldPathing {
    pub fn new(profiles: Arc<ProfileSet>) -> Self {
        let ownership = OwnershipRegistry::new(&profiles);
        Self {
            arrays: vec![Arrays::default(); profiles.len()],
            profiles,
            ownership,
            days: 0,
        }
    }

    #[inline]
    pub fn ownership(&self) -> &OwnershipRegistry {
        &self.ownership
    }

    /// Completed daily passes.
    #[inline]
    pub fn days(&self) -> u64 {
        self.days
    }

    /// Rebuild the arrays of every owner whose class has an active member
    /// and drop the rest. Returns the owners rebuilt.
    pub fn daily_recalculate(&mut self, map: &dyn WorldMap) -> Vec<ProfileId> {
        let mut rebuilt = Vec::new();
        for i in 0..self.arrays.len() {
            let profile = ProfileId(i as u16);
            if !self.ownership.is_owner(profile) {
                self.arrays[i] = Arrays::default();
            } else if self.class_active(profile) {
                self.build(map, profile);
                rebuilt.push(profile);
            } else if self.arrays[i].costs.is_some() {
                log::debug!("dropping world arrays of idle profile {profile}");
                self.arrays[i] = Arrays::default();
            }
        }
        self.days += 1;
        log::debug!("world day {}: rebuilt {} cost classes", self.days, rebuilt.len());
        rebuilt
    }

    /// Build `profile`'s class arrays now if they are missing.
    pub fn ensure(&mut self, map: &dyn WorldMap, profile: ProfileId) {
        let owner = self.ownership.get_owner(profile);
        if self.arrays[owner.index()].costs.is_none() {
            self.build(map, owner);
        }
    }

    fn class_active(&self, owner: ProfileId) -> bool {
        self.ownership.is_active(owner) || !self.ownership.dependents(owner).is_empty()
    }

    fn build(&mut self, map: &dyn WorldMap, owner: ProfileId) {
        let profile = &self.profiles[owner];
        let costs: Vec<i32> = (0..map.tile_count())
            .map(|t| map.tile_cost(profile, TileId(t as u32)))
            .collect();
        let regions = flood_fill(map, &costs);
        let slot = &mut self.arrays[owner.index()];
        slot.costs = Some(costs.into());
        slot.regions = Some(regions.into());
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Tile costs `profile` routes with, resolved through its owner.
    pub fn tile_costs(&self, profile: ProfileId) -> Option<&Arc<[i32]>> {
        let owner = self.ownership.get_owner(profile);
        self.arrays[owner.index()].costs.as_ref()
    }

    pub fn tile_regions(&self, profile: ProfileId) -> Option<&Arc<[i32]>> {
        let owner = self.ownership.get_owner(profile);
        self.arrays[owner.index()].regions.as_ref()
    }

    pub fn tile_cost(&self, profile: ProfileId, tile: TileId) -> Option<i32> {
        self.tile_costs(profile)?.get(tile.index()).copied()
    }

    /// Region of `tile`, or [`WORLD_IMPASSABLE`].
    pub fn region_id(&self, profile: ProfileId, tile: TileId) -> Option<i32> {
        self.tile_regions(profile)?.get(tile.index()).copied()
    }

    /// Whether `profile` can travel from `a` to `b`. False when the arrays
    /// are not built.
    pub fn reachable(&self, profile: ProfileId, a: TileId, b: TileId) -> bool {
        match (self.region_id(profile, a), self.region_id(profile, b)) {
            (Some(x), Some(y)) => x > 0 && x == y,
            _ => false,
        }
    }

    // -----------------------------------------------------------------------
    // Ownership
    // -----------------------------------------------------------------------

    /// A profile left the world. An owner with active dependents hands its
    /// arrays to the first of them.
    pub fn remove_profile(&mut self, profile: ProfileId) -> Deactivation {
        let outcome = self.ownership.deactivate(profile);
        if let Deactivation::Transferred { from, to } = outcome {
            let moved = std::mem::take(&mut self.arrays[from.index()]);
            self.arrays[to.index()] = moved;
            log::debug!("world arrays moved from profile {from} to {to}");
        }
        outcome
    }

    pub fn restore_profile(&mut self, profile: ProfileId) {
        self.ownership.activate(profile);
    }
}

impl std::fmt::Debug for WorldPathing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let built = self.arrays.iter().filter(|a| a.costs.is_some()).count();
        f.debug_struct("WorldPathing")
            .field("profiles", &self.profiles.len())
            .field("built", &built)
            .field("days", &self.days)
            .finish()
    }
}
