//! Cached per-profile traversal costs.

use convoy_core::{Cell, CellRect, IMPASSABLE, ProfileId, VehicleProfile};

use crate::terrain::MapTerrain;

/// Per-cell traversal cost for one profile on one map.
///
/// Built from [`MapTerrain::cell_cost`] and kept in a flat row-major array.
/// Cells outside the map read as [`IMPASSABLE`].
#[derive(Clone, Debug)]
pub struct CostGrid {
    profile: ProfileId,
    bounds: CellRect,
    width: usize,
    costs: Vec<i32>,
}

impl CostGrid {
    /// Compute every cell of `terrain` for `profile`.
    pub fn build(terrain: &dyn MapTerrain, profile: &VehicleProfile) -> Self {
        let bounds = terrain.bounds();
        let mut grid = Self {
            profile: profile.id,
            bounds,
            width: bounds.width().max(0) as usize,
            costs: vec![IMPASSABLE; bounds.len()],
        };
        grid.recalculate(terrain, profile);
        grid
    }

    /// Grid with a uniform cost; mostly useful for tests and tools.
    pub fn filled(profile: ProfileId, bounds: CellRect, cost: i32) -> Self {
        Self {
            profile,
            bounds,
            width: bounds.width().max(0) as usize,
            costs: vec![cost; bounds.len()],
        }
    }

    #[inline]
    pub fn profile(&self) -> ProfileId {
        self.profile
    }

    #[inline]
    pub fn bounds(&self) -> CellRect {
        self.bounds
    }

    /// Recompute every cell.
    pub fn recalculate(&mut self, terrain: &dyn MapTerrain, profile: &VehicleProfile) {
        for (i, c) in self.bounds.iter().enumerate() {
            self.costs[i] = terrain.cell_cost(profile, c);
        }
    }

    /// Recompute one cell. Returns `true` if its passability changed.
    pub fn recalculate_cell(
        &mut self,
        terrain: &dyn MapTerrain,
        profile: &VehicleProfile,
        c: Cell,
    ) -> bool {
        let Some(i) = self.idx(c) else {
            return false;
        };
        let old = self.costs[i];
        let new = terrain.cell_cost(profile, c);
        self.costs[i] = new;
        (old == IMPASSABLE) != (new == IMPASSABLE)
    }

    pub fn set(&mut self, c: Cell, cost: i32) {
        if let Some(i) = self.idx(c) {
            self.costs[i] = cost;
        }
    }

    #[inline]
    pub fn cost(&self, c: Cell) -> i32 {
        match self.idx(c) {
            Some(i) => self.costs[i],
            None => IMPASSABLE,
        }
    }

    #[inline]
    pub fn passable(&self, c: Cell) -> bool {
        self.cost(c) != IMPASSABLE
    }

    /// Whether every cell of `rect` is inside the map and passable.
    pub fn rect_passable(&self, rect: CellRect) -> bool {
        self.bounds.contains_rect(rect) && rect.iter().all(|c| self.passable(c))
    }

    #[inline]
    pub(crate) fn idx(&self, c: Cell) -> Option<usize> {
        if !self.bounds.contains(c) {
            return None;
        }
        let x = (c.x - self.bounds.min.x) as usize;
        let z = (c.z - self.bounds.min.z) as usize;
        Some(z * self.width + x)
    }
}
