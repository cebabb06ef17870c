//! Footprint-aware A* over a profile's cost grid.

use std::sync::Arc;

use convoy_core::{
    CancelToken, Cell, CellRect, Dir8, FactionId, Footprint, IMPASSABLE, SearchConfig,
    VehicleProfile,
};

use crate::cost_grid::CostGrid;
use crate::heuristic::{distance_strength, octile_cost, opened_ramp};
use crate::path::{Path, PathPool};
use crate::region::{REGION_UNIT, RegionData};
use crate::request::{Destination, PathError, PathRequest};
use crate::search::{ContextPool, NO_DIR, NodeRef, SearchContext, UNREACHABLE};
use crate::terrain::MapTerrain;

/// Everything a search reads besides the request itself.
#[derive(Copy, Clone)]
pub struct PathGrids<'a> {
    pub profile: &'a VehicleProfile,
    pub cost: &'a CostGrid,
    /// Region data of the profile's owner, when built.
    pub regions: Option<&'a RegionData>,
    pub terrain: &'a dyn MapTerrain,
}

/// Search entry point that hands every call its own pooled scratch context.
pub struct Pathfinder {
    config: SearchConfig,
    contexts: ContextPool,
    paths: Arc<PathPool>,
}

impl Pathfinder {
    pub fn new(config: SearchConfig) -> Self {
        Self::with_path_pool(config, Arc::new(PathPool::new()))
    }

    pub fn with_path_pool(config: SearchConfig, paths: Arc<PathPool>) -> Self {
        Self {
            config,
            contexts: ContextPool::new(),
            paths,
        }
    }

    #[inline]
    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    #[inline]
    pub fn path_pool(&self) -> &Arc<PathPool> {
        &self.paths
    }

    /// Find the lowest-cost route for `req`.
    pub fn find_path(
        &self,
        req: &PathRequest,
        grids: &PathGrids<'_>,
        cancel: &CancelToken,
    ) -> Result<Path, PathError> {
        let mut ctx = self.contexts.lease(grids.cost.bounds());
        ctx.find_path(req, grids, &self.config, cancel, &self.paths)
    }
}

impl SearchContext {
    /// Find the lowest-cost route for `req` using this context's scratch
    /// arrays. The returned path comes from `pool`.
    pub fn find_path(
        &mut self,
        req: &PathRequest,
        grids: &PathGrids<'_>,
        config: &SearchConfig,
        cancel: &CancelToken,
        pool: &PathPool,
    ) -> Result<Path, PathError> {
        let bounds = grids.cost.bounds();
        if self.bounds != bounds {
            self.set_bounds(bounds);
        }

        let dest = req.destination;
        if !bounds.contains(req.start) {
            log::error!(
                "path request for profile {} starts outside the map at {}",
                req.profile,
                req.start
            );
            return Err(PathError::InvalidStart(req.start));
        }
        if dest.rect.is_empty() || dest.goal_rect().intersect(bounds).is_empty() {
            log::error!(
                "path request for profile {} targets {} outside the map",
                req.profile,
                dest.rect
            );
            return Err(PathError::InvalidDestination(dest.rect));
        }

        let search = Search::new(req, grids, config);
        if !search.footprint_clear(req.start) {
            log::debug!(
                "path request for profile {} starts with its footprint blocked at {}",
                req.profile,
                req.start
            );
            return Err(PathError::InvalidStart(req.start));
        }

        // Different components means no route; skip the cell-level search.
        if let Some(regions) = search.regions {
            let fp = search.footprint;
            if !regions.reachable_any(req.start, dest.goal_rect(), |c| dest.accepts(c, fp)) {
                return Err(PathError::NoRoute {
                    from: req.start,
                    to: dest.rect,
                });
            }
        }

        if let Some(path) = self.run(&search, cancel, pool, None)? {
            return Ok(path);
        }

        // Long search: restart guided by region distances.
        let Some(regions) = search.regions else {
            return Err(search.exhausted(0));
        };
        let mut targets: Vec<i32> = dest
            .goal_rect()
            .intersect(bounds)
            .iter()
            .filter(|&c| dest.accepts(c, search.footprint))
            .map(|c| regions.region_id(c))
            .filter(|&id| id > 0)
            .collect();
        targets.sort_unstable();
        targets.dedup();

        let mut table = std::mem::take(&mut self.region_dist);
        regions.region_distances(&targets, &mut table);
        log::debug!(
            "search {} -> {} for profile {} switched to region heuristic",
            req.start,
            dest.rect,
            req.profile
        );
        let result = self.run(&search, cancel, pool, Some(&table));
        self.region_dist = table;
        match result? {
            Some(path) => Ok(path),
            None => Err(search.exhausted(0)),
        }
    }

    /// One A* pass. `Ok(None)` asks the caller to restart with the region
    /// heuristic.
    fn run(
        &mut self,
        s: &Search<'_>,
        cancel: &CancelToken,
        pool: &PathPool,
        region_dist: Option<&[i32]>,
    ) -> Result<Option<Path>, PathError> {
        let cur_gen = self.begin();
        let Some(start_idx) = self.idx(s.start) else {
            return Err(PathError::InvalidStart(s.start));
        };

        let mut opened: usize = 1;
        let mut closed: usize = 0;
        {
            let h = s.estimate(s.start, opened, region_dist);
            let node = &mut self.nodes[start_idx];
            node.g = 0;
            node.f = h;
            node.parent = usize::MAX;
            node.generation = cur_gen;
            node.open = true;
            node.dir = NO_DIR;
        }
        self.open.push(NodeRef {
            idx: start_idx,
            f: self.nodes[start_idx].f,
        });

        loop {
            if cancel.is_cancelled() {
                return Err(PathError::Cancelled);
            }
            let Some(current) = self.open.pop() else {
                return Err(PathError::NoRoute {
                    from: s.start,
                    to: s.dest.rect,
                });
            };
            let ci = current.idx;
            if self.nodes[ci].generation != cur_gen || !self.nodes[ci].open {
                continue;
            }

            let cell = self.cell(ci);
            if s.dest.accepts(cell, s.footprint) {
                return Ok(Some(self.reconstruct(ci, pool, region_dist.is_some())));
            }

            self.nodes[ci].open = false;
            closed += 1;
            if closed >= s.config.search_node_cap {
                let err = s.exhausted(closed);
                log::warn!("{err} (profile {}, {} opened)", s.profile.id, opened);
                return Err(err);
            }
            if region_dist.is_none() && s.regions_usable && opened > s.config.region_heuristic_threshold {
                return Ok(None);
            }

            let current_g = self.nodes[ci].g;
            let incoming = self.nodes[ci].dir;

            for dir in Dir8::ALL {
                let n = cell.step(dir);
                let Some(ni) = self.idx(n) else {
                    continue;
                };
                if dir.is_diagonal() && !s.corner_clear(cell, dir) {
                    continue;
                }
                let Some(step) = s.step_cost(n, dir, incoming) else {
                    continue;
                };
                let tentative = current_g.saturating_add(step);

                let node = &mut self.nodes[ni];
                if node.generation == cur_gen {
                    if tentative >= node.g {
                        continue;
                    }
                } else {
                    node.generation = cur_gen;
                    opened += 1;
                }

                node.g = tentative;
                node.f = tentative.saturating_add(s.estimate(n, opened, region_dist));
                node.parent = ci;
                node.dir = dir.index() as u8;
                node.open = true;
                let f = node.f;
                self.open.push(NodeRef { idx: ni, f });
            }
        }
    }

    fn reconstruct(&self, goal: usize, pool: &PathPool, used_region_heuristic: bool) -> Path {
        let mut path = pool.take();
        let mut ci = goal;
        let mut nodes = std::iter::from_fn(|| {
            if ci == usize::MAX {
                return None;
            }
            let item = (self.cell(ci), self.nodes[ci].g);
            ci = self.nodes[ci].parent;
            Some(item)
        });
        path.fill(&mut nodes, used_region_heuristic);
        path
    }
}

// ---------------------------------------------------------------------------
// Per-request cost model
// ---------------------------------------------------------------------------

struct Search<'a> {
    start: Cell,
    dest: Destination,
    goal: CellRect,
    profile: &'a VehicleProfile,
    footprint: Footprint,
    faction: Option<FactionId>,
    destroy: bool,
    avoid: Option<CellRect>,
    cost: &'a CostGrid,
    regions: Option<&'a RegionData>,
    regions_usable: bool,
    terrain: &'a dyn MapTerrain,
    config: &'a SearchConfig,
}

impl<'a> Search<'a> {
    fn new(req: &PathRequest, grids: &PathGrids<'a>, config: &'a SearchConfig) -> Self {
        let regions = grids.regions.filter(|r| r.bounds() == grids.cost.bounds());
        Self {
            start: req.start,
            dest: req.destination,
            goal: req.destination.goal_rect().intersect(grids.cost.bounds()),
            profile: grids.profile,
            footprint: grids.profile.footprint,
            faction: req.faction,
            destroy: req.destroy_obstacles && grids.profile.mobility.can_destroy_obstacles,
            avoid: req
                .avoid
                .filter(|r| r.intersect(grids.profile.footprint.rect_at(req.start)).is_empty()),
            cost: grids.cost,
            regions,
            regions_usable: regions.is_some_and(|r| r.region_id(req.start) > 0),
            terrain: grids.terrain,
            config,
        }
    }

    fn exhausted(&self, closed: usize) -> PathError {
        PathError::Exhausted {
            from: self.start,
            to: self.dest.rect,
            closed,
        }
    }

    fn hostile_to(&self, owner: Option<FactionId>) -> bool {
        match (self.faction, owner) {
            (Some(me), Some(them)) => self.terrain.hostile(me, them),
            _ => false,
        }
    }

    /// Cost of entering one cell, or `None` if it blocks this request.
    fn cell_cost(&self, c: Cell) -> Option<i32> {
        if self.avoid.is_some_and(|r| r.contains(c)) {
            return None;
        }
        let cost = self.cost.cost(c);
        if cost != IMPASSABLE {
            return Some(cost);
        }
        if self.destroy && self.cost.bounds().contains(c) {
            if let Some(integrity) = self.terrain.obstacle_at(c) {
                return Some(
                    self.config.obstacle_surcharge
                        + integrity * self.config.obstacle_integrity_percent / 100,
                );
            }
        }
        None
    }

    /// Whether the footprint rooted at `root` fits where it stands.
    fn footprint_clear(&self, root: Cell) -> bool {
        self.footprint.rect_at(root).iter().all(|c| self.cell_cost(c).is_some())
    }

    /// Diagonal steps may not squeeze between two blocked cells.
    fn corner_clear(&self, from: Cell, dir: Dir8) -> bool {
        let d = dir.offset();
        self.cell_cost(from.shift(d.x, 0)).is_some() && self.cell_cost(from.shift(0, d.z)).is_some()
    }

    /// Blended cost of the footprint rooted at `root` while moving `dir`:
    /// the leading cell carries most of the weight and the rest of the
    /// footprint shares the remainder.
    fn footprint_cost(&self, root: Cell, dir: Dir8) -> Option<i32> {
        if self.footprint.is_single() {
            return self.cell_cost(root);
        }
        let rect = self.footprint.rect_at(root);
        let lead = rect.clamp(root + dir.offset() * self.footprint.max_side());

        let mut lead_cost: i64 = 0;
        let mut others: i64 = 0;
        let mut count: i64 = 0;
        for c in rect {
            let cost = self.cell_cost(c)? as i64;
            if c == lead {
                lead_cost = cost;
            } else {
                others += cost;
                count += 1;
            }
        }

        let pct = self.config.footprint_lead_percent as i64;
        let mut blended = lead_cost * pct / 100;
        if count > 0 {
            blended += others * (100 - pct) / (100 * count);
        }
        Some(blended.min(i32::MAX as i64) as i32)
    }

    fn step_cost(&self, to: Cell, dir: Dir8, incoming: u8) -> Option<i32> {
        let rules = &self.profile.rules;
        let base = if dir.is_diagonal() {
            rules.diagonal_cost
        } else {
            rules.cardinal_cost
        };
        let turn = if self.footprint.is_single() || incoming == NO_DIR {
            0
        } else {
            Dir8::from_index(incoming as usize).octants_between(dir) as i32
                * self.config.turn_cost_per_octant
        };
        let mut cost = base + turn + self.footprint_cost(to, dir)?;

        if let Some(road) = self.terrain.road_at(to) {
            if !self.hostile_to(road.owner) {
                cost = (cost * self.config.road_cost_percent / 100).max(1);
            }
        }
        if let Some(owner) = self.terrain.avoid_at(to) {
            if !self.hostile_to(Some(owner)) {
                cost += self.config.avoid_surcharge;
            }
        }
        Some(cost)
    }

    fn estimate(&self, c: Cell, opened: usize, region_dist: Option<&[i32]>) -> i32 {
        let rules = &self.profile.rules;
        if let (Some(table), Some(regions)) = (region_dist, self.regions) {
            let id = regions.region_id(c);
            if id > 0 {
                if let Some(&d) = table.get(id as usize) {
                    if d != UNREACHABLE {
                        return (d as i64 * rules.cardinal_cost as i64 / REGION_UNIT as i64) as i32;
                    }
                }
            }
        }
        let target = self.goal.clamp(c);
        let base = octile_cost(c, target, rules.cardinal_cost, rules.diagonal_cost);
        let weight = distance_strength(self.config, c.chebyshev(target)) * opened_ramp(self.config, opened);
        (base as f32 * weight) as i32
    }
}
