//! Region partitioning.
//!
//! The map is cut into square sections. Inside each section every maximal
//! connected set of passable cells becomes one region; regions touching
//! across section borders are linked, and linked regions share a component
//! id. Two cells are reachable from one another iff their regions share a
//! component, which answers reachability without a cell-level search.

use std::collections::{BinaryHeap, HashSet};

use convoy_core::{Cell, CellRect, Dir8, ProfileId};

use crate::cost_grid::CostGrid;
use crate::search::{NodeRef, UNREACHABLE};

/// Region id of a cell no pass has labelled yet.
pub const REGION_UNREGISTERED: i32 = 0;
/// Region id of an impassable cell.
pub const REGION_IMPASSABLE: i32 = -1;

/// Cost of a cardinal step in region distance units; a diagonal is 14.
pub const REGION_UNIT: i32 = 10;

/// Edge between two neighbouring regions.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RegionLink {
    pub to: i32,
    /// Octile distance between the region centres, in [`REGION_UNIT`]s.
    pub weight: i32,
}

#[derive(Clone, Debug)]
pub struct Region {
    pub id: i32,
    pub bounds: CellRect,
    pub cell_count: usize,
    /// Member cell nearest the centroid.
    pub center: Cell,
    pub component: u32,
    pub links: Vec<RegionLink>,
}

/// Octile distance in region units.
#[inline]
pub fn octile_units(a: Cell, b: Cell) -> i32 {
    let dx = (a.x - b.x).abs();
    let dz = (a.z - b.z).abs();
    REGION_UNIT * dx.max(dz) + (14 - REGION_UNIT) * dx.min(dz)
}

/// Whether a step from `from` in direction `dir` is allowed on `grid`:
/// the target is passable and diagonal steps do not cut a blocked corner.
#[inline]
pub(crate) fn step_allowed(grid: &CostGrid, from: Cell, dir: Dir8) -> bool {
    let to = from.step(dir);
    if !grid.passable(to) {
        return false;
    }
    if dir.is_diagonal() {
        let d = dir.offset();
        return grid.passable(from.shift(d.x, 0)) && grid.passable(from.shift(0, d.z));
    }
    true
}

/// Region partition of one map for one owning profile.
#[derive(Clone, Debug)]
pub struct RegionData {
    owner: ProfileId,
    bounds: CellRect,
    width: usize,
    section_size: i32,
    ids: Vec<i32>,
    regions: Vec<Region>,
    components: u32,
}

impl RegionData {
    /// Partition every passable cell of `grid`.
    pub fn build(owner: ProfileId, grid: &CostGrid, section_size: i32) -> Self {
        let bounds = grid.bounds();
        let mut data = Self {
            owner,
            bounds,
            width: bounds.width().max(0) as usize,
            section_size: section_size.max(2),
            ids: vec![REGION_UNREGISTERED; bounds.len()],
            regions: Vec::new(),
            components: 0,
        };
        data.label_sections(grid);
        data.link_regions(grid);
        data.label_components();
        log::debug!(
            "built {} regions in {} components for profile {}",
            data.regions.len(),
            data.components,
            owner
        );
        data
    }

    #[inline]
    pub fn owner(&self) -> ProfileId {
        self.owner
    }

    #[inline]
    pub fn bounds(&self) -> CellRect {
        self.bounds
    }

    #[inline]
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    #[inline]
    pub fn component_count(&self) -> u32 {
        self.components
    }

    /// Region id at `c`; [`REGION_IMPASSABLE`] outside the map.
    #[inline]
    pub fn region_id(&self, c: Cell) -> i32 {
        match self.idx(c) {
            Some(i) => self.ids[i],
            None => REGION_IMPASSABLE,
        }
    }

    pub fn region(&self, id: i32) -> Option<&Region> {
        if id <= 0 {
            return None;
        }
        self.regions.get((id - 1) as usize)
    }

    pub fn region_at(&self, c: Cell) -> Option<&Region> {
        self.region(self.region_id(c))
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Component of the region at `c`.
    #[inline]
    pub fn component_at(&self, c: Cell) -> Option<u32> {
        self.region_at(c).map(|r| r.component)
    }

    /// Whether `a` and `b` are connected.
    pub fn reachable(&self, a: Cell, b: Cell) -> bool {
        match (self.component_at(a), self.component_at(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }

    /// Whether any cell of `rect` satisfying `accept` is connected to `from`.
    pub fn reachable_any(&self, from: Cell, rect: CellRect, accept: impl Fn(Cell) -> bool) -> bool {
        let Some(comp) = self.component_at(from) else {
            return false;
        };
        rect.intersect(self.bounds)
            .iter()
            .any(|c| accept(c) && self.component_at(c) == Some(comp))
    }

    /// Region distance table toward `targets`, in [`REGION_UNIT`]s, indexed
    /// by region id. Unreached regions hold [`UNREACHABLE`]; index 0 is
    /// unused.
    pub fn region_distances(&self, targets: &[i32], out: &mut Vec<i32>) {
        out.clear();
        out.resize(self.regions.len() + 1, UNREACHABLE);

        let mut open: BinaryHeap<NodeRef> = BinaryHeap::new();
        for &t in targets {
            if t > 0 && (t as usize) < out.len() && out[t as usize] != 0 {
                out[t as usize] = 0;
                open.push(NodeRef { idx: t as usize, f: 0 });
            }
        }

        while let Some(current) = open.pop() {
            let ci = current.idx;
            if current.f > out[ci] {
                continue;
            }
            for link in &self.regions[ci - 1].links {
                let ni = link.to as usize;
                let tentative = current.f + link.weight;
                if tentative < out[ni] {
                    out[ni] = tentative;
                    open.push(NodeRef {
                        idx: ni,
                        f: tentative,
                    });
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Build passes
    // -----------------------------------------------------------------------

    fn label_sections(&mut self, grid: &CostGrid) {
        let size = self.section_size;
        let mut stack: Vec<Cell> = Vec::new();
        let mut z0 = self.bounds.min.z;
        while z0 < self.bounds.max.z {
            let mut x0 = self.bounds.min.x;
            while x0 < self.bounds.max.x {
                let section = CellRect::new(x0, z0, x0 + size, z0 + size).intersect(self.bounds);
                for start in section {
                    self.flood_section(grid, section, start, &mut stack);
                }
                x0 += size;
            }
            z0 += size;
        }
    }

    /// Label `start` and everything connected to it inside `section`.
    fn flood_section(&mut self, grid: &CostGrid, section: CellRect, start: Cell, stack: &mut Vec<Cell>) {
        let Some(si) = self.idx(start) else {
            return;
        };
        if self.ids[si] != REGION_UNREGISTERED {
            return;
        }
        if !grid.passable(start) {
            self.ids[si] = REGION_IMPASSABLE;
            return;
        }

        let id = self.regions.len() as i32 + 1;
        self.ids[si] = id;
        stack.clear();
        stack.push(start);

        let mut members: Vec<Cell> = Vec::new();
        let (mut sum_x, mut sum_z) = (0i64, 0i64);
        let (mut min, mut max) = (start, start);

        while let Some(c) = stack.pop() {
            members.push(c);
            sum_x += c.x as i64;
            sum_z += c.z as i64;
            min = Cell::new(min.x.min(c.x), min.z.min(c.z));
            max = Cell::new(max.x.max(c.x), max.z.max(c.z));

            for dir in Dir8::ALL {
                let n = c.step(dir);
                if !section.contains(n) || !step_allowed(grid, c, dir) {
                    continue;
                }
                if let Some(ni) = self.idx(n) {
                    if self.ids[ni] == REGION_UNREGISTERED {
                        self.ids[ni] = id;
                        stack.push(n);
                    }
                }
            }
        }

        let count = members.len() as i64;
        let centroid = Cell::new((sum_x / count) as i32, (sum_z / count) as i32);
        let center = members
            .iter()
            .copied()
            .min_by_key(|m| (m.chebyshev(centroid), m.manhattan(centroid)))
            .unwrap_or(start);

        self.regions.push(Region {
            id,
            bounds: CellRect::new(min.x, min.z, max.x + 1, max.z + 1),
            cell_count: members.len(),
            center,
            component: 0,
            links: Vec::new(),
        });
    }

    fn link_regions(&mut self, grid: &CostGrid) {
        let mut seen: HashSet<(i32, i32)> = HashSet::new();
        for c in self.bounds {
            let a = self.region_id(c);
            if a <= 0 {
                continue;
            }
            for dir in Dir8::ALL {
                let b = self.region_id(c.step(dir));
                if b <= 0 || b == a || !step_allowed(grid, c, dir) {
                    continue;
                }
                if seen.insert((a, b)) {
                    let weight = octile_units(self.regions[(a - 1) as usize].center, self.regions[(b - 1) as usize].center);
                    self.regions[(a - 1) as usize].links.push(RegionLink { to: b, weight });
                }
            }
        }
    }

    fn label_components(&mut self) {
        let n = self.regions.len();
        let mut labels: Vec<Option<u32>> = vec![None; n];
        let mut stack: Vec<usize> = Vec::new();
        let mut next: u32 = 0;

        for start in 0..n {
            if labels[start].is_some() {
                continue;
            }
            labels[start] = Some(next);
            stack.clear();
            stack.push(start);
            while let Some(ri) = stack.pop() {
                for link in &self.regions[ri].links {
                    let ni = (link.to - 1) as usize;
                    if labels[ni].is_none() {
                        labels[ni] = Some(next);
                        stack.push(ni);
                    }
                }
            }
            next += 1;
        }

        for (region, label) in self.regions.iter_mut().zip(labels) {
            region.component = label.unwrap_or(0);
        }
        self.components = next;
    }

    #[inline]
    fn idx(&self, c: Cell) -> Option<usize> {
        if !self.bounds.contains(c) {
            return None;
        }
        let x = (c.x - self.bounds.min.x) as usize;
        let z = (c.z - self.bounds.min.z) as usize;
        Some(z * self.width + x)
    }
}
