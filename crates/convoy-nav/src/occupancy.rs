//! Who stands where, and a [`FollowerHost`] over a [`MapPathing`].

use std::collections::BTreeMap;

use convoy_core::{CancelToken, Cell, CellRect, Footprint, IMPASSABLE, ProfileId};
use convoy_paths::{Path, PathRequest};

use crate::follower::{FollowerHost, PathFollower};
use crate::pathing::{MapPathing, Urgency};
use crate::worker::Ticket;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AgentId(pub u32);

/// Physical bulk of an agent, for impacts.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Body {
    pub mass: f32,
    pub size: f32,
}

impl Default for Body {
    fn default() -> Self {
        Self { mass: 1.0, size: 1.0 }
    }
}

/// What a follower sees of another agent in its way.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Occupant {
    pub id: AgentId,
    /// Footprint at the cell it stands on.
    pub rect: CellRect,
    pub moving: bool,
    pub waiting: bool,
    /// Steps aside on its own; never blocks.
    pub yielding: bool,
    pub body: Body,
    pub speed: f32,
}

#[derive(Clone, Debug)]
struct Entry {
    cell: Cell,
    rects: Vec<CellRect>,
    occupant: Occupant,
}

/// Footprints currently claimed by agents on one map.
#[derive(Clone, Debug, Default)]
pub struct Occupancy {
    entries: BTreeMap<AgentId, Entry>,
}

impl Occupancy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `occupant` standing at `cell` and claiming `rects`.
    pub fn set(&mut self, occupant: Occupant, cell: Cell, rects: impl IntoIterator<Item = CellRect>) {
        self.entries.insert(
            occupant.id,
            Entry {
                cell,
                rects: rects.into_iter().collect(),
                occupant,
            },
        );
    }

    /// Refresh a follower's claim from its current state.
    pub fn update(&mut self, follower: &PathFollower) {
        let (here, next) = follower.occupied_rects();
        self.set(follower.occupant(), follower.position(), std::iter::once(here).chain(next));
    }

    pub fn remove(&mut self, id: AgentId) {
        self.entries.remove(&id);
    }

    pub fn position(&self, id: AgentId) -> Option<Cell> {
        self.entries.get(&id).map(|e| e.cell)
    }

    /// First agent other than `me` claiming a cell of `rect`.
    pub fn blocker(&self, me: AgentId, rect: CellRect) -> Option<Occupant> {
        self.entries
            .values()
            .filter(|e| e.occupant.id != me)
            .find(|e| e.rects.iter().any(|r| !r.intersect(rect).is_empty()))
            .map(|e| e.occupant)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// [`FollowerHost`] backed by a map's routing context and its occupancy.
pub struct NavHost<'a> {
    map: &'a mut MapPathing,
    occupancy: &'a Occupancy,
}

impl<'a> NavHost<'a> {
    pub fn new(map: &'a mut MapPathing, occupancy: &'a Occupancy) -> Self {
        Self { map, occupancy }
    }
}

impl FollowerHost for NavHost<'_> {
    fn bounds(&self) -> CellRect {
        self.map.terrain().bounds()
    }

    fn standable(&self, profile: ProfileId, footprint: Footprint, root: Cell) -> bool {
        let rect = footprint.rect_at(root);
        match self.map.cost_grid(profile) {
            Some(grid) => grid.rect_passable(rect),
            None => {
                let Some(p) = self.map.profiles().get(profile) else {
                    return false;
                };
                let terrain = self.map.terrain();
                terrain.bounds().contains_rect(rect)
                    && rect.iter().all(|c| terrain.cell_cost(p, c) != IMPASSABLE)
            }
        }
    }

    fn clearable(&self, profile: ProfileId, footprint: Footprint, root: Cell) -> bool {
        let Some(p) = self.map.profiles().get(profile) else {
            return false;
        };
        if !p.mobility.can_destroy_obstacles {
            return self.standable(profile, footprint, root);
        }
        let rect = footprint.rect_at(root);
        let terrain = self.map.terrain();
        let passable = |c: Cell| match self.map.cost_grid(profile) {
            Some(grid) => grid.passable(c),
            None => terrain.cell_cost(p, c) != IMPASSABLE,
        };
        terrain.bounds().contains_rect(rect)
            && rect.iter().all(|c| passable(c) || terrain.obstacle_at(c).is_some())
    }

    fn step_cost(&self, profile: ProfileId, from: Cell, to: Cell) -> i32 {
        let Some(p) = self.map.profiles().get(profile) else {
            return 1;
        };
        let base = if from.x != to.x && from.z != to.z {
            p.rules.diagonal_cost
        } else {
            p.rules.cardinal_cost
        };
        let extra = match self.map.cost_grid(profile) {
            Some(grid) => grid.cost(to),
            None => self.map.terrain().cell_cost(p, to),
        };
        base + extra.max(0)
    }

    fn occupant(&self, me: AgentId, rect: CellRect) -> Option<Occupant> {
        self.occupancy.blocker(me, rect)
    }

    fn reachable(&self, profile: ProfileId, from: Cell, to: Cell) -> Option<bool> {
        self.map.reachable(profile, from, to)
    }

    fn agent_cell(&self, agent: AgentId) -> Option<Cell> {
        self.occupancy.position(agent)
    }

    fn request_path(&mut self, request: PathRequest, cancel: CancelToken) -> Ticket {
        if !self.map.grids_ready(request.profile) {
            self.map.request_grids_for(request.profile, Urgency::Urgent);
        }
        self.map.find_path_async(request, cancel)
    }

    fn recycle(&mut self, path: Path) {
        self.map.recycle_path(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn occ(id: u32, moving: bool) -> Occupant {
        Occupant {
            id: AgentId(id),
            rect: CellRect::default(),
            moving,
            waiting: false,
            yielding: false,
            body: Body::default(),
            speed: 0.0,
        }
    }

    #[test]
    fn blockers_ignore_self() {
        let mut o = Occupancy::new();
        o.set(occ(1, false), Cell::new(2, 2), [CellRect::single(Cell::new(2, 2))]);
        o.set(occ(2, true), Cell::new(5, 2), [CellRect::new(4, 1, 7, 4)]);
        assert_eq!(o.blocker(AgentId(1), CellRect::single(Cell::new(2, 2))), None);
        assert_eq!(o.blocker(AgentId(3), CellRect::single(Cell::new(2, 2))).map(|b| b.id), Some(AgentId(1)));
        assert_eq!(o.blocker(AgentId(1), CellRect::new(6, 3, 9, 9)).map(|b| b.id), Some(AgentId(2)));
        assert_eq!(o.position(AgentId(2)), Some(Cell::new(5, 2)));
        o.remove(AgentId(2));
        assert_eq!(o.len(), 1);
        assert_eq!(o.blocker(AgentId(1), CellRect::new(6, 3, 9, 9)), None);
    }
}
