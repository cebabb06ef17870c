//! Per-agent path consumption.
//!
//! A [`PathFollower`] walks its agent along a [`Path`] one cell at a time,
//! paying each transition's cost down by a fixed budget per tick. At every
//! cell boundary it decides whether the current path still holds, whether
//! to wait for another agent, or whether to ask for a new route.

use convoy_core::{
    CancelToken, Cell, CellRect, Dir8, FactionId, Footprint, FollowerConfig, ProfileId, Rot4,
    VehicleProfile,
};
use convoy_paths::{Destination, EndMode, Path, PathError, PathRequest};

use crate::collision;
use crate::occupancy::{AgentId, Body, Occupant};
use crate::worker::Ticket;

/// What a follower needs from the map it walks on.
pub trait FollowerHost {
    fn bounds(&self) -> CellRect;

    /// Whether a footprint rooted at `root` fits on passable cells.
    fn standable(&self, profile: ProfileId, footprint: Footprint, root: Cell) -> bool;

    /// Like [`standable`](Self::standable), with destructible obstacles
    /// counting as open for profiles that can break through them.
    fn clearable(&self, profile: ProfileId, footprint: Footprint, root: Cell) -> bool;

    /// Ticks needed to move from `from` to the adjacent `to`.
    fn step_cost(&self, profile: ProfileId, from: Cell, to: Cell) -> i32;

    /// Another agent claiming a cell of `rect`.
    fn occupant(&self, me: AgentId, rect: CellRect) -> Option<Occupant>;

    /// Cheap connectivity answer, or `None` when it is unknown.
    fn reachable(&self, profile: ProfileId, from: Cell, to: Cell) -> Option<bool>;

    fn agent_cell(&self, agent: AgentId) -> Option<Cell>;

    /// Start a search; the result comes back through
    /// [`PathFollower::deliver`].
    fn request_path(&mut self, request: PathRequest, cancel: CancelToken) -> Ticket;

    /// Take back a path the follower is done with.
    fn recycle(&mut self, _path: Path) {}
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FollowState {
    Idle,
    Moving,
    Waiting { ticks_left: u32 },
    Calculating,
}

/// Where a follower is heading.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PathTarget {
    Place(Destination),
    /// Another agent, tracked as it moves.
    Agent { id: AgentId, mode: EndMode },
}

impl From<Destination> for PathTarget {
    fn from(d: Destination) -> Self {
        PathTarget::Place(d)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum FollowerEvent {
    Started { destination: Destination },
    Stopped,
    Arrived { cell: Cell },
    Failed { error: PathError },
    Collided { other: AgentId, dealt: f32, taken: f32 },
    Relocated { from: Cell, to: Cell },
}

/// Outcome of [`PathFollower::need_new_path`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Keep following the current path.
    Proceed,
    /// Hold position for a while.
    Wait,
    /// Ask for a new route.
    NeedNew,
    /// A request is already in flight.
    Pending,
}

/// The persisted part of a follower. Paths are derived data and are
/// searched again after loading.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FollowerSave {
    pub moving: bool,
    pub next_cell: Option<Cell>,
    pub cost_left: i32,
    pub destination: Option<Destination>,
    pub end_rotation: Option<Rot4>,
}

pub struct PathFollower {
    id: AgentId,
    profile: ProfileId,
    footprint: Footprint,
    faction: Option<FactionId>,
    config: FollowerConfig,
    body: Body,
    tick_budget: i32,
    yielding: bool,
    destroy_obstacles: bool,

    state: FollowState,
    position: Cell,
    rotation: Rot4,
    next_cell: Option<Cell>,
    cost_left: i32,
    cost_total: i32,
    target: Option<PathTarget>,
    destination: Option<Destination>,
    target_seen_at: Option<Cell>,
    end_rotation: Option<Rot4>,
    path: Option<Path>,
    pending: Option<(Ticket, CancelToken)>,
    /// Rect of a stationary blocker the next search must route around.
    detour: Option<CellRect>,
    detour_pending: bool,
    consecutive_waits: u32,
    blocked_replans: u32,
    momentum: bool,
    replans: u32,
    last_decision: Option<Decision>,
    events: Vec<FollowerEvent>,
}

impl PathFollower {
    /// A follower standing at `position`. It pays one cardinal step per
    /// tick unless [`with_tick_budget`](Self::with_tick_budget) says
    /// otherwise.
    pub fn new(id: AgentId, profile: &VehicleProfile, position: Cell, config: FollowerConfig) -> Self {
        Self {
            id,
            profile: profile.id,
            footprint: profile.footprint,
            faction: None,
            config,
            body: Body::default(),
            tick_budget: profile.rules.cardinal_cost.max(1),
            yielding: false,
            destroy_obstacles: false,
            state: FollowState::Idle,
            position,
            rotation: Rot4::default(),
            next_cell: None,
            cost_left: 0,
            cost_total: 0,
            target: None,
            destination: None,
            target_seen_at: None,
            end_rotation: None,
            path: None,
            pending: None,
            detour: None,
            detour_pending: false,
            consecutive_waits: 0,
            blocked_replans: 0,
            momentum: false,
            replans: 0,
            last_decision: None,
            events: Vec::new(),
        }
    }

    pub fn with_faction(mut self, faction: FactionId) -> Self {
        self.faction = Some(faction);
        self
    }

    pub fn with_tick_budget(mut self, budget: i32) -> Self {
        self.tick_budget = budget.max(1);
        self
    }

    pub fn with_body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    /// Yielding agents never block others.
    pub fn yielding(mut self, yielding: bool) -> Self {
        self.yielding = yielding;
        self
    }

    pub fn destroying_obstacles(mut self, destroy: bool) -> Self {
        self.destroy_obstacles = destroy;
        self
    }

    /// Rebuild a follower from saved fields. A moving follower finishes the
    /// step it was on, then searches again.
    pub fn restore(
        id: AgentId,
        profile: &VehicleProfile,
        position: Cell,
        config: FollowerConfig,
        save: &FollowerSave,
    ) -> Self {
        let mut f = Self::new(id, profile, position, config);
        f.end_rotation = save.end_rotation;
        if let (true, Some(destination)) = (save.moving, save.destination) {
            f.state = FollowState::Moving;
            f.target = Some(PathTarget::Place(destination));
            f.destination = Some(destination);
            if let Some(next) = save.next_cell {
                f.next_cell = Some(next);
                f.cost_left = save.cost_left.max(0);
                f.cost_total = f.cost_left;
            }
        }
        f
    }

    pub fn save(&self) -> FollowerSave {
        FollowerSave {
            moving: self.state != FollowState::Idle,
            next_cell: self.next_cell,
            cost_left: self.cost_left,
            destination: self.destination,
            end_rotation: self.end_rotation,
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    #[inline]
    pub fn id(&self) -> AgentId {
        self.id
    }

    #[inline]
    pub fn profile(&self) -> ProfileId {
        self.profile
    }

    #[inline]
    pub fn position(&self) -> Cell {
        self.position
    }

    #[inline]
    pub fn rotation(&self) -> Rot4 {
        self.rotation
    }

    #[inline]
    pub fn state(&self) -> FollowState {
        self.state
    }

    #[inline]
    pub fn is_moving(&self) -> bool {
        self.state != FollowState::Idle
    }

    #[inline]
    pub fn is_waiting(&self) -> bool {
        matches!(self.state, FollowState::Waiting { .. })
    }

    #[inline]
    pub fn next_cell(&self) -> Option<Cell> {
        self.next_cell
    }

    #[inline]
    pub fn destination(&self) -> Option<Destination> {
        self.destination
    }

    #[inline]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_ref()
    }

    pub fn pending_ticket(&self) -> Option<Ticket> {
        self.pending.as_ref().map(|(t, _)| *t)
    }

    /// Searches requested so far.
    #[inline]
    pub fn replans(&self) -> u32 {
        self.replans
    }

    #[inline]
    pub fn last_decision(&self) -> Option<Decision> {
        self.last_decision
    }

    /// Cells per tick while under way.
    pub fn speed(&self) -> f32 {
        if self.state == FollowState::Moving && (self.momentum || self.next_cell.is_some()) {
            self.tick_budget as f32 / self.cost_total.max(1) as f32
        } else {
            0.0
        }
    }

    /// Footprint at the current cell and, mid-step, at the next one.
    pub fn occupied_rects(&self) -> (CellRect, Option<CellRect>) {
        (
            self.footprint.rect_at(self.position),
            self.next_cell.map(|c| self.footprint.rect_at(c)),
        )
    }

    /// How other followers see this one.
    pub fn occupant(&self) -> Occupant {
        Occupant {
            id: self.id,
            rect: self.footprint.rect_at(self.position),
            moving: self.is_moving(),
            waiting: self.is_waiting(),
            yielding: self.yielding,
            body: self.body,
            speed: self.speed(),
        }
    }

    pub fn drain_events(&mut self) -> Vec<FollowerEvent> {
        std::mem::take(&mut self.events)
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    /// Head for `target`, facing `end_rotation` on arrival. Returns `false`
    /// when the follower cannot start.
    pub fn start_path<H>(&mut self, host: &mut H, target: impl Into<PathTarget>, end_rotation: Option<Rot4>) -> bool
    where
        H: FollowerHost + ?Sized,
    {
        let target = target.into();
        self.cancel_pending();
        self.drop_path(host);

        if self.next_cell.is_none() && !host.standable(self.profile, self.footprint, self.position) {
            match self.nearest_standable(host, self.position, false) {
                Some(to) => {
                    log::debug!("agent {:?} relocated from {} to {}", self.id, self.position, to);
                    self.events.push(FollowerEvent::Relocated {
                        from: self.position,
                        to,
                    });
                    self.position = to;
                }
                None => return self.fail(host, PathError::InvalidStart(self.position)),
            }
        }

        self.target = Some(target);
        self.end_rotation = end_rotation;
        self.consecutive_waits = 0;
        self.blocked_replans = 0;
        self.detour = None;
        let Some(destination) = self.resolve_target(host) else {
            return self.fail(host, PathError::InvalidDestination(CellRect::single(self.position)));
        };
        self.events.push(FollowerEvent::Started { destination });
        self.set_state(FollowState::Moving);
        if self.next_cell.is_none() {
            self.request_path(host);
        }
        true
    }

    /// Stop where it stands and forget the route.
    pub fn stop_dead(&mut self) {
        self.cancel_pending();
        self.path = None;
        self.next_cell = None;
        self.cost_left = 0;
        self.target = None;
        self.destination = None;
        self.momentum = false;
        self.set_state(FollowState::Idle);
        self.events.push(FollowerEvent::Stopped);
    }

    /// The agent was moved by something else. A moving follower searches
    /// again from the new cell.
    pub fn notify_teleported(&mut self, cell: Cell) {
        self.cancel_pending();
        self.path = None;
        self.next_cell = None;
        self.cost_left = 0;
        self.momentum = false;
        self.position = cell;
        if self.state != FollowState::Idle {
            self.set_state(FollowState::Moving);
        }
    }

    /// Hand over a search result. Returns `false` for tickets this follower
    /// is no longer waiting on.
    pub fn deliver<H>(&mut self, host: &mut H, ticket: Ticket, result: Result<Path, PathError>) -> bool
    where
        H: FollowerHost + ?Sized,
    {
        match &self.pending {
            Some((t, _)) if *t == ticket => {}
            _ => {
                if let Ok(path) = result {
                    host.recycle(path);
                }
                return false;
            }
        }
        self.pending = None;
        let detoured = std::mem::take(&mut self.detour_pending);
        match result {
            Err(error @ (PathError::NoRoute { .. } | PathError::Exhausted { .. })) if detoured => {
                self.blocked_replans += 1;
                if self.blocked_replans > self.config.max_blocked_replans {
                    self.fail(host, error);
                } else {
                    log::trace!(
                        "agent {:?} found no way around a blocker ({} in a row)",
                        self.id,
                        self.blocked_replans
                    );
                    self.request_path(host);
                }
            }
            Ok(mut path) => {
                if path.peek(0) == Some(self.position) {
                    path.consume_next_node();
                }
                self.path = Some(path);
                self.set_state(FollowState::Moving);
            }
            Err(PathError::Cancelled) => self.stop_dead(),
            Err(error) => {
                self.fail(host, error);
            }
        }
        true
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    pub fn tick<H>(&mut self, host: &mut H)
    where
        H: FollowerHost + ?Sized,
    {
        match self.state {
            FollowState::Idle | FollowState::Calculating => return,
            FollowState::Waiting { ticks_left } if ticks_left > 1 => {
                self.state = FollowState::Waiting {
                    ticks_left: ticks_left - 1,
                };
                return;
            }
            FollowState::Waiting { .. } => self.set_state(FollowState::Moving),
            FollowState::Moving => {}
        }

        if let Some(next) = self.next_cell {
            self.cost_left -= self.tick_budget;
            if self.cost_left > 0 {
                return;
            }
            self.position = next;
            self.next_cell = None;
            self.cost_left = 0;
            self.momentum = true;
        }
        self.at_cell(host);
    }

    fn at_cell<H>(&mut self, host: &mut H)
    where
        H: FollowerHost + ?Sized,
    {
        if self
            .destination
            .is_some_and(|d| d.accepts(self.position, self.footprint))
        {
            self.arrive(host);
            return;
        }

        if self.momentum {
            self.check_impact(host);
        }

        let decision = self.need_new_path(host);
        self.last_decision = Some(decision);
        match decision {
            Decision::Proceed => self.begin_step(host),
            Decision::Wait => self.begin_wait(host),
            Decision::NeedNew => self.request_path(host),
            Decision::Pending => self.set_state(FollowState::Calculating),
        }
    }

    /// Whether the current path still holds, checked in order: a request in
    /// flight, a missing or unusable path, a parked agent on the
    /// destination, lost reachability near the end, a stale heuristic
    /// route, a followed target that moved too far, and blockers in the
    /// lookahead window.
    pub fn need_new_path<H>(&mut self, host: &H) -> Decision
    where
        H: FollowerHost + ?Sized,
    {
        if self.pending.is_some() {
            return Decision::Pending;
        }
        self.detour = None;

        let bounds = host.bounds();
        let (Some(path), Some(destination)) = (self.path.as_ref(), self.destination) else {
            return Decision::NeedNew;
        };
        if !path.found() || path.is_exhausted() {
            return Decision::NeedNew;
        }
        let Some(end) = path.destination_cell().filter(|&c| bounds.contains(c)) else {
            return Decision::NeedNew;
        };
        match path.peek(0) {
            Some(next) if bounds.contains(next) && next.is_adjacent(self.position) => {}
            _ => return Decision::NeedNew,
        }

        // A parked agent on the end cell: an area routes to another of its
        // cells; otherwise pick the nearest free cell instead.
        if destination.mode != EndMode::Touch {
            if let Some(other) = host.occupant(self.id, self.footprint.rect_at(end)) {
                if !other.moving && !other.yielding {
                    if destination.mode == EndMode::AnyCellInRect
                        && destination.rect.iter().any(|c| !other.rect.contains(c))
                    {
                        self.detour = Some(other.rect);
                        return Decision::NeedNew;
                    }
                    return match self.nearest_standable(host, end, true) {
                        Some(cell) => {
                            let retarget = destination.translated(cell - end);
                            log::trace!("agent {:?} retargets from {} to {}", self.id, end, cell);
                            self.target = Some(PathTarget::Place(retarget));
                            self.destination = Some(retarget);
                            Decision::NeedNew
                        }
                        None => Decision::Wait,
                    };
                }
            }
        }

        let window = self.config.recheck_window;
        if (path.nodes_left() as i32 <= window || self.position.chebyshev(destination.anchor()) <= window)
            && host.reachable(self.profile, self.position, end) == Some(false)
        {
            return Decision::NeedNew;
        }

        if path.used_region_heuristic() && path.nodes_consumed() >= self.config.stale_heuristic_nodes {
            return Decision::NeedNew;
        }

        if let Some(PathTarget::Agent { id, .. }) = self.target {
            let Some(now) = host.agent_cell(id) else {
                return Decision::NeedNew;
            };
            if let Some(seen) = self.target_seen_at {
                let distance = self.position.chebyshev(now);
                let threshold = self
                    .footprint
                    .max_side()
                    .max(distance * self.config.repath_distance_percent / 100);
                if now.chebyshev(seen) > threshold {
                    return Decision::NeedNew;
                }
            }
        }

        let span = self.config.lookahead_nodes + self.footprint.max_side() as usize;
        for i in 0..span {
            let Some(c) = path.peek(i) else {
                break;
            };
            let fits = if self.destroy_obstacles {
                host.clearable(self.profile, self.footprint, c)
            } else {
                host.standable(self.profile, self.footprint, c)
            };
            if !fits {
                return Decision::NeedNew;
            }
            if let Some(other) = host.occupant(self.id, self.footprint.rect_at(c)) {
                if !other.yielding {
                    if other.moving && !other.waiting {
                        return Decision::Wait;
                    }
                    self.detour = Some(other.rect);
                    return Decision::NeedNew;
                }
            }
        }
        Decision::Proceed
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    fn set_state(&mut self, state: FollowState) {
        if self.state != state {
            log::trace!("agent {:?}: {:?} -> {:?}", self.id, self.state, state);
            self.state = state;
        }
    }

    fn begin_step<H>(&mut self, host: &mut H)
    where
        H: FollowerHost + ?Sized,
    {
        let Some(next) = self.path.as_mut().and_then(Path::consume_next_node) else {
            self.request_path(host);
            return;
        };
        if let Some(dir) = Dir8::between(self.position, next) {
            self.rotation = Rot4::from_dir(dir);
        }
        let cost = host.step_cost(self.profile, self.position, next).max(1);
        self.cost_total = cost;
        self.cost_left = cost;
        self.next_cell = Some(next);
        self.consecutive_waits = 0;
        self.blocked_replans = 0;
    }

    fn begin_wait<H>(&mut self, host: &mut H)
    where
        H: FollowerHost + ?Sized,
    {
        self.consecutive_waits += 1;
        self.momentum = false;
        if self.consecutive_waits > self.config.max_consecutive_waits {
            self.consecutive_waits = 0;
            self.last_decision = Some(Decision::NeedNew);
            self.request_path(host);
            return;
        }
        self.set_state(FollowState::Waiting {
            ticks_left: self.config.wait_ticks.max(1),
        });
    }

    fn request_path<H>(&mut self, host: &mut H)
    where
        H: FollowerHost + ?Sized,
    {
        self.cancel_pending();
        self.drop_path(host);
        let Some(destination) = self.resolve_target(host) else {
            self.fail(host, PathError::InvalidDestination(CellRect::single(self.position)));
            return;
        };
        let start = self.next_cell.unwrap_or(self.position);
        let mut request = PathRequest::new(self.profile, start, destination);
        request.faction = self.faction;
        request.destroy_obstacles = self.destroy_obstacles;
        request.avoid = self.detour.take();
        self.detour_pending = request.avoid.is_some();

        let cancel = CancelToken::new();
        let ticket = host.request_path(request, cancel.clone());
        self.pending = Some((ticket, cancel));
        self.replans += 1;
        self.momentum = false;
        self.set_state(FollowState::Calculating);
    }

    /// Current destination, refreshed from a followed agent's position.
    fn resolve_target<H>(&mut self, host: &H) -> Option<Destination>
    where
        H: FollowerHost + ?Sized,
    {
        let destination = match self.target? {
            PathTarget::Place(d) => d,
            PathTarget::Agent { id, mode } => {
                let cell = host.agent_cell(id)?;
                self.target_seen_at = Some(cell);
                Destination {
                    rect: CellRect::single(cell),
                    mode,
                }
            }
        };
        self.destination = Some(destination);
        Some(destination)
    }

    fn arrive<H>(&mut self, host: &mut H)
    where
        H: FollowerHost + ?Sized,
    {
        self.cancel_pending();
        self.drop_path(host);
        if let Some(r) = self.end_rotation {
            self.rotation = r;
        }
        self.target = None;
        self.destination = None;
        self.momentum = false;
        self.set_state(FollowState::Idle);
        self.events.push(FollowerEvent::Arrived { cell: self.position });
    }

    fn fail<H>(&mut self, host: &mut H, error: PathError) -> bool
    where
        H: FollowerHost + ?Sized,
    {
        log::debug!("agent {:?} failed to follow: {error}", self.id);
        self.cancel_pending();
        self.drop_path(host);
        self.next_cell = None;
        self.cost_left = 0;
        self.target = None;
        self.destination = None;
        self.momentum = false;
        self.set_state(FollowState::Idle);
        self.events.push(FollowerEvent::Failed { error });
        false
    }

    fn check_impact<H>(&mut self, host: &H)
    where
        H: FollowerHost + ?Sized,
    {
        let Some(next) = self.path.as_ref().and_then(|p| p.peek(0)) else {
            return;
        };
        let Some(other) = host.occupant(self.id, self.footprint.rect_at(next)) else {
            return;
        };
        if other.yielding {
            return;
        }
        if let Some(hit) = collision::impact(&self.config.collision, self.body, self.speed(), &other) {
            log::debug!("agent {:?} ran into {:?}", self.id, other.id);
            self.events.push(FollowerEvent::Collided {
                other: other.id,
                dealt: hit.dealt,
                taken: hit.taken,
            });
        }
    }

    fn cancel_pending(&mut self) {
        self.detour_pending = false;
        if let Some((_, cancel)) = self.pending.take() {
            cancel.cancel();
        }
    }

    fn drop_path<H>(&mut self, host: &mut H)
    where
        H: FollowerHost + ?Sized,
    {
        if let Some(path) = self.path.take() {
            host.recycle(path);
        }
    }

    /// Closest cell within `relocate_radius` of `around` where the
    /// footprint fits, and optionally no other agent stands.
    fn nearest_standable<H>(&self, host: &H, around: Cell, free: bool) -> Option<Cell>
    where
        H: FollowerHost + ?Sized,
    {
        let bounds = host.bounds();
        for r in 1..=self.config.relocate_radius {
            let ring = CellRect::new(around.x - r, around.z - r, around.x + r + 1, around.z + r + 1);
            let found = ring
                .iter()
                .filter(|c| c.chebyshev(around) == r && bounds.contains(*c))
                .filter(|&c| host.standable(self.profile, self.footprint, c))
                .filter(|&c| !free || host.occupant(self.id, self.footprint.rect_at(c)).is_none())
                .min_by_key(|c| c.manhattan(around));
            if found.is_some() {
                return found;
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convoy_core::{CollisionConfig, IMPASSABLE, ProfileSet, SearchConfig};
    use convoy_paths::{CostGrid, MapTerrain, PathGrids, Pathfinder, RegionData};
    use std::collections::HashSet;

    struct Rows {
        bounds: CellRect,
        blocked: HashSet<Cell>,
        obstacles: HashSet<Cell>,
    }

    impl MapTerrain for Rows {
        fn bounds(&self) -> CellRect {
            self.bounds
        }

        fn cell_cost(&self, _profile: &VehicleProfile, c: Cell) -> i32 {
            if self.blocked.contains(&c) { IMPASSABLE } else { 0 }
        }

        fn obstacle_at(&self, c: Cell) -> Option<i32> {
            self.obstacles.contains(&c).then_some(50)
        }
    }

    /// Synchronous host: searches run inside `request_path` and wait in
    /// `outbox` until the test delivers them.
    struct TestHost {
        profiles: ProfileSet,
        terrain: Rows,
        cost: CostGrid,
        regions: RegionData,
        finder: Pathfinder,
        occupants: Vec<(CellRect, Occupant)>,
        agents: Vec<(AgentId, Cell)>,
        outbox: Vec<(Ticket, Result<Path, PathError>)>,
        next: u64,
        recycled: usize,
    }

    impl TestHost {
        fn new(rows: &[&str], search: SearchConfig) -> Self {
            let depth = rows.len() as i32;
            let mut blocked = HashSet::new();
            for (r, row) in rows.iter().enumerate() {
                for (x, ch) in row.chars().enumerate() {
                    if ch == '#' {
                        blocked.insert(Cell::new(x as i32, depth - 1 - r as i32));
                    }
                }
            }
            let terrain = Rows {
                bounds: CellRect::new(0, 0, rows[0].len() as i32, depth),
                blocked,
                obstacles: HashSet::new(),
            };
            let mut profiles = ProfileSet::new();
            profiles.register(VehicleProfile::builder("cart")).unwrap();
            let cost = CostGrid::build(&terrain, &profiles[ProfileId(0)]);
            let regions = RegionData::build(ProfileId(0), &cost, 16);
            Self {
                profiles,
                terrain,
                cost,
                regions,
                finder: Pathfinder::new(search),
                occupants: Vec::new(),
                agents: Vec::new(),
                outbox: Vec::new(),
                next: 1,
                recycled: 0,
            }
        }

        fn open(width: usize, depth: usize) -> Self {
            let rows = vec![".".repeat(width); depth];
            let rows: Vec<&str> = rows.iter().map(String::as_str).collect();
            Self::new(&rows, SearchConfig::default())
        }

        fn profile(&self) -> &VehicleProfile {
            &self.profiles[ProfileId(0)]
        }

        fn park(&mut self, id: u32, cell: Cell, moving: bool) {
            self.occupants.push((
                CellRect::single(cell),
                Occupant {
                    id: AgentId(id),
                    rect: CellRect::single(cell),
                    moving,
                    waiting: false,
                    yielding: false,
                    body: Body::default(),
                    speed: if moving { 1.0 } else { 0.0 },
                },
            ));
        }

        fn flush(&mut self, f: &mut PathFollower) {
            let outbox = std::mem::take(&mut self.outbox);
            for (ticket, result) in outbox {
                f.deliver(self, ticket, result);
            }
        }

        fn run(&mut self, f: &mut PathFollower, ticks: usize) {
            for _ in 0..ticks {
                self.flush(f);
                f.tick(self);
            }
        }
    }

    impl FollowerHost for TestHost {
        fn bounds(&self) -> CellRect {
            self.terrain.bounds
        }

        fn standable(&self, _profile: ProfileId, footprint: Footprint, root: Cell) -> bool {
            self.cost.rect_passable(footprint.rect_at(root))
        }

        fn clearable(&self, _profile: ProfileId, footprint: Footprint, root: Cell) -> bool {
            footprint
                .rect_at(root)
                .iter()
                .all(|c| self.cost.passable(c) || self.terrain.obstacles.contains(&c))
        }

        fn step_cost(&self, _profile: ProfileId, from: Cell, to: Cell) -> i32 {
            if from.x != to.x && from.z != to.z { 18 } else { 13 }
        }

        fn occupant(&self, me: AgentId, rect: CellRect) -> Option<Occupant> {
            self.occupants
                .iter()
                .find(|(r, o)| o.id != me && !r.intersect(rect).is_empty())
                .map(|(_, o)| *o)
        }

        fn reachable(&self, _profile: ProfileId, from: Cell, to: Cell) -> Option<bool> {
            Some(self.regions.reachable(from, to))
        }

        fn agent_cell(&self, agent: AgentId) -> Option<Cell> {
            self.agents.iter().find(|(id, _)| *id == agent).map(|(_, c)| *c)
        }

        fn request_path(&mut self, request: PathRequest, cancel: CancelToken) -> Ticket {
            let ticket = Ticket(self.next);
            self.next += 1;
            let grids = PathGrids {
                profile: &self.profiles[request.profile],
                cost: &self.cost,
                regions: Some(&self.regions),
                terrain: &self.terrain,
            };
            let result = self.finder.find_path(&request, &grids, &cancel);
            self.outbox.push((ticket, result));
            ticket
        }

        fn recycle(&mut self, path: Path) {
            self.recycled += 1;
            self.finder.path_pool().recycle(path);
        }
    }

    fn follower(host: &TestHost, at: Cell) -> PathFollower {
        PathFollower::new(AgentId(1), host.profile(), at, FollowerConfig::default())
    }

    #[test]
    fn walks_to_destination_and_snaps_rotation() {
        let mut host = TestHost::open(12, 5);
        let mut f = follower(&host, Cell::new(0, 2));
        assert!(f.start_path(&mut host, Destination::cell(Cell::new(6, 2)), Some(Rot4::South)));
        assert_eq!(f.state(), FollowState::Calculating);
        host.run(&mut f, 10);
        assert_eq!(f.position(), Cell::new(6, 2));
        assert_eq!(f.state(), FollowState::Idle);
        assert_eq!(f.rotation(), Rot4::South);
        let events = f.drain_events();
        assert!(matches!(events.first(), Some(FollowerEvent::Started { .. })));
        assert_eq!(events.last(), Some(&FollowerEvent::Arrived { cell: Cell::new(6, 2) }));
        assert!(host.recycled >= 1);
    }

    #[test]
    fn transition_cost_is_paid_before_moving() {
        let mut host = TestHost::open(12, 5);
        let mut f = follower(&host, Cell::new(0, 2)).with_tick_budget(5);
        f.start_path(&mut host, Destination::cell(Cell::new(3, 2)), None);
        host.flush(&mut f);
        f.tick(&mut host);
        assert_eq!(f.next_cell(), Some(Cell::new(1, 2)));
        f.tick(&mut host);
        f.tick(&mut host);
        assert_eq!(f.position(), Cell::new(0, 2));
        f.tick(&mut host);
        assert_eq!(f.position(), Cell::new(1, 2));
        assert_eq!(f.rotation(), Rot4::East);
    }

    #[test]
    fn relocates_off_impassable_start() {
        let mut host = TestHost::new(&["......", "..#...", "......"], SearchConfig::default());
        let mut f = follower(&host, Cell::new(2, 1));
        assert!(f.start_path(&mut host, Destination::cell(Cell::new(5, 1)), None));
        assert_ne!(f.position(), Cell::new(2, 1));
        assert_eq!(f.position().chebyshev(Cell::new(2, 1)), 1);
        assert!(matches!(f.drain_events()[0], FollowerEvent::Relocated { .. }));
    }

    #[test]
    fn start_fails_when_nothing_is_standable() {
        let mut host = TestHost::new(&["###", "###", "###"], SearchConfig::default());
        let mut f = follower(&host, Cell::new(1, 1));
        assert!(!f.start_path(&mut host, Destination::cell(Cell::new(0, 0)), None));
        assert_eq!(f.state(), FollowState::Idle);
        assert_eq!(
            f.drain_events(),
            vec![FollowerEvent::Failed {
                error: PathError::InvalidStart(Cell::new(1, 1))
            }]
        );
    }

    #[test]
    fn unreachable_destination_fails_hard() {
        let mut host = TestHost::new(&["..#..", "..#..", "..#.."], SearchConfig::default());
        let mut f = follower(&host, Cell::new(0, 1));
        f.start_path(&mut host, Destination::cell(Cell::new(4, 1)), None);
        host.flush(&mut f);
        assert_eq!(f.state(), FollowState::Idle);
        assert!(f.path().is_none());
        assert!(matches!(
            f.drain_events().last(),
            Some(FollowerEvent::Failed { error: PathError::NoRoute { .. } })
        ));
    }

    #[test]
    fn stale_tickets_are_ignored() {
        let mut host = TestHost::open(8, 3);
        let mut f = follower(&host, Cell::new(0, 1));
        f.start_path(&mut host, Destination::cell(Cell::new(5, 1)), None);
        let old = std::mem::take(&mut host.outbox);
        f.start_path(&mut host, Destination::cell(Cell::new(6, 1)), None);
        for (ticket, result) in old {
            assert!(!f.deliver(&mut host, ticket, result));
        }
        host.run(&mut f, 10);
        assert_eq!(f.position(), Cell::new(6, 1));
    }

    #[test]
    fn moving_blocker_means_wait() {
        let mut host = TestHost::open(12, 3);
        let mut f = follower(&host, Cell::new(0, 1));
        f.start_path(&mut host, Destination::cell(Cell::new(10, 1)), None);
        host.flush(&mut f);
        host.park(2, Cell::new(3, 1), true);
        f.tick(&mut host);
        assert_eq!(f.last_decision(), Some(Decision::Wait));
        assert!(f.is_waiting());
        assert_eq!(f.position(), Cell::new(0, 1));
    }

    #[test]
    fn parked_blocker_means_new_path() {
        let mut host = TestHost::open(12, 3);
        let mut f = follower(&host, Cell::new(0, 1));
        f.start_path(&mut host, Destination::cell(Cell::new(10, 1)), None);
        host.flush(&mut f);
        host.park(2, Cell::new(2, 1), false);
        f.tick(&mut host);
        assert_eq!(f.last_decision(), Some(Decision::NeedNew));
        assert_eq!(f.state(), FollowState::Calculating);
        assert_eq!(f.replans(), 2);

        // The new route goes around the parked agent.
        let mut visited = Vec::new();
        for _ in 0..30 {
            host.flush(&mut f);
            f.tick(&mut host);
            visited.push(f.position());
        }
        assert_eq!(f.position(), Cell::new(10, 1));
        assert_eq!(f.state(), FollowState::Idle);
        assert!(!visited.contains(&Cell::new(2, 1)));
        assert_eq!(f.replans(), 2);
    }

    #[test]
    fn no_way_around_a_parked_agent_gives_up() {
        let mut host = TestHost::new(&["..........."], SearchConfig::default());
        let config = FollowerConfig {
            max_blocked_replans: 2,
            ..FollowerConfig::default()
        };
        let mut f = PathFollower::new(AgentId(1), host.profile(), Cell::new(0, 0), config);
        f.start_path(&mut host, Destination::cell(Cell::new(10, 0)), None);
        host.park(2, Cell::new(4, 0), false);
        host.run(&mut f, 10);
        assert_eq!(f.state(), FollowState::Idle);
        assert_eq!(f.position(), Cell::new(0, 0));
        // One route, then three failed detours with a plain route between.
        assert_eq!(f.replans(), 6);
        assert!(matches!(
            f.drain_events().last(),
            Some(FollowerEvent::Failed { error: PathError::NoRoute { .. } })
        ));
    }

    #[test]
    fn yielding_agents_do_not_block() {
        let mut host = TestHost::open(12, 3);
        let mut f = follower(&host, Cell::new(0, 1));
        f.start_path(&mut host, Destination::cell(Cell::new(10, 1)), None);
        host.flush(&mut f);
        host.park(2, Cell::new(2, 1), false);
        host.occupants[0].1.yielding = true;
        f.tick(&mut host);
        assert_eq!(f.last_decision(), Some(Decision::Proceed));
    }

    #[test]
    fn too_many_waits_ask_for_new_path() {
        let mut host = TestHost::open(12, 3);
        let config = FollowerConfig {
            wait_ticks: 1,
            max_consecutive_waits: 2,
            ..FollowerConfig::default()
        };
        let mut f = PathFollower::new(AgentId(1), host.profile(), Cell::new(0, 1), config);
        f.start_path(&mut host, Destination::cell(Cell::new(10, 1)), None);
        host.flush(&mut f);
        host.park(2, Cell::new(3, 1), true);
        f.tick(&mut host);
        assert!(f.is_waiting());
        f.tick(&mut host);
        assert!(f.is_waiting());
        f.tick(&mut host);
        assert_eq!(f.state(), FollowState::Calculating);
        assert_eq!(f.last_decision(), Some(Decision::NeedNew));
    }

    #[test]
    fn parked_agent_on_destination_retargets() {
        let mut host = TestHost::open(12, 5);
        let mut f = follower(&host, Cell::new(0, 2));
        f.start_path(&mut host, Destination::cell(Cell::new(10, 2)), None);
        host.flush(&mut f);
        host.park(2, Cell::new(10, 2), false);
        f.tick(&mut host);
        let retarget = f.destination().unwrap().rect.min;
        assert_eq!(retarget.chebyshev(Cell::new(10, 2)), 1);
        assert_eq!(retarget.manhattan(Cell::new(10, 2)), 1);
        host.run(&mut f, 20);
        assert_eq!(f.position(), retarget);
    }

    #[test]
    fn parked_agent_in_area_routes_to_another_cell() {
        let mut host = TestHost::open(12, 5);
        let area = Destination::area(CellRect::new(8, 1, 11, 4));
        let mut f = follower(&host, Cell::new(0, 2));
        f.start_path(&mut host, area, None);
        host.flush(&mut f);
        let end = f.path().unwrap().destination_cell().unwrap();
        host.park(2, end, false);
        f.tick(&mut host);
        assert_eq!(f.last_decision(), Some(Decision::NeedNew));
        assert_eq!(f.destination(), Some(area));

        host.run(&mut f, 20);
        assert_eq!(f.state(), FollowState::Idle);
        assert!(area.rect.contains(f.position()));
        assert_ne!(f.position(), end);
        assert_eq!(f.replans(), 2);
    }

    #[test]
    fn obstacle_breakers_still_replan_at_walls() {
        let mut host = TestHost::open(12, 3);
        let mut f = follower(&host, Cell::new(0, 1)).destroying_obstacles(true);
        f.start_path(&mut host, Destination::cell(Cell::new(10, 1)), None);
        host.flush(&mut f);

        host.terrain.blocked.insert(Cell::new(3, 1));
        host.terrain.obstacles.insert(Cell::new(3, 1));
        host.cost = CostGrid::build(&host.terrain, &host.profiles[ProfileId(0)]);
        f.tick(&mut host);
        assert_eq!(f.last_decision(), Some(Decision::Proceed));

        // Same cell, now solid rock.
        host.terrain.obstacles.clear();
        f.tick(&mut host);
        assert_eq!(f.position(), Cell::new(1, 1));
        assert_eq!(f.last_decision(), Some(Decision::NeedNew));
    }

    #[test]
    fn heuristic_paths_go_stale() {
        let rows = vec![".".repeat(40); 40];
        let rows: Vec<&str> = rows.iter().map(String::as_str).collect();
        let search = SearchConfig {
            region_heuristic_threshold: 20,
            ..SearchConfig::default()
        };
        let mut host = TestHost::new(&rows, search);
        let config = FollowerConfig {
            stale_heuristic_nodes: 5,
            ..FollowerConfig::default()
        };
        let mut f = PathFollower::new(AgentId(1), host.profile(), Cell::new(0, 0), config);
        f.start_path(&mut host, Destination::cell(Cell::new(39, 39)), None);
        host.flush(&mut f);
        assert!(f.path().unwrap().used_region_heuristic());
        let mut replanned = false;
        for _ in 0..6 {
            f.tick(&mut host);
            if f.state() == FollowState::Calculating {
                replanned = true;
                break;
            }
        }
        assert!(replanned);
        assert_eq!(f.replans(), 2);
    }

    #[test]
    fn followed_target_drift_triggers_replan() {
        let mut host = TestHost::open(30, 5);
        host.agents.push((AgentId(7), Cell::new(20, 2)));
        let mut f = follower(&host, Cell::new(0, 2));
        f.start_path(
            &mut host,
            PathTarget::Agent {
                id: AgentId(7),
                mode: EndMode::Touch,
            },
            None,
        );
        host.flush(&mut f);
        f.tick(&mut host);
        assert_eq!(f.last_decision(), Some(Decision::Proceed));
        host.agents[0].1 = Cell::new(28, 2);
        f.tick(&mut host);
        assert_eq!(f.last_decision(), Some(Decision::NeedNew));
        assert_eq!(f.destination().unwrap().rect.min, Cell::new(28, 2));
    }

    #[test]
    fn lost_reachability_near_the_end() {
        let mut host = TestHost::open(6, 3);
        let mut f = follower(&host, Cell::new(0, 1));
        f.start_path(&mut host, Destination::cell(Cell::new(5, 1)), None);
        host.flush(&mut f);
        // Wall off the destination after the route was planned.
        for z in 0..3 {
            host.terrain.blocked.insert(Cell::new(4, z));
        }
        host.cost = CostGrid::build(&host.terrain, &host.profiles[ProfileId(0)]);
        host.regions = RegionData::build(ProfileId(0), &host.cost, 16);
        f.tick(&mut host);
        assert_eq!(f.last_decision(), Some(Decision::NeedNew));
        host.flush(&mut f);
        assert!(matches!(f.drain_events().last(), Some(FollowerEvent::Failed { .. })));
    }

    #[test]
    fn stop_and_teleport() {
        let mut host = TestHost::open(12, 3);
        let mut f = follower(&host, Cell::new(0, 1));
        f.start_path(&mut host, Destination::cell(Cell::new(10, 1)), None);
        host.flush(&mut f);
        f.tick(&mut host);
        f.notify_teleported(Cell::new(5, 1));
        assert_eq!(f.state(), FollowState::Moving);
        assert!(f.path().is_none());
        f.tick(&mut host);
        assert_eq!(f.state(), FollowState::Calculating);

        f.stop_dead();
        assert_eq!(f.state(), FollowState::Idle);
        assert_eq!(f.drain_events().last(), Some(&FollowerEvent::Stopped));
        // The cancelled search is no longer wanted.
        let (ticket, result) = host.outbox.pop().unwrap();
        assert!(!f.deliver(&mut host, ticket, result));
    }

    #[test]
    fn save_and_restore_resume_the_step() {
        let mut host = TestHost::open(12, 3);
        let mut f = follower(&host, Cell::new(0, 1)).with_tick_budget(5);
        f.start_path(&mut host, Destination::cell(Cell::new(8, 1)), Some(Rot4::West));
        host.flush(&mut f);
        f.tick(&mut host);
        let save = f.save();
        assert!(save.moving);
        assert_eq!(save.next_cell, Some(Cell::new(1, 1)));
        assert_eq!(save.cost_left, 13);

        let mut g = PathFollower::restore(AgentId(1), host.profile(), f.position(), FollowerConfig::default(), &save);
        g = g.with_tick_budget(5);
        assert!(g.path().is_none());
        assert_eq!(g.next_cell(), Some(Cell::new(1, 1)));
        host.run(&mut g, 4);
        assert_eq!(g.position(), Cell::new(1, 1));
        assert!(g.replans() >= 1);
        host.run(&mut g, 40);
        assert_eq!(g.position(), Cell::new(8, 1));
        assert_eq!(g.rotation(), Rot4::West);
    }

    #[test]
    fn fast_movers_collide() {
        let mut host = TestHost::open(12, 3);
        let config = FollowerConfig {
            collision: CollisionConfig {
                enabled: true,
                ..CollisionConfig::default()
            },
            ..FollowerConfig::default()
        };
        let mut f = PathFollower::new(AgentId(1), host.profile(), Cell::new(0, 1), config);
        f.start_path(&mut host, Destination::cell(Cell::new(10, 1)), None);
        host.run(&mut f, 3);
        assert!(f.position().x >= 1);
        host.park(2, f.path().unwrap().peek(0).unwrap(), false);
        f.tick(&mut host);
        assert!(f
            .drain_events()
            .iter()
            .any(|e| matches!(e, FollowerEvent::Collided { other: AgentId(2), .. })));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn save_round_trips_through_json() {
        let save = FollowerSave {
            moving: true,
            next_cell: Some(Cell::new(3, 4)),
            cost_left: 7,
            destination: Some(Destination::touch(CellRect::new(5, 5, 7, 7))),
            end_rotation: Some(Rot4::East),
        };
        let json = serde_json::to_string(&save).unwrap();
        let back: FollowerSave = serde_json::from_str(&json).unwrap();
        assert_eq!(back, save);
    }
}
