//! Per-map routing context: grid lifecycle, ownership moves and the
//! completion queue fed by the background worker.

use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;

use convoy_core::{
    CancelToken, Cell, ConfigError, IMPASSABLE, PathConfig, ProfileId, ProfileSet,
};
use convoy_paths::{
    CostGrid, Deactivation, MapTerrain, OwnershipRegistry, Path, PathError, PathGrids,
    PathRequest, Pathfinder, REGION_IMPASSABLE, RegionData,
};

use crate::worker::{
    Completion, GridJob, MapLink, PathJob, PathWorker, RegionJob, Task, Ticket, WorkerError,
};

/// How soon requested grids must exist.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Urgency {
    /// Build nothing; only record the use.
    #[default]
    None,
    /// Build on the worker, or now if it cannot take work.
    Deferred,
    /// Build now, blocking.
    Urgent,
}

/// A profile's region data: its own, or the owner's it piggybacks on.
#[derive(Clone, Debug)]
pub enum RegionSlot {
    Owned(Option<Arc<RegionData>>),
    SharedWith(ProfileId),
}

/// Notifications for the host.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PathingEvent {
    GridsReady(ProfileId),
    GridsReleased(ProfileId),
    OwnershipTransferred { from: ProfileId, to: ProfileId },
}

/// A finished asynchronous search.
#[derive(Debug)]
pub struct PathOutcome {
    pub ticket: Ticket,
    pub result: Result<Path, PathError>,
}

pub type ReadyCallback = Box<dyn FnOnce(ProfileId) + Send>;

/// Generation counter for one half (cost or regions) of a profile's grids.
/// Results of a job whose generation was bumped in the meantime are stale.
#[derive(Copy, Clone, Debug, Default)]
struct Half {
    generation: u64,
    pending: bool,
}

impl Half {
    fn begin(&mut self) -> u64 {
        self.generation += 1;
        self.pending = true;
        self.generation
    }

    fn invalidate(&mut self) {
        self.generation += 1;
        self.pending = false;
    }

    fn accepts(&self, generation: u64) -> bool {
        self.pending && self.generation == generation
    }
}

/// Everything one map keeps for one profile.
#[derive(Clone, Debug)]
pub struct PathData {
    profile: ProfileId,
    cost: Option<Arc<CostGrid>>,
    regions: RegionSlot,
    idle_passes: u32,
    used: bool,
    regions_dirty: bool,
    cost_stale: bool,
    cost_half: Half,
    region_half: Half,
    building: bool,
}

impl PathData {
    fn new(profile: ProfileId, owner: ProfileId) -> Self {
        Self {
            profile,
            cost: None,
            regions: if owner == profile {
                RegionSlot::Owned(None)
            } else {
                RegionSlot::SharedWith(owner)
            },
            idle_passes: 0,
            used: false,
            regions_dirty: false,
            cost_stale: false,
            cost_half: Half::default(),
            region_half: Half::default(),
            building: false,
        }
    }

    #[inline]
    pub fn profile(&self) -> ProfileId {
        self.profile
    }

    #[inline]
    pub fn cost_grid(&self) -> Option<&Arc<CostGrid>> {
        self.cost.as_ref()
    }

    #[inline]
    pub fn region_slot(&self) -> &RegionSlot {
        &self.regions
    }

    /// Consecutive daily passes without use.
    #[inline]
    pub fn idle_passes(&self) -> u32 {
        self.idle_passes
    }

    pub fn is_pending(&self) -> bool {
        self.cost_half.pending || self.region_half.pending
    }

    pub fn regions_dirty(&self) -> bool {
        self.regions_dirty
    }

    /// A cost job in flight was overtaken by a map edit and must run again.
    pub fn cost_stale(&self) -> bool {
        self.cost_stale
    }

    /// Whether this profile holds memory worth releasing.
    fn holds_grids(&self) -> bool {
        self.cost.is_some() || matches!(self.regions, RegionSlot::Owned(Some(_)))
    }
}

enum WorkerLink {
    Dedicated(PathWorker),
    Shared(Arc<PathWorker>),
}

impl WorkerLink {
    fn get(&self) -> &PathWorker {
        match self {
            WorkerLink::Dedicated(w) => w,
            WorkerLink::Shared(w) => w,
        }
    }
}

/// Routing state of one map.
///
/// Holds one [`PathData`] per registered profile, built eagerly at
/// construction; cost grids and region data are filled on demand through
/// [`request_grids_for`](Self::request_grids_for) and released after
/// sustained disuse by [`do_pass`](Self::do_pass).
pub struct MapPathing {
    terrain: Arc<dyn MapTerrain>,
    profiles: Arc<ProfileSet>,
    config: PathConfig,
    ownership: OwnershipRegistry,
    data: Vec<PathData>,
    finder: Arc<Pathfinder>,
    worker: Option<WorkerLink>,
    link: MapLink,
    completions: Receiver<Completion>,
    waiting: Vec<(ProfileId, ReadyCallback)>,
    ready_paths: Vec<PathOutcome>,
    events: Vec<PathingEvent>,
    next_ticket: u64,
}

impl MapPathing {
    pub fn new(
        terrain: Arc<dyn MapTerrain>,
        profiles: Arc<ProfileSet>,
        config: PathConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let ownership = OwnershipRegistry::new(&profiles);
        let data = profiles
            .iter()
            .map(|p| PathData::new(p.id, ownership.get_owner(p.id)))
            .collect();
        let (reply, completions) = mpsc::channel();
        Ok(Self {
            finder: Arc::new(Pathfinder::new(config.search.clone())),
            terrain,
            profiles,
            config,
            ownership,
            data,
            worker: None,
            link: MapLink {
                reply,
                torn_down: CancelToken::new(),
            },
            completions,
            waiting: Vec::new(),
            ready_paths: Vec::new(),
            events: Vec::new(),
            next_ticket: 1,
        })
    }

    /// Start a worker thread owned by this map.
    pub fn spawn_worker(&mut self) -> Result<(), WorkerError> {
        let worker = PathWorker::spawn()?;
        self.worker = Some(WorkerLink::Dedicated(worker));
        Ok(())
    }

    /// Borrow a worker shared with other maps.
    pub fn share_worker(&mut self, worker: Arc<PathWorker>) {
        self.worker = Some(WorkerLink::Shared(worker));
    }

    #[inline]
    pub fn terrain(&self) -> &Arc<dyn MapTerrain> {
        &self.terrain
    }

    #[inline]
    pub fn profiles(&self) -> &Arc<ProfileSet> {
        &self.profiles
    }

    #[inline]
    pub fn config(&self) -> &PathConfig {
        &self.config
    }

    #[inline]
    pub fn ownership(&self) -> &OwnershipRegistry {
        &self.ownership
    }

    #[inline]
    pub fn path_data(&self, profile: ProfileId) -> &PathData {
        &self.data[profile.index()]
    }

    #[inline]
    pub fn pathfinder(&self) -> &Arc<Pathfinder> {
        &self.finder
    }

    pub fn cost_grid(&self, profile: ProfileId) -> Option<&Arc<CostGrid>> {
        self.data.get(profile.index())?.cost.as_ref()
    }

    /// Region data `profile` searches with, resolved through its owner.
    pub fn regions(&self, profile: ProfileId) -> Option<&Arc<RegionData>> {
        let slot = match &self.data.get(profile.index())?.regions {
            RegionSlot::SharedWith(owner) => &self.data[owner.index()].regions,
            owned => owned,
        };
        match slot {
            RegionSlot::Owned(data) => data.as_ref(),
            RegionSlot::SharedWith(_) => None,
        }
    }

    pub fn grids_ready(&self, profile: ProfileId) -> bool {
        self.cost_grid(profile).is_some() && self.regions(profile).is_some()
    }

    /// Region-level reachability, or `None` when the regions are not built.
    pub fn reachable(&self, profile: ProfileId, a: Cell, b: Cell) -> Option<bool> {
        self.regions(profile).map(|r| r.reachable(a, b))
    }

    /// Return a consumed path to the shared pool.
    pub fn recycle_path(&self, path: Path) {
        self.finder.path_pool().recycle(path);
    }

    pub fn drain_events(&mut self) -> Vec<PathingEvent> {
        std::mem::take(&mut self.events)
    }

    // -----------------------------------------------------------------------
    // Grid requests
    // -----------------------------------------------------------------------

    /// Make sure `profile`'s cost grid and its owner's region data exist.
    pub fn request_grids_for(&mut self, profile: ProfileId, urgency: Urgency) {
        self.request(profile, urgency, None);
    }

    /// Like [`request_grids_for`](Self::request_grids_for), running
    /// `on_ready` once both halves exist. Callbacks for deferred work run
    /// inside [`drain_completions`](Self::drain_completions).
    pub fn request_grids_then(
        &mut self,
        profile: ProfileId,
        urgency: Urgency,
        on_ready: impl FnOnce(ProfileId) + Send + 'static,
    ) {
        self.request(profile, urgency, Some(Box::new(on_ready)));
    }

    fn request(&mut self, profile: ProfileId, urgency: Urgency, on_ready: Option<ReadyCallback>) {
        let owner = self.ownership.get_owner(profile);
        self.data[profile.index()].used = true;
        self.data[owner.index()].used = true;

        let need_cost = self.data[profile.index()].cost.is_none();
        let need_regions = self.regions(profile).is_none();
        if !need_cost && !need_regions {
            if let Some(cb) = on_ready {
                cb(profile);
            }
            return;
        }

        if let Some(cb) = on_ready {
            self.waiting.push((profile, cb));
        }
        match urgency {
            Urgency::None => {}
            Urgency::Deferred => {
                if !self.enqueue(profile, owner, need_cost, need_regions) {
                    log::warn!("path worker unavailable; building grids for profile {profile} now");
                    self.build_now(profile, owner, need_cost, need_regions);
                }
            }
            Urgency::Urgent => self.build_now(profile, owner, need_cost, need_regions),
        }
        self.run_ready_callbacks();
    }

    fn worker_accepts(&self) -> Option<&PathWorker> {
        let worker = self.worker.as_ref()?.get();
        (worker.is_alive() && !worker.is_suspended()).then_some(worker)
    }

    /// Queue the wanted halves that are not already pending. Returns `false`
    /// when the worker cannot take the job.
    fn enqueue(&mut self, profile: ProfileId, owner: ProfileId, cost: bool, regions: bool) -> bool {
        if self.worker_accepts().is_none() {
            return false;
        }
        let want_cost = cost && !self.data[profile.index()].cost_half.pending;
        let want_regions = regions && !self.data[owner.index()].region_half.pending;
        if !want_cost && !want_regions {
            return true;
        }

        let cost_generation = want_cost.then(|| self.data[profile.index()].cost_half.begin());
        let region_job = if want_regions {
            Some(RegionJob {
                owner,
                base: self.data[owner.index()].cost.clone(),
                section_size: self.config.grids.region_section_size,
                generation: self.data[owner.index()].region_half.begin(),
            })
        } else {
            None
        };
        let job = GridJob {
            profile,
            cost_generation,
            regions: region_job,
            terrain: Arc::clone(&self.terrain),
            profiles: Arc::clone(&self.profiles),
        };

        let submitted = self
            .worker_accepts()
            .is_some_and(|w| w.submit(self.link.clone(), Task::Grids(job)));
        if !submitted {
            if want_cost {
                self.data[profile.index()].cost_half.invalidate();
            }
            if want_regions {
                self.data[owner.index()].region_half.invalidate();
            }
            return false;
        }
        log::debug!(
            "queued grid build for profile {profile} (cost: {want_cost}, regions of {owner}: {want_regions})"
        );
        true
    }

    fn build_now(&mut self, profile: ProfileId, owner: ProfileId, cost: bool, regions: bool) {
        debug_assert!(
            !self.data[profile.index()].building,
            "re-entrant grid build for profile {profile}"
        );
        self.data[profile.index()].building = true;

        if cost {
            let grid = CostGrid::build(self.terrain.as_ref(), &self.profiles[profile]);
            let d = &mut self.data[profile.index()];
            d.cost = Some(Arc::new(grid));
            d.cost_half.invalidate();
            d.cost_stale = false;
        }
        if regions {
            let data = self.build_regions(owner);
            self.install_regions(owner, Arc::new(data));
            self.data[owner.index()].region_half.invalidate();
        }

        self.data[profile.index()].building = false;
        log::debug!("built grids for profile {profile} synchronously");
        self.events.push(PathingEvent::GridsReady(profile));
    }

    fn build_regions(&self, owner: ProfileId) -> RegionData {
        let section = self.config.grids.region_section_size;
        match &self.data[owner.index()].cost {
            Some(grid) => RegionData::build(owner, grid, section),
            None => {
                let grid = CostGrid::build(self.terrain.as_ref(), &self.profiles[owner]);
                RegionData::build(owner, &grid, section)
            }
        }
    }

    fn install_regions(&mut self, owner: ProfileId, data: Arc<RegionData>) {
        let d = &mut self.data[owner.index()];
        d.regions = RegionSlot::Owned(Some(data));
        d.regions_dirty = false;
    }

    fn run_ready_callbacks(&mut self) {
        if self.waiting.is_empty() {
            return;
        }
        let waiting = std::mem::take(&mut self.waiting);
        for (profile, cb) in waiting {
            if self.grids_ready(profile) {
                cb(profile);
            } else {
                self.waiting.push((profile, cb));
            }
        }
    }

    // -----------------------------------------------------------------------
    // Completion queue
    // -----------------------------------------------------------------------

    /// Install finished grids, run ready callbacks and hand back finished
    /// searches. Call once per tick.
    pub fn drain_completions(&mut self) -> Vec<PathOutcome> {
        let mut finished = std::mem::take(&mut self.ready_paths);
        while let Ok(done) = self.completions.try_recv() {
            match done {
                Completion::Grids {
                    profile,
                    cost,
                    regions,
                } => {
                    let mut installed = false;
                    if let Some((grid, generation)) = cost {
                        let d = &mut self.data[profile.index()];
                        if d.cost_half.accepts(generation) {
                            d.cost = Some(grid);
                            d.cost_half.pending = false;
                            d.cost_stale = false;
                            installed = true;
                        } else {
                            log::debug!("dropping stale cost grid for profile {profile}");
                        }
                    }
                    if let Some((owner, data, generation)) = regions {
                        if self.data[owner.index()].region_half.accepts(generation) {
                            self.install_regions(owner, data);
                            self.data[owner.index()].region_half.pending = false;
                            installed = true;
                        } else {
                            log::debug!("dropping stale region data for profile {owner}");
                        }
                    }
                    if installed {
                        self.events.push(PathingEvent::GridsReady(profile));
                    }
                }
                Completion::Path { ticket, result } => {
                    finished.push(PathOutcome { ticket, result });
                }
            }
        }
        self.run_ready_callbacks();
        finished
    }

    // -----------------------------------------------------------------------
    // Idle release
    // -----------------------------------------------------------------------

    /// Daily bookkeeping. Marks every profile of a live agent, and its
    /// region owner, as used; releases the grids of profiles unused for
    /// `idle_release_passes` consecutive passes and returns them.
    pub fn do_pass<I>(&mut self, live_agent_profiles: I) -> Vec<ProfileId>
    where
        I: IntoIterator<Item = ProfileId>,
    {
        for profile in live_agent_profiles {
            let owner = self.ownership.get_owner(profile);
            self.data[profile.index()].used = true;
            self.data[owner.index()].used = true;
        }

        let threshold = self.config.grids.idle_release_passes;
        let mut released = Vec::new();
        for d in self.data.iter_mut() {
            let used = std::mem::take(&mut d.used);
            if used || !d.holds_grids() {
                d.idle_passes = 0;
                continue;
            }
            d.idle_passes += 1;
            if d.idle_passes >= threshold {
                released.push(d.profile);
            }
        }
        for &profile in &released {
            self.release(profile);
        }
        released
    }

    fn release(&mut self, profile: ProfileId) {
        let d = &mut self.data[profile.index()];
        d.cost = None;
        d.cost_half.invalidate();
        d.cost_stale = false;
        d.idle_passes = 0;
        if let RegionSlot::Owned(regions) = &mut d.regions {
            *regions = None;
            d.region_half.invalidate();
            d.regions_dirty = false;
        }
        log::debug!("released grids for profile {profile}");
        self.events.push(PathingEvent::GridsReleased(profile));
    }

    // -----------------------------------------------------------------------
    // Ownership
    // -----------------------------------------------------------------------

    /// Make `new_owner` the owner of its cost class, moving the live region
    /// data along. Returns the previous owner.
    pub fn transfer_ownership(&mut self, new_owner: ProfileId) -> Option<ProfileId> {
        let old = self.ownership.transfer_ownership(new_owner)?;
        self.move_regions(old, new_owner);
        Some(old)
    }

    /// A profile left the map. An owner with remaining dependents hands its
    /// region data to the first of them; the profile's own grids are
    /// released.
    pub fn remove_profile(&mut self, profile: ProfileId) -> Deactivation {
        let outcome = self.ownership.deactivate(profile);
        if let Deactivation::Transferred { from, to } = outcome {
            self.move_regions(from, to);
        }
        if self.data[profile.index()].holds_grids() {
            self.release(profile);
        }
        outcome
    }

    /// A removed profile is back; it resolves to its class's current owner.
    pub fn restore_profile(&mut self, profile: ProfileId) {
        self.ownership.activate(profile);
    }

    fn move_regions(&mut self, from: ProfileId, to: ProfileId) {
        let data = match std::mem::replace(
            &mut self.data[from.index()].regions,
            RegionSlot::SharedWith(to),
        ) {
            RegionSlot::Owned(data) => data,
            RegionSlot::SharedWith(_) => None,
        };
        let dirty = std::mem::take(&mut self.data[from.index()].regions_dirty);
        self.data[from.index()].region_half.invalidate();

        let target = &mut self.data[to.index()];
        target.regions = RegionSlot::Owned(data);
        target.regions_dirty = dirty;
        target.region_half.invalidate();

        for i in 0..self.data.len() {
            let p = ProfileId(i as u16);
            if p != to && self.ownership.get_owner(p) == to {
                self.data[i].regions = RegionSlot::SharedWith(to);
            }
        }
        log::debug!("region ownership moved from profile {from} to {to}");
        self.events.push(PathingEvent::OwnershipTransferred { from, to });
    }

    // -----------------------------------------------------------------------
    // Map edits
    // -----------------------------------------------------------------------

    /// The host changed `cells`. Built cost grids are recalculated there,
    /// and region data whose passability no longer matches is marked dirty.
    /// Worker jobs still in flight read the terrain before the edit; their
    /// results are dropped and the halves wait for the next
    /// [`flush_dirty_regions`](Self::flush_dirty_regions).
    pub fn notify_cells_changed(&mut self, cells: &[Cell]) {
        if cells.is_empty() {
            return;
        }
        let terrain = self.terrain.as_ref();
        let profiles = &self.profiles;
        for d in self.data.iter_mut() {
            if d.cost_half.pending {
                log::debug!("map edit overtook the cost job of profile {}", d.profile);
                d.cost_half.invalidate();
                d.cost_stale = true;
            }
            if d.region_half.pending {
                log::debug!("map edit overtook the region job of profile {}", d.profile);
                d.region_half.invalidate();
                d.regions_dirty = true;
            }
        }

        for d in self.data.iter_mut() {
            let Some(grid) = d.cost.as_mut() else {
                continue;
            };
            let profile = &profiles[d.profile];
            let grid = Arc::make_mut(grid);
            for &c in cells {
                grid.recalculate_cell(terrain, profile, c);
            }
        }

        for d in self.data.iter_mut() {
            let RegionSlot::Owned(Some(regions)) = &d.regions else {
                continue;
            };
            let profile = &profiles[d.profile];
            let stale = cells.iter().any(|&c| {
                regions.bounds().contains(c)
                    && (terrain.cell_cost(profile, c) == IMPASSABLE)
                        != (regions.region_id(c) == REGION_IMPASSABLE)
            });
            if stale && !d.regions_dirty {
                log::trace!("region data of profile {} is dirty", d.profile);
                d.regions_dirty = true;
            }
        }
    }

    /// Rebuild dirty region data, and cost grids whose job was overtaken
    /// by an edit. Returns how many halves were rebuilt or queued.
    pub fn flush_dirty_regions(&mut self, urgency: Urgency) -> usize {
        if urgency == Urgency::None {
            return 0;
        }
        let stale: Vec<ProfileId> = self
            .data
            .iter()
            .filter(|d| d.cost_stale)
            .map(|d| d.profile)
            .collect();
        for &profile in &stale {
            self.data[profile.index()].cost_stale = false;
            let owner = self.ownership.get_owner(profile);
            let queued = urgency == Urgency::Deferred && self.enqueue(profile, owner, true, false);
            if !queued {
                self.build_now(profile, owner, true, false);
            }
        }

        let dirty: Vec<ProfileId> = self
            .data
            .iter()
            .filter(|d| d.regions_dirty && matches!(d.regions, RegionSlot::Owned(_)))
            .map(|d| d.profile)
            .collect();
        for &owner in &dirty {
            self.data[owner.index()].regions_dirty = false;
            let queued = urgency == Urgency::Deferred && self.enqueue(owner, owner, false, true);
            if !queued {
                let data = self.build_regions(owner);
                self.install_regions(owner, Arc::new(data));
                self.data[owner.index()].region_half.invalidate();
                log::debug!("rebuilt region data for profile {owner}");
            }
        }
        self.run_ready_callbacks();
        stale.len() + dirty.len()
    }

    // -----------------------------------------------------------------------
    // Searches
    // -----------------------------------------------------------------------

    /// Search now on the calling thread.
    pub fn find_path(&self, req: &PathRequest, cancel: &CancelToken) -> Result<Path, PathError> {
        let Some(profile) = self.profiles.get(req.profile) else {
            log::error!("path request for unknown profile {}", req.profile);
            return Err(PathError::GridsUnavailable(req.profile));
        };
        let Some(cost) = self.cost_grid(req.profile) else {
            return Err(PathError::GridsUnavailable(req.profile));
        };
        let grids = PathGrids {
            profile,
            cost,
            regions: self.regions(req.profile).map(|r| r.as_ref()),
            terrain: self.terrain.as_ref(),
        };
        self.finder.find_path(req, &grids, cancel)
    }

    /// Search on the worker when it is free, otherwise now. Either way the
    /// result comes back through [`drain_completions`](Self::drain_completions).
    pub fn find_path_async(&mut self, req: PathRequest, cancel: CancelToken) -> Ticket {
        let ticket = Ticket(self.next_ticket);
        self.next_ticket += 1;

        let submitted = match (self.cost_grid(req.profile), self.worker.as_ref()) {
            (Some(cost), Some(worker)) if worker.get().is_available() => {
                let job = PathJob {
                    ticket,
                    request: req,
                    cost: Arc::clone(cost),
                    regions: self.regions(req.profile).cloned(),
                    terrain: Arc::clone(&self.terrain),
                    profiles: Arc::clone(&self.profiles),
                    finder: Arc::clone(&self.finder),
                    cancel: cancel.clone(),
                };
                worker.get().submit(self.link.clone(), Task::Path(job))
            }
            _ => false,
        };
        if !submitted {
            let result = self.find_path(&req, &cancel);
            self.ready_paths.push(PathOutcome { ticket, result });
        }
        ticket
    }

    // -----------------------------------------------------------------------
    // Worker control
    // -----------------------------------------------------------------------

    pub fn worker_available(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| w.get().is_available())
    }

    /// Hold the worker around bulk map edits. Blocks until it is idle.
    pub fn suspend(&self) {
        if let Some(w) = &self.worker {
            w.get().suspend();
        }
    }

    pub fn resume(&self) {
        if let Some(w) = &self.worker {
            w.get().resume();
        }
    }

    /// Block until the worker has run everything queued so far.
    pub fn wait_for_worker(&self) {
        if let Some(w) = &self.worker {
            w.get().wait_idle();
        }
    }

    /// Abandon in-flight work and let go of the worker, joining it when it
    /// is this map's own. Later requests run synchronously.
    pub fn teardown(&mut self) {
        self.link.torn_down.cancel();
        match self.worker.take() {
            Some(WorkerLink::Dedicated(worker)) => worker.shutdown(),
            Some(WorkerLink::Shared(_)) | None => {}
        }
    }
}

impl Drop for MapPathing {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convoy_core::{CellRect, VehicleProfile};
    use convoy_paths::Destination;
    use std::collections::HashSet;
    use std::sync::RwLock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Field {
        bounds: CellRect,
        blocked: RwLock<HashSet<Cell>>,
    }

    impl MapTerrain for Field {
        fn bounds(&self) -> CellRect {
            self.bounds
        }

        fn cell_cost(&self, _profile: &VehicleProfile, cell: Cell) -> i32 {
            let blocked = self.blocked.read().unwrap_or_else(|p| p.into_inner());
            if blocked.contains(&cell) { IMPASSABLE } else { 0 }
        }
    }

    const CART: ProfileId = ProfileId(0);
    const WAGON: ProfileId = ProfileId(1);
    const BOAT: ProfileId = ProfileId(2);

    fn fixture() -> (Arc<Field>, MapPathing) {
        let mut set = ProfileSet::new();
        set.register(VehicleProfile::builder("cart").terrain_cost("mud", 30)).unwrap();
        set.register(VehicleProfile::builder("wagon").terrain_cost("mud", 30).footprint(2, 2))
            .unwrap();
        set.register(VehicleProfile::builder("boat").river_cost("deep", 0)).unwrap();
        let field = Arc::new(Field {
            bounds: CellRect::new(0, 0, 40, 24),
            blocked: RwLock::new(HashSet::new()),
        });
        let terrain: Arc<dyn MapTerrain> = field.clone();
        let map = MapPathing::new(terrain, Arc::new(set), PathConfig::default()).unwrap();
        (field, map)
    }

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce(ProfileId) + Send + 'static) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        (hits, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn slots_follow_ownership() {
        let (_field, map) = fixture();
        assert!(matches!(map.path_data(CART).region_slot(), RegionSlot::Owned(None)));
        assert!(matches!(map.path_data(WAGON).region_slot(), RegionSlot::SharedWith(CART)));
        assert!(matches!(map.path_data(BOAT).region_slot(), RegionSlot::Owned(None)));
    }

    #[test]
    fn equivalent_profiles_share_region_instance() {
        let (_field, mut map) = fixture();
        map.request_grids_for(WAGON, Urgency::Urgent);
        map.request_grids_for(CART, Urgency::Urgent);
        let a = map.regions(CART).unwrap();
        let b = map.regions(WAGON).unwrap();
        assert!(Arc::ptr_eq(a, b));
        assert!(!Arc::ptr_eq(map.cost_grid(CART).unwrap(), map.cost_grid(WAGON).unwrap()));
    }

    #[test]
    fn repeated_request_skips_build_but_calls_back() {
        let (_field, mut map) = fixture();
        let (hits, cb) = counter();
        map.request_grids_then(CART, Urgency::Urgent, cb);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        let grid = map.cost_grid(CART).unwrap().clone();
        let regions = map.regions(CART).unwrap().clone();
        map.drain_events();

        let (hits, cb) = counter();
        map.request_grids_then(CART, Urgency::Urgent, cb);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&grid, map.cost_grid(CART).unwrap()));
        assert!(Arc::ptr_eq(&regions, map.regions(CART).unwrap()));
        assert!(map.drain_events().is_empty());
    }

    #[test]
    fn no_urgency_waits_for_someone_else_to_build() {
        let (_field, mut map) = fixture();
        let (hits, cb) = counter();
        map.request_grids_then(CART, Urgency::None, cb);
        assert!(map.cost_grid(CART).is_none());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        map.request_grids_for(CART, Urgency::Urgent);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn deferred_without_worker_builds_now() {
        let (_field, mut map) = fixture();
        map.request_grids_for(BOAT, Urgency::Deferred);
        assert!(map.grids_ready(BOAT));
        assert_eq!(map.drain_events(), vec![PathingEvent::GridsReady(BOAT)]);
    }

    #[test]
    fn deferred_builds_land_on_drain() {
        let (_field, mut map) = fixture();
        map.spawn_worker().unwrap();
        let (hits, cb) = counter();
        map.request_grids_then(WAGON, Urgency::Deferred, cb);
        assert!(map.path_data(WAGON).is_pending());
        assert!(map.path_data(CART).is_pending());
        map.wait_for_worker();
        assert!(!map.grids_ready(WAGON));
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        map.drain_completions();
        assert!(map.grids_ready(WAGON));
        assert!(map.cost_grid(CART).is_none());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(map.drain_events(), vec![PathingEvent::GridsReady(WAGON)]);
    }

    #[test]
    fn urgent_request_supersedes_pending_job() {
        let (_field, mut map) = fixture();
        map.spawn_worker().unwrap();
        map.request_grids_for(CART, Urgency::Deferred);
        map.request_grids_for(CART, Urgency::Urgent);
        let grid = map.cost_grid(CART).unwrap().clone();
        map.wait_for_worker();
        map.drain_completions();
        assert!(Arc::ptr_eq(&grid, map.cost_grid(CART).unwrap()));
        assert!(!map.path_data(CART).is_pending());
    }

    #[test]
    fn suspended_worker_falls_back_to_urgent() {
        let (_field, mut map) = fixture();
        map.spawn_worker().unwrap();
        map.suspend();
        map.request_grids_for(CART, Urgency::Deferred);
        assert!(map.grids_ready(CART));
        map.resume();
    }

    #[test]
    fn release_happens_exactly_at_threshold() {
        let (_field, mut map) = fixture();
        map.request_grids_for(BOAT, Urgency::Urgent);
        // The request itself counts as use for the first pass.
        assert!(map.do_pass([]).is_empty());
        assert!(map.do_pass([]).is_empty());
        assert!(map.do_pass([]).is_empty());
        assert_eq!(map.path_data(BOAT).idle_passes(), 2);
        assert_eq!(map.do_pass([]), vec![BOAT]);
        assert!(map.cost_grid(BOAT).is_none());
        assert!(map.regions(BOAT).is_none());
        assert!(map.drain_events().contains(&PathingEvent::GridsReleased(BOAT)));
    }

    #[test]
    fn single_use_resets_idle_counter() {
        let (_field, mut map) = fixture();
        map.request_grids_for(BOAT, Urgency::Urgent);
        map.do_pass([]);
        map.do_pass([]);
        map.do_pass([]);
        assert!(map.do_pass([BOAT]).is_empty());
        assert_eq!(map.path_data(BOAT).idle_passes(), 0);
        assert!(map.do_pass([]).is_empty());
        assert!(map.grids_ready(BOAT));
    }

    #[test]
    fn dependent_use_keeps_owner_regions() {
        let (_field, mut map) = fixture();
        map.request_grids_for(CART, Urgency::Urgent);
        map.request_grids_for(WAGON, Urgency::Urgent);
        for _ in 0..5 {
            assert!(map.do_pass([WAGON]).is_empty());
        }
        assert!(map.grids_ready(WAGON));
        assert!(map.regions(CART).is_some());
    }

    #[test]
    fn removing_owner_moves_regions_to_dependent() {
        let (_field, mut map) = fixture();
        map.request_grids_for(CART, Urgency::Urgent);
        map.request_grids_for(WAGON, Urgency::Urgent);
        let before = map.regions(WAGON).unwrap().clone();
        map.drain_events();

        let outcome = map.remove_profile(CART);
        assert_eq!(outcome, Deactivation::Transferred { from: CART, to: WAGON });
        assert!(Arc::ptr_eq(&before, map.regions(WAGON).unwrap()));
        assert!(matches!(map.path_data(WAGON).region_slot(), RegionSlot::Owned(Some(_))));
        assert!(map.cost_grid(CART).is_none());
        assert_eq!(
            map.drain_events(),
            vec![
                PathingEvent::OwnershipTransferred { from: CART, to: WAGON },
                PathingEvent::GridsReleased(CART),
            ]
        );
    }

    #[test]
    fn cell_changes_dirty_and_rebuild_regions() {
        let (field, mut map) = fixture();
        map.request_grids_for(CART, Urgency::Urgent);
        let before = map.regions(CART).unwrap().clone();
        assert_eq!(before.component_count(), 1);

        let wall: Vec<Cell> = (0..24).map(|z| Cell::new(20, z)).collect();
        field.blocked.write().unwrap().extend(wall.iter().copied());
        map.notify_cells_changed(&wall);
        assert!(!map.cost_grid(CART).unwrap().passable(Cell::new(20, 5)));
        assert!(map.path_data(CART).regions_dirty());
        assert_eq!(map.reachable(CART, Cell::new(0, 0), Cell::new(39, 0)), Some(true));

        assert_eq!(map.flush_dirty_regions(Urgency::Urgent), 1);
        assert!(!map.path_data(CART).regions_dirty());
        assert_eq!(map.reachable(CART, Cell::new(0, 0), Cell::new(39, 0)), Some(false));
        assert_eq!(before.component_count(), 1);
    }

    #[test]
    fn edit_during_deferred_build_is_not_lost() {
        let (field, mut map) = fixture();
        map.spawn_worker().unwrap();
        map.request_grids_for(CART, Urgency::Deferred);
        map.wait_for_worker();

        map.suspend();
        let wall: Vec<Cell> = (0..24).map(|z| Cell::new(20, z)).collect();
        field.blocked.write().unwrap().extend(wall.iter().copied());
        map.notify_cells_changed(&wall);
        map.resume();
        assert!(!map.path_data(CART).is_pending());
        assert!(map.path_data(CART).cost_stale());
        assert!(map.path_data(CART).regions_dirty());

        // The finished job read the open map and is dropped.
        map.drain_completions();
        assert!(!map.grids_ready(CART));

        assert_eq!(map.flush_dirty_regions(Urgency::Urgent), 2);
        assert!(!map.cost_grid(CART).unwrap().passable(Cell::new(20, 5)));
        assert_eq!(map.reachable(CART, Cell::new(0, 0), Cell::new(39, 0)), Some(false));
        assert!(!map.path_data(CART).cost_stale());
        assert!(!map.path_data(CART).regions_dirty());
    }

    #[test]
    fn edit_overtaking_deferred_build_requeues_it() {
        let (field, mut map) = fixture();
        map.spawn_worker().unwrap();
        let (hits, cb) = counter();
        map.request_grids_then(CART, Urgency::Deferred, cb);
        let wall: Vec<Cell> = (0..24).map(|z| Cell::new(20, z)).collect();
        field.blocked.write().unwrap().extend(wall.iter().copied());
        map.notify_cells_changed(&wall);

        assert_eq!(map.flush_dirty_regions(Urgency::Deferred), 2);
        map.wait_for_worker();
        map.drain_completions();
        assert!(map.grids_ready(CART));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!map.cost_grid(CART).unwrap().passable(Cell::new(20, 5)));
        assert_eq!(map.reachable(CART, Cell::new(0, 0), Cell::new(39, 0)), Some(false));
    }

    #[test]
    fn searches_need_grids() {
        let (_field, mut map) = fixture();
        let req = PathRequest::new(CART, Cell::new(0, 0), Destination::cell(Cell::new(10, 4)));
        assert_eq!(
            map.find_path(&req, &CancelToken::new()),
            Err(PathError::GridsUnavailable(CART))
        );
        map.request_grids_for(CART, Urgency::Urgent);
        let path = map.find_path(&req, &CancelToken::new()).unwrap();
        assert_eq!(path.destination_cell(), Some(Cell::new(10, 4)));
        map.recycle_path(path);
        assert_eq!(map.pathfinder().path_pool().idle(), 1);
    }

    #[test]
    fn async_search_without_worker_arrives_on_drain() {
        let (_field, mut map) = fixture();
        map.request_grids_for(CART, Urgency::Urgent);
        let req = PathRequest::new(CART, Cell::new(0, 0), Destination::cell(Cell::new(30, 20)));
        let ticket = map.find_path_async(req, CancelToken::new());
        let done = map.drain_completions();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].ticket, ticket);
        assert!(done[0].result.is_ok());
    }

    #[test]
    fn async_search_on_worker() {
        let (_field, mut map) = fixture();
        map.spawn_worker().unwrap();
        map.request_grids_for(CART, Urgency::Urgent);
        let req = PathRequest::new(CART, Cell::new(0, 0), Destination::cell(Cell::new(30, 20)));
        let ticket = map.find_path_async(req, CancelToken::new());
        map.wait_for_worker();
        let done = map.drain_completions();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].ticket, ticket);
        assert_eq!(done[0].result.as_ref().unwrap().destination_cell(), Some(Cell::new(30, 20)));
    }

    #[test]
    fn teardown_abandons_worker() {
        let (_field, mut map) = fixture();
        map.spawn_worker().unwrap();
        map.teardown();
        assert!(!map.worker_available());
        map.request_grids_for(CART, Urgency::Deferred);
        assert!(map.grids_ready(CART));
    }

    #[test]
    fn shared_worker_serves_two_maps() {
        let worker = Arc::new(PathWorker::spawn().unwrap());
        let (_a_field, mut a) = fixture();
        let (_b_field, mut b) = fixture();
        a.share_worker(worker.clone());
        b.share_worker(worker.clone());
        a.request_grids_for(CART, Urgency::Deferred);
        b.request_grids_for(BOAT, Urgency::Deferred);
        worker.wait_idle();
        a.drain_completions();
        b.drain_completions();
        assert!(a.grids_ready(CART) && !a.grids_ready(BOAT));
        assert!(b.grids_ready(BOAT) && !b.grids_ready(CART));
        a.teardown();
        assert!(worker.is_alive());
    }
}
