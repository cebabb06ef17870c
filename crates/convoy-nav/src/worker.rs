//! Background thread for deferred grid builds and asynchronous searches.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;

use convoy_core::{CancelToken, ProfileId, ProfileSet};
use convoy_paths::{CostGrid, MapTerrain, Path, PathError, PathGrids, PathRequest, Pathfinder, RegionData};
use thiserror::Error;

/// Handle for one asynchronous search.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ticket(pub u64);

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to spawn path worker: {0}")]
    Spawn(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Tasks and completions
// ---------------------------------------------------------------------------

/// Where a task came from: the map's reply channel and its liveness token.
/// The token is cancelled when the map is torn down.
#[derive(Clone)]
pub(crate) struct MapLink {
    pub(crate) reply: Sender<Completion>,
    pub(crate) torn_down: CancelToken,
}

/// Region half of a grid job.
pub(crate) struct RegionJob {
    pub(crate) owner: ProfileId,
    /// Owner's cost grid, when built; otherwise the worker computes one.
    pub(crate) base: Option<Arc<CostGrid>>,
    pub(crate) section_size: i32,
    pub(crate) generation: u64,
}

pub(crate) struct GridJob {
    pub(crate) profile: ProfileId,
    pub(crate) cost_generation: Option<u64>,
    pub(crate) regions: Option<RegionJob>,
    pub(crate) terrain: Arc<dyn MapTerrain>,
    pub(crate) profiles: Arc<ProfileSet>,
}

pub(crate) struct PathJob {
    pub(crate) ticket: Ticket,
    pub(crate) request: PathRequest,
    pub(crate) cost: Arc<CostGrid>,
    pub(crate) regions: Option<Arc<RegionData>>,
    pub(crate) terrain: Arc<dyn MapTerrain>,
    pub(crate) profiles: Arc<ProfileSet>,
    pub(crate) finder: Arc<Pathfinder>,
    pub(crate) cancel: CancelToken,
}

pub(crate) enum Task {
    Grids(GridJob),
    Path(PathJob),
}

/// Finished work, sent back to the map that queued it.
pub(crate) enum Completion {
    Grids {
        profile: ProfileId,
        cost: Option<(Arc<CostGrid>, u64)>,
        regions: Option<(ProfileId, Arc<RegionData>, u64)>,
    },
    Path {
        ticket: Ticket,
        result: Result<Path, PathError>,
    },
}

struct Envelope {
    link: MapLink,
    task: Task,
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

#[derive(Default)]
struct GateState {
    suspended: bool,
    running: bool,
    queued: usize,
}

/// Suspension and idle tracking shared with the thread.
#[derive(Default)]
struct Gate {
    state: Mutex<GateState>,
    changed: Condvar,
}

impl Gate {
    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, GateState>) -> MutexGuard<'a, GateState> {
        self.changed
            .wait(guard)
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Block while suspended, then mark a task as running.
    fn enter(&self) {
        let mut st = self.lock();
        while st.suspended {
            st = self.wait(st);
        }
        st.queued = st.queued.saturating_sub(1);
        st.running = true;
    }

    fn leave(&self) {
        let mut st = self.lock();
        st.running = false;
        drop(st);
        self.changed.notify_all();
    }
}

// ---------------------------------------------------------------------------
// PathWorker
// ---------------------------------------------------------------------------

/// A single background thread fed through an `mpsc` task channel.
///
/// Tasks carry their map's reply channel, so one worker may serve several
/// maps through an `Arc<PathWorker>`. Dropping the worker closes the channel
/// and joins the thread.
pub struct PathWorker {
    tx: Mutex<Option<Sender<Envelope>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    gate: Arc<Gate>,
}

impl PathWorker {
    pub fn spawn() -> Result<Self, WorkerError> {
        let (tx, rx) = mpsc::channel::<Envelope>();
        let gate = Arc::new(Gate::default());
        let thread_gate = Arc::clone(&gate);
        let handle = std::thread::Builder::new()
            .name("convoy-path-worker".into())
            .spawn(move || run(rx, &thread_gate))?;
        log::debug!("path worker started");
        Ok(Self {
            tx: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
            gate,
        })
    }

    /// Whether the thread is still accepting tasks.
    pub fn is_alive(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }

    pub fn is_suspended(&self) -> bool {
        self.gate.lock().suspended
    }

    /// Snapshot: alive, not suspended, nothing running or queued.
    pub fn is_available(&self) -> bool {
        if !self.is_alive() {
            return false;
        }
        let st = self.gate.lock();
        !st.suspended && !st.running && st.queued == 0
    }

    /// Stop picking up tasks and block until the running one finishes.
    pub fn suspend(&self) {
        let mut st = self.gate.lock();
        st.suspended = true;
        while st.running {
            st = self.gate.wait(st);
        }
        log::debug!("path worker suspended with {} queued tasks", st.queued);
    }

    pub fn resume(&self) {
        let mut st = self.gate.lock();
        st.suspended = false;
        drop(st);
        self.gate.changed.notify_all();
    }

    /// Block until every queued task has run. Returns immediately while
    /// suspended.
    pub fn wait_idle(&self) {
        let mut st = self.gate.lock();
        while st.running || (st.queued > 0 && !st.suspended) {
            st = self.gate.wait(st);
        }
    }

    /// Queue a task. Returns `false` when the thread is gone.
    pub(crate) fn submit(&self, link: MapLink, task: Task) -> bool {
        let Some(tx) = self
            .tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
        else {
            return false;
        };
        self.gate.lock().queued += 1;
        if tx.send(Envelope { link, task }).is_err() {
            let mut st = self.gate.lock();
            st.queued = st.queued.saturating_sub(1);
            return false;
        }
        true
    }

    /// Close the task channel and join the thread. Queued tasks still run
    /// unless their map has been torn down.
    pub fn shutdown(&self) {
        self.resume();
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        drop(tx);
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("path worker panicked");
            } else {
                log::debug!("path worker joined");
            }
        }
    }
}

impl Drop for PathWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(rx: Receiver<Envelope>, gate: &Gate) {
    while let Ok(Envelope { link, task }) = rx.recv() {
        gate.enter();
        if link.torn_down.is_cancelled() {
            log::debug!("dropping task for a torn-down map");
        } else if let Some(done) = process(task, &link.torn_down) {
            // The map may be gone; its results go with it.
            let _ = link.reply.send(done);
        }
        gate.leave();
    }
}

fn process(task: Task, torn_down: &CancelToken) -> Option<Completion> {
    match task {
        Task::Grids(job) => {
            let profile = &job.profiles[job.profile];
            let cost = job
                .cost_generation
                .map(|generation| (Arc::new(CostGrid::build(job.terrain.as_ref(), profile)), generation));
            if torn_down.is_cancelled() {
                return None;
            }
            let regions = job.regions.map(|r| {
                let base = match r.base {
                    Some(grid) => grid,
                    None => Arc::new(CostGrid::build(job.terrain.as_ref(), &job.profiles[r.owner])),
                };
                let data = RegionData::build(r.owner, &base, r.section_size);
                (r.owner, Arc::new(data), r.generation)
            });
            Some(Completion::Grids {
                profile: job.profile,
                cost,
                regions,
            })
        }
        Task::Path(job) => {
            let grids = PathGrids {
                profile: &job.profiles[job.request.profile],
                cost: &job.cost,
                regions: job.regions.as_deref(),
                terrain: job.terrain.as_ref(),
            };
            let result = job.finder.find_path(&job.request, &grids, &job.cancel);
            Some(Completion::Path {
                ticket: job.ticket,
                result,
            })
        }
    }
}
