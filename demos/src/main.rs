//! Headless convoy demo: a few vehicles cross a generated map while a
//! background worker builds their grids. Set `RUST_LOG=debug` to watch the
//! grid lifecycle, or `RUST_LOG=trace` for every follower transition.

mod field;

use std::sync::Arc;

use convoy_core::{
    Cell, CellRect, IMPASSABLE, MobilityFlags, PathConfig, ProfileId, ProfileSet, VehicleProfile,
};
use convoy_nav::{
    AgentId, FollowerEvent, MapPathing, NavHost, Occupancy, PathFollower, Urgency,
};
use convoy_paths::{Destination, MapTerrain};
use convoy_world::{TileId, WorldMap, WorldPathing};
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

use field::Field;

const WIDTH: i32 = 96;
const DEPTH: i32 = 64;
const TICKS: u32 = 2_000;
const TICKS_PER_DAY: u32 = 500;

fn profiles() -> Result<ProfileSet, Box<dyn std::error::Error>> {
    let mut set = ProfileSet::new();
    set.register(VehicleProfile::builder("cart").terrain_cost("mud", 30))?;
    set.register(VehicleProfile::builder("wagon").terrain_cost("mud", 30).footprint(2, 2))?;
    set.register(VehicleProfile::builder("truck").terrain_cost("mud", 60).footprint(3, 3))?;
    set.register(
        VehicleProfile::builder("amphibian")
            .river_cost("deep", 15)
            .mobility(MobilityFlags {
                can_destroy_obstacles: false,
                amphibious: true,
            }),
    )?;
    Ok(set)
}

/// Coarse view of the field for the world mirror: one tile per block of
/// cells, passable when any cell of the block is.
struct Blocks<'a> {
    field: &'a Field,
    size: i32,
}

impl Blocks<'_> {
    fn across(&self) -> i32 {
        WIDTH / self.size
    }

    fn tile_of(&self, c: Cell) -> TileId {
        TileId(((c.z / self.size) * self.across() + c.x / self.size) as u32)
    }
}

impl WorldMap for Blocks<'_> {
    fn tile_count(&self) -> usize {
        (self.across() * (DEPTH / self.size)) as usize
    }

    fn neighbours(&self, tile: TileId, out: &mut Vec<TileId>) {
        let (across, down) = (self.across(), DEPTH / self.size);
        let (tx, tz) = (tile.0 as i32 % across, tile.0 as i32 / across);
        for (dx, dz) in [(1, 0), (-1, 0), (0, 1), (0, -1)] {
            let (nx, nz) = (tx + dx, tz + dz);
            if (0..across).contains(&nx) && (0..down).contains(&nz) {
                out.push(TileId((nz * across + nx) as u32));
            }
        }
    }

    fn tile_cost(&self, profile: &VehicleProfile, tile: TileId) -> i32 {
        let across = self.across();
        let min = Cell::new(
            (tile.0 as i32 % across) * self.size,
            (tile.0 as i32 / across) * self.size,
        );
        CellRect::with_size(min, self.size, self.size)
            .iter()
            .map(|c| self.field.cell_cost(profile, c))
            .filter(|&cost| cost != IMPASSABLE)
            .min()
            .unwrap_or(IMPASSABLE)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let seed = std::env::args().nth(1).and_then(|s| s.parse().ok()).unwrap_or(7);
    let mut rng = StdRng::seed_from_u64(seed);

    let profiles = Arc::new(profiles()?);
    let field = Arc::new(Field::generate(&mut rng, WIDTH, DEPTH));
    let terrain: Arc<dyn MapTerrain> = field.clone();
    let mut map = MapPathing::new(terrain, Arc::clone(&profiles), PathConfig::default())?;
    map.spawn_worker()?;
    for p in profiles.iter() {
        map.request_grids_for(p.id, Urgency::Deferred);
    }

    // Two vehicles of every profile, each sent to the far side of the map.
    let mut occupancy = Occupancy::new();
    let mut agents: Vec<PathFollower> = Vec::new();
    let mut goals: Vec<Cell> = Vec::new();
    for (n, p) in profiles.iter().flat_map(|p| [p, p]).enumerate() {
        let from = Cell::new(rng.random_range(1..WIDTH / 4), rng.random_range(1..DEPTH - 1));
        let to = Cell::new(rng.random_range(3 * WIDTH / 4..WIDTH - 1), rng.random_range(1..DEPTH - 1));
        let (Some(from), Some(to)) = (field.open_cell_near(p, from), field.open_cell_near(p, to)) else {
            log::warn!("no room for a {} near {from}", p.name);
            continue;
        };
        let agent = PathFollower::new(AgentId(n as u32), p, from, map.config().follower.clone());
        occupancy.update(&agent);
        agents.push(agent);
        goals.push(to);
    }

    // Let the worker finish the first grids before anyone sets off.
    map.wait_for_worker();
    map.drain_completions();
    for (agent, &to) in agents.iter_mut().zip(&goals) {
        let mut host = NavHost::new(&mut map, &occupancy);
        agent.start_path(&mut host, Destination::cell(to), None);
    }

    let mut arrived = 0;
    let mut failed = 0;
    for tick in 1..=TICKS {
        for outcome in map.drain_completions() {
            if let Some(agent) = agents
                .iter_mut()
                .find(|a| a.pending_ticket() == Some(outcome.ticket))
            {
                let mut host = NavHost::new(&mut map, &occupancy);
                agent.deliver(&mut host, outcome.ticket, outcome.result);
            } else if let Ok(path) = outcome.result {
                map.recycle_path(path);
            }
        }

        for agent in agents.iter_mut() {
            {
                let mut host = NavHost::new(&mut map, &occupancy);
                agent.tick(&mut host);
            }
            occupancy.update(agent);
            for event in agent.drain_events() {
                match event {
                    FollowerEvent::Arrived { cell } => {
                        arrived += 1;
                        log::info!("agent {:?} arrived at {cell} on tick {tick}", agent.id());
                    }
                    FollowerEvent::Failed { error } => {
                        failed += 1;
                        log::info!("agent {:?} gave up: {error}", agent.id());
                    }
                    other => log::debug!("agent {:?}: {other:?}", agent.id()),
                }
            }
        }

        if tick % TICKS_PER_DAY == 0 {
            let live: Vec<ProfileId> = agents.iter().filter(|a| a.is_moving()).map(|a| a.profile()).collect();
            let released = map.do_pass(live);
            log::info!("day {}: released grids of {released:?}", tick / TICKS_PER_DAY);
        }
        if agents.iter().all(|a| !a.is_moving()) {
            log::info!("all agents idle after {tick} ticks");
            break;
        }
    }
    for event in map.drain_events() {
        log::debug!("map event: {event:?}");
    }
    map.teardown();

    let blocks = Blocks { field: &field, size: 8 };
    let mut world = WorldPathing::new(Arc::clone(&profiles));
    world.daily_recalculate(&blocks);
    let west = blocks.tile_of(Cell::new(2, DEPTH / 2));
    let east = blocks.tile_of(Cell::new(WIDTH - 3, DEPTH / 2));
    for p in profiles.iter() {
        log::info!(
            "world: {} {} cross from {west} to {east}",
            p.name,
            if world.reachable(p.id, west, east) { "can" } else { "cannot" }
        );
    }

    println!(
        "{} agents: {arrived} arrived, {failed} failed, {} still under way",
        agents.len(),
        agents.len().saturating_sub(arrived + failed)
    );
    Ok(())
}
