//! A generated map for the demo: rock, mud, a river and a road.

use convoy_core::{Cell, CellRect, IMPASSABLE, VehicleProfile};
use convoy_paths::{MapTerrain, RoadInfo};
use rand::RngExt;
use rand::rngs::StdRng;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Ground {
    Open,
    Rock,
    Mud,
    River,
    Road,
}

pub struct Field {
    bounds: CellRect,
    ground: Vec<Ground>,
}

impl Field {
    /// Scatter rock and mud over open ground, then run a river north to
    /// south and a road west to east across it.
    pub fn generate(rng: &mut StdRng, width: i32, depth: i32) -> Self {
        let bounds = CellRect::new(0, 0, width, depth);
        let mut ground: Vec<Ground> = (0..width * depth)
            .map(|_| match rng.random_range(0..100) {
                0..8 => Ground::Rock,
                8..20 => Ground::Mud,
                _ => Ground::Open,
            })
            .collect();

        let mut x = width / 2;
        for z in 0..depth {
            x = (x + rng.random_range(-1..=1)).clamp(1, width - 3);
            for dx in 0..2 {
                ground[(z * width + x + dx) as usize] = Ground::River;
            }
        }
        let road_z = depth / 3;
        for x in 0..width {
            ground[(road_z * width + x) as usize] = Ground::Road;
        }
        Self { bounds, ground }
    }

    pub fn ground(&self, c: Cell) -> Ground {
        if !self.bounds.contains(c) {
            return Ground::Rock;
        }
        self.ground[(c.z * self.bounds.width() + c.x) as usize]
    }

    /// First cell, scanning from `from`, where `profile` can stand.
    pub fn open_cell_near(&self, profile: &VehicleProfile, from: Cell) -> Option<Cell> {
        (0..self.bounds.width().max(self.bounds.depth())).find_map(|r| {
            from_ring(from, r)
                .into_iter()
                .filter(|c| self.bounds.contains_rect(profile.footprint.rect_at(*c)))
                .find(|&c| {
                    profile
                        .footprint
                        .rect_at(c)
                        .iter()
                        .all(|fc| self.cell_cost(profile, fc) != IMPASSABLE)
                })
        })
    }
}

fn from_ring(center: Cell, r: i32) -> Vec<Cell> {
    CellRect::new(center.x - r, center.z - r, center.x + r + 1, center.z + r + 1)
        .iter()
        .filter(|c| c.chebyshev(center) == r)
        .collect()
}

impl MapTerrain for Field {
    fn bounds(&self) -> CellRect {
        self.bounds
    }

    fn cell_cost(&self, profile: &VehicleProfile, c: Cell) -> i32 {
        match self.ground(c) {
            Ground::Rock => IMPASSABLE,
            Ground::River if profile.mobility.amphibious => {
                profile.rules.river.get("deep").copied().unwrap_or(10)
            }
            Ground::River => IMPASSABLE,
            Ground::Mud => profile.rules.terrain.get("mud").copied().unwrap_or(20),
            Ground::Open | Ground::Road => 0,
        }
    }

    fn road_at(&self, c: Cell) -> Option<RoadInfo> {
        (self.ground(c) == Ground::Road).then_some(RoadInfo { owner: None })
    }
}
