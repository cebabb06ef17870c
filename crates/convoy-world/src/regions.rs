//! Flood-fill labelling of world tiles.

use convoy_core::IMPASSABLE;

use crate::map::{TileId, WorldMap};

/// Region id of tiles the profile cannot enter.
pub const WORLD_IMPASSABLE: i32 = -1;

/// Label every tile by connected passable set. Impassable tiles hold
/// [`WORLD_IMPASSABLE`]; every other tile holds a region id starting at 1.
pub(crate) fn flood_fill(map: &dyn WorldMap, costs: &[i32]) -> Vec<i32> {
    let mut labels = vec![0; costs.len()];
    for (label, &cost) in labels.iter_mut().zip(costs) {
        if cost == IMPASSABLE {
            *label = WORLD_IMPASSABLE;
        }
    }

    let mut next: i32 = 1;
    let mut stack: Vec<usize> = Vec::new();
    let mut nbuf: Vec<TileId> = Vec::new();
    for start in 0..labels.len() {
        if labels[start] != 0 {
            continue;
        }
        labels[start] = next;
        stack.push(start);
        while let Some(ti) = stack.pop() {
            nbuf.clear();
            map.neighbours(TileId(ti as u32), &mut nbuf);
            for &n in &nbuf {
                let ni = n.index();
                if ni < labels.len() && labels[ni] == 0 {
                    labels[ni] = next;
                    stack.push(ni);
                }
            }
        }
        next += 1;
    }
    labels
}
