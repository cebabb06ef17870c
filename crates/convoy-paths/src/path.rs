//! Consumable route results and their pool.

use std::sync::Mutex;

use convoy_core::Cell;

/// An ordered route, destination first.
///
/// The agent consumes the route from the end nearest to it. `costs[i]` is
/// the cumulative search cost from the start to `nodes[i]`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Path {
    nodes: Vec<Cell>,
    costs: Vec<i32>,
    consumed: usize,
    found: bool,
    used_region_heuristic: bool,
}

impl Path {
    /// Fill an empty (pooled) path with search output.
    pub(crate) fn fill(&mut self, nodes: &mut dyn Iterator<Item = (Cell, i32)>, used_region_heuristic: bool) {
        self.clear();
        for (c, cost) in nodes {
            self.nodes.push(c);
            self.costs.push(cost);
        }
        self.found = true;
        self.used_region_heuristic = used_region_heuristic;
    }

    /// Build a path directly from destination-first nodes.
    pub fn from_nodes(nodes: Vec<Cell>) -> Self {
        let costs = vec![0; nodes.len()];
        Self {
            nodes,
            costs,
            consumed: 0,
            found: true,
            used_region_heuristic: false,
        }
    }

    fn clear(&mut self) {
        self.nodes.clear();
        self.costs.clear();
        self.consumed = 0;
        self.found = false;
        self.used_region_heuristic = false;
    }

    #[inline]
    pub fn found(&self) -> bool {
        self.found
    }

    #[inline]
    pub fn used_region_heuristic(&self) -> bool {
        self.used_region_heuristic
    }

    /// Nodes not yet consumed.
    #[inline]
    pub fn nodes_left(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn nodes_consumed(&self) -> usize {
        self.consumed
    }

    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Pop the node nearest the agent.
    pub fn consume_next_node(&mut self) -> Option<Cell> {
        let c = self.nodes.pop()?;
        self.costs.pop();
        self.consumed += 1;
        Some(c)
    }

    /// Look `n` nodes ahead without consuming; `peek(0)` is the next node.
    pub fn peek(&self, n: usize) -> Option<Cell> {
        let len = self.nodes.len();
        if n >= len {
            return None;
        }
        Some(self.nodes[len - 1 - n])
    }

    /// Final cell of the route.
    pub fn destination_cell(&self) -> Option<Cell> {
        self.nodes.first().copied()
    }

    /// Total cost of the remaining route.
    pub fn total_cost(&self) -> i32 {
        self.costs.first().copied().unwrap_or(0)
    }

    /// Remaining nodes in travel order (next node first).
    pub fn iter_remaining(&self) -> impl Iterator<Item = Cell> + '_ {
        self.nodes.iter().rev().copied()
    }

    /// Cumulative costs in travel order, matching [`iter_remaining`](Self::iter_remaining).
    pub fn costs_remaining(&self) -> impl Iterator<Item = i32> + '_ {
        self.costs.iter().rev().copied()
    }
}

/// Pool of [`Path`] buffers shared between the worker and consumers.
#[derive(Default)]
pub struct PathPool {
    free: Mutex<Vec<Path>>,
}

impl PathPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a cleared path.
    pub fn take(&self) -> Path {
        self.free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop()
            .unwrap_or_default()
    }

    /// Clear `path` and return it to the pool.
    pub fn recycle(&self, mut path: Path) {
        path.clear();
        self.free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(path);
    }

    /// Number of idle buffers.
    pub fn idle(&self) -> usize {
        self.free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Path {
        // Destination first.
        Path::from_nodes(vec![Cell::new(3, 0), Cell::new(2, 0), Cell::new(1, 0), Cell::new(0, 0)])
    }

    #[test]
    fn consumes_from_agent_end() {
        let mut p = sample();
        assert_eq!(p.destination_cell(), Some(Cell::new(3, 0)));
        assert_eq!(p.peek(0), Some(Cell::new(0, 0)));
        assert_eq!(p.peek(2), Some(Cell::new(2, 0)));
        assert_eq!(p.peek(4), None);
        assert_eq!(p.consume_next_node(), Some(Cell::new(0, 0)));
        assert_eq!(p.consume_next_node(), Some(Cell::new(1, 0)));
        assert_eq!(p.nodes_consumed(), 2);
        assert_eq!(p.nodes_left(), 2);
        assert_eq!(p.peek(0), Some(Cell::new(2, 0)));
    }

    #[test]
    fn exhausts() {
        let mut p = sample();
        while p.consume_next_node().is_some() {}
        assert!(p.is_exhausted());
        assert_eq!(p.destination_cell(), None);
        assert_eq!(p.consume_next_node(), None);
    }

    #[test]
    fn recycle_clears_everything() {
        let pool = PathPool::new();
        let p = sample();
        pool.recycle(p);
        assert_eq!(pool.idle(), 1);
        let p = pool.take();
        assert_eq!(p, Path::default());
        assert!(!p.found());
        assert_eq!(pool.idle(), 0);
    }
}
