use std::collections::BinaryHeap;
use std::ops::{Deref, DerefMut};
use std::sync::Mutex;

use convoy_core::{Cell, CellRect};

/// Sentinel cost meaning "unreachable".
pub const UNREACHABLE: i32 = i32::MAX;

/// No incoming direction (start node).
pub(crate) const NO_DIR: u8 = u8::MAX;

// ---------------------------------------------------------------------------
// Internal node for the priority-queue searches
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub(crate) struct Node {
    pub(crate) g: i32,
    pub(crate) f: i32,
    pub(crate) parent: usize,
    pub(crate) generation: u32,
    pub(crate) open: bool,
    pub(crate) dir: u8,
}

impl Default for Node {
    fn default() -> Self {
        Self {
            g: 0,
            f: 0,
            parent: usize::MAX,
            generation: 0,
            open: false,
            dir: NO_DIR,
        }
    }
}

/// Reference into a node array, ordered by `f` for use in `BinaryHeap`.
#[derive(Clone, Copy, Eq, PartialEq)]
pub(crate) struct NodeRef {
    pub(crate) idx: usize,
    pub(crate) f: i32,
}

impl Ord for NodeRef {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse so BinaryHeap (max-heap) pops smallest f first.
        other.f.cmp(&self.f).then_with(|| other.idx.cmp(&self.idx))
    }
}

impl PartialOrd for NodeRef {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

// ---------------------------------------------------------------------------
// SearchContext
// ---------------------------------------------------------------------------

/// Scratch space for one search at a time.
///
/// Node arrays are invalidated lazily through a generation counter, so
/// reusing a context costs nothing after the first search on a map.
pub struct SearchContext {
    pub(crate) bounds: CellRect,
    pub(crate) width: usize,
    pub(crate) nodes: Vec<Node>,
    pub(crate) generation: u32,
    pub(crate) open: BinaryHeap<NodeRef>,
    /// Region distance table for the region-heuristic restart.
    pub(crate) region_dist: Vec<i32>,
}

impl SearchContext {
    pub fn new(bounds: CellRect) -> Self {
        Self {
            bounds,
            width: bounds.width().max(0) as usize,
            nodes: vec![Node::default(); bounds.len()],
            generation: 0,
            open: BinaryHeap::new(),
            region_dist: Vec::new(),
        }
    }

    /// Rebind to another map rectangle, keeping capacity when it fits.
    pub fn set_bounds(&mut self, bounds: CellRect) {
        let new_len = bounds.len();
        self.bounds = bounds;
        self.width = bounds.width().max(0) as usize;
        if new_len <= self.nodes.len() {
            self.generation = self.generation.wrapping_add(1);
            return;
        }
        self.nodes.clear();
        self.nodes.resize(new_len, Node::default());
        self.generation = 0;
    }

    #[inline]
    pub fn bounds(&self) -> CellRect {
        self.bounds
    }

    /// Start a new search: every node from earlier searches becomes stale.
    pub(crate) fn begin(&mut self) -> u32 {
        self.generation = self.generation.wrapping_add(1);
        if self.generation == 0 {
            // Wrapped: old stamps could alias the new generation.
            for n in self.nodes.iter_mut() {
                n.generation = 0;
            }
            self.generation = 1;
        }
        self.open.clear();
        self.generation
    }

    #[inline]
    pub(crate) fn idx(&self, c: Cell) -> Option<usize> {
        if !self.bounds.contains(c) {
            return None;
        }
        let x = (c.x - self.bounds.min.x) as usize;
        let z = (c.z - self.bounds.min.z) as usize;
        Some(z * self.width + x)
    }

    #[inline]
    pub(crate) fn cell(&self, idx: usize) -> Cell {
        let x = (idx % self.width) as i32 + self.bounds.min.x;
        let z = (idx / self.width) as i32 + self.bounds.min.z;
        Cell::new(x, z)
    }
}

// ---------------------------------------------------------------------------
// ContextPool
// ---------------------------------------------------------------------------

/// Pool of [`SearchContext`]s so concurrent searches never share scratch
/// state.
#[derive(Default)]
pub struct ContextPool {
    free: Mutex<Vec<SearchContext>>,
}

impl ContextPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrow a context bound to `bounds`; it returns to the pool on drop.
    pub fn lease(&self, bounds: CellRect) -> ContextLease<'_> {
        let pooled = self
            .free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop();
        let ctx = match pooled {
            Some(mut ctx) => {
                if ctx.bounds != bounds {
                    ctx.set_bounds(bounds);
                }
                ctx
            }
            None => SearchContext::new(bounds),
        };
        ContextLease { pool: self, ctx }
    }

    /// Number of idle contexts.
    pub fn idle(&self) -> usize {
        self.free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

/// A leased [`SearchContext`].
pub struct ContextLease<'a> {
    pool: &'a ContextPool,
    ctx: SearchContext,
}

impl Deref for ContextLease<'_> {
    type Target = SearchContext;

    fn deref(&self) -> &SearchContext {
        &self.ctx
    }
}

impl DerefMut for ContextLease<'_> {
    fn deref_mut(&mut self) -> &mut SearchContext {
        &mut self.ctx
    }
}

impl Drop for ContextLease<'_> {
    fn drop(&mut self) {
        // An empty context holds no allocation.
        let ctx = std::mem::replace(&mut self.ctx, SearchContext::new(CellRect::default()));
        self.pool
            .free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(ctx);
    }
}
