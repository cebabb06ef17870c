//! Geometry primitives: [`Cell`], [`CellRect`], [`Dir8`] and [`Rot4`].
//!
//! Map coordinates use `x` growing east and `z` growing north, so a cell is
//! `(x, z)` rather than screen-space `(x, y)`.

use std::fmt;
use std::ops::{Add, Mul, Sub};

// ---------------------------------------------------------------------------
// Cell
// ---------------------------------------------------------------------------

/// An integer map cell.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Cell {
    pub x: i32,
    pub z: i32,
}

impl Cell {
    /// Origin (0, 0).
    pub const ZERO: Self = Self { x: 0, z: 0 };

    /// Create a new cell.
    #[inline]
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Return a cell shifted by (dx, dz).
    #[inline]
    pub const fn shift(self, dx: i32, dz: i32) -> Self {
        Self {
            x: self.x + dx,
            z: self.z + dz,
        }
    }

    /// The neighbouring cell in direction `dir`.
    #[inline]
    pub fn step(self, dir: Dir8) -> Self {
        self + dir.offset()
    }

    /// Chebyshev (L∞) distance.
    #[inline]
    pub fn chebyshev(self, other: Cell) -> i32 {
        (self.x - other.x).abs().max((self.z - other.z).abs())
    }

    /// Manhattan (L1) distance.
    #[inline]
    pub fn manhattan(self, other: Cell) -> i32 {
        (self.x - other.x).abs() + (self.z - other.z).abs()
    }

    /// Whether `other` is one of the eight neighbours of this cell.
    #[inline]
    pub fn is_adjacent(self, other: Cell) -> bool {
        self != other && self.chebyshev(other) == 1
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}

impl Add for Cell {
    type Output = Self;
    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.z + rhs.z)
    }
}

impl Sub for Cell {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.z - rhs.z)
    }
}

impl Mul<i32> for Cell {
    type Output = Self;
    #[inline]
    fn mul(self, rhs: i32) -> Self {
        Self::new(self.x * rhs, self.z * rhs)
    }
}

// ---------------------------------------------------------------------------
// CellRect
// ---------------------------------------------------------------------------

/// A half-open rectangle \[min, max). `min` is inclusive, `max` is exclusive.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CellRect {
    pub min: Cell,
    pub max: Cell,
}

impl CellRect {
    /// Create a new rectangle from two corners, canonicalized so that
    /// `min` ≤ `max` on each axis.
    #[inline]
    pub fn new(x0: i32, z0: i32, x1: i32, z1: i32) -> Self {
        Self {
            min: Cell::new(x0.min(x1), z0.min(z1)),
            max: Cell::new(x0.max(x1), z0.max(z1)),
        }
    }

    /// The 1×1 rectangle holding only `c`.
    #[inline]
    pub fn single(c: Cell) -> Self {
        Self {
            min: c,
            max: c.shift(1, 1),
        }
    }

    /// Rectangle of `width` × `depth` cells whose minimum corner is `min`.
    #[inline]
    pub fn with_size(min: Cell, width: i32, depth: i32) -> Self {
        Self {
            min,
            max: min.shift(width, depth),
        }
    }

    #[inline]
    pub fn width(self) -> i32 {
        self.max.x - self.min.x
    }

    #[inline]
    pub fn depth(self) -> i32 {
        self.max.z - self.min.z
    }

    /// Total number of cells.
    #[inline]
    pub fn len(self) -> usize {
        if self.is_empty() {
            return 0;
        }
        (self.width() as usize) * (self.depth() as usize)
    }

    /// Whether the rectangle has zero or negative area.
    #[inline]
    pub fn is_empty(self) -> bool {
        self.min.x >= self.max.x || self.min.z >= self.max.z
    }

    /// Whether `c` is inside the half-open rectangle.
    #[inline]
    pub fn contains(self, c: Cell) -> bool {
        c.x >= self.min.x && c.x < self.max.x && c.z >= self.min.z && c.z < self.max.z
    }

    /// Whether `other` lies entirely inside `self`. Empty rectangles are
    /// inside everything.
    #[inline]
    pub fn contains_rect(self, other: CellRect) -> bool {
        other.is_empty() || self.intersect(other) == other
    }

    /// Intersection of two rectangles; the default (empty) rectangle if
    /// they do not overlap.
    #[inline]
    pub fn intersect(self, other: CellRect) -> Self {
        let r = Self {
            min: Cell::new(self.min.x.max(other.min.x), self.min.z.max(other.min.z)),
            max: Cell::new(self.max.x.min(other.max.x), self.max.z.min(other.max.z)),
        };
        if r.is_empty() { Self::default() } else { r }
    }

    /// Grow (or shrink, for negative `n`) the rectangle by `n` cells on
    /// every side.
    #[inline]
    pub fn expand(self, n: i32) -> Self {
        let r = Self {
            min: self.min.shift(-n, -n),
            max: self.max.shift(n, n),
        };
        if r.is_empty() { Self::default() } else { r }
    }

    /// Whether `c` is one of the four corner cells of the rectangle.
    #[inline]
    pub fn is_corner(self, c: Cell) -> bool {
        (c.x == self.min.x || c.x == self.max.x - 1) && (c.z == self.min.z || c.z == self.max.z - 1)
    }

    /// The cell of the rectangle closest to `c` (`c` itself when inside).
    #[inline]
    pub fn clamp(self, c: Cell) -> Cell {
        Cell::new(
            c.x.clamp(self.min.x, self.max.x - 1),
            c.z.clamp(self.min.z, self.max.z - 1),
        )
    }

    /// Centre cell (rounded toward `min`).
    #[inline]
    pub fn center(self) -> Cell {
        Cell::new(
            self.min.x + (self.width() - 1) / 2,
            self.min.z + (self.depth() - 1) / 2,
        )
    }

    /// Row-major iterator over every cell.
    #[inline]
    pub fn iter(self) -> CellRectIter {
        CellRectIter {
            rect: self,
            cur: self.min,
        }
    }
}

impl IntoIterator for CellRect {
    type Item = Cell;
    type IntoIter = CellRectIter;
    #[inline]
    fn into_iter(self) -> CellRectIter {
        self.iter()
    }
}

impl fmt::Display for CellRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}-{})", self.min, self.max)
    }
}

/// Row-major iterator over the cells of a [`CellRect`].
#[derive(Clone, Debug)]
pub struct CellRectIter {
    rect: CellRect,
    cur: Cell,
}

impl Iterator for CellRectIter {
    type Item = Cell;

    #[inline]
    fn next(&mut self) -> Option<Cell> {
        if self.cur.z >= self.rect.max.z || self.rect.is_empty() {
            return None;
        }
        let c = self.cur;
        self.cur.x += 1;
        if self.cur.x >= self.rect.max.x {
            self.cur.x = self.rect.min.x;
            self.cur.z += 1;
        }
        Some(c)
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.rect.is_empty() || self.cur.z >= self.rect.max.z {
            return (0, Some(0));
        }
        let w = self.rect.width() as usize;
        let remaining_in_row = (self.rect.max.x - self.cur.x) as usize;
        let remaining_rows = (self.rect.max.z - self.cur.z - 1) as usize;
        let total = remaining_in_row + remaining_rows * w;
        (total, Some(total))
    }
}

impl ExactSizeIterator for CellRectIter {}

// ---------------------------------------------------------------------------
// Dir8
// ---------------------------------------------------------------------------

/// One of the eight compass directions, clockwise from north.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Dir8 {
    North,
    NorthEast,
    East,
    SouthEast,
    South,
    SouthWest,
    West,
    NorthWest,
}

impl Dir8 {
    pub const ALL: [Dir8; 8] = [
        Dir8::North,
        Dir8::NorthEast,
        Dir8::East,
        Dir8::SouthEast,
        Dir8::South,
        Dir8::SouthWest,
        Dir8::West,
        Dir8::NorthWest,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[inline]
    pub const fn from_index(i: usize) -> Self {
        Self::ALL[i % 8]
    }

    #[inline]
    pub const fn offset(self) -> Cell {
        match self {
            Dir8::North => Cell::new(0, 1),
            Dir8::NorthEast => Cell::new(1, 1),
            Dir8::East => Cell::new(1, 0),
            Dir8::SouthEast => Cell::new(1, -1),
            Dir8::South => Cell::new(0, -1),
            Dir8::SouthWest => Cell::new(-1, -1),
            Dir8::West => Cell::new(-1, 0),
            Dir8::NorthWest => Cell::new(-1, 1),
        }
    }

    #[inline]
    pub const fn is_diagonal(self) -> bool {
        (self as usize) % 2 == 1
    }

    /// Direction of a unit step from `from` to `to`, if they are adjacent.
    pub fn between(from: Cell, to: Cell) -> Option<Dir8> {
        let d = to - from;
        Dir8::ALL.into_iter().find(|dir| dir.offset() == d)
    }

    /// Number of 45° turns (0..=4) between two directions.
    #[inline]
    pub fn octants_between(self, other: Dir8) -> u32 {
        let diff = (self.index() as i32 - other.index() as i32).rem_euclid(8) as u32;
        diff.min(8 - diff)
    }
}

// ---------------------------------------------------------------------------
// Rot4
// ---------------------------------------------------------------------------

/// Facing of an agent. Footprints do not depend on facing; rotation only
/// drives presentation at the host.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Rot4 {
    #[default]
    North,
    East,
    South,
    West,
}

impl Rot4 {
    /// Facing that best matches a movement direction. Diagonals resolve to
    /// their horizontal component.
    pub fn from_dir(dir: Dir8) -> Self {
        match dir {
            Dir8::North => Rot4::North,
            Dir8::South => Rot4::South,
            Dir8::East | Dir8::NorthEast | Dir8::SouthEast => Rot4::East,
            Dir8::West | Dir8::NorthWest | Dir8::SouthWest => Rot4::West,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_arithmetic() {
        let a = Cell::new(1, 2);
        let b = Cell::new(3, 4);
        assert_eq!(a + b, Cell::new(4, 6));
        assert_eq!(b - a, Cell::new(2, 2));
        assert_eq!(a * 3, Cell::new(3, 6));
        assert_eq!(a.chebyshev(b), 2);
        assert_eq!(a.manhattan(b), 4);
    }

    #[test]
    fn rect_basics() {
        let r = CellRect::new(0, 0, 3, 2);
        assert_eq!(r.width(), 3);
        assert_eq!(r.depth(), 2);
        assert_eq!(r.len(), 6);
        assert!(r.contains(Cell::new(2, 1)));
        assert!(!r.contains(Cell::new(3, 0)));
        assert!(!r.contains(Cell::new(0, 2)));
    }

    #[test]
    fn rect_canonicalizes() {
        let r = CellRect::new(3, 2, 0, 0);
        assert_eq!(r.min, Cell::new(0, 0));
        assert_eq!(r.max, Cell::new(3, 2));
    }

    #[test]
    fn rect_iter_row_major() {
        let cells: Vec<_> = CellRect::new(0, 0, 3, 2).iter().collect();
        assert_eq!(cells.len(), 6);
        assert_eq!(cells[0], Cell::new(0, 0));
        assert_eq!(cells[3], Cell::new(0, 1));
        assert_eq!(cells[5], Cell::new(2, 1));
    }

    #[test]
    fn rect_intersect_and_expand() {
        let a = CellRect::new(0, 0, 4, 4);
        assert_eq!(a.intersect(CellRect::new(2, 2, 6, 6)), CellRect::new(2, 2, 4, 4));
        assert!(a.intersect(CellRect::new(5, 5, 7, 7)).is_empty());
        assert_eq!(CellRect::single(Cell::new(2, 2)).expand(1), CellRect::new(1, 1, 4, 4));
        assert!(CellRect::single(Cell::new(2, 2)).expand(-1).is_empty());
    }

    #[test]
    fn rect_corners_and_clamp() {
        let r = CellRect::new(1, 1, 4, 4);
        assert!(r.is_corner(Cell::new(1, 1)));
        assert!(r.is_corner(Cell::new(3, 1)));
        assert!(!r.is_corner(Cell::new(2, 1)));
        assert_eq!(r.clamp(Cell::new(-5, 2)), Cell::new(1, 2));
        assert_eq!(r.clamp(Cell::new(9, 9)), Cell::new(3, 3));
    }

    #[test]
    fn dir_between_and_turns() {
        assert_eq!(Dir8::between(Cell::ZERO, Cell::new(1, 1)), Some(Dir8::NorthEast));
        assert_eq!(Dir8::between(Cell::ZERO, Cell::new(2, 0)), None);
        assert_eq!(Dir8::North.octants_between(Dir8::South), 4);
        assert_eq!(Dir8::North.octants_between(Dir8::NorthWest), 1);
        assert_eq!(Dir8::West.octants_between(Dir8::NorthEast), 3);
        assert!(Dir8::SouthWest.is_diagonal());
        assert!(!Dir8::East.is_diagonal());
    }
}
