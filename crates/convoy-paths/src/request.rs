use convoy_core::{Cell, CellRect, FactionId, Footprint, ProfileId};
use thiserror::Error;

/// Destination semantics.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EndMode {
    /// Stand on the destination cell.
    #[default]
    ExactCell,
    /// Stand next to the destination rectangle.
    Touch,
    /// Stand anywhere inside the destination rectangle.
    AnyCellInRect,
}

/// Where a search should end.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Destination {
    pub rect: CellRect,
    pub mode: EndMode,
}

impl Destination {
    pub fn cell(c: Cell) -> Self {
        Self {
            rect: CellRect::single(c),
            mode: EndMode::ExactCell,
        }
    }

    pub fn touch(rect: CellRect) -> Self {
        Self {
            rect,
            mode: EndMode::Touch,
        }
    }

    pub fn area(rect: CellRect) -> Self {
        Self {
            rect,
            mode: EndMode::AnyCellInRect,
        }
    }

    /// Representative cell used for distance checks.
    #[inline]
    pub fn anchor(&self) -> Cell {
        self.rect.center()
    }

    /// Rectangle that contains every accepted cell.
    #[inline]
    pub fn goal_rect(&self) -> CellRect {
        match self.mode {
            EndMode::Touch => self.rect.expand(1),
            EndMode::ExactCell | EndMode::AnyCellInRect => self.rect,
        }
    }

    /// Whether an agent with `footprint` rooted at `c` has arrived.
    ///
    /// In touch mode the corners of the ring around the rectangle only count
    /// for 1×1 footprints; anything larger cannot sit diagonally against the
    /// target.
    pub fn accepts(&self, c: Cell, footprint: Footprint) -> bool {
        match self.mode {
            EndMode::ExactCell | EndMode::AnyCellInRect => self.rect.contains(c),
            EndMode::Touch => {
                let ring = self.rect.expand(1);
                ring.contains(c)
                    && !self.rect.contains(c)
                    && (footprint.is_single() || !ring.is_corner(c))
            }
        }
    }

    /// Same destination moved by `delta`.
    pub fn translated(&self, delta: Cell) -> Self {
        Self {
            rect: CellRect {
                min: self.rect.min + delta,
                max: self.rect.max + delta,
            },
            mode: self.mode,
        }
    }
}

/// A route request. Owned and `Copy` so it can travel to the worker.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PathRequest {
    pub start: Cell,
    pub destination: Destination,
    pub profile: ProfileId,
    /// Faction of the requester; roads and avoid markings of hostile
    /// factions are ignored.
    pub faction: Option<FactionId>,
    /// Plough through destructible obstacles, if the profile can.
    pub destroy_obstacles: bool,
    /// Cells held by a stationary agent, treated as impassable. Ignored
    /// when it overlaps the start footprint.
    pub avoid: Option<CellRect>,
}

impl PathRequest {
    pub fn new(profile: ProfileId, start: Cell, destination: Destination) -> Self {
        Self {
            start,
            destination,
            profile,
            faction: None,
            destroy_obstacles: false,
            avoid: None,
        }
    }

    pub fn with_faction(mut self, faction: FactionId) -> Self {
        self.faction = Some(faction);
        self
    }

    pub fn destroying_obstacles(mut self) -> Self {
        self.destroy_obstacles = true;
        self
    }

    pub fn avoiding(mut self, rect: CellRect) -> Self {
        self.avoid = Some(rect);
        self
    }
}

/// Why a search produced no route.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("start cell {0} is outside the map or blocked")]
    InvalidStart(Cell),
    #[error("destination {0} does not overlap the map")]
    InvalidDestination(CellRect),
    #[error("no route from {from} to {to}")]
    NoRoute { from: Cell, to: CellRect },
    #[error("search from {from} to {to} exhausted after {closed} nodes")]
    Exhausted { from: Cell, to: CellRect, closed: usize },
    #[error("search cancelled")]
    Cancelled,
    #[error("grids for profile {0} are not built")]
    GridsUnavailable(ProfileId),
}

impl PathError {
    /// Errors that stem from a caller bug rather than map state.
    pub fn is_invalid_request(&self) -> bool {
        matches!(self, PathError::InvalidStart(_) | PathError::InvalidDestination(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touch_excludes_inside_and_big_corners() {
        let d = Destination::touch(CellRect::new(2, 2, 4, 4));
        let one = Footprint::SINGLE;
        let big = Footprint::new(3, 3);
        assert!(d.accepts(Cell::new(1, 2), one));
        assert!(!d.accepts(Cell::new(2, 2), one));
        assert!(d.accepts(Cell::new(1, 1), one));
        assert!(!d.accepts(Cell::new(1, 1), big));
        assert!(d.accepts(Cell::new(4, 3), big));
        assert!(!d.accepts(Cell::new(5, 3), one));
    }

    #[test]
    fn exact_and_area() {
        let d = Destination::cell(Cell::new(5, 0));
        assert!(d.accepts(Cell::new(5, 0), Footprint::SINGLE));
        assert!(!d.accepts(Cell::new(4, 0), Footprint::SINGLE));
        let a = Destination::area(CellRect::new(0, 0, 2, 2));
        assert!(a.accepts(Cell::new(1, 1), Footprint::new(2, 2)));
        assert_eq!(a.goal_rect(), a.rect);
        assert_eq!(Destination::touch(a.rect).goal_rect(), CellRect::new(-1, -1, 3, 3));
    }
}
