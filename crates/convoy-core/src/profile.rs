//! Vehicle profiles: footprint, traversal rules and mobility flags.
//!
//! Profiles are registered once into a [`ProfileSet`], which hands out dense
//! [`ProfileId`]s so that per-map data can live in plain arrays.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use crate::geom::{Cell, CellRect};

/// Cost value meaning "cannot be entered".
pub const IMPASSABLE: i32 = -1;

/// Dense profile index, valid for the [`ProfileSet`] that issued it.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProfileId(pub u16);

impl ProfileId {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifier of a faction, used to decide whether road and avoid markings
/// apply to a requester.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FactionId(pub u32);

// ---------------------------------------------------------------------------
// Footprint
// ---------------------------------------------------------------------------

/// The rectangular cell set an agent occupies, independent of facing.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Footprint {
    pub width: i32,
    pub depth: i32,
}

impl Footprint {
    pub const SINGLE: Self = Self { width: 1, depth: 1 };

    pub const fn new(width: i32, depth: i32) -> Self {
        Self { width, depth }
    }

    #[inline]
    pub fn is_single(self) -> bool {
        self.width == 1 && self.depth == 1
    }

    #[inline]
    pub fn max_side(self) -> i32 {
        self.width.max(self.depth)
    }

    /// Cells covered when the agent's root cell is `root`. The root sits at
    /// the centre; on even sides the extra cell goes to the max side.
    #[inline]
    pub fn rect_at(self, root: Cell) -> CellRect {
        let min = root.shift(-(self.width - 1) / 2, -(self.depth - 1) / 2);
        CellRect::with_size(min, self.width, self.depth)
    }
}

impl Default for Footprint {
    fn default() -> Self {
        Self::SINGLE
    }
}

// ---------------------------------------------------------------------------
// Traversal rules
// ---------------------------------------------------------------------------

/// Per-profile movement costs and cost overrides.
///
/// Override maps are keyed by the host's definition names; a value of
/// [`IMPASSABLE`] blocks the matching cells outright.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TraversalRules {
    /// Base cost of a cardinal step.
    pub cardinal_cost: i32,
    /// Base cost of a diagonal step.
    pub diagonal_cost: i32,
    pub terrain: BTreeMap<String, i32>,
    pub biome: BTreeMap<String, i32>,
    pub hilliness: BTreeMap<String, i32>,
    pub river: BTreeMap<String, i32>,
    pub weather: BTreeMap<String, i32>,
}

impl Default for TraversalRules {
    fn default() -> Self {
        Self {
            cardinal_cost: 13,
            diagonal_cost: 18,
            terrain: BTreeMap::new(),
            biome: BTreeMap::new(),
            hilliness: BTreeMap::new(),
            river: BTreeMap::new(),
            weather: BTreeMap::new(),
        }
    }
}

/// Every override on one side must exist with the same value on the other,
/// and vice versa.
fn overrides_match(a: &BTreeMap<String, i32>, b: &BTreeMap<String, i32>) -> bool {
    a.iter().all(|(k, v)| b.get(k) == Some(v)) && b.iter().all(|(k, v)| a.get(k) == Some(v))
}

impl TraversalRules {
    /// Whether two rule sets produce identical per-cell costs, so that their
    /// profiles can share cached grids.
    pub fn cost_equivalent(&self, other: &TraversalRules) -> bool {
        overrides_match(&self.terrain, &other.terrain)
            && overrides_match(&self.biome, &other.biome)
            && overrides_match(&self.hilliness, &other.hilliness)
            && overrides_match(&self.river, &other.river)
            && overrides_match(&self.weather, &other.weather)
    }
}

/// Capability flags that change how the search treats blocked cells.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MobilityFlags {
    /// May plough through destructible obstacles at a surcharge.
    pub can_destroy_obstacles: bool,
    /// Treats deep water as passable; the host's cost table reads this.
    pub amphibious: bool,
}

// ---------------------------------------------------------------------------
// VehicleProfile / ProfileSet
// ---------------------------------------------------------------------------

/// A class of mobile agent. Immutable once registered.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VehicleProfile {
    pub id: ProfileId,
    pub name: String,
    pub footprint: Footprint,
    pub rules: TraversalRules,
    pub mobility: MobilityFlags,
}

impl VehicleProfile {
    /// Start describing a profile; the id is assigned on registration.
    pub fn builder(name: impl Into<String>) -> ProfileBuilder {
        ProfileBuilder {
            name: name.into(),
            footprint: Footprint::SINGLE,
            rules: TraversalRules::default(),
            mobility: MobilityFlags::default(),
        }
    }

    /// Whether the host prices every cell the same for both profiles.
    /// Amphibious profiles see water differently, so they only match each
    /// other.
    pub fn shares_costs_with(&self, other: &VehicleProfile) -> bool {
        self.mobility.amphibious == other.mobility.amphibious && self.rules.cost_equivalent(&other.rules)
    }
}

/// Builder returned by [`VehicleProfile::builder`].
#[derive(Clone, Debug)]
pub struct ProfileBuilder {
    name: String,
    footprint: Footprint,
    rules: TraversalRules,
    mobility: MobilityFlags,
}

impl ProfileBuilder {
    pub fn footprint(mut self, width: i32, depth: i32) -> Self {
        self.footprint = Footprint::new(width, depth);
        self
    }

    pub fn move_costs(mut self, cardinal: i32, diagonal: i32) -> Self {
        self.rules.cardinal_cost = cardinal;
        self.rules.diagonal_cost = diagonal;
        self
    }

    pub fn terrain_cost(mut self, terrain: impl Into<String>, cost: i32) -> Self {
        self.rules.terrain.insert(terrain.into(), cost);
        self
    }

    pub fn biome_cost(mut self, biome: impl Into<String>, cost: i32) -> Self {
        self.rules.biome.insert(biome.into(), cost);
        self
    }

    pub fn hilliness_cost(mut self, hilliness: impl Into<String>, cost: i32) -> Self {
        self.rules.hilliness.insert(hilliness.into(), cost);
        self
    }

    pub fn river_cost(mut self, river: impl Into<String>, cost: i32) -> Self {
        self.rules.river.insert(river.into(), cost);
        self
    }

    pub fn weather_cost(mut self, weather: impl Into<String>, cost: i32) -> Self {
        self.rules.weather.insert(weather.into(), cost);
        self
    }

    pub fn rules(mut self, rules: TraversalRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn mobility(mut self, mobility: MobilityFlags) -> Self {
        self.mobility = mobility;
        self
    }
}

/// Errors raised while registering profiles.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProfileError {
    #[error("profile `{name}` has an empty footprint {width}x{depth}")]
    EmptyFootprint { name: String, width: i32, depth: i32 },
    #[error("profile `{name}` has non-positive move costs")]
    InvalidMoveCost { name: String },
    #[error("profile `{0}` is already registered")]
    DuplicateName(String),
    #[error("profile limit of {0} reached")]
    TooMany(usize),
}

/// The registered profile set. Ids are dense and follow registration order.
#[derive(Clone, Debug, Default)]
pub struct ProfileSet {
    profiles: Vec<VehicleProfile>,
}

impl ProfileSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a profile and return its dense id.
    pub fn register(&mut self, builder: ProfileBuilder) -> Result<ProfileId, ProfileError> {
        let ProfileBuilder {
            name,
            footprint,
            rules,
            mobility,
        } = builder;
        if footprint.width < 1 || footprint.depth < 1 {
            return Err(ProfileError::EmptyFootprint {
                name,
                width: footprint.width,
                depth: footprint.depth,
            });
        }
        if rules.cardinal_cost <= 0 || rules.diagonal_cost <= 0 {
            return Err(ProfileError::InvalidMoveCost { name });
        }
        if self.profiles.iter().any(|p| p.name == name) {
            return Err(ProfileError::DuplicateName(name));
        }
        if self.profiles.len() > u16::MAX as usize {
            return Err(ProfileError::TooMany(self.profiles.len()));
        }
        let id = ProfileId(self.profiles.len() as u16);
        self.profiles.push(VehicleProfile {
            id,
            name,
            footprint,
            rules,
            mobility,
        });
        Ok(id)
    }

    #[inline]
    pub fn get(&self, id: ProfileId) -> Option<&VehicleProfile> {
        self.profiles.get(id.index())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &VehicleProfile> {
        self.profiles.iter()
    }

    pub fn by_name(&self, name: &str) -> Option<&VehicleProfile> {
        self.profiles.iter().find(|p| p.name == name)
    }
}

impl std::ops::Index<ProfileId> for ProfileSet {
    type Output = VehicleProfile;

    fn index(&self, id: ProfileId) -> &VehicleProfile {
        &self.profiles[id.index()]
    }
}
