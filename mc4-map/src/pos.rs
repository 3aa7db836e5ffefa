//! World coordinates and block addressing.
//!
//! A [`MapPos`] carries three spatial axes (x, y, z) and three dimension
//! axes (w, world, universe). Only the spatial axes take part in block
//! addressing; the dimension axes select which parallel grid is meant.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Edge length of a block on every spatial axis.
pub const MAPBLOCK_SIZE: i32 = 16;

/// Block coordinates whose nodes all fit in `i32`. These are exactly the
/// values [`MapPos::block`] can produce.
pub const BLOCK_COORD_MIN: i32 = i32::MIN / MAPBLOCK_SIZE;
pub const BLOCK_COORD_MAX: i32 = i32::MAX / MAPBLOCK_SIZE;

/// Floor division, rounding toward negative infinity.
#[inline]
pub fn floor_div(p: i32, extent: i32) -> i32 {
    p.div_euclid(extent)
}

/// Remainder matching [`floor_div`], always in `[0, extent)`.
#[inline]
pub fn floor_mod(p: i32, extent: i32) -> i32 {
    p.rem_euclid(extent)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct MapPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    #[serde(default)]
    pub w: i32,
    #[serde(default)]
    pub world: i32,
    #[serde(default)]
    pub universe: i32,
}

impl MapPos {
    pub const fn new(x: i32, y: i32, z: i32, w: i32, world: i32, universe: i32) -> Self {
        Self { x, y, z, w, world, universe }
    }

    /// Spatial position in the default dimension (all dimension axes 0).
    pub const fn at(x: i32, y: i32, z: i32) -> Self {
        Self::new(x, y, z, 0, 0, 0)
    }

    /// Same dimension axes as `self`, different spatial axes.
    pub const fn with_spatial(&self, x: i32, y: i32, z: i32) -> Self {
        Self::new(x, y, z, self.w, self.world, self.universe)
    }

    pub const fn offset(&self, dx: i32, dy: i32, dz: i32) -> Self {
        self.with_spatial(self.x + dx, self.y + dy, self.z + dz)
    }

    /// `None` when any axis would leave the `i32` range.
    pub fn checked_offset(&self, dx: i32, dy: i32, dz: i32) -> Option<Self> {
        Some(self.with_spatial(
            self.x.checked_add(dx)?,
            self.y.checked_add(dy)?,
            self.z.checked_add(dz)?,
        ))
    }

    /// Coordinate of the block containing this node position.
    pub fn block(&self) -> MapPos {
        self.with_spatial(
            floor_div(self.x, MAPBLOCK_SIZE),
            floor_div(self.y, MAPBLOCK_SIZE),
            floor_div(self.z, MAPBLOCK_SIZE),
        )
    }

    /// Offset of this node inside its block. Dimension axes are zeroed so the
    /// result is a valid relative position for [`crate::Block`] accessors.
    pub fn local(&self) -> MapPos {
        MapPos::at(
            floor_mod(self.x, MAPBLOCK_SIZE),
            floor_mod(self.y, MAPBLOCK_SIZE),
            floor_mod(self.z, MAPBLOCK_SIZE),
        )
    }

    /// `(block coordinate, local offset)` for a node position.
    pub fn split(&self) -> (MapPos, MapPos) {
        (self.block(), self.local())
    }

    /// Node position of the block's (0, 0, 0) corner, treating `self` as a
    /// block coordinate. Fails outside `BLOCK_COORD_MIN..=BLOCK_COORD_MAX`.
    pub fn block_origin(&self) -> Result<MapPos> {
        let scale = |v: i32| v.checked_mul(MAPBLOCK_SIZE);
        let origin = match (scale(self.x), scale(self.y), scale(self.z)) {
            (Some(x), Some(y), Some(z)) => Some(self.with_spatial(x, y, z)),
            _ => None,
        };
        origin.with_context(|| format!("Block {} is outside the addressable range", self))
    }

    /// True when `self`, as a block coordinate, has addressable nodes.
    pub fn is_block_in_range(&self) -> bool {
        let range = BLOCK_COORD_MIN..=BLOCK_COORD_MAX;
        range.contains(&self.x) && range.contains(&self.y) && range.contains(&self.z)
    }

    pub fn same_dimension(&self, other: &MapPos) -> bool {
        self.w == other.w && self.world == other.world && self.universe == other.universe
    }

    pub fn has_dimension_offset(&self) -> bool {
        self.w != 0 || self.world != 0 || self.universe != 0
    }

    /// True when every spatial axis lies inside a single block.
    pub fn is_local(&self) -> bool {
        (0..MAPBLOCK_SIZE).contains(&self.x)
            && (0..MAPBLOCK_SIZE).contains(&self.y)
            && (0..MAPBLOCK_SIZE).contains(&self.z)
    }
}

impl fmt::Display for MapPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}, {}, {}, {})",
            self.x, self.y, self.z, self.w, self.world, self.universe
        )
    }
}
