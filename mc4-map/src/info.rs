use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::pos::MapPos;

/// How much lighting work a block is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(into = "u32", try_from = "u32")]
pub enum LightNeedsUpdate {
    Clean,
    /// Recompute this block only.
    #[default]
    SelfOnly,
    /// Recompute this block and its 26 neighbours.
    Neighborhood,
}

impl LightNeedsUpdate {
    pub fn as_u32(self) -> u32 {
        match self {
            Self::Clean => 0,
            Self::SelfOnly => 1,
            Self::Neighborhood => 2,
        }
    }

    pub fn is_pending(self) -> bool {
        self != Self::Clean
    }
}

impl From<LightNeedsUpdate> for u32 {
    fn from(value: LightNeedsUpdate) -> Self {
        value.as_u32()
    }
}

impl TryFrom<u32> for LightNeedsUpdate {
    type Error = anyhow::Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(Self::Clean),
            1 => Ok(Self::SelfOnly),
            2 => Ok(Self::Neighborhood),
            other => bail!("Invalid light_needs_update value {}", other),
        }
    }
}

/// The staleness-relevant subset of a block's metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockUpdateInfo {
    pub pos: MapPos,
    pub update_num: u32,
    pub light_update_num: u32,
    pub light_needs_update: LightNeedsUpdate,
}

impl BlockUpdateInfo {
    /// Info for a block nobody has seen yet.
    pub fn fresh(pos: MapPos) -> Self {
        Self {
            pos,
            update_num: 0,
            light_update_num: 0,
            light_needs_update: LightNeedsUpdate::SelfOnly,
        }
    }
}
