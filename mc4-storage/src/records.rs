//! Auxiliary records kept next to the block table.

use mc4_map::MapPos;
use serde::{Deserialize, Serialize};

/// Per-node metadata blob (chest contents and the like).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMeta {
    pub pos: MapPos,
    pub data: serde_json::Value,
}

impl NodeMeta {
    pub fn new(pos: MapPos, data: serde_json::Value) -> Self {
        Self { pos, data }
    }
}

/// One login method for a player. `db_unique_id` is assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PlayerAuthInfo {
    pub db_unique_id: Option<i64>,
    pub kind: String,
    pub login_name: String,
    pub auth_id: String,
    pub data: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EntityPos {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: i32,
    pub world: i32,
    pub universe: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self { x: 0.0, y: 0.0, z: 0.0, w: 1.0 }
    }
}

/// Persisted player state, stored as JSON in `player_data.data`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlayerData {
    #[serde(skip)]
    pub auth_id: String,
    pub name: String,
    pub pos: EntityPos,
    pub vel: EntityPos,
    pub rot: Quaternion,
}

impl PlayerData {
    pub fn new(auth_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            auth_id: auth_id.into(),
            name: name.into(),
            ..Default::default()
        }
    }
}
