//! Node values and the world ruleset (per-itemstring node definitions).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

pub const AIR: &str = "air";
pub const NOTHING: &str = "nothing";

/// Brightest value either light channel can hold.
pub const LIGHT_MAX: u8 = 15;

/// One voxel as seen by callers: an itemstring and its rotation/state byte.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Node {
    pub itemstring: String,
    pub rot: u8,
}

impl Node {
    pub fn new(itemstring: impl Into<String>) -> Self {
        Self { itemstring: itemstring.into(), rot: 0 }
    }

    pub fn with_rot(itemstring: impl Into<String>, rot: u8) -> Self {
        Self { itemstring: itemstring.into(), rot }
    }

    pub fn air() -> Self {
        Self::new(AIR)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node '{}' rot={}", self.itemstring, self.rot)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDef {
    #[serde(skip)]
    pub itemstring: String,
    pub transparent: bool,
    pub pass_sunlight: bool,
    pub light_level: u8,
    #[serde(default)]
    pub is_fluid: bool,
}

impl NodeDef {
    /// Opaque, dark definition used for anything the ruleset does not know.
    pub fn nothing() -> Self {
        Self {
            itemstring: NOTHING.to_string(),
            transparent: false,
            pass_sunlight: false,
            light_level: 0,
            is_fluid: false,
        }
    }

    pub fn air() -> Self {
        Self {
            itemstring: AIR.to_string(),
            transparent: true,
            pass_sunlight: true,
            light_level: 0,
            is_fluid: false,
        }
    }

    /// Lets sunlight fall straight through without attenuation.
    pub fn is_sun_column(&self) -> bool {
        self.transparent && self.pass_sunlight
    }

    /// True when swapping one definition for the other cannot change lighting.
    pub fn same_lighting(&self, other: &NodeDef) -> bool {
        self.transparent == other.transparent
            && self.pass_sunlight == other.pass_sunlight
            && self.light_level == other.light_level
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DefsFile {
    node_defs: HashMap<String, NodeDef>,
}

/// Immutable table of node definitions, built once and shared by handle.
#[derive(Debug, Clone)]
pub struct Ruleset {
    defs: HashMap<String, NodeDef>,
    nothing: NodeDef,
}

impl Default for Ruleset {
    fn default() -> Self {
        Self::from_defs(Vec::new())
    }
}

impl Ruleset {
    /// Builds a ruleset from definitions. `air` is always present; a
    /// definition supplied for it replaces the built-in one.
    pub fn from_defs(defs: impl IntoIterator<Item = NodeDef>) -> Self {
        let mut map = HashMap::new();
        map.insert(AIR.to_string(), NodeDef::air());
        for mut def in defs {
            def.light_level = def.light_level.min(LIGHT_MAX);
            map.insert(def.itemstring.clone(), def);
        }
        Self { defs: map, nothing: NodeDef::nothing() }
    }

    /// Parses `{"nodeDefs": {"<itemstring>": {...}}}`.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let file: DefsFile = serde_json::from_str(json).context("Failed to parse node definitions")?;
        let defs = file.node_defs.into_iter().map(|(itemstring, mut def)| {
            def.itemstring = itemstring;
            def
        });
        let ruleset = Self::from_defs(defs);
        log::info!("Loaded {} node definitions", ruleset.len());
        Ok(ruleset)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read node definitions from {}", path.display()))?;
        Self::from_json_str(&json)
    }

    pub fn get(&self, itemstring: &str) -> &NodeDef {
        self.defs.get(itemstring).unwrap_or(&self.nothing)
    }

    /// Definition handed out for unknown itemstrings.
    pub fn unknown(&self) -> &NodeDef {
        &self.nothing
    }

    pub fn contains(&self, itemstring: &str) -> bool {
        self.defs.contains_key(itemstring)
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}
