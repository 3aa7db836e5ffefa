//! The mapblock: 16³ packed cells plus a local id dictionary.
//!
//! Cell layout (32 bits):
//! - bits `[0, 15)`: dictionary id
//! - bits `[15, 23)`: rotation / state
//! - bits `[23, 31)`: light, low nibble block light, high nibble sunlight

use anyhow::{bail, ensure, Result};
use serde_json::json;
use std::collections::HashMap;

use crate::info::{BlockUpdateInfo, LightNeedsUpdate};
use crate::node::{Node, AIR};
use crate::pos::{MapPos, MAPBLOCK_SIZE};

pub const BLOCK_VOLUME: usize = (MAPBLOCK_SIZE * MAPBLOCK_SIZE * MAPBLOCK_SIZE) as usize;

pub const ID_MASK: u32 = 0x7FFF;
pub const ROT_SHIFT: u32 = 15;
pub const LIGHT_SHIFT: u32 = 23;
/// Id and rotation together; everything that is persisted.
pub const CONTENT_MASK: u32 = 0x7F_FFFF;
pub const MAX_DICTIONARY_LEN: usize = ID_MASK as usize + 1;

#[inline]
pub fn cell_id(cell: u32) -> u16 {
    (cell & ID_MASK) as u16
}

#[inline]
pub fn cell_rot(cell: u32) -> u8 {
    ((cell >> ROT_SHIFT) & 0xFF) as u8
}

#[inline]
pub fn cell_light(cell: u32) -> u8 {
    ((cell >> LIGHT_SHIFT) & 0xFF) as u8
}

#[inline]
pub fn with_light(cell: u32, light: u8) -> u32 {
    (cell & CONTENT_MASK) | ((light as u32) << LIGHT_SHIFT)
}

#[inline]
pub fn pack_cell(id: u16, rot: u8, light: u8) -> u32 {
    (id as u32 & ID_MASK) | ((rot as u32) << ROT_SHIFT) | ((light as u32) << LIGHT_SHIFT)
}

#[inline]
pub fn light_normal(light: u8) -> u8 {
    light & 0x0F
}

#[inline]
pub fn light_sun(light: u8) -> u8 {
    light >> 4
}

#[inline]
pub fn pack_light(normal: u8, sun: u8) -> u8 {
    (normal & 0x0F) | ((sun & 0x0F) << 4)
}

/// Index into the cell array, `[x][y][z]` order.
#[inline]
pub fn cell_index(x: usize, y: usize, z: usize) -> usize {
    x * 256 + y * 16 + z
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub pos: MapPos,
    data: Vec<u32>,
    id_to_is: Vec<String>,
    is_to_id: HashMap<String, u16>,
    pub update_num: u32,
    pub light_update_num: u32,
    pub light_needs_update: LightNeedsUpdate,
    pub sunlit: bool,
    pub is_nil: bool,
    pub dirty: bool,
    pub dont_write_to_db: bool,
}

impl Block {
    /// An empty, air-filled block with no backing data.
    pub fn new(pos: MapPos) -> Self {
        let mut is_to_id = HashMap::new();
        is_to_id.insert(AIR.to_string(), 0);
        Self {
            pos,
            data: vec![0; BLOCK_VOLUME],
            id_to_is: vec![AIR.to_string()],
            is_to_id,
            update_num: 0,
            light_update_num: 0,
            light_needs_update: LightNeedsUpdate::SelfOnly,
            sunlit: true,
            is_nil: true,
            dirty: false,
            dont_write_to_db: false,
        }
    }

    /// Rebuilds a block from raw cells and a dictionary. Every cell id must
    /// resolve in the dictionary, which must start with `air` and hold no
    /// duplicates. Flags are left at their [`Block::new`] defaults except `is_nil`.
    pub fn from_parts(pos: MapPos, cells: Vec<u32>, dictionary: Vec<String>) -> Result<Self> {
        ensure!(
            cells.len() == BLOCK_VOLUME,
            "Block {} has {} cells, expected {}",
            pos,
            cells.len(),
            BLOCK_VOLUME
        );
        ensure!(
            dictionary.first().map(String::as_str) == Some(AIR),
            "Block {} dictionary does not start with air",
            pos
        );
        ensure!(
            dictionary.len() <= MAX_DICTIONARY_LEN,
            "Block {} dictionary has {} entries",
            pos,
            dictionary.len()
        );
        let mut is_to_id = HashMap::with_capacity(dictionary.len());
        for (i, itemstring) in dictionary.iter().enumerate() {
            if is_to_id.insert(itemstring.clone(), i as u16).is_some() {
                bail!("Block {} dictionary repeats '{}'", pos, itemstring);
            }
        }
        if let Some(bad) = cells.iter().find(|&&c| cell_id(c) as usize >= dictionary.len()) {
            bail!("Block {} references unknown id {}", pos, cell_id(*bad));
        }
        Ok(Self {
            data: cells,
            id_to_is: dictionary,
            is_to_id,
            is_nil: false,
            ..Self::new(pos)
        })
    }

    fn check_rel(&self, rel: MapPos) -> Result<usize> {
        ensure!(
            !rel.has_dimension_offset(),
            "Relative position {} in block {} crosses dimensions",
            rel,
            self.pos
        );
        ensure!(
            rel.is_local(),
            "Relative position {} is outside block {}",
            rel,
            self.pos
        );
        Ok(cell_index(rel.x as usize, rel.y as usize, rel.z as usize))
    }

    pub fn get_node_rel(&self, rel: MapPos) -> Result<Node> {
        let cell = self.data[self.check_rel(rel)?];
        Ok(Node::with_rot(self.itemstring(cell_id(cell)).to_string(), cell_rot(cell)))
    }

    /// Writes a node, keeping the cell's light bits.
    pub fn set_node_rel(&mut self, rel: MapPos, node: &Node) -> Result<()> {
        let index = self.check_rel(rel)?;
        let id = self.id_for(&node.itemstring)?;
        let light = cell_light(self.data[index]);
        self.data[index] = pack_cell(id, node.rot, light);

        self.is_nil = false;
        self.dirty = true;
        if node.itemstring != AIR {
            self.sunlit = false;
        }
        Ok(())
    }

    /// Dictionary id for an itemstring, allocating one if needed.
    pub fn id_for(&mut self, itemstring: &str) -> Result<u16> {
        if let Some(&id) = self.is_to_id.get(itemstring) {
            return Ok(id);
        }
        ensure!(
            self.id_to_is.len() < MAX_DICTIONARY_LEN,
            "Block {} dictionary is full ({} itemstrings)",
            self.pos,
            MAX_DICTIONARY_LEN
        );
        let id = self.id_to_is.len() as u16;
        self.id_to_is.push(itemstring.to_string());
        self.is_to_id.insert(itemstring.to_string(), id);
        Ok(id)
    }

    /// Itemstring for an id, or air for ids the dictionary does not hold.
    pub fn itemstring(&self, id: u16) -> &str {
        self.id_to_is.get(id as usize).map(String::as_str).unwrap_or(AIR)
    }

    pub fn dictionary(&self) -> &[String] {
        &self.id_to_is
    }

    #[inline]
    pub fn cell(&self, x: usize, y: usize, z: usize) -> u32 {
        self.data[cell_index(x, y, z)]
    }

    #[inline]
    pub fn light(&self, x: usize, y: usize, z: usize) -> u8 {
        cell_light(self.cell(x, y, z))
    }

    #[inline]
    pub fn set_light(&mut self, x: usize, y: usize, z: usize, light: u8) {
        let i = cell_index(x, y, z);
        self.data[i] = with_light(self.data[i], light);
    }

    pub fn cells(&self) -> &[u32] {
        &self.data
    }

    pub fn cells_mut(&mut self) -> &mut [u32] {
        &mut self.data
    }

    pub fn update_info(&self) -> BlockUpdateInfo {
        BlockUpdateInfo {
            pos: self.pos,
            update_num: self.update_num,
            light_update_num: self.light_update_num,
            light_needs_update: self.light_needs_update,
        }
    }

    pub fn apply_update_info(&mut self, info: &BlockUpdateInfo) {
        self.update_num = info.update_num;
        self.light_update_num = info.light_update_num;
        self.light_needs_update = info.light_needs_update;
    }

    /// Same shape as the `req_mapblock` message, cells as `data[x][y][z]`.
    pub fn as_json(&self) -> serde_json::Value {
        let size = MAPBLOCK_SIZE as usize;
        let data: Vec<Vec<Vec<u32>>> = (0..size)
            .map(|x| (0..size).map(|y| (0..size).map(|z| self.cell(x, y, z)).collect()).collect())
            .collect();
        json!({
            "type": "req_mapblock",
            "data": {
                "pos": self.pos,
                "updateNum": self.update_num,
                "lightUpdateNum": self.light_update_num,
                "lightNeedsUpdate": self.light_needs_update.as_u32(),
                "props": { "sunlit": self.sunlit },
                "IDtoIS": self.id_to_is,
                "data": data,
            }
        })
    }
}
