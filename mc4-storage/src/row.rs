//! Encoding of the `map` table's payload columns.
//!
//! Row format 1 stores 4096 little-endian u64 cells in `[x][y][z]` order,
//! light bits included.
//! Row format 2 stores little-endian run words (see `mc4_map::compressed`)
//! and no light.

use anyhow::{bail, ensure, Context, Result};
use mc4_map::block::{BLOCK_VOLUME, LIGHT_SHIFT};
use mc4_map::compressed::{decode_cells, encode_cells};
use mc4_map::{Block, LightNeedsUpdate, MapPos};
use std::collections::BTreeMap;

pub const ROW_FORMAT_RAW: i64 = 1;
pub const ROW_FORMAT_RLE: i64 = 2;

/// Id, rotation and light bits of a packed cell.
const RAW_CELL_MASK: u32 = (1 << (LIGHT_SHIFT + 8)) - 1;

/// Columns of one stored block, as read from or written to the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRow {
    pub data: Vec<u8>,
    pub id_to_is: String,
    pub sunlit: bool,
    pub dirty: bool,
    pub version: i64,
}

impl BlockRow {
    pub fn encode(block: &Block) -> Result<Self> {
        let words = encode_cells(block.cells());
        let mut data = Vec::with_capacity(words.len() * 4);
        for word in words {
            data.extend_from_slice(&word.to_le_bytes());
        }
        Ok(Self {
            data,
            id_to_is: encode_dictionary(block.dictionary())?,
            sunlit: block.sunlit,
            dirty: block.dirty,
            version: ROW_FORMAT_RLE,
        })
    }

    /// Rebuilds the block. Light kept by format 1 rows is only a starting
    /// point; the result always needs a relight.
    pub fn decode(&self, pos: MapPos) -> Result<Block> {
        let cells = match self.version {
            ROW_FORMAT_RAW => decode_raw_cells(&self.data)?,
            ROW_FORMAT_RLE => decode_rle_cells(&self.data)?,
            other => bail!("Unknown row format {}", other),
        };
        let dictionary = decode_dictionary(&self.id_to_is)?;
        let mut block = Block::from_parts(pos, cells, dictionary)?;
        block.sunlit = self.sunlit;
        block.dirty = self.dirty;
        block.light_needs_update = LightNeedsUpdate::SelfOnly;
        Ok(block)
    }
}

fn decode_raw_cells(data: &[u8]) -> Result<Vec<u32>> {
    ensure!(
        data.len() == BLOCK_VOLUME * 8,
        "Raw row payload is {} bytes, expected {}",
        data.len(),
        BLOCK_VOLUME * 8
    );
    Ok(data
        .chunks_exact(8)
        .map(|b| {
            let v = u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]);
            (v as u32) & RAW_CELL_MASK
        })
        .collect())
}

fn decode_rle_cells(data: &[u8]) -> Result<Vec<u32>> {
    ensure!(data.len() % 4 == 0, "Run payload length {} is not word aligned", data.len());
    let words: Vec<u32> = data
        .chunks_exact(4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    decode_cells(&words)
}

/// Raw (format 1) payload for a block. Only used to produce legacy rows.
pub fn encode_raw_cells(cells: &[u32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(cells.len() * 8);
    for &cell in cells {
        out.extend_from_slice(&((cell & RAW_CELL_MASK) as u64).to_le_bytes());
    }
    out
}

/// `["air", "stone"]` -> `{"0":"air","1":"stone"}`
pub fn encode_dictionary(dictionary: &[String]) -> Result<String> {
    let map: BTreeMap<usize, &str> = dictionary.iter().map(String::as_str).enumerate().collect();
    serde_json::to_string(&map).context("Failed to encode dictionary")
}

pub fn decode_dictionary(json: &str) -> Result<Vec<String>> {
    let map: BTreeMap<usize, String> = serde_json::from_str(json).context("Failed to parse dictionary")?;
    let mut out = Vec::with_capacity(map.len());
    for (expected, (id, itemstring)) in map.into_iter().enumerate() {
        ensure!(id == expected, "Dictionary is missing id {}", expected);
        out.push(itemstring);
    }
    Ok(out)
}
