//! Run-length encoded blocks and their binary wire layout.

use anyhow::{bail, ensure, Context, Result};

use crate::block::{cell_index, cell_light, Block, BLOCK_VOLUME, CONTENT_MASK, LIGHT_SHIFT};
use crate::info::LightNeedsUpdate;
use crate::pos::{MapPos, MAPBLOCK_SIZE};

pub const WIRE_MAGIC: u32 = 0xABCD_5678;

pub const CELL_RUN_MAX: usize = 512;
pub const LIGHT_RUN_MAX: usize = 256;
const CELL_RUN_SHIFT: u32 = 23;
const LIGHT_RUN_SHIFT: u32 = 8;

/// Cell indices in compression order: y outermost, then x, then z.
fn scan_order() -> impl Iterator<Item = usize> {
    let size = MAPBLOCK_SIZE as usize;
    (0..size).flat_map(move |y| (0..size).flat_map(move |x| (0..size).map(move |z| cell_index(x, y, z))))
}

/// Encodes id+rotation runs. The light bits of every cell are ignored.
pub fn encode_cells(cells: &[u32]) -> Vec<u32> {
    let mut out = Vec::new();
    let mut run: Option<(u32, usize)> = None;
    for i in scan_order() {
        let val = cells[i] & CONTENT_MASK;
        run = match run {
            Some((v, len)) if v == val && len < CELL_RUN_MAX => Some((v, len + 1)),
            Some((v, len)) => {
                out.push(v | ((len as u32 - 1) << CELL_RUN_SHIFT));
                Some((val, 1))
            }
            None => Some((val, 1)),
        };
    }
    if let Some((v, len)) = run {
        out.push(v | ((len as u32 - 1) << CELL_RUN_SHIFT));
    }
    out
}

pub fn encode_light(cells: &[u32]) -> Vec<u16> {
    let mut out = Vec::new();
    let mut run: Option<(u16, usize)> = None;
    for i in scan_order() {
        let val = cell_light(cells[i]) as u16;
        run = match run {
            Some((v, len)) if v == val && len < LIGHT_RUN_MAX => Some((v, len + 1)),
            Some((v, len)) => {
                out.push(v | ((len as u16 - 1) << LIGHT_RUN_SHIFT));
                Some((val, 1))
            }
            None => Some((val, 1)),
        };
    }
    if let Some((v, len)) = run {
        out.push(v | ((len as u16 - 1) << LIGHT_RUN_SHIFT));
    }
    out
}

/// Expands cell runs into a full array in `[x][y][z]` layout with zero light.
pub fn decode_cells(runs: &[u32]) -> Result<Vec<u32>> {
    let mut cells = vec![0u32; BLOCK_VOLUME];
    let mut order = scan_order();
    for &word in runs {
        let val = word & CONTENT_MASK;
        let len = ((word >> CELL_RUN_SHIFT) & 0x1FF) as usize + 1;
        for _ in 0..len {
            let Some(i) = order.next() else {
                bail!("Compressed block is too long");
            };
            cells[i] = val;
        }
    }
    ensure!(order.next().is_none(), "Compressed block is too short");
    Ok(cells)
}

/// ORs light runs into `cells`.
pub fn decode_light(runs: &[u16], cells: &mut [u32]) -> Result<()> {
    let mut order = scan_order();
    for &word in runs {
        let val = (word & 0xFF) as u32;
        let len = (word >> LIGHT_RUN_SHIFT) as usize + 1;
        for _ in 0..len {
            let Some(i) = order.next() else {
                bail!("Compressed block light is too long");
            };
            cells[i] = (cells[i] & CONTENT_MASK) | (val << LIGHT_SHIFT);
        }
    }
    ensure!(order.next().is_none(), "Compressed block light is too short");
    Ok(())
}

/// Point-in-time compressed snapshot of a [`Block`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedBlock {
    pub pos: MapPos,
    pub update_num: u32,
    pub light_update_num: u32,
    pub light_needs_update: LightNeedsUpdate,
    pub sunlit: bool,
    pub is_nil: bool,
    pub dirty: bool,
    pub dont_write_to_db: bool,
    pub dictionary: Vec<String>,
    pub cell_runs: Vec<u32>,
    pub light_runs: Vec<u16>,
}

impl CompressedBlock {
    pub fn from_block(block: &Block) -> Self {
        Self {
            pos: block.pos,
            update_num: block.update_num,
            light_update_num: block.light_update_num,
            light_needs_update: block.light_needs_update,
            sunlit: block.sunlit,
            is_nil: block.is_nil,
            dirty: block.dirty,
            dont_write_to_db: block.dont_write_to_db,
            dictionary: block.dictionary().to_vec(),
            cell_runs: encode_cells(block.cells()),
            light_runs: encode_light(block.cells()),
        }
    }

    pub fn decompress(&self) -> Result<Block> {
        let mut cells = decode_cells(&self.cell_runs)
            .with_context(|| format!("Failed to decompress block {}", self.pos))?;
        decode_light(&self.light_runs, &mut cells)
            .with_context(|| format!("Failed to decompress light of block {}", self.pos))?;
        let mut block = Block::from_parts(self.pos, cells, self.dictionary.clone())?;
        block.update_num = self.update_num;
        block.light_update_num = self.light_update_num;
        block.light_needs_update = self.light_needs_update;
        block.sunlit = self.sunlit;
        block.is_nil = self.is_nil;
        block.dirty = self.dirty;
        block.dont_write_to_db = self.dont_write_to_db;
        Ok(block)
    }

    /// Serializes to the little-endian wire layout.
    pub fn to_wire(&self) -> Result<Vec<u8>> {
        let dictionary = serde_json::to_vec(&self.dictionary).context("Failed to encode dictionary")?;
        let light_words = self.light_runs.len().div_ceil(2);

        let mut out = Vec::with_capacity(48 + self.cell_runs.len() * 4 + light_words * 4 + 8 + dictionary.len() + 4);
        put_u32(&mut out, WIRE_MAGIC);
        for axis in [self.pos.x, self.pos.y, self.pos.z, self.pos.w, self.pos.world, self.pos.universe] {
            out.extend_from_slice(&axis.to_le_bytes());
        }
        put_u32(&mut out, self.update_num);
        put_u32(&mut out, self.light_update_num);
        put_u32(&mut out, self.light_needs_update.as_u32());
        put_u32(&mut out, self.sunlit as u32);

        put_u32(&mut out, self.cell_runs.len() as u32);
        for &word in &self.cell_runs {
            put_u32(&mut out, word);
        }

        put_u32(&mut out, light_words as u32);
        put_u32(&mut out, self.light_runs.len() as u32);
        for &run in &self.light_runs {
            out.extend_from_slice(&run.to_le_bytes());
        }
        if self.light_runs.len() % 2 == 1 {
            out.extend_from_slice(&0u16.to_le_bytes());
        }

        put_u32(&mut out, dictionary.len() as u32);
        out.extend_from_slice(&dictionary);
        Ok(out)
    }

    /// Parses the wire layout. The result is never nil and never dirty.
    pub fn from_wire(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader { bytes, cursor: 0 };
        let magic = r.u32()?;
        ensure!(magic == WIRE_MAGIC, "Bad block magic {:#010x}", magic);
        let pos = MapPos::new(r.i32()?, r.i32()?, r.i32()?, r.i32()?, r.i32()?, r.i32()?);
        let update_num = r.u32()?;
        let light_update_num = r.u32()?;
        let light_needs_update = LightNeedsUpdate::try_from(r.u32()?)?;
        let flags = r.u32()?;

        let cell_count = r.u32()? as usize;
        ensure!(cell_count <= BLOCK_VOLUME, "Block {} claims {} cell runs", pos, cell_count);
        let cell_runs = (0..cell_count).map(|_| r.u32()).collect::<Result<Vec<_>>>()?;

        let light_words = r.u32()? as usize;
        let light_count = r.u32()? as usize;
        ensure!(
            light_count <= light_words * 2 && light_words <= BLOCK_VOLUME,
            "Block {} has {} light runs in {} words",
            pos,
            light_count,
            light_words
        );
        let slots = (0..light_words * 2).map(|_| r.u16()).collect::<Result<Vec<_>>>()?;
        let light_runs = slots[..light_count].to_vec();

        let dict_len = r.u32()? as usize;
        let dictionary: Vec<String> = serde_json::from_slice(r.take(dict_len)?)
            .with_context(|| format!("Failed to parse dictionary of block {}", pos))?;
        ensure!(r.cursor == bytes.len(), "Trailing bytes after block {}", pos);

        Ok(Self {
            pos,
            update_num,
            light_update_num,
            light_needs_update,
            sunlit: flags & 1 != 0,
            is_nil: false,
            dirty: false,
            dont_write_to_db: false,
            dictionary,
            cell_runs,
            light_runs,
        })
    }
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

struct Reader<'a> {
    bytes: &'a [u8],
    cursor: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.cursor.checked_add(n).filter(|&end| end <= self.bytes.len());
        let Some(end) = end else {
            bail!("Block payload truncated at byte {}", self.cursor);
        };
        let bytes = self.bytes;
        let slice = &bytes[self.cursor..end];
        self.cursor = end;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(self.u32()? as i32)
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }
}
