//! Light propagation over an in-memory neighbourhood of blocks.
//!
//! Every lit cell stores two nibbles: block light (low) and sunlight (high).
//! After a recompute each transparent cell has block light of at least 1, so
//! a block light of 0 marks the cell as opaque and propagation never needs a
//! definition lookup.
//!
//! Loading and saving blocks is the caller's job (see [`crate::Map`]); a
//! [`Region`] only knows the blocks it was given. Anything outside it is
//! treated as unloaded and silently stops propagation.

use mc4_map::block::{cell_id, light_normal, light_sun, pack_light};
use mc4_map::node::LIGHT_MAX;
use mc4_map::{Block, MapPos, NodeDef, Ruleset, MAPBLOCK_SIZE};
use std::collections::{HashMap, HashSet, VecDeque};

/// Blocks above a target that are consulted to decide whether its columns
/// see the sky.
pub const SUNLIGHT_CHECK_DISTANCE: i32 = 4;

/// How far sunlight is dropped below a newly opened node by the fast path.
pub const SUNLIGHT_DROP_DEPTH: i32 = MAPBLOCK_SIZE * 2;

const FACES: [(i32, i32, i32); 6] = [(1, 0, 0), (0, 1, 0), (0, 0, 1), (-1, 0, 0), (0, -1, 0), (0, 0, -1)];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Normal,
    Sun,
}

impl Channel {
    fn read(self, light: u8) -> u8 {
        match self {
            Channel::Normal => light_normal(light),
            Channel::Sun => light_sun(light),
        }
    }

    fn write(self, light: u8, level: u8) -> u8 {
        match self {
            Channel::Normal => pack_light(level, light_sun(light)),
            Channel::Sun => pack_light(light_normal(light), level),
        }
    }
}

/// Where the starting intensity of a cascade comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seed {
    /// The level passed in.
    Given,
    /// Whatever the start cell already holds (edge bleed).
    Existing,
    /// The larger of the two (fast path).
    MaxOfBoth,
}

/// A light source: absolute node position and intensity.
pub type Source = (MapPos, u8);

struct Entry<'r> {
    block: Block,
    // indexed by dictionary id
    defs: Vec<&'r NodeDef>,
}

impl<'r> Entry<'r> {
    fn def(&self, cell: u32, unknown: &'r NodeDef) -> &'r NodeDef {
        self.defs.get(cell_id(cell) as usize).copied().unwrap_or(unknown)
    }
}

fn rel_index(rel: MapPos) -> (usize, usize, usize) {
    (rel.x as usize, rel.y as usize, rel.z as usize)
}

/// Loaded blocks plus the subset whose cells may be rewritten.
pub struct Region<'r> {
    ruleset: &'r Ruleset,
    blocks: HashMap<MapPos, Entry<'r>>,
    updatable: HashSet<MapPos>,
}

impl<'r> Region<'r> {
    pub fn new(ruleset: &'r Ruleset) -> Self {
        Self {
            ruleset,
            blocks: HashMap::new(),
            updatable: HashSet::new(),
        }
    }

    /// Adds a block, resolving its dictionary against the ruleset once.
    pub fn insert(&mut self, block: Block) {
        let ruleset = self.ruleset;
        let defs = block.dictionary().iter().map(|s| ruleset.get(s)).collect();
        self.blocks.insert(block.pos, Entry { block, defs });
    }

    pub fn contains(&self, pos: MapPos) -> bool {
        self.blocks.contains_key(&pos)
    }

    pub fn block(&self, pos: MapPos) -> Option<&Block> {
        self.blocks.get(&pos).map(|e| &e.block)
    }

    pub fn positions(&self) -> impl Iterator<Item = MapPos> + '_ {
        self.blocks.keys().copied()
    }

    pub fn mark_updatable(&mut self, pos: MapPos) {
        self.updatable.insert(pos);
    }

    pub fn is_updatable(&self, pos: MapPos) -> bool {
        self.updatable.contains(&pos)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn into_blocks(self) -> HashMap<MapPos, Block> {
        self.blocks.into_iter().map(|(pos, e)| (pos, e.block)).collect()
    }

    /// Light byte at an absolute node position, `None` if its block is not loaded.
    pub fn light_at(&self, pos: MapPos) -> Option<u8> {
        let (block_pos, rel) = pos.split();
        let (x, y, z) = rel_index(rel);
        self.blocks.get(&block_pos).map(|e| e.block.light(x, y, z))
    }

    fn set_light_at(&mut self, pos: MapPos, light: u8) {
        let (block_pos, rel) = pos.split();
        let (x, y, z) = rel_index(rel);
        if let Some(entry) = self.blocks.get_mut(&block_pos) {
            entry.block.set_light(x, y, z, light);
        }
    }

    /// Definition of the node at an absolute position; unloaded positions
    /// resolve to the opaque fallback.
    pub fn def_at(&self, pos: MapPos) -> &'r NodeDef {
        let ruleset: &'r Ruleset = self.ruleset;
        let unknown = ruleset.unknown();
        let (block_pos, rel) = pos.split();
        let (x, y, z) = rel_index(rel);
        match self.blocks.get(&block_pos) {
            Some(entry) => entry.def(entry.block.cell(x, y, z), unknown),
            None => unknown,
        }
    }

    /// Spreads one channel from `start`, losing one level per step.
    ///
    /// Cells are only ever raised. Propagation stops at opaque cells, at
    /// unloaded blocks and at blocks that are not updatable. The start cell
    /// itself may sit in a non-updatable block (edge bleed); it is read but
    /// never written.
    pub fn cascade(&mut self, start: MapPos, level: u8, channel: Channel, seed: Seed) {
        let mut queue = VecDeque::new();
        queue.push_back((start, level.min(LIGHT_MAX), seed));

        while let Some((pos, level, seed)) = queue.pop_front() {
            let (block_pos, rel) = pos.split();
            let Some(entry) = self.blocks.get_mut(&block_pos) else {
                continue;
            };
            let (x, y, z) = rel_index(rel);
            let light = entry.block.light(x, y, z);
            if light_normal(light) == 0 {
                continue;
            }

            let current = channel.read(light);
            let level = match seed {
                Seed::Given => level,
                Seed::Existing => current,
                Seed::MaxOfBoth => level.max(current),
            };
            if level == 0 {
                continue;
            }
            let raise = level > current;
            if !raise && seed == Seed::Given {
                continue;
            }
            let writable = self.updatable.contains(&block_pos);
            if raise && writable {
                entry.block.set_light(x, y, z, channel.write(light, level));
            }

            let next = level - 1;
            if next == 0 {
                continue;
            }
            for (dx, dy, dz) in FACES {
                let Some(adj) = pos.checked_offset(dx, dy, dz) else {
                    continue;
                };
                if self.updatable.contains(&adj.block()) {
                    queue.push_back((adj, next, Seed::Given));
                }
            }
        }
    }

    /// Whether sunlight enters the top of column `(x, z)` of `block_pos`.
    fn column_has_sun(&self, block_pos: MapPos, x: usize, z: usize) -> bool {
        let unknown = self.ruleset.unknown();
        for dy in 1..=SUNLIGHT_CHECK_DISTANCE {
            let Some(above) = self.blocks.get(&block_pos.offset(0, dy, 0)) else {
                return false;
            };
            if above.block.sunlit {
                return true;
            }
            let blocked = (0..MAPBLOCK_SIZE as usize)
                .any(|y| !above.def(above.block.cell(x, y, z), unknown).pass_sunlight);
            if blocked {
                return false;
            }
        }
        false
    }

    /// Resets every cell of the block to its baseline and returns the block
    /// light and sunlight sources found in it.
    fn reset_block(&mut self, block_pos: MapPos) -> (Vec<Source>, Vec<Source>) {
        let mut lights = Vec::new();
        let mut suns = Vec::new();
        let size = MAPBLOCK_SIZE as usize;

        let Some(entry) = self.blocks.get(&block_pos) else {
            return (lights, suns);
        };
        let sunlit = entry.block.sunlit;
        let mut open = vec![false; size * size];
        for x in 0..size {
            for z in 0..size {
                open[x * size + z] = sunlit || self.column_has_sun(block_pos, x, z);
            }
        }

        let ruleset: &'r Ruleset = self.ruleset;
        let unknown = ruleset.unknown();
        let Ok(origin) = block_pos.block_origin() else {
            log::warn!("Not lighting block {} outside the addressable range", block_pos);
            return (lights, suns);
        };
        let Some(entry) = self.blocks.get_mut(&block_pos) else {
            return (lights, suns);
        };
        for x in 0..size {
            for z in 0..size {
                let mut has_sun = open[x * size + z];
                for y in (0..size).rev() {
                    let def = entry.def(entry.block.cell(x, y, z), unknown);
                    let abs = origin.offset(x as i32, y as i32, z as i32);
                    if def.light_level > 0 {
                        lights.push((abs, def.light_level));
                    }
                    if !def.pass_sunlight {
                        has_sun = false;
                    }
                    let sun = if has_sun {
                        suns.push((abs, LIGHT_MAX));
                        LIGHT_MAX - 1
                    } else {
                        0
                    };
                    let normal = u8::from(def.transparent);
                    entry.block.set_light(x, y, z, pack_light(normal, sun));
                }
            }
        }
        (lights, suns)
    }

    /// Recomputes both channels of every block in `compute` from scratch.
    ///
    /// Blocks in `compute` become updatable. Light from loaded neighbours
    /// outside the set is bled in across the shared faces.
    pub fn relight(&mut self, compute: &HashSet<MapPos>) {
        for pos in compute {
            self.mark_updatable(*pos);
        }

        let mut lights = Vec::new();
        let mut suns = Vec::new();
        for pos in compute {
            let (l, s) = self.reset_block(*pos);
            lights.extend(l);
            suns.extend(s);
        }
        log::trace!(
            "Relighting {} blocks: {} light sources, {} sun sources",
            compute.len(),
            lights.len(),
            suns.len()
        );

        for (pos, level) in lights {
            self.cascade(pos, level, Channel::Normal, Seed::Given);
        }
        for (pos, level) in suns {
            self.cascade(pos, level, Channel::Sun, Seed::Given);
        }

        let max = MAPBLOCK_SIZE - 1;
        for pos in compute {
            for (dx, dy, dz) in FACES {
                let neighbour = pos.offset(dx, dy, dz);
                if compute.contains(&neighbour) || !self.contains(neighbour) {
                    continue;
                }
                let Ok(origin) = neighbour.block_origin() else {
                    continue;
                };
                // the neighbour's face that touches `pos`
                let pick = |d: i32| match d {
                    1 => 0..=0,
                    -1 => max..=max,
                    _ => 0..=max,
                };
                for x in pick(dx) {
                    for y in pick(dy) {
                        for z in pick(dz) {
                            let cell = origin.offset(x, y, z);
                            self.cascade(cell, 0, Channel::Normal, Seed::Existing);
                            self.cascade(cell, 0, Channel::Sun, Seed::Existing);
                        }
                    }
                }
            }
        }
    }

    /// Local update after the node at `pos` became at least as transparent
    /// as before. Only raises light. Callers mark the blocks to update.
    pub fn relight_node(&mut self, pos: MapPos) {
        let Some(old) = self.light_at(pos) else {
            return;
        };
        self.set_light_at(pos, pack_light(light_normal(old).max(1), light_sun(old)));

        let mut lights: Vec<Source> = Vec::new();
        let mut suns: Vec<Source> = Vec::new();

        let sun_above = pos
            .checked_offset(0, 1, 0)
            .and_then(|above| self.light_at(above))
            .map(light_sun)
            .unwrap_or(0);
        if sun_above == LIGHT_MAX {
            let mut cell = pos;
            let mut depth = 0;
            loop {
                let Some(light) = self.light_at(cell) else {
                    break;
                };
                self.set_light_at(cell, pack_light(light_normal(light), LIGHT_MAX));
                suns.push((cell, LIGHT_MAX));

                depth += 1;
                let Some(below) = pos.checked_offset(0, -depth, 0) else {
                    break;
                };
                if depth > SUNLIGHT_DROP_DEPTH || !self.def_at(below).is_sun_column() {
                    break;
                }
                cell = below;
            }
        }

        lights.push((pos, self.def_at(pos).light_level));
        for (dx, dy, dz) in FACES {
            let Some(adj) = pos.checked_offset(dx, dy, dz) else {
                continue;
            };
            let Some(light) = self.light_at(adj) else {
                continue;
            };
            if light_normal(light) > 1 {
                lights.push((adj, light_normal(light)));
            }
            if light_sun(light) > 1 {
                suns.push((adj, light_sun(light)));
            }
        }

        for (cell, level) in lights {
            self.cascade(cell, level, Channel::Normal, Seed::MaxOfBoth);
        }
        for (cell, level) in suns {
            self.cascade(cell, level, Channel::Sun, Seed::MaxOfBoth);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mc4_map::block::cell_light;
    use mc4_map::Node;

    fn ruleset() -> Ruleset {
        Ruleset::from_json_str(
            r#"{"nodeDefs": {
                "stone": {"transparent": false, "passSunlight": false, "lightLevel": 0},
                "glass": {"transparent": true, "passSunlight": false, "lightLevel": 0},
                "lamp": {"transparent": true, "passSunlight": true, "lightLevel": 12}
            }}"#,
        )
        .unwrap()
    }

    fn solid(pos: MapPos, itemstring: &str) -> Block {
        let mut block = Block::new(pos);
        let id = block.id_for(itemstring).unwrap();
        for cell in block.cells_mut() {
            *cell = id as u32;
        }
        block.is_nil = false;
        block.sunlit = false;
        block
    }

    fn dark_air(pos: MapPos) -> Block {
        let mut block = Block::new(pos);
        block.is_nil = false;
        block.sunlit = false;
        block
    }

    #[test]
    fn test_cascade_decays_and_stops_at_opaque() {
        let rules = ruleset();
        let mut region = Region::new(&rules);
        let mut block = dark_air(MapPos::at(0, 0, 0));
        block.set_node_rel(MapPos::at(5, 8, 8), &Node::new("stone")).unwrap();
        region.insert(block);

        let mut compute = HashSet::new();
        compute.insert(MapPos::at(0, 0, 0));
        region.relight(&compute);
        // no sources, no sky: transparent cells sit at the baseline
        assert_eq!(region.light_at(MapPos::at(1, 1, 1)), Some(pack_light(1, 0)));
        assert_eq!(region.light_at(MapPos::at(5, 8, 8)), Some(0));

        region.cascade(MapPos::at(8, 8, 8), 10, Channel::Normal, Seed::Given);
        assert_eq!(region.light_at(MapPos::at(8, 8, 8)).map(light_normal), Some(10));
        assert_eq!(region.light_at(MapPos::at(6, 8, 8)).map(light_normal), Some(8));
        assert_eq!(region.light_at(MapPos::at(5, 8, 8)), Some(0));
        // around the stone: 5 steps to (4, 9, 8), one more down
        assert_eq!(region.light_at(MapPos::at(4, 8, 8)).map(light_normal), Some(4));
        assert_eq!(region.light_at(MapPos::at(8, 8, 15)).map(light_normal), Some(3));
    }

    #[test]
    fn test_cascade_never_lowers() {
        let rules = ruleset();
        let mut region = Region::new(&rules);
        region.insert(dark_air(MapPos::at(0, 0, 0)));
        let mut compute = HashSet::new();
        compute.insert(MapPos::at(0, 0, 0));
        region.relight(&compute);

        region.cascade(MapPos::at(8, 8, 8), 12, Channel::Normal, Seed::Given);
        region.cascade(MapPos::at(8, 8, 8), 4, Channel::Normal, Seed::Given);
        assert_eq!(region.light_at(MapPos::at(8, 8, 8)).map(light_normal), Some(12));
        assert_eq!(region.light_at(MapPos::at(8, 8, 8)).map(light_sun), Some(0));
    }

    #[test]
    fn test_propagation_stops_outside_updatable_blocks() {
        let rules = ruleset();
        let mut region = Region::new(&rules);
        region.insert(dark_air(MapPos::at(0, 0, 0)));
        region.insert(dark_air(MapPos::at(1, 0, 0)));
        let mut compute = HashSet::new();
        compute.insert(MapPos::at(0, 0, 0));
        region.relight(&compute);

        region.cascade(MapPos::at(15, 8, 8), 15, Channel::Normal, Seed::Given);
        assert_eq!(region.light_at(MapPos::at(16, 8, 8)), Some(0));
        assert!(!region.is_updatable(MapPos::at(1, 0, 0)));
    }

    #[test]
    fn test_sunlit_block_lights_columns() {
        let rules = ruleset();
        let mut region = Region::new(&rules);
        let mut top = dark_air(MapPos::at(0, 0, 0));
        top.set_node_rel(MapPos::at(3, 10, 3), &Node::new("glass")).unwrap();
        top.sunlit = true;
        region.insert(top);
        let mut compute = HashSet::new();
        compute.insert(MapPos::at(0, 0, 0));
        region.relight(&compute);

        assert_eq!(region.light_at(MapPos::at(0, 0, 0)).map(light_sun), Some(15));
        assert_eq!(region.light_at(MapPos::at(3, 11, 3)).map(light_sun), Some(15));
        // glass is transparent but blocks the sky column; light spreads sideways
        assert_eq!(region.light_at(MapPos::at(3, 10, 3)).map(light_sun), Some(14));
        assert_eq!(region.light_at(MapPos::at(3, 10, 3)).map(light_normal), Some(1));
        assert_eq!(region.light_at(MapPos::at(3, 9, 3)).map(light_sun), Some(14));
    }

    #[test]
    fn test_column_scan_through_blocks_above() {
        let rules = ruleset();
        let mut region = Region::new(&rules);
        let mut sky = dark_air(MapPos::at(0, 2, 0));
        sky.sunlit = true;
        region.insert(sky);
        let mut roofed = dark_air(MapPos::at(0, 1, 0));
        roofed.set_node_rel(MapPos::at(4, 0, 4), &Node::new("stone")).unwrap();
        region.insert(roofed);
        region.insert(dark_air(MapPos::at(0, 0, 0)));

        let mut compute = HashSet::new();
        compute.insert(MapPos::at(0, 0, 0));
        region.relight(&compute);
        assert_eq!(region.light_at(MapPos::at(0, 15, 0)).map(light_sun), Some(15));
        // under the stone the sky is blocked, neighbours bleed sideways
        assert_eq!(region.light_at(MapPos::at(4, 15, 4)).map(light_sun), Some(14));
    }

    #[test]
    fn test_edge_bleed_from_neighbour() {
        let rules = ruleset();
        let mut region = Region::new(&rules);
        let mut lit = dark_air(MapPos::at(-1, 0, 0));
        lit.set_light(15, 8, 8, pack_light(9, 0));
        region.insert(lit);
        region.insert(dark_air(MapPos::at(0, 0, 0)));

        let mut compute = HashSet::new();
        compute.insert(MapPos::at(0, 0, 0));
        region.relight(&compute);
        assert_eq!(region.light_at(MapPos::at(0, 8, 8)).map(light_normal), Some(8));
        assert_eq!(region.light_at(MapPos::at(3, 8, 8)).map(light_normal), Some(5));
        // the neighbour itself is untouched
        assert_eq!(region.light_at(MapPos::at(-1, 8, 8)).map(light_normal), Some(9));
        assert_eq!(region.light_at(MapPos::at(-2, 8, 8)), Some(0));
    }

    #[test]
    fn test_opaque_light_source_emits_nothing() {
        let rules = Ruleset::from_json_str(
            r#"{"nodeDefs": {"magma": {"transparent": false, "passSunlight": false, "lightLevel": 10}}}"#,
        )
        .unwrap();
        let mut region = Region::new(&rules);
        let mut block = dark_air(MapPos::at(0, 0, 0));
        block.set_node_rel(MapPos::at(8, 8, 8), &Node::new("magma")).unwrap();
        region.insert(block);
        let mut compute = HashSet::new();
        compute.insert(MapPos::at(0, 0, 0));
        region.relight(&compute);
        assert_eq!(region.light_at(MapPos::at(9, 8, 8)).map(light_normal), Some(1));
    }

    #[test]
    fn test_relight_node_opens_a_hole() {
        let rules = ruleset();
        let mut region = Region::new(&rules);
        let mut sky = dark_air(MapPos::at(0, 1, 0));
        sky.sunlit = true;
        region.insert(sky);
        region.insert(solid(MapPos::at(0, 0, 0), "stone"));

        let mut compute = HashSet::new();
        compute.insert(MapPos::at(0, 1, 0));
        compute.insert(MapPos::at(0, 0, 0));
        region.relight(&compute);
        assert_eq!(region.light_at(MapPos::at(5, 15, 5)), Some(0));

        // dig two nodes straight down
        let mut blocks = region.into_blocks();
        let below = blocks.get_mut(&MapPos::at(0, 0, 0)).unwrap();
        below.set_node_rel(MapPos::at(5, 15, 5), &Node::air()).unwrap();
        below.set_node_rel(MapPos::at(5, 14, 5), &Node::air()).unwrap();
        let mut region = Region::new(&rules);
        for (_, block) in blocks {
            let pos = block.pos;
            region.insert(block);
            region.mark_updatable(pos);
        }
        region.relight_node(MapPos::at(5, 15, 5));
        assert_eq!(region.light_at(MapPos::at(5, 15, 5)), Some(pack_light(1, 15)));
        // sunlight drops into the node below, which still reads as opaque
        // until it gets its own update
        assert_eq!(region.light_at(MapPos::at(5, 14, 5)), Some(pack_light(0, 15)));
        region.relight_node(MapPos::at(5, 14, 5));
        assert_eq!(region.light_at(MapPos::at(5, 14, 5)), Some(pack_light(1, 15)));
        assert_eq!(region.light_at(MapPos::at(5, 13, 5)), Some(0));
    }

    #[test]
    fn test_relight_node_spreads_lamp() {
        let rules = ruleset();
        let mut region = Region::new(&rules);
        let mut block = dark_air(MapPos::at(0, 0, 0));
        block.set_node_rel(MapPos::at(8, 8, 8), &Node::new("lamp")).unwrap();
        region.insert(block);
        let mut compute = HashSet::new();
        compute.insert(MapPos::at(0, 0, 0));
        region.relight(&compute);
        assert_eq!(region.light_at(MapPos::at(8, 8, 8)).map(light_normal), Some(12));

        let lights = |region: &Region| -> Vec<u8> {
            region.block(MapPos::at(0, 0, 0)).unwrap().cells().iter().map(|&c| cell_light(c)).collect()
        };
        let before = lights(&region);
        region.mark_updatable(MapPos::at(0, 0, 0));
        region.relight_node(MapPos::at(8, 8, 8));
        assert_eq!(before, lights(&region));
    }

    #[test]
    fn test_lamp_at_the_coordinate_limit() {
        use mc4_map::BLOCK_COORD_MAX;

        let rules = ruleset();
        let mut region = Region::new(&rules);
        let edge = MapPos::at(BLOCK_COORD_MAX, 0, 0);
        let mut block = dark_air(edge);
        block.set_node_rel(MapPos::at(15, 8, 8), &Node::new("lamp")).unwrap();
        region.insert(block);
        // has no addressable nodes; skipped rather than wrapped around
        let beyond = edge.offset(1, 0, 0);
        region.insert(dark_air(beyond));

        let mut compute = HashSet::new();
        compute.insert(edge);
        compute.insert(beyond);
        region.relight(&compute);
        let lamp = MapPos::at(i32::MAX, 8, 8);
        assert_eq!(region.light_at(lamp).map(light_normal), Some(12));
        assert_eq!(region.light_at(lamp.offset(-3, 0, 0)).map(light_normal), Some(9));
        assert_eq!(region.block(beyond).unwrap().light(0, 0, 0), 0);

        region.relight_node(lamp);
        assert_eq!(region.light_at(lamp).map(light_normal), Some(12));
    }
}
