use anyhow::Result;
use mc4_map::node::AIR;
use mc4_map::{Block, MapPos, Node, MAPBLOCK_SIZE};
use std::collections::HashMap;

#[derive(Default, Clone)]
pub struct LayerBuilder {
    // Key: (x, y, z) with x/z block-local and y absolute, repeated in every
    // block column.
    custom_nodes: HashMap<(i32, i32, i32), String>,

    // Key: absolute y, Value: itemstring filling the whole plane
    full_layers: HashMap<i32, String>,

    // Everything strictly below this y
    below: Option<(i32, String)>,
}

impl LayerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one node at block-local x/z (0..15) and absolute y.
    pub fn set_node(&mut self, x: i32, y: i32, z: i32, name: &str) {
        if (0..MAPBLOCK_SIZE).contains(&x) && (0..MAPBLOCK_SIZE).contains(&z) {
            self.custom_nodes.insert((x, y, z), name.to_string());
        }
    }

    /// Fill an entire y-plane.
    pub fn fill_layer(&mut self, y: i32, name: &str) {
        self.full_layers.insert(y, name.to_string());
        // single nodes on this plane are overwritten
        self.custom_nodes.retain(|(_, ny, _), _| *ny != y);
    }

    /// Fill every plane below `y`.
    pub fn fill_below(&mut self, y: i32, name: &str) {
        self.below = Some((y, name.to_string()));
    }

    /// Highest y holding anything other than air, if any.
    pub fn top(&self) -> Option<i32> {
        let layers = self.full_layers.iter().filter(|(_, n)| n.as_str() != AIR).map(|(y, _)| *y);
        let nodes = self.custom_nodes.iter().filter(|(_, n)| n.as_str() != AIR).map(|((_, y, _), _)| *y);
        let below = self.below.iter().filter(|(_, n)| n.as_str() != AIR).map(|(y, _)| y - 1);
        layers.chain(nodes).chain(below).max()
    }

    fn name_at(&self, x: i32, y: i32, z: i32) -> &str {
        if let Some(name) = self.custom_nodes.get(&(x, y, z)) {
            return name;
        }
        if let Some(name) = self.full_layers.get(&y) {
            return name;
        }
        match &self.below {
            Some((limit, name)) if y < *limit => name.as_str(),
            _ => AIR,
        }
    }

    /// Build the block at `pos` (a block coordinate).
    pub fn build(&self, pos: MapPos) -> Result<Block> {
        let mut block = Block::new(pos);
        let origin = pos.block_origin()?;

        // 1. Whole block above the highest content: leave it untouched air.
        let sunlit = self.top().is_none_or(|top| origin.y > top);
        if !sunlit {
            for y in 0..MAPBLOCK_SIZE {
                let world_y = origin.y + y;
                for x in 0..MAPBLOCK_SIZE {
                    for z in 0..MAPBLOCK_SIZE {
                        let name = self.name_at(x, world_y, z);
                        if name != AIR {
                            block.set_node_rel(MapPos::at(x, y, z), &Node::new(name))?;
                        }
                    }
                }
            }
        }

        // 2. Generated content is a baseline, not an edit.
        block.is_nil = false;
        block.dirty = false;
        block.sunlit = sunlit;
        Ok(block)
    }
}
