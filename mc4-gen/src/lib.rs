use anyhow::Result;
use mc4_map::{Block, MapPos};

/// Produces the initial content of blocks that have never been stored.
/// Output must not be marked dirty.
pub trait WorldGenerator: Send + Sync {
    fn generate_block(&self, pos: MapPos) -> Result<Block>;
}

pub mod builder;
pub mod flat;
