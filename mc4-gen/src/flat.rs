use crate::WorldGenerator;
use crate::builder::LayerBuilder;
use mc4_map::{Block, MapPos};

pub struct FlatGenerator {
    builder: LayerBuilder,
}

impl FlatGenerator {
    /// Stone up to three planes under `surface_y`, then dirt, then grass on top.
    pub fn new(surface_y: i32) -> Self {
        let mut builder = LayerBuilder::new();
        builder.fill_below(surface_y - 3, "default:stone");
        for y in surface_y - 3..surface_y {
            builder.fill_layer(y, "default:dirt");
        }
        builder.fill_layer(surface_y, "default:grass");
        Self { builder }
    }

    pub fn from_builder(builder: LayerBuilder) -> Self {
        Self { builder }
    }
}

impl Default for FlatGenerator {
    fn default() -> Self {
        Self::new(0)
    }
}

impl WorldGenerator for FlatGenerator {
    fn generate_block(&self, pos: MapPos) -> anyhow::Result<Block> {
        self.builder.build(pos)
    }
}
