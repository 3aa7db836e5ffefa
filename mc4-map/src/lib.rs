pub mod block;
pub mod compressed;
pub mod info;
pub mod node;
pub mod pos;

pub use block::Block;
pub use compressed::CompressedBlock;
pub use info::{BlockUpdateInfo, LightNeedsUpdate};
pub use node::{Node, NodeDef, Ruleset};
pub use pos::{MapPos, BLOCK_COORD_MAX, BLOCK_COORD_MIN, MAPBLOCK_SIZE};
