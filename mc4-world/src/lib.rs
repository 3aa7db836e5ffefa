pub mod lighting;
pub mod map;

pub use lighting::{Channel, Region, Seed};
pub use map::Map;
