pub mod cache;
pub mod locks;

pub use cache::{BlockCache, CacheConfig, Tier};
pub use locks::BlockLocks;
