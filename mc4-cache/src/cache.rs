//! Two-tier block cache in front of a [`MapStorage`].
//!
//! Tier 1 holds full blocks, tier 2 holds compressed snapshots. A coordinate
//! lives in at most one tier. Both tiers sit behind a single lock so moves
//! between them are atomic.

use anyhow::Result;
use lru::LruCache;
use mc4_benchmark::BenchmarkMetrics;
use mc4_map::{Block, BlockUpdateInfo, CompressedBlock, LightNeedsUpdate, MapPos};
use mc4_storage::MapStorage;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Target entry count for tier 1 (full blocks).
    pub l1_target: usize,
    /// Target entry count for tier 2 (compressed blocks).
    pub l2_target: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1_target: 10_000,
            l2_target: 100_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Hot,
    Warm,
}

struct Tiers {
    hot: LruCache<MapPos, Block>,
    warm: LruCache<MapPos, CompressedBlock>,
}

pub struct BlockCache {
    tiers: RwLock<Tiers>,
    storage: Arc<dyn MapStorage>,
    config: CacheConfig,
    metrics: Arc<BenchmarkMetrics>,
}

impl BlockCache {
    pub fn new(storage: Arc<dyn MapStorage>, config: CacheConfig, metrics: Arc<BenchmarkMetrics>) -> Self {
        Self {
            tiers: RwLock::new(Tiers {
                hot: LruCache::unbounded(),
                warm: LruCache::unbounded(),
            }),
            storage,
            config,
            metrics,
        }
    }

    pub fn storage(&self) -> &Arc<dyn MapStorage> {
        &self.storage
    }

    pub fn config(&self) -> CacheConfig {
        self.config
    }

    pub fn metrics(&self) -> &Arc<BenchmarkMetrics> {
        &self.metrics
    }

    /// Returns a copy of the block. Never fails: a missing block comes back
    /// nil and uncached, an unreadable one comes back nil and unwritable.
    pub fn get_block(&self, pos: MapPos) -> Block {
        let mut tiers = self.tiers.write();

        if let Some(block) = tiers.hot.get(&pos) {
            self.metrics.record_hot_hit();
            return block.clone();
        }

        if let Some(compressed) = tiers.warm.pop(&pos) {
            self.metrics.record_warm_hit();
            return match compressed.decompress() {
                Ok(block) => {
                    tiers.hot.put(pos, block.clone());
                    self.enforce_targets(&mut tiers);
                    block
                }
                Err(e) => {
                    log::error!("Dropping corrupt tier 2 entry for {}: {:#}", pos, e);
                    let mut block = Block::new(pos);
                    block.dont_write_to_db = true;
                    block
                }
            };
        }

        self.metrics.record_cache_miss();
        // cache lock stays held across the store read
        let start = Instant::now();
        let mut block = self.storage.get_block(pos);
        self.metrics.record_load(start.elapsed());
        if block.is_nil {
            return block;
        }
        if block.light_needs_update == LightNeedsUpdate::Clean {
            block.light_needs_update = LightNeedsUpdate::SelfOnly;
        }
        tiers.hot.put(pos, block.clone());
        self.enforce_targets(&mut tiers);
        block
    }

    /// Caches the block in tier 1 and writes it through unless it is clean
    /// or the cached copy already has the same `update_num`.
    pub fn set_block(&self, block: Block) -> Result<()> {
        let pos = block.pos;
        let mut tiers = self.tiers.write();

        let warm_num = tiers.warm.pop(&pos).map(|c| c.update_num);
        let cached_num = tiers.hot.peek(&pos).map(|b| b.update_num).or(warm_num);
        let skip_write = !block.dirty || cached_num == Some(block.update_num);

        let result = if skip_write {
            self.metrics.record_skipped_write();
            Ok(())
        } else {
            let start = Instant::now();
            let result = self.storage.set_block(&block);
            self.metrics.record_save(start.elapsed());
            result
        };

        tiers.hot.put(pos, block);
        self.enforce_targets(&mut tiers);
        result
    }

    /// Tier 2 hit is returned as-is; anything else goes through [`Self::get_block`].
    pub fn get_block_compressed(&self, pos: MapPos) -> CompressedBlock {
        {
            let mut tiers = self.tiers.write();
            if let Some(compressed) = tiers.warm.get(&pos) {
                self.metrics.record_warm_hit();
                return compressed.clone();
            }
        }
        CompressedBlock::from_block(&self.get_block(pos))
    }

    pub fn get_block_update_info(&self, pos: MapPos) -> BlockUpdateInfo {
        let tiers = self.tiers.read();
        if let Some(block) = tiers.hot.peek(&pos) {
            return block.update_info();
        }
        if let Some(c) = tiers.warm.peek(&pos) {
            return BlockUpdateInfo {
                pos,
                update_num: c.update_num,
                light_update_num: c.light_update_num,
                light_needs_update: c.light_needs_update,
            };
        }
        drop(tiers);
        self.storage.get_block_update_info(pos)
    }

    /// Updates counters in place without touching cell data or the store.
    pub fn set_block_update_info(&self, info: &BlockUpdateInfo) -> Result<()> {
        let mut tiers = self.tiers.write();
        if let Some(block) = tiers.hot.peek_mut(&info.pos) {
            block.apply_update_info(info);
            return Ok(());
        }
        if let Some(c) = tiers.warm.peek_mut(&info.pos) {
            c.update_num = info.update_num;
            c.light_update_num = info.light_update_num;
            c.light_needs_update = info.light_needs_update;
            return Ok(());
        }
        drop(tiers);
        self.storage.set_block_update_info(info)
    }

    pub fn clean_cache(&self) {
        let mut tiers = self.tiers.write();
        self.enforce_targets(&mut tiers);
        log::debug!(
            "Cache holds {} full and {} compressed blocks",
            tiers.hot.len(),
            tiers.warm.len()
        );
    }

    fn enforce_targets(&self, tiers: &mut Tiers) {
        while tiers.hot.len() > self.config.l1_target {
            let Some((pos, block)) = tiers.hot.pop_lru() else {
                break;
            };
            tiers.warm.put(pos, CompressedBlock::from_block(&block));
            self.metrics.record_demotion();
        }
        while tiers.warm.len() > self.config.l2_target {
            if tiers.warm.pop_lru().is_none() {
                break;
            }
            self.metrics.record_discard();
        }
    }

    pub fn tier_of(&self, pos: MapPos) -> Option<Tier> {
        let tiers = self.tiers.read();
        if tiers.hot.contains(&pos) {
            Some(Tier::Hot)
        } else if tiers.warm.contains(&pos) {
            Some(Tier::Warm)
        } else {
            None
        }
    }

    /// `(tier 1, tier 2)` occupancy.
    pub fn len(&self) -> (usize, usize) {
        let tiers = self.tiers.read();
        (tiers.hot.len(), tiers.warm.len())
    }

    /// True when some coordinate sits in both tiers. Only for checks.
    pub fn has_overlap(&self) -> bool {
        let tiers = self.tiers.read();
        tiers.hot.iter().any(|(pos, _)| tiers.warm.contains(pos))
    }
}
