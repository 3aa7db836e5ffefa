use anyhow::{bail, Context, Result};
use mc4_benchmark::BenchmarkMetrics;
use mc4_cache::{BlockCache, BlockLocks, CacheConfig};
use mc4_gen::WorldGenerator;
use mc4_map::{Block, BlockUpdateInfo, LightNeedsUpdate, MapPos, Node, Ruleset, BLOCK_COORD_MAX, BLOCK_COORD_MIN};
use mc4_storage::{MapStorage, NodeMeta};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use crate::lighting::{Region, SUNLIGHT_CHECK_DISTANCE};

/// Node-level access to the world: cache, generators and lighting.
pub struct Map {
    cache: BlockCache,
    ruleset: Arc<Ruleset>,
    // keyed by the `world` axis
    generators: HashMap<i32, Arc<dyn WorldGenerator>>,
    block_locks: BlockLocks,
    meta_locks: BlockLocks,
}

impl Map {
    pub fn new(
        storage: Arc<dyn MapStorage>,
        ruleset: Arc<Ruleset>,
        config: CacheConfig,
        metrics: Arc<BenchmarkMetrics>,
    ) -> Self {
        Self {
            cache: BlockCache::new(storage, config, metrics),
            ruleset,
            generators: HashMap::new(),
            block_locks: BlockLocks::new(),
            meta_locks: BlockLocks::new(),
        }
    }

    pub fn register_generator(&mut self, world: i32, generator: Arc<dyn WorldGenerator>) {
        self.generators.insert(world, generator);
    }

    pub fn cache(&self) -> &BlockCache {
        &self.cache
    }

    pub fn ruleset(&self) -> &Ruleset {
        &self.ruleset
    }

    pub fn metrics(&self) -> &Arc<BenchmarkMetrics> {
        self.cache.metrics()
    }

    pub fn clean_cache(&self) {
        self.cache.clean_cache();
    }

    /// Cached or stored block, generated on first touch when its world has a
    /// generator. Still nil when nothing can produce it.
    pub fn get_mapblock(&self, pos: MapPos) -> Block {
        if !pos.is_block_in_range() {
            return Block::new(pos);
        }
        let block = self.cache.get_block(pos);
        // an unreadable row must not be replaced by fresh terrain
        if !block.is_nil || block.dont_write_to_db {
            return block;
        }
        let Some(generator) = self.generators.get(&pos.world) else {
            return block;
        };

        let start = Instant::now();
        let generated = match generator.generate_block(pos) {
            Ok(generated) => generated,
            Err(e) => {
                log::error!("Failed to generate block {}: {:#}", pos, e);
                return block;
            }
        };
        self.metrics().record_generation(start.elapsed());

        // not dirty, so this only fills the cache
        if let Err(e) = self.cache.set_block(generated.clone()) {
            log::warn!("Failed to cache generated block {}: {:#}", pos, e);
        }
        generated
    }

    /// Stores a structurally changed block and schedules a neighbourhood
    /// relight for it.
    pub fn set_mapblock(&self, mut block: Block) -> Result<()> {
        block.light_needs_update = LightNeedsUpdate::Neighborhood;
        block.update_num += 1;
        block.dirty = true;
        self.cache.set_block(block)
    }

    pub fn get_mapblock_update_info(&self, pos: MapPos) -> BlockUpdateInfo {
        self.cache.get_block_update_info(pos)
    }

    pub fn set_mapblock_update_info(&self, info: &BlockUpdateInfo) -> Result<()> {
        self.cache.set_block_update_info(info)
    }

    pub fn get_node(&self, pos: MapPos) -> Result<Node> {
        let (block_pos, rel) = pos.split();
        self.get_mapblock(block_pos).get_node_rel(rel)
    }

    /// Places a node and brings lighting up to date as cheaply as the
    /// change allows.
    pub fn set_node(&self, pos: MapPos, node: &Node) -> Result<()> {
        let (block_pos, rel) = pos.split();
        let guard = self.block_locks.lock_unique(block_pos);

        let mut block = self.get_mapblock(block_pos);
        if block.dont_write_to_db {
            bail!("Block {} could not be read, refusing to edit it", block_pos);
        }
        let old = block.get_node_rel(rel)?;
        if old == *node {
            return Ok(());
        }

        let old_def = self.ruleset.get(&old.itemstring);
        let new_def = self.ruleset.get(&node.itemstring);
        block.set_node_rel(rel, node)?;

        if old_def.same_lighting(new_def) {
            block.update_num += 1;
            return self.cache.set_block(block);
        }

        if new_def.is_sun_column() && old_def.light_level == 0 {
            block.update_num += 1;
            self.cache.set_block(block)?;
            drop(guard);
            return self.update_light_node(pos);
        }

        self.set_mapblock(block)?;
        drop(guard);
        let info = self.cache.get_block_update_info(block_pos);
        self.update_mapblock_light_info(&info)
    }

    /// Runs the relight a block's `light_needs_update` asks for and marks the
    /// block clean afterwards.
    pub fn update_mapblock_light_info(&self, info: &BlockUpdateInfo) -> Result<()> {
        let pos = info.pos;
        match info.light_needs_update {
            LightNeedsUpdate::Clean => return Ok(()),
            LightNeedsUpdate::SelfOnly => self.update_mapblock_light_range(pos, pos)?,
            LightNeedsUpdate::Neighborhood => {
                self.update_mapblock_light_range(pos.offset(-1, -1, -1), pos.offset(1, 1, 1))?
            }
        }

        let mut info = self.cache.get_block_update_info(pos);
        info.light_needs_update = LightNeedsUpdate::Clean;
        self.cache.set_block_update_info(&info)
    }

    /// Full relight of every block in the inclusive box `min..=max`.
    pub fn update_mapblock_light_range(&self, min: MapPos, max: MapPos) -> Result<()> {
        if !min.same_dimension(&max) {
            log::warn!("Ignoring relight range {} .. {} spanning dimensions", min, max);
            return Ok(());
        }
        // blocks past the edge of the world have no nodes to light
        let lo = |v: i32| v.max(BLOCK_COORD_MIN);
        let hi = |v: i32| v.min(BLOCK_COORD_MAX);
        let min = min.with_spatial(lo(min.x), lo(min.y), lo(min.z));
        let max = max.with_spatial(hi(max.x), hi(max.y), hi(max.z));
        let mut blocks = HashSet::new();
        for x in min.x..=max.x {
            for y in min.y..=max.y {
                for z in min.z..=max.z {
                    blocks.insert(min.with_spatial(x, y, z));
                }
            }
        }
        self.update_mapblock_light(&blocks)
    }

    /// Full relight of `requested` plus any pending blocks right around it.
    pub fn update_mapblock_light(&self, requested: &HashSet<MapPos>) -> Result<()> {
        let start = Instant::now();
        let mut region = Region::new(&self.ruleset);
        let mut compute = HashSet::new();

        for center in requested {
            for x in -1..=1 {
                for z in -1..=1 {
                    for y in -1..=SUNLIGHT_CHECK_DISTANCE {
                        let pos = center.offset(x, y, z);
                        if !region.contains(pos) {
                            let block = self.get_mapblock(pos);
                            if !block.is_nil {
                                region.insert(block);
                            }
                        }
                        if y > 1 || compute.contains(&pos) {
                            continue;
                        }
                        let pending = region.block(pos).is_some_and(|b| b.light_needs_update.is_pending());
                        if region.contains(pos) && (requested.contains(&pos) || pending) {
                            compute.insert(pos);
                        }
                    }
                }
            }
        }

        region.relight(&compute);
        let result = self.save_lit_blocks(region, &compute, true);

        let elapsed = start.elapsed();
        self.metrics().record_full_relight(elapsed, compute.len());
        log::debug!(
            "Relit {} blocks ({} requested) in {:?}",
            compute.len(),
            requested.len(),
            elapsed
        );
        result
    }

    /// Fast relight after the node at `pos` became at least as transparent
    /// as it was, over the 27 blocks around it.
    pub fn update_light_node(&self, pos: MapPos) -> Result<()> {
        let start = Instant::now();
        let block_pos = pos.block();
        let mut region = Region::new(&self.ruleset);
        let mut targets = HashSet::new();
        for x in -1..=1 {
            for y in -1..=1 {
                for z in -1..=1 {
                    let neighbour = block_pos.offset(x, y, z);
                    let block = self.get_mapblock(neighbour);
                    if block.is_nil {
                        continue;
                    }
                    region.insert(block);
                    region.mark_updatable(neighbour);
                    targets.insert(neighbour);
                }
            }
        }

        region.relight_node(pos);
        let result = self.save_lit_blocks(region, &targets, false);
        self.metrics().record_fast_relight(start.elapsed());
        result
    }

    /// Writes relit blocks back through the cache. Blocks whose cells did
    /// not change only get their counters refreshed.
    fn save_lit_blocks(&self, region: Region<'_>, targets: &HashSet<MapPos>, clear: bool) -> Result<()> {
        let mut blocks = region.into_blocks();
        for pos in targets {
            let Some(mut block) = blocks.remove(pos) else {
                continue;
            };
            let current = self.cache.get_block(*pos);
            if !current.is_nil && current.update_num != block.update_num {
                // edited while we were relighting; its own update will follow
                log::debug!("Block {} changed during relight, leaving it pending", pos);
                continue;
            }

            let changed = current.is_nil || current.cells() != block.cells();
            if clear && block.light_needs_update == LightNeedsUpdate::SelfOnly {
                block.light_needs_update = LightNeedsUpdate::Clean;
            }
            if changed {
                block.light_update_num += 1;
                self.cache
                    .set_block(block)
                    .with_context(|| format!("Failed to save relit block {}", pos))?;
            } else {
                self.cache.set_block_update_info(&block.update_info())?;
            }
        }
        Ok(())
    }

    pub fn get_node_meta(&self, pos: MapPos) -> Result<Option<NodeMeta>> {
        let _guard = self.meta_locks.lock_shared(pos);
        self.cache.storage().get_node_meta(pos)
    }

    pub fn set_node_meta(&self, meta: &NodeMeta) -> Result<()> {
        let _guard = self.meta_locks.lock_unique(meta.pos);
        self.cache.storage().set_node_meta(meta)
    }

    pub fn delete_node_meta(&self, pos: MapPos) -> Result<()> {
        let _guard = self.meta_locks.lock_unique(pos);
        self.cache.storage().delete_node_meta(pos)
    }

    /// Read-modify-write of one node's metadata. Returning `None` from `f`
    /// deletes the entry.
    pub fn modify_node_meta<F>(&self, pos: MapPos, f: F) -> Result<()>
    where
        F: FnOnce(Option<serde_json::Value>) -> Option<serde_json::Value>,
    {
        let _guard = self.meta_locks.lock_unique(pos);
        let storage = self.cache.storage();
        let current = storage.get_node_meta(pos)?.map(|meta| meta.data);
        match f(current) {
            Some(data) => storage.set_node_meta(&NodeMeta::new(pos, data)),
            None => storage.delete_node_meta(pos),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mc4_gen::builder::LayerBuilder;
    use mc4_gen::flat::FlatGenerator;
    use mc4_map::block::{light_normal, light_sun};
    use mc4_storage::MemoryStorage;
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn ruleset() -> Arc<Ruleset> {
        Arc::new(
            Ruleset::from_json_str(
                r#"{"nodeDefs": {
                    "default:stone": {"transparent": false, "passSunlight": false, "lightLevel": 0},
                    "default:dirt": {"transparent": false, "passSunlight": false, "lightLevel": 0},
                    "default:grass": {"transparent": false, "passSunlight": false, "lightLevel": 0},
                    "default:cobble": {"transparent": false, "passSunlight": false, "lightLevel": 0},
                    "default:torch": {"transparent": true, "passSunlight": true, "lightLevel": 13}
                }}"#,
            )
            .unwrap(),
        )
    }

    fn map_with(generator: Option<Arc<dyn WorldGenerator>>) -> (Map, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        let mut map = Map::new(
            storage.clone(),
            ruleset(),
            CacheConfig::default(),
            Arc::new(BenchmarkMetrics::default()),
        );
        if let Some(generator) = generator {
            map.register_generator(0, generator);
        }
        (map, storage)
    }

    fn light(map: &Map, pos: MapPos) -> u8 {
        let (block_pos, rel) = pos.split();
        map.get_mapblock(block_pos).light(rel.x as usize, rel.y as usize, rel.z as usize)
    }

    #[test]
    fn test_generator_fallback_is_cached_not_stored() {
        let (map, storage) = map_with(Some(Arc::new(FlatGenerator::new(0))));
        let block = map.get_mapblock(MapPos::at(0, 0, 0));
        assert!(!block.is_nil);
        assert!(!block.dirty);
        assert_eq!(map.get_node(MapPos::at(3, 0, 3)).unwrap().itemstring, "default:grass");
        assert!(!storage.contains_block(MapPos::at(0, 0, 0)));
        assert_eq!(map.metrics().total_blocks_generated.load(Ordering::Relaxed), 1);

        // other worlds have no generator
        let other = MapPos::new(0, 0, 0, 0, 7, 0);
        assert!(map.get_mapblock(other).is_nil);
    }

    #[test]
    fn test_set_same_node_is_noop() {
        let (map, storage) = map_with(Some(Arc::new(FlatGenerator::new(0))));
        let pos = MapPos::at(1, 0, 1);
        let before = map.get_mapblock(pos.block()).update_num;
        map.set_node(pos, &Node::new("default:grass")).unwrap();
        assert_eq!(map.get_mapblock(pos.block()).update_num, before);
        assert!(!storage.contains_block(pos.block()));
    }

    #[test]
    fn test_same_lighting_edit_skips_relight() {
        let (map, storage) = map_with(Some(Arc::new(FlatGenerator::new(0))));
        let pos = MapPos::at(1, -1, 1);
        map.set_node(pos, &Node::new("default:cobble")).unwrap();
        let block = map.get_mapblock(pos.block());
        assert_eq!(block.update_num, 1);
        assert_eq!(block.light_needs_update, LightNeedsUpdate::SelfOnly);
        assert!(storage.contains_block(pos.block()));
        assert_eq!(map.metrics().total_full_relights.load(Ordering::Relaxed), 0);
        assert_eq!(map.metrics().total_fast_relights.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_opaque_edit_relights_neighbourhood() {
        let (map, _) = map_with(Some(Arc::new(FlatGenerator::new(0))));
        let pos = MapPos::at(4, 5, 4);
        map.set_node(pos, &Node::new("default:stone")).unwrap();

        let block = map.get_mapblock(pos.block());
        assert_eq!(block.light_needs_update, LightNeedsUpdate::Clean);
        assert_eq!(block.update_num, 1);
        assert_eq!(map.metrics().total_full_relights.load(Ordering::Relaxed), 1);
        assert_eq!(light(&map, pos), 0);
        assert_eq!(light_sun(light(&map, MapPos::at(4, 6, 4))), 15);
        // shadowed column gets sideways sunlight only
        assert_eq!(light_sun(light(&map, MapPos::at(4, 4, 4))), 14);
        assert_eq!(light_normal(light(&map, MapPos::at(4, 4, 4))), 1);
    }

    #[test]
    fn test_digging_takes_fast_path() {
        let (map, _) = map_with(Some(Arc::new(FlatGenerator::new(0))));
        let center = MapPos::at(0, 0, 0);
        map.update_mapblock_light_range(center.offset(-1, -1, -1), center.offset(1, 1, 1)).unwrap();
        assert_eq!(light(&map, MapPos::at(8, 0, 8)), 0);

        map.set_node(MapPos::at(8, 0, 8), &Node::air()).unwrap();
        assert_eq!(map.metrics().total_fast_relights.load(Ordering::Relaxed), 1);
        let opened = light(&map, MapPos::at(8, 0, 8));
        assert_eq!(light_sun(opened), 15);
        assert_eq!(light_normal(opened), 1);
    }

    #[test]
    fn test_range_across_dimensions_is_ignored() {
        let (map, _) = map_with(Some(Arc::new(FlatGenerator::new(0))));
        map.update_mapblock_light_range(MapPos::at(0, 0, 0), MapPos::new(1, 1, 1, 0, 1, 0)).unwrap();
        assert_eq!(map.metrics().total_full_relights.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_far_edge_of_the_world() {
        let (map, _) = map_with(Some(Arc::new(FlatGenerator::new(0))));
        let beyond = MapPos::at(i32::MAX / 8, 0, 0);
        assert!(map.get_mapblock(beyond).is_nil);
        map.update_mapblock_light_range(beyond, beyond.offset(1, 0, 0)).unwrap();
        assert_eq!(map.metrics().total_blocks_generated.load(Ordering::Relaxed), 0);
        assert_eq!(map.metrics().total_full_relight_blocks.load(Ordering::Relaxed), 0);

        // the last addressable column still generates, lights and edits
        let edge = MapPos::at(i32::MAX, 0, 8);
        assert_eq!(map.get_node(edge).unwrap().itemstring, "default:grass");
        let block_pos = edge.block();
        map.update_mapblock_light_range(block_pos.offset(-1, -1, -1), block_pos.offset(1, 1, 1))
            .unwrap();
        map.set_node(edge, &Node::air()).unwrap();
        assert_eq!(map.metrics().total_fast_relights.load(Ordering::Relaxed), 1);
        assert_eq!(light_sun(light(&map, edge)), 15);

        // an opaque edit asks for a neighbourhood relight that runs off the edge
        map.set_node(edge.offset(0, 1, 0), &Node::new("default:stone")).unwrap();
        assert_eq!(map.get_mapblock_update_info(block_pos).light_needs_update, LightNeedsUpdate::Clean);
        assert_eq!(light(&map, edge.offset(0, 1, 0)), 0);
    }

    #[test]
    fn test_info_modes_clear_after_relight() {
        let (map, _) = map_with(Some(Arc::new(FlatGenerator::new(0))));
        let pos = MapPos::at(2, 0, 2);
        let info = map.get_mapblock(pos).update_info();
        assert_eq!(info.light_needs_update, LightNeedsUpdate::SelfOnly);
        map.update_mapblock_light_info(&info).unwrap();
        assert_eq!(map.get_mapblock_update_info(pos).light_needs_update, LightNeedsUpdate::Clean);
        assert_eq!(map.metrics().total_full_relights.load(Ordering::Relaxed), 1);

        // a clean block needs nothing
        let clean = map.get_mapblock_update_info(pos);
        map.update_mapblock_light_info(&clean).unwrap();
        assert_eq!(map.metrics().total_full_relights.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_missing_world_leaves_nothing_to_light() {
        let (map, _) = map_with(None);
        map.update_mapblock_light_range(MapPos::at(0, 0, 0), MapPos::at(0, 0, 0)).unwrap();
        assert_eq!(map.metrics().total_full_relight_blocks.load(Ordering::Relaxed), 0);
        assert_eq!(map.cache().len(), (0, 0));
    }

    #[test]
    fn test_generated_surface_with_builder() {
        let mut builder = LayerBuilder::new();
        builder.fill_layer(-1, "default:stone");
        builder.set_node(5, 0, 5, "default:torch");
        let (map, _) = map_with(Some(Arc::new(FlatGenerator::from_builder(builder))));
        map.update_mapblock_light_range(MapPos::at(0, 0, 0), MapPos::at(0, 0, 0)).unwrap();
        assert_eq!(light_normal(light(&map, MapPos::at(5, 0, 5))), 13);
        assert_eq!(light_normal(light(&map, MapPos::at(5, 0, 8))), 10);
        assert_eq!(light_sun(light(&map, MapPos::at(5, 0, 5))), 15);
    }

    #[test]
    fn test_node_meta_roundtrip() {
        let (map, _) = map_with(None);
        let pos = MapPos::at(10, 2, -3);
        assert!(map.get_node_meta(pos).unwrap().is_none());
        map.set_node_meta(&NodeMeta::new(pos, json!({"items": []}))).unwrap();
        map.modify_node_meta(pos, |data| {
            let mut data = data.unwrap();
            data["items"] = json!(["default:stone 5"]);
            Some(data)
        })
        .unwrap();
        let meta = map.get_node_meta(pos).unwrap().unwrap();
        assert_eq!(meta.data["items"][0], "default:stone 5");

        map.modify_node_meta(pos, |_| None).unwrap();
        assert!(map.get_node_meta(pos).unwrap().is_none());
        map.set_node_meta(&NodeMeta::new(pos, json!(1))).unwrap();
        map.delete_node_meta(pos).unwrap();
        assert!(map.get_node_meta(pos).unwrap().is_none());
    }

    #[test]
    fn test_unreadable_block_is_not_edited() {
        let (map, _) = map_with(Some(Arc::new(FlatGenerator::new(0))));
        let pos = MapPos::at(0, 0, 0);
        // a block that cannot be read still exists for set_node's lookup
        let mut bad = Block::new(pos);
        bad.dont_write_to_db = true;
        bad.is_nil = false;
        bad.dirty = true;
        map.cache().set_block(bad).unwrap();
        assert!(map.set_node(MapPos::at(1, 1, 1), &Node::new("default:stone")).is_err());
    }
}
