use mc4_benchmark::BenchmarkMetrics;
use mc4_cache::CacheConfig;
use mc4_gen::builder::LayerBuilder;
use mc4_gen::flat::FlatGenerator;
use mc4_map::block::{cell_light, light_normal, light_sun};
use mc4_map::{LightNeedsUpdate, MapPos, Node, Ruleset};
use mc4_storage::MemoryStorage;
use mc4_world::Map;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;

fn ruleset() -> Arc<Ruleset> {
    Arc::new(
        Ruleset::from_json_str(
            r#"{"nodeDefs": {
                "default:stone": {"transparent": false, "passSunlight": false, "lightLevel": 0},
                "default:torch": {"transparent": true, "passSunlight": true, "lightLevel": 15}
            }}"#,
        )
        .unwrap(),
    )
}

fn map_with(builder: LayerBuilder) -> Map {
    let mut map = Map::new(
        Arc::new(MemoryStorage::new()),
        ruleset(),
        CacheConfig::default(),
        Arc::new(BenchmarkMetrics::default()),
    );
    map.register_generator(0, Arc::new(FlatGenerator::from_builder(builder)));
    map
}

fn light(map: &Map, pos: MapPos) -> u8 {
    let (block_pos, rel) = pos.split();
    map.get_mapblock(block_pos).light(rel.x as usize, rel.y as usize, rel.z as usize)
}

fn neighbourhood_lights(map: &Map, center: MapPos) -> HashMap<MapPos, Vec<u8>> {
    let mut out = HashMap::new();
    for x in -1..=1 {
        for y in -1..=1 {
            for z in -1..=1 {
                let pos = center.offset(x, y, z);
                let block = map.get_mapblock(pos);
                out.insert(pos, block.cells().iter().map(|&c| cell_light(c)).collect());
            }
        }
    }
    out
}

#[test]
fn test_torch_on_floor_converges() {
    let mut builder = LayerBuilder::new();
    builder.fill_layer(-2, "default:stone");
    builder.fill_layer(-1, "default:stone");
    builder.set_node(8, 0, 8, "default:torch");
    // sealed one-node pocket
    for x in 1..=3 {
        for y in 4..=6 {
            for z in 1..=3 {
                builder.set_node(x, y, z, "default:stone");
            }
        }
    }
    builder.set_node(2, 5, 2, "air");
    let map = map_with(builder);

    map.update_mapblock_light_range(MapPos::at(-1, -1, -1), MapPos::at(1, 1, 1)).unwrap();

    let torch = light(&map, MapPos::at(8, 0, 8));
    assert_eq!(light_normal(torch), 15);
    assert_eq!(light_normal(light(&map, MapPos::at(13, 0, 8))), 10);
    assert_eq!(light_normal(light(&map, MapPos::at(8, 0, 3))), 10);
    assert_eq!(light_normal(light(&map, MapPos::at(8, 3, 6))), 10);

    // Opaque cells hold 0. No light reaches the pocket behind the wall; its
    // block light of 1 is the transparent baseline every unlit air cell
    // carries, so an unlit pocket reads 1, not 0.
    assert_eq!(light(&map, MapPos::at(8, -1, 8)), 0);
    assert_eq!(light(&map, MapPos::at(2, 6, 2)), 0);
    assert_eq!(light_normal(light(&map, MapPos::at(2, 5, 2))), 1);
    assert_eq!(light_sun(light(&map, MapPos::at(2, 5, 2))), 0);
    // under the floor is dark
    assert_eq!(light_sun(light(&map, MapPos::at(8, -3, 8))), 0);
    assert_eq!(light_normal(light(&map, MapPos::at(8, -3, 8))), 1);

    for y in 0..=20 {
        assert_eq!(light_sun(light(&map, MapPos::at(8, y, 8))), 15, "sun at y={y}");
    }
}

#[test]
fn test_fast_path_never_darkens() {
    let mut builder = LayerBuilder::new();
    builder.fill_below(0, "default:stone");
    let map = map_with(builder);
    let center = MapPos::at(0, -1, 0);
    map.update_mapblock_light_range(center.offset(-1, -1, -1), center.offset(1, 1, 1)).unwrap();

    let mut rng = StdRng::seed_from_u64(77);
    let mut fast = 0;
    for _ in 0..40 {
        // dig somewhere near the surface of the centre block
        let pos = MapPos::at(rng.gen_range(0..16), rng.gen_range(-4..0), rng.gen_range(0..16));
        if map.get_node(pos).unwrap().itemstring == "air" {
            continue;
        }
        let before = neighbourhood_lights(&map, pos.block());
        map.set_node(pos, &Node::air()).unwrap();
        fast += 1;
        let after = neighbourhood_lights(&map, pos.block());

        for (block_pos, old) in &before {
            let new = &after[block_pos];
            for (i, (&o, &n)) in old.iter().zip(new.iter()).enumerate() {
                assert!(
                    light_normal(n) >= light_normal(o) && light_sun(n) >= light_sun(o),
                    "cell {i} of {block_pos} went from {o:#x} to {n:#x} after digging {pos}"
                );
            }
        }
    }
    assert_eq!(
        map.metrics().total_fast_relights.load(std::sync::atomic::Ordering::Relaxed),
        fast
    );
    assert_eq!(map.metrics().total_full_relights.load(std::sync::atomic::Ordering::Relaxed), 1);
}

#[test]
fn test_dig_to_sky_lets_sun_in() {
    let mut builder = LayerBuilder::new();
    builder.fill_below(0, "default:stone");
    let map = map_with(builder);
    let center = MapPos::at(0, -1, 0);
    map.update_mapblock_light_range(center.offset(-1, -1, -1), center.offset(1, 1, 1)).unwrap();

    for y in (-3..0).rev() {
        map.set_node(MapPos::at(7, y, 7), &Node::air()).unwrap();
    }
    for y in -3..0 {
        assert_eq!(light_sun(light(&map, MapPos::at(7, y, 7))), 15);
    }
    // shaft walls stay opaque, the stone below the shaft too
    assert_eq!(light(&map, MapPos::at(6, -2, 7)), 0);
    assert_eq!(light(&map, MapPos::at(7, -4, 7)), 0);
}

#[test]
fn test_neighbourhood_mode_survives_batch() {
    let mut builder = LayerBuilder::new();
    builder.fill_below(0, "default:stone");
    let map = map_with(builder);

    let a = MapPos::at(0, 0, 0);
    let b = MapPos::at(1, 0, 0);
    map.set_mapblock(map.get_mapblock(a)).unwrap();
    map.set_mapblock(map.get_mapblock(b)).unwrap();
    assert_eq!(map.get_mapblock_update_info(a).light_needs_update, LightNeedsUpdate::Neighborhood);

    let info = map.get_mapblock_update_info(a);
    map.update_mapblock_light_info(&info).unwrap();

    assert_eq!(map.get_mapblock_update_info(a).light_needs_update, LightNeedsUpdate::Clean);
    // b was relit as part of a's neighbourhood but still owes its own wider pass
    assert_eq!(map.get_mapblock_update_info(b).light_needs_update, LightNeedsUpdate::Neighborhood);
    assert!(map.get_mapblock_update_info(b).light_update_num > 0);
    // plain pending neighbours are done
    assert_eq!(
        map.get_mapblock_update_info(MapPos::at(-1, 0, 0)).light_needs_update,
        LightNeedsUpdate::Clean
    );

    let info = map.get_mapblock_update_info(b);
    map.update_mapblock_light_info(&info).unwrap();
    assert_eq!(map.get_mapblock_update_info(b).light_needs_update, LightNeedsUpdate::Clean);
}
