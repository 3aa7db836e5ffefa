use mc4_benchmark::BenchmarkMetrics;
use mc4_cache::CacheConfig;
use mc4_gen::flat::FlatGenerator;
use mc4_map::{MapPos, Node, Ruleset};
use mc4_storage::SqliteStorage;
use mc4_world::Map;
use std::path::PathBuf;
use std::sync::Arc;

struct TempDb(PathBuf);

impl TempDb {
    fn new(name: &str) -> Self {
        let path = std::env::temp_dir().join(format!("mc4-world-{}-{}.sqlite", name, std::process::id()));
        let _ = std::fs::remove_file(&path);
        Self(path)
    }
}

impl Drop for TempDb {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

fn ruleset() -> Arc<Ruleset> {
    Arc::new(
        Ruleset::from_json_str(
            r#"{"nodeDefs": {
                "default:grass": {"transparent": false, "passSunlight": false, "lightLevel": 0},
                "default:dirt": {"transparent": false, "passSunlight": false, "lightLevel": 0}
            }}"#,
        )
        .unwrap(),
    )
}

fn open_map(path: &PathBuf, config: CacheConfig, generate: bool) -> (Map, Arc<SqliteStorage>) {
    let storage = Arc::new(SqliteStorage::open(path).unwrap());
    let mut map = Map::new(storage.clone(), ruleset(), config, Arc::new(BenchmarkMetrics::default()));
    if generate {
        map.register_generator(0, Arc::new(FlatGenerator::new(0)));
    }
    (map, storage)
}

#[test]
fn test_edits_survive_eviction_and_reopen() {
    let tmp = TempDb::new("reopen");
    let tiny = CacheConfig { l1_target: 1, l2_target: 1 };
    let edits: Vec<MapPos> = (0..6).map(|i| MapPos::at(i * 16 + 3, 0, 3)).collect();

    {
        let (map, storage) = open_map(&tmp.0, tiny, true);
        for pos in &edits {
            map.set_node(*pos, &Node::new("default:dirt")).unwrap();
        }
        map.clean_cache();
        assert_eq!(storage.row_counts().unwrap(), (6, 0, 6));
        // everything evicted still reads back through the store
        for pos in &edits {
            assert_eq!(map.get_node(*pos).unwrap().itemstring, "default:dirt");
        }
        let (hot, warm) = map.cache().len();
        assert!(hot <= 1 && warm <= 1);
    }

    let (map, storage) = open_map(&tmp.0, CacheConfig::default(), false);
    assert_eq!(storage.migration().steps_applied, 0);
    for pos in &edits {
        assert_eq!(map.get_node(*pos).unwrap().itemstring, "default:dirt");
        // the rest of the block came from the generator before the edit
        assert_eq!(map.get_node(pos.offset(1, 0, 0)).unwrap().itemstring, "default:grass");
    }
    // never edited, never written
    assert!(map.get_mapblock(MapPos::at(0, 0, 5)).is_nil);
    assert_eq!(map.get_node(MapPos::at(3, 0, 5 * 16)).unwrap().itemstring, "air");
}
