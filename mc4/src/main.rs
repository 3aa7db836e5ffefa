use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use mc4_benchmark::BenchmarkMetrics;
use mc4_map::{MapPos, Ruleset, BLOCK_COORD_MAX, BLOCK_COORD_MIN};
use mc4_storage::{open_storage, SqliteStorage, StorageBackend};
use mc4_world::Map;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "mc4", about = "World database tool: migrations, stats, relighting and block export")]
pub struct Args {
    /// JSON config file with `database` and `loader` sections
    #[arg(short, long, env = "MC4_CONFIG")]
    pub config: Option<PathBuf>,

    /// Overrides database.sqlite3_file
    #[arg(short, long, env = "MC4_DATABASE")]
    pub database: Option<PathBuf>,

    /// Dotted config override, e.g. --set database.L1_cache_target=500
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub overrides: Vec<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Open the database and bring its schema up to date
    Migrate,
    /// Read every stored block and print statistics
    Info,
    /// Recompute lighting for the blocks around a block coordinate
    Relight {
        #[arg(allow_negative_numbers = true)]
        x: i32,
        #[arg(allow_negative_numbers = true)]
        y: i32,
        #[arg(allow_negative_numbers = true)]
        z: i32,
        #[arg(short, long, default_value = "0")]
        radius: i32,
    },
    /// Write one block in wire format (or as JSON with --json)
    Export {
        #[arg(allow_negative_numbers = true)]
        x: i32,
        #[arg(allow_negative_numbers = true)]
        y: i32,
        #[arg(allow_negative_numbers = true)]
        z: i32,
        out: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(path) = &args.database {
        config.database.sqlite3_file = path.clone();
    }
    for assignment in &args.overrides {
        config.apply_override(assignment)?;
    }
    Ok(config)
}

/// Block coordinate from the command line.
fn block_arg(x: i32, y: i32, z: i32) -> Result<MapPos> {
    let pos = MapPos::at(x, y, z);
    if !pos.is_block_in_range() {
        bail!(
            "Block {} is outside the addressable range {}..={}",
            pos,
            BLOCK_COORD_MIN,
            BLOCK_COORD_MAX
        );
    }
    Ok(pos)
}

fn open_sqlite(config: &Config) -> Result<SqliteStorage> {
    if config.database.backend != StorageBackend::Sqlite3 {
        bail!("This command needs the sqlite3 backend");
    }
    SqliteStorage::open(&config.database.sqlite3_file)
}

fn open_map(config: &Config, ruleset: Ruleset, metrics: Arc<BenchmarkMetrics>) -> Result<Map> {
    let storage = open_storage(config.database.backend, &config.database.sqlite3_file)?;
    Ok(Map::new(storage, Arc::new(ruleset), config.cache(), metrics))
}

fn run(args: Args) -> Result<()> {
    let config = load_config(&args)?;
    let metrics = Arc::new(BenchmarkMetrics::new(config.summary()));

    match args.command {
        Command::Migrate => {
            let storage = open_sqlite(&config)?;
            let outcome = storage.migration();
            if outcome.created {
                println!("Created new database at schema version {}", outcome.to_version);
            } else if outcome.steps_applied == 0 {
                println!("Database already at schema version {}", outcome.to_version);
            } else {
                println!(
                    "Upgraded schema {} -> {} in {} steps",
                    outcome.from_version, outcome.to_version, outcome.steps_applied
                );
            }
        }
        Command::Info => {
            let storage = Arc::new(open_sqlite(&config)?);
            let (total, raw, rle) = storage.row_counts()?;
            println!("Schema version: {}", storage.schema_version()?);
            println!("Blocks: {} ({} format 1, {} format 2)", total, raw, rle);
            println!("Players: {}", storage.player_count()?);

            let positions = storage.block_positions()?;
            let map = Map::new(storage, Arc::new(Ruleset::default()), config.cache(), metrics.clone());
            let mut unreadable = 0;
            for pos in positions {
                if map.get_mapblock(pos).dont_write_to_db {
                    unreadable += 1;
                }
            }
            map.clean_cache();
            println!("Unreadable blocks: {}", unreadable);
            println!("{}", metrics.generate_report());
        }
        Command::Relight { x, y, z, radius } => {
            let ruleset = Ruleset::load(&config.loader.defs_file)?;
            let map = open_map(&config, ruleset, metrics.clone())?;
            let center = block_arg(x, y, z)?;
            let (Some(min), Some(max)) = (
                center.checked_offset(-radius, -radius, -radius),
                center.checked_offset(radius, radius, radius),
            ) else {
                bail!("Radius {} around block {} overflows", radius, center);
            };
            map.update_mapblock_light_range(min, max)?;
            map.clean_cache();
            println!("{}", metrics.generate_report());
        }
        Command::Export { x, y, z, out, json } => {
            let pos = block_arg(x, y, z)?;
            let map = open_map(&config, Ruleset::default(), metrics)?;
            let bytes = if json {
                let block = map.get_mapblock(pos);
                if block.is_nil {
                    bail!("Block {} does not exist", pos);
                }
                serde_json::to_vec_pretty(&block.as_json())?
            } else {
                let compressed = map.cache().get_block_compressed(pos);
                if compressed.is_nil {
                    bail!("Block {} does not exist", pos);
                }
                compressed.to_wire()?
            };
            std::fs::write(&out, &bytes).with_context(|| format!("Failed to write {}", out.display()))?;
            println!("Wrote {} bytes for block {} to {}", bytes.len(), pos, out.display());
        }
    }
    Ok(())
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    if let Err(e) = run(args) {
        log::error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_arg_range() {
        assert_eq!(block_arg(-3, 0, 7).unwrap(), MapPos::at(-3, 0, 7));
        assert!(block_arg(BLOCK_COORD_MAX, BLOCK_COORD_MIN, 0).is_ok());
        assert!(block_arg(i32::MAX / 8, 0, 0).is_err());
        assert!(block_arg(0, BLOCK_COORD_MIN - 1, 0).is_err());
    }

    #[test]
    fn test_relight_args_parse_negative() {
        let args = Args::try_parse_from(["mc4", "relight", "-5", "0", "-1", "--radius", "2"]).unwrap();
        match args.command {
            Command::Relight { x, y, z, radius } => assert_eq!((x, y, z, radius), (-5, 0, -1, 2)),
            _ => panic!("expected relight"),
        }
    }
}
