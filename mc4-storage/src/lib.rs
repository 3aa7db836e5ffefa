use anyhow::{bail, Result};
use mc4_map::{Block, BlockUpdateInfo, MapPos};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

pub mod memory;
pub mod migrate;
pub mod records;
pub mod row;
pub mod sqlite;

pub use memory::MemoryStorage;
pub use migrate::MigrationOutcome;
pub use records::{NodeMeta, PlayerAuthInfo, PlayerData};
pub use sqlite::SqliteStorage;

/// Everything the world layer needs from a persistent backend.
///
/// Implementors provide the fallible primitives; the provided `get_block`
/// and `set_block` apply the never-fail read and no-clobber write rules on top.
pub trait MapStorage: Send + Sync {
    /// `Ok(None)` when no row exists, `Err` when the stored row is unreadable.
    fn load_block(&self, pos: MapPos) -> Result<Option<Block>>;

    fn store_block(&self, block: &Block) -> Result<()>;

    /// Never fails. Missing blocks come back nil; unreadable ones come back
    /// nil and flagged so they are never written over the stored row.
    fn get_block(&self, pos: MapPos) -> Block {
        match self.load_block(pos) {
            Ok(Some(block)) => block,
            Ok(None) => Block::new(pos),
            Err(e) => {
                log::error!("Failed to load block {}: {:#}", pos, e);
                let mut block = Block::new(pos);
                block.dont_write_to_db = true;
                block
            }
        }
    }

    fn set_block(&self, block: &Block) -> Result<()> {
        if block.dont_write_to_db {
            log::warn!("Refusing to store block {} loaded from a bad row", block.pos);
            return Ok(());
        }
        if !block.dirty {
            return Ok(());
        }
        self.store_block(block)
    }

    /// Stored rows carry no counters, so by default every block looks
    /// freshly loaded.
    fn get_block_update_info(&self, pos: MapPos) -> BlockUpdateInfo {
        BlockUpdateInfo::fresh(pos)
    }

    fn set_block_update_info(&self, _info: &BlockUpdateInfo) -> Result<()> {
        Ok(())
    }

    fn get_node_meta(&self, pos: MapPos) -> Result<Option<NodeMeta>>;
    fn set_node_meta(&self, meta: &NodeMeta) -> Result<()>;
    fn delete_node_meta(&self, pos: MapPos) -> Result<()>;

    /// Inserts a new auth entry and fills in `db_unique_id`.
    fn store_pw_info(&self, info: &mut PlayerAuthInfo) -> Result<()>;
    fn fetch_pw_info(&self, login_name: &str) -> Result<Option<PlayerAuthInfo>>;
    /// Rewrites the entry identified by `info.db_unique_id`.
    fn update_pw_info(&self, old_login_name: &str, info: &PlayerAuthInfo) -> Result<()>;
    fn delete_pw_info(&self, login_name: &str) -> Result<()>;

    fn store_player_data(&self, data: &PlayerData) -> Result<()>;
    fn fetch_player_data(&self, auth_id: &str) -> Result<Option<PlayerData>>;
    fn update_player_data(&self, data: &PlayerData) -> Result<()>;
    fn delete_player_data(&self, auth_id: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Sqlite3,
    Memory,
}

impl std::str::FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sqlite3" => Ok(Self::Sqlite3),
            "memory" => Ok(Self::Memory),
            other => bail!("Unknown database backend '{}'", other),
        }
    }
}

pub fn open_storage(backend: StorageBackend, sqlite_file: &Path) -> Result<Arc<dyn MapStorage>> {
    Ok(match backend {
        StorageBackend::Sqlite3 => Arc::new(SqliteStorage::open(sqlite_file)?),
        StorageBackend::Memory => Arc::new(MemoryStorage::new()),
    })
}
