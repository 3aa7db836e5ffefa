use anyhow::{bail, Result};
use mc4_map::{Block, BlockUpdateInfo, MapPos};
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::records::{NodeMeta, PlayerAuthInfo, PlayerData};
use crate::MapStorage;

#[derive(Default)]
struct Tables {
    blocks: HashMap<MapPos, Block>,
    node_meta: HashMap<MapPos, NodeMeta>,
    auth: Vec<PlayerAuthInfo>,
    next_auth_id: i64,
    players: HashMap<String, PlayerData>,
}

/// Non-persistent store. Everything is lost on drop; handy for tests and
/// throwaway worlds.
#[derive(Default)]
pub struct MemoryStorage {
    tables: RwLock<Tables>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block_count(&self) -> usize {
        self.tables.read().blocks.len()
    }

    pub fn contains_block(&self, pos: MapPos) -> bool {
        self.tables.read().blocks.contains_key(&pos)
    }
}

impl MapStorage for MemoryStorage {
    fn load_block(&self, pos: MapPos) -> Result<Option<Block>> {
        Ok(self.tables.read().blocks.get(&pos).cloned())
    }

    fn store_block(&self, block: &Block) -> Result<()> {
        self.tables.write().blocks.insert(block.pos, block.clone());
        Ok(())
    }

    fn get_block_update_info(&self, pos: MapPos) -> BlockUpdateInfo {
        match self.tables.read().blocks.get(&pos) {
            Some(block) => block.update_info(),
            None => BlockUpdateInfo::fresh(pos),
        }
    }

    fn set_block_update_info(&self, info: &BlockUpdateInfo) -> Result<()> {
        if let Some(block) = self.tables.write().blocks.get_mut(&info.pos) {
            block.apply_update_info(info);
        }
        Ok(())
    }

    fn get_node_meta(&self, pos: MapPos) -> Result<Option<NodeMeta>> {
        Ok(self.tables.read().node_meta.get(&pos).cloned())
    }

    fn set_node_meta(&self, meta: &NodeMeta) -> Result<()> {
        self.tables.write().node_meta.insert(meta.pos, meta.clone());
        Ok(())
    }

    fn delete_node_meta(&self, pos: MapPos) -> Result<()> {
        self.tables.write().node_meta.remove(&pos);
        Ok(())
    }

    fn store_pw_info(&self, info: &mut PlayerAuthInfo) -> Result<()> {
        let mut tables = self.tables.write();
        tables.next_auth_id += 1;
        info.db_unique_id = Some(tables.next_auth_id);
        tables.auth.push(info.clone());
        Ok(())
    }

    fn fetch_pw_info(&self, login_name: &str) -> Result<Option<PlayerAuthInfo>> {
        let tables = self.tables.read();
        Ok(tables.auth.iter().find(|a| a.login_name == login_name).cloned())
    }

    fn update_pw_info(&self, old_login_name: &str, info: &PlayerAuthInfo) -> Result<()> {
        let Some(id) = info.db_unique_id else {
            bail!("Unable to update auth info for '{}': no db_unique_id", old_login_name);
        };
        let mut tables = self.tables.write();
        match tables.auth.iter_mut().find(|a| a.db_unique_id == Some(id)) {
            Some(entry) => {
                *entry = info.clone();
                Ok(())
            }
            None => bail!("No auth entry {} for '{}'", id, old_login_name),
        }
    }

    fn delete_pw_info(&self, login_name: &str) -> Result<()> {
        self.tables.write().auth.retain(|a| a.login_name != login_name);
        Ok(())
    }

    fn store_player_data(&self, data: &PlayerData) -> Result<()> {
        let mut tables = self.tables.write();
        if tables.players.contains_key(&data.auth_id) {
            bail!("Player data for '{}' already exists", data.auth_id);
        }
        tables.players.insert(data.auth_id.clone(), data.clone());
        Ok(())
    }

    fn fetch_player_data(&self, auth_id: &str) -> Result<Option<PlayerData>> {
        Ok(self.tables.read().players.get(auth_id).cloned())
    }

    fn update_player_data(&self, data: &PlayerData) -> Result<()> {
        match self.tables.write().players.get_mut(&data.auth_id) {
            Some(entry) => {
                *entry = data.clone();
                Ok(())
            }
            None => bail!("No player data for '{}'", data.auth_id),
        }
    }

    fn delete_player_data(&self, auth_id: &str) -> Result<()> {
        self.tables.write().players.remove(auth_id);
        Ok(())
    }
}
