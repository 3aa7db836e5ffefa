use anyhow::{bail, Context, Result};
use mc4_map::{Block, MapPos};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

use crate::migrate::{self, MigrationOutcome};
use crate::records::{NodeMeta, PlayerAuthInfo, PlayerData};
use crate::row::BlockRow;
use crate::MapStorage;

/// Block store backed by a single SQLite file.
pub struct SqliteStorage {
    /// A mutex, not a reader/writer lock: `Connection` is `Send` but not
    /// `Sync`, so even reads need exclusive access.
    conn: Mutex<Connection>,
    migration: MigrationOutcome,
}

impl SqliteStorage {
    /// Opens (creating if needed) and upgrades the database. Any failure
    /// here leaves the file untouched past the last committed step.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Can't open database {}", path.display()))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory().context("Can't open in-memory database")?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        let migration = migrate::migrate(&mut conn)?;
        let storage = Self {
            conn: Mutex::new(conn),
            migration,
        };
        storage.log_counts()?;
        Ok(storage)
    }

    pub fn migration(&self) -> MigrationOutcome {
        self.migration
    }

    pub fn schema_version(&self) -> Result<i64> {
        migrate::read_version(&self.conn.lock())
    }

    /// `(total, format 1, format 2)` block rows.
    pub fn row_counts(&self) -> Result<(i64, i64, i64)> {
        migrate::row_counts(&self.conn.lock())
    }

    pub fn player_count(&self) -> Result<i64> {
        self.conn
            .lock()
            .query_row("SELECT COUNT(*) FROM player_data", [], |row| row.get(0))
            .context("Failed to count players")
    }

    fn log_counts(&self) -> Result<()> {
        let (total, raw, rle) = self.row_counts()?;
        log::info!("Database has {} mapblocks ({} in format 1, {} in format 2)", total, raw, rle);
        log::info!("Database has {} players", self.player_count()?);
        Ok(())
    }

    /// Every stored block coordinate.
    pub fn block_positions(&self) -> Result<Vec<MapPos>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT x, y, z, w, world, universe FROM map")?;
        let rows = stmt.query_map([], |r| {
            Ok(MapPos::new(r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?))
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list block positions")
    }
}

impl MapStorage for SqliteStorage {
    fn load_block(&self, pos: MapPos) -> Result<Option<Block>> {
        let row = self
            .conn
            .lock()
            .query_row(
                "SELECT data, id_to_is, sunlit, dirty, version FROM map
                 WHERE x=?1 AND y=?2 AND z=?3 AND w=?4 AND world=?5 AND universe=?6 LIMIT 1",
                params![pos.x, pos.y, pos.z, pos.w, pos.world, pos.universe],
                |r| {
                    Ok(BlockRow {
                        data: r.get(0)?,
                        id_to_is: r.get(1)?,
                        sunlit: r.get(2)?,
                        dirty: r.get(3)?,
                        version: r.get(4)?,
                    })
                },
            )
            .optional()
            .with_context(|| format!("Failed to query block {}", pos))?;
        row.map(|row| row.decode(pos)).transpose()
    }

    fn store_block(&self, block: &Block) -> Result<()> {
        let row = BlockRow::encode(block)?;
        let pos = block.pos;
        self.conn
            .lock()
            .execute(
                "REPLACE INTO map (x, y, z, w, world, universe, data, id_to_is, sunlit, dirty, version)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    pos.x,
                    pos.y,
                    pos.z,
                    pos.w,
                    pos.world,
                    pos.universe,
                    row.data,
                    row.id_to_is,
                    row.sunlit,
                    row.dirty,
                    row.version
                ],
            )
            .with_context(|| format!("Failed to store block {}", pos))?;
        Ok(())
    }

    fn get_node_meta(&self, pos: MapPos) -> Result<Option<NodeMeta>> {
        let data: Option<String> = self
            .conn
            .lock()
            .query_row(
                "SELECT data FROM node_meta
                 WHERE x=?1 AND y=?2 AND z=?3 AND w=?4 AND world=?5 AND universe=?6 LIMIT 1",
                params![pos.x, pos.y, pos.z, pos.w, pos.world, pos.universe],
                |r| r.get(0),
            )
            .optional()
            .with_context(|| format!("Failed to query node meta at {}", pos))?;
        match data {
            Some(json) => {
                let data = serde_json::from_str(&json)
                    .with_context(|| format!("Failed to parse node meta at {}", pos))?;
                Ok(Some(NodeMeta { pos, data }))
            }
            None => Ok(None),
        }
    }

    fn set_node_meta(&self, meta: &NodeMeta) -> Result<()> {
        let pos = meta.pos;
        let json = serde_json::to_string(&meta.data)?;
        self.conn
            .lock()
            .execute(
                "REPLACE INTO node_meta (x, y, z, w, world, universe, data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![pos.x, pos.y, pos.z, pos.w, pos.world, pos.universe, json],
            )
            .with_context(|| format!("Failed to store node meta at {}", pos))?;
        Ok(())
    }

    fn delete_node_meta(&self, pos: MapPos) -> Result<()> {
        self.conn
            .lock()
            .execute(
                "DELETE FROM node_meta
                 WHERE x=?1 AND y=?2 AND z=?3 AND w=?4 AND world=?5 AND universe=?6",
                params![pos.x, pos.y, pos.z, pos.w, pos.world, pos.universe],
            )
            .with_context(|| format!("Failed to delete node meta at {}", pos))?;
        Ok(())
    }

    fn store_pw_info(&self, info: &mut PlayerAuthInfo) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO player_auth (type, login_name, auth_id, data) VALUES (?1, ?2, ?3, ?4)",
            params![info.kind, info.login_name, info.auth_id, info.data],
        )
        .with_context(|| format!("Failed to store auth info for '{}'", info.login_name))?;
        // same guard, so no other insert can slip in between
        info.db_unique_id = Some(conn.last_insert_rowid());
        Ok(())
    }

    fn fetch_pw_info(&self, login_name: &str) -> Result<Option<PlayerAuthInfo>> {
        self.conn
            .lock()
            .query_row(
                "SELECT type, auth_id, data, rowid FROM player_auth WHERE login_name=?1 LIMIT 1",
                params![login_name],
                |r| {
                    Ok(PlayerAuthInfo {
                        kind: r.get(0)?,
                        auth_id: r.get(1)?,
                        data: r.get(2)?,
                        db_unique_id: Some(r.get(3)?),
                        login_name: login_name.to_string(),
                    })
                },
            )
            .optional()
            .with_context(|| format!("Failed to fetch auth info for '{}'", login_name))
    }

    fn update_pw_info(&self, old_login_name: &str, info: &PlayerAuthInfo) -> Result<()> {
        let Some(id) = info.db_unique_id else {
            bail!("Unable to update auth info for '{}': no db_unique_id", old_login_name);
        };
        let changed = self
            .conn
            .lock()
            .execute(
                "UPDATE player_auth SET type=?1, login_name=?2, auth_id=?3, data=?4 WHERE rowid=?5",
                params![info.kind, info.login_name, info.auth_id, info.data, id],
            )
            .with_context(|| format!("Failed to update auth info for '{}'", old_login_name))?;
        if changed == 0 {
            bail!("No auth entry {} for '{}'", id, old_login_name);
        }
        Ok(())
    }

    fn delete_pw_info(&self, login_name: &str) -> Result<()> {
        self.conn
            .lock()
            .execute("DELETE FROM player_auth WHERE login_name=?1", params![login_name])
            .with_context(|| format!("Failed to delete auth info for '{}'", login_name))?;
        Ok(())
    }

    fn store_player_data(&self, data: &PlayerData) -> Result<()> {
        let json = serde_json::to_string(data)?;
        self.conn
            .lock()
            .execute(
                "INSERT INTO player_data (auth_id, name, data) VALUES (?1, ?2, ?3)",
                params![data.auth_id, data.name, json],
            )
            .with_context(|| format!("Failed to store player data for '{}'", data.auth_id))?;
        Ok(())
    }

    fn fetch_player_data(&self, auth_id: &str) -> Result<Option<PlayerData>> {
        let json: Option<String> = self
            .conn
            .lock()
            .query_row(
                "SELECT data FROM player_data WHERE auth_id=?1 LIMIT 1",
                params![auth_id],
                |r| r.get(0),
            )
            .optional()
            .with_context(|| format!("Failed to fetch player data for '{}'", auth_id))?;
        let Some(json) = json else {
            return Ok(None);
        };
        let mut data: PlayerData = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse player data for '{}'", auth_id))?;
        data.auth_id = auth_id.to_string();
        Ok(Some(data))
    }

    fn update_player_data(&self, data: &PlayerData) -> Result<()> {
        let json = serde_json::to_string(data)?;
        let changed = self
            .conn
            .lock()
            .execute(
                "UPDATE player_data SET name=?1, data=?2 WHERE auth_id=?3",
                params![data.name, json, data.auth_id],
            )
            .with_context(|| format!("Failed to update player data for '{}'", data.auth_id))?;
        if changed == 0 {
            bail!("No player data for '{}'", data.auth_id);
        }
        Ok(())
    }

    fn delete_player_data(&self, auth_id: &str) -> Result<()> {
        self.conn
            .lock()
            .execute("DELETE FROM player_data WHERE auth_id=?1", params![auth_id])
            .with_context(|| format!("Failed to delete player data for '{}'", auth_id))?;
        Ok(())
    }
}
