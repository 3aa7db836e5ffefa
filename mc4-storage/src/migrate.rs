//! Schema versioning for the SQLite store.
//!
//! The schema version lives in `PRAGMA user_version`. Databases from before
//! versioning report 0 but already have a `map` table; those are version 1.
//! Each step runs in one exclusive transaction that also bumps the pragma.

use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};

use crate::row::{encode_raw_cells, BlockRow, ROW_FORMAT_RAW, ROW_FORMAT_RLE};
use mc4_map::MapPos;

pub const SCHEMA_VERSION: i64 = 5;

const CREATE_MAP: &str = "CREATE TABLE IF NOT EXISTS map (
    x INT,
    y INT,
    z INT,
    w INT,
    world INT,
    universe INT,
    data MEDIUMBLOB,
    id_to_is TEXT,
    sunlit BOOLEAN,
    dirty BOOLEAN,
    version SMALLINT UNSIGNED,
    PRIMARY KEY (x, y, z, w, world, universe)
);";

const CREATE_PLAYER_AUTH: &str = "CREATE TABLE IF NOT EXISTS player_auth (
    entry_id INTEGER PRIMARY KEY,
    type VARCHAR(32),
    login_name VARCHAR(255),
    auth_id VARCHAR(80),
    data TEXT
);";

const CREATE_PLAYER_DATA: &str = "CREATE TABLE IF NOT EXISTS player_data (
    auth_id VARCHAR(80) PRIMARY KEY,
    name VARCHAR(255),
    data MEDIUMTEXT
);";

const CREATE_NODE_META: &str = "CREATE TABLE IF NOT EXISTS node_meta (
    x INT,
    y INT,
    z INT,
    w INT,
    world INT,
    universe INT,
    data TEXT,
    PRIMARY KEY (x, y, z, w, world, universe)
);";

/// Table layout written by builds that predate schema versioning.
pub const CREATE_MAP_V1: &str = "CREATE TABLE IF NOT EXISTS map (
    x INT,
    y INT,
    z INT,
    data MEDIUMBLOB,
    id_to_is TEXT,
    is_to_id TEXT,
    light_needs_update TINYINT,
    sunlit BOOLEAN,
    dirty BOOLEAN,
    PRIMARY KEY (x, y, z)
);";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationOutcome {
    pub from_version: i64,
    pub to_version: i64,
    /// Number of upgrade steps run. Zero for an up-to-date or brand-new store.
    pub steps_applied: usize,
    pub created: bool,
}

pub fn read_version(conn: &Connection) -> Result<i64> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
        .context("Unable to read pragma 'user_version'")
}

fn has_map_table(conn: &Connection) -> Result<bool> {
    let found: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type='table' AND name='map'",
            [],
            |row| row.get(0),
        )
        .optional()
        .context("Unable to probe for the map table")?;
    Ok(found.is_some())
}

/// Brings the database to [`SCHEMA_VERSION`].
pub fn migrate(conn: &mut Connection) -> Result<MigrationOutcome> {
    let stored = read_version(conn)?;
    let mut version = stored;
    if version == 0 && has_map_table(conn)? {
        version = 1;
    }

    if version == 0 {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Exclusive)?;
        for sql in [CREATE_MAP, CREATE_PLAYER_AUTH, CREATE_PLAYER_DATA, CREATE_NODE_META] {
            tx.execute_batch(sql).context("Failed to create schema")?;
        }
        tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        tx.commit().context("Failed to commit new schema")?;
        log::info!("Initialized new database at schema version {}", SCHEMA_VERSION);
        return Ok(MigrationOutcome {
            from_version: 0,
            to_version: SCHEMA_VERSION,
            steps_applied: 0,
            created: true,
        });
    }

    if version > SCHEMA_VERSION {
        bail!(
            "Database schema version {} is newer than supported version {}",
            version,
            SCHEMA_VERSION
        );
    }

    let from_version = version;
    let mut steps_applied = 0;
    while version < SCHEMA_VERSION {
        let next = version + 1;
        log::info!("Upgrading database from version {} to {}", version, next);
        let tx = conn.transaction_with_behavior(TransactionBehavior::Exclusive)?;
        match version {
            1 => upgrade_v1_to_v2(&tx)?,
            2 => upgrade_v2_to_v3(&tx)?,
            3 => upgrade_v3_to_v4(&tx)?,
            4 => upgrade_v4_to_v5(&tx)?,
            other => bail!("No upgrade path from database version {}", other),
        }
        tx.pragma_update(None, "user_version", next)?;
        tx.commit()
            .with_context(|| format!("Failed to commit upgrade to version {}", next))?;
        version = next;
        steps_applied += 1;
    }

    Ok(MigrationOutcome {
        from_version,
        to_version: version,
        steps_applied,
        created: false,
    })
}

/// Drops `is_to_id`/`light_needs_update`, adds `version`, recompresses rows.
fn upgrade_v1_to_v2(tx: &Transaction) -> Result<()> {
    tx.execute_batch(
        "CREATE TABLE map_new (
            x INT,
            y INT,
            z INT,
            data MEDIUMBLOB,
            id_to_is TEXT,
            sunlit BOOLEAN,
            dirty BOOLEAN,
            version SMALLINT UNSIGNED,
            PRIMARY KEY (x, y, z)
        );",
    )
    .context("Failed to create upgraded map table")?;

    let mut converted = 0usize;
    let mut kept = 0usize;
    {
        let mut select = tx.prepare("SELECT x, y, z, data, id_to_is, sunlit, dirty FROM map")?;
        let mut insert = tx.prepare(
            "INSERT INTO map_new (x, y, z, data, id_to_is, sunlit, dirty, version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        let mut rows = select.query([])?;
        while let Some(r) = rows.next()? {
            let (x, y, z): (i32, i32, i32) = (r.get(0)?, r.get(1)?, r.get(2)?);
            let legacy = BlockRow {
                data: r.get(3)?,
                id_to_is: r.get(4)?,
                sunlit: r.get(5)?,
                dirty: r.get(6)?,
                version: ROW_FORMAT_RAW,
            };
            let pos = MapPos::at(x, y, z);
            let row = match legacy.decode(pos).and_then(|block| BlockRow::encode(&block)) {
                Ok(row) => {
                    converted += 1;
                    row
                }
                Err(e) => {
                    log::error!("Keeping unreadable legacy row {} as-is: {:#}", pos, e);
                    kept += 1;
                    legacy
                }
            };
            insert.execute(params![x, y, z, row.data, row.id_to_is, row.sunlit, row.dirty, row.version])?;
        }
    }
    log::info!("Recompressed {} rows ({} left in legacy format)", converted, kept);

    tx.execute_batch("DROP TABLE map; ALTER TABLE map_new RENAME TO map;")
        .context("Failed to replace map table")?;
    Ok(())
}

fn upgrade_v2_to_v3(tx: &Transaction) -> Result<()> {
    tx.execute_batch(
        "CREATE TABLE map_new (
            x INT,
            y INT,
            z INT,
            w INT,
            world INT,
            universe INT,
            data MEDIUMBLOB,
            id_to_is TEXT,
            sunlit BOOLEAN,
            dirty BOOLEAN,
            version SMALLINT UNSIGNED,
            PRIMARY KEY (x, y, z, w, world, universe)
        );
        INSERT INTO map_new (x, y, z, w, world, universe, data, id_to_is, sunlit, dirty, version)
            SELECT x, y, z, 0, 0, 0, data, id_to_is, sunlit, dirty, version FROM map;
        DROP TABLE map;
        ALTER TABLE map_new RENAME TO map;",
    )
    .context("Failed to add dimension columns")
}

fn upgrade_v3_to_v4(tx: &Transaction) -> Result<()> {
    tx.execute_batch(CREATE_PLAYER_AUTH)
        .and_then(|_| tx.execute_batch(CREATE_PLAYER_DATA))
        .context("Failed to create player tables")
}

fn upgrade_v4_to_v5(tx: &Transaction) -> Result<()> {
    tx.execute_batch(CREATE_NODE_META)
        .context("Failed to create node_meta table")
}

/// Writes a pre-versioning database.
#[cfg(test)]
pub(crate) fn write_legacy_v1(conn: &Connection, blocks: &[mc4_map::Block]) -> Result<()> {
    conn.execute_batch(CREATE_MAP_V1)?;
    for block in blocks {
        conn.execute(
            "INSERT INTO map (x, y, z, data, id_to_is, is_to_id, light_needs_update, sunlit, dirty)
             VALUES (?1, ?2, ?3, ?4, ?5, '{}', 1, ?6, ?7)",
            params![
                block.pos.x,
                block.pos.y,
                block.pos.z,
                encode_raw_cells(block.cells()),
                crate::row::encode_dictionary(block.dictionary())?,
                block.sunlit,
                block.dirty,
            ],
        )?;
    }
    Ok(())
}

/// `(total, format 1, format 2)` row counts.
pub fn row_counts(conn: &Connection) -> Result<(i64, i64, i64)> {
    let count = |sql: &str| -> Result<i64> {
        conn.query_row(sql, [], |row| row.get(0))
            .with_context(|| format!("Failed to run '{}'", sql))
    };
    Ok((
        count("SELECT COUNT(*) FROM map")?,
        count(&format!("SELECT COUNT(*) FROM map WHERE version={}", ROW_FORMAT_RAW))?,
        count(&format!("SELECT COUNT(*) FROM map WHERE version={}", ROW_FORMAT_RLE))?,
    ))
}
