use anyhow::{bail, Context, Result};
use mc4_cache::CacheConfig;
use mc4_storage::StorageBackend;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub backend: StorageBackend,
    pub sqlite3_file: PathBuf,
    #[serde(rename = "L1_cache_target")]
    pub l1_cache_target: usize,
    #[serde(rename = "L2_cache_target")]
    pub l2_cache_target: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let cache = CacheConfig::default();
        Self {
            backend: StorageBackend::Sqlite3,
            sqlite3_file: PathBuf::from("test_map.sqlite"),
            l1_cache_target: cache.l1_target,
            l2_cache_target: cache.l2_target,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderConfig {
    pub defs_file: PathBuf,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            defs_file: PathBuf::from("defs.json"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub database: DatabaseConfig,
    pub loader: LoaderConfig,
}

impl Config {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Invalid config")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_json_str(&json).with_context(|| format!("In config {}", path.display()))
    }

    /// Applies one `key=value` override using the dotted key names of the
    /// config file.
    pub fn apply_override(&mut self, assignment: &str) -> Result<()> {
        let Some((key, value)) = assignment.split_once('=') else {
            bail!("Override '{}' is not of the form key=value", assignment);
        };
        let (key, value) = (key.trim(), value.trim());
        let parse_count = |v: &str| -> Result<usize> {
            v.parse().with_context(|| format!("Invalid value '{}' for {}", v, key))
        };
        match key {
            "database.backend" => self.database.backend = value.parse()?,
            "database.sqlite3_file" => self.database.sqlite3_file = PathBuf::from(value),
            "database.L1_cache_target" => self.database.l1_cache_target = parse_count(value)?,
            "database.L2_cache_target" => self.database.l2_cache_target = parse_count(value)?,
            "loader.defs_file" => self.loader.defs_file = PathBuf::from(value),
            _ => bail!("Unknown config key '{}'", key),
        }
        Ok(())
    }

    pub fn cache(&self) -> CacheConfig {
        CacheConfig {
            l1_target: self.database.l1_cache_target,
            l2_target: self.database.l2_cache_target,
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "backend={:?}, file={}, L1={}, L2={}",
            self.database.backend,
            self.database.sqlite3_file.display(),
            self.database.l1_cache_target,
            self.database.l2_cache_target
        )
    }
}
