//! TOML configuration: database, cache roots, aliases, runs and reports.
//!
//! ```toml
//! [db]
//! path = ".oacensus/oacensus.sqlite3"
//!
//! [cache]
//! root = ".oacensus/cache"
//! work_root = ".oacensus/work"
//!
//! [aliases.wellcome]
//! plugin = "doilist"
//! [aliases.wellcome.settings]
//! path = "dois.txt"
//!
//! [[run]]
//! source = "wellcome"
//!
//! [[report]]
//! name = "text-dump"
//! ```

use anyhow::Result;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::cache::CacheDirs;
use crate::error::{EngineError, EngineResult};
use crate::settings::{AliasDef, SettingsLayer};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub aliases: BTreeMap<String, AliasDef>,
    #[serde(default, rename = "run")]
    pub runs: Vec<RunConfig>,
    #[serde(default, rename = "report")]
    pub reports: Vec<ReportConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".oacensus/oacensus.sqlite3")
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_root")]
    pub root: PathBuf,
    #[serde(default = "default_work_root")]
    pub work_root: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: default_cache_root(),
            work_root: default_work_root(),
        }
    }
}

fn default_cache_root() -> PathBuf {
    PathBuf::from(".oacensus/cache")
}
fn default_work_root() -> PathBuf {
    PathBuf::from(".oacensus/work")
}

/// One `[[run]]` entry: a source alias and its run overrides.
#[derive(Debug, Deserialize, Clone)]
pub struct RunConfig {
    pub source: String,
    #[serde(default)]
    pub settings: SettingsLayer,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReportConfig {
    pub name: String,
}

impl Config {
    /// Create (if needed) and open the cache and work roots.
    pub fn cache_dirs(&self) -> Result<CacheDirs> {
        Ok(CacheDirs::new(&self.cache.root, &self.cache.work_root)?)
    }

    /// Runs whose alias is in `only`, or all runs when `only` is empty.
    pub fn selected_runs(&self, only: &[String]) -> EngineResult<Vec<&RunConfig>> {
        for alias in only {
            self.run_for(alias)?;
        }
        Ok(self
            .runs
            .iter()
            .filter(|r| only.is_empty() || only.contains(&r.source))
            .collect())
    }

    /// The `[[run]]` entry for `alias`.
    pub fn run_for(&self, alias: &str) -> EngineResult<&RunConfig> {
        self.runs
            .iter()
            .find(|r| r.source == alias)
            .ok_or_else(|| EngineError::config(format!("'{}' is not a configured [[run]] source", alias)))
    }

    pub fn report_names(&self) -> Vec<String> {
        self.reports.iter().map(|r| r.name.clone()).collect()
    }
}

/// Read and validate the config file. Every failure here is a user error.
pub fn load_config(path: &Path) -> EngineResult<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        EngineError::config(format!("failed to read config file {}: {}", path.display(), e))
    })?;

    let config: Config = toml::from_str(&content).map_err(|e| {
        EngineError::config(format!("failed to parse config file {}: {}", path.display(), e))
    })?;

    if config.cache.root == config.cache.work_root {
        return Err(EngineError::config(
            "cache.root and cache.work_root must be different directories",
        ));
    }
    if config.cache.root.starts_with(&config.cache.work_root)
        || config.cache.work_root.starts_with(&config.cache.root)
    {
        return Err(EngineError::config(
            "cache.root and cache.work_root must not be nested inside each other",
        ));
    }

    for (i, run) in config.runs.iter().enumerate() {
        if run.source.trim().is_empty() {
            return Err(EngineError::config(format!("run[{}].source must not be empty", i)));
        }
    }
    for (i, report) in config.reports.iter().enumerate() {
        if report.name.trim().is_empty() {
            return Err(EngineError::config(format!("report[{}].name must not be empty", i)));
        }
    }

    Ok(config)
}
