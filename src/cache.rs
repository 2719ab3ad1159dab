//! On-disk staging protocol for scraped data.
//!
//! Every fetch happens in a fresh work directory and is moved into the
//! cache root only once `scrape()` succeeded:
//!
//! ```text
//! <work_root>/<key>   ── scrape() ──▶   rename   ──▶   <cache_root>/<key>
//! ```
//!
//! The key is the source's fingerprint, prefixed by the period for periodic
//! sources (`2014-03-<fingerprint>`). The existence of the cache directory
//! is the only cache-hit signal.

use chrono::{DateTime, Local, Months, TimeDelta};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use walkdir::WalkDir;

use crate::error::{EngineError, EngineResult};
use crate::fingerprint::Fingerprint;
use crate::settings::PluginSettings;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub fingerprint: Fingerprint,
    pub period: Option<String>,
}

impl CacheKey {
    pub fn source(fingerprint: Fingerprint) -> Self {
        Self {
            fingerprint,
            period: None,
        }
    }

    pub fn period(fingerprint: Fingerprint, period_key: impl Into<String>) -> Self {
        Self {
            fingerprint,
            period: Some(period_key.into()),
        }
    }

    pub fn dir_name(&self) -> String {
        match &self.period {
            Some(period) => format!("{}-{}", period, self.fingerprint),
            None => self.fingerprint.to_hex(),
        }
    }
}

/// Result of checking a cache directory against the expiry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Missing,
    Fresh,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryUnit {
    Years,
    Months,
    Weeks,
    Days,
    Hours,
    Minutes,
    Seconds,
    Microseconds,
}

impl FromStr for ExpiryUnit {
    type Err = EngineError;

    fn from_str(s: &str) -> EngineResult<Self> {
        match s {
            "years" => Ok(Self::Years),
            "months" => Ok(Self::Months),
            "weeks" => Ok(Self::Weeks),
            "days" => Ok(Self::Days),
            "hours" => Ok(Self::Hours),
            "minutes" => Ok(Self::Minutes),
            "seconds" => Ok(Self::Seconds),
            "microseconds" => Ok(Self::Microseconds),
            other => Err(EngineError::config(format!(
                "unknown cache-expires-units '{}'",
                other
            ))),
        }
    }
}

/// Age after which a cache directory is discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheExpiry {
    pub amount: u64,
    pub unit: ExpiryUnit,
}

impl CacheExpiry {
    /// Read `cache-expires` / `cache-expires-units`. `None` means never expire.
    pub fn from_settings(settings: &PluginSettings) -> EngineResult<Option<Self>> {
        let Some(amount) = settings.u64("cache-expires")? else {
            return Ok(None);
        };
        let unit = settings
            .str("cache-expires-units")?
            .unwrap_or("days")
            .parse()?;
        Ok(Some(Self { amount, unit }))
    }

    /// Oldest modification time that still counts as fresh.
    pub fn cutoff(&self, now: DateTime<Local>) -> Option<DateTime<Local>> {
        let amount = i64::try_from(self.amount).ok()?;
        match self.unit {
            ExpiryUnit::Years => {
                now.checked_sub_months(Months::new(u32::try_from(amount.checked_mul(12)?).ok()?))
            }
            ExpiryUnit::Months => now.checked_sub_months(Months::new(u32::try_from(amount).ok()?)),
            ExpiryUnit::Weeks => now.checked_sub_signed(TimeDelta::try_weeks(amount)?),
            ExpiryUnit::Days => now.checked_sub_signed(TimeDelta::try_days(amount)?),
            ExpiryUnit::Hours => now.checked_sub_signed(TimeDelta::try_hours(amount)?),
            ExpiryUnit::Minutes => now.checked_sub_signed(TimeDelta::try_minutes(amount)?),
            ExpiryUnit::Seconds => now.checked_sub_signed(TimeDelta::try_seconds(amount)?),
            ExpiryUnit::Microseconds => now.checked_sub_signed(TimeDelta::microseconds(amount)),
        }
    }

    pub fn is_expired(&self, modified: DateTime<Local>, now: DateTime<Local>) -> bool {
        match self.cutoff(now) {
            Some(cutoff) => modified < cutoff,
            // An expiry window larger than the calendar never elapses.
            None => false,
        }
    }
}

/// Owner of the work and cache roots.
#[derive(Debug, Clone)]
pub struct CacheDirs {
    cache_root: PathBuf,
    work_root: PathBuf,
}

impl CacheDirs {
    /// Create both roots if needed and anchor them to absolute paths.
    pub fn new(cache_root: &Path, work_root: &Path) -> EngineResult<Self> {
        Ok(Self {
            cache_root: ensure_root(cache_root)?,
            work_root: ensure_root(work_root)?,
        })
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    pub fn work_root(&self) -> &Path {
        &self.work_root
    }

    pub fn cache_dir(&self, key: &CacheKey) -> PathBuf {
        self.cache_root.join(key.dir_name())
    }

    pub fn work_dir(&self, key: &CacheKey) -> PathBuf {
        self.work_root.join(key.dir_name())
    }

    pub fn is_cached(&self, key: &CacheKey) -> bool {
        self.cache_dir(key).is_dir()
    }

    /// Check existence and, with an expiry policy, age of the cache dir.
    ///
    /// Does not delete anything: purging an expired cache must go together
    /// with purging the stored rows, which the lifecycle controller owns.
    pub fn status(
        &self,
        key: &CacheKey,
        expiry: Option<&CacheExpiry>,
        now: DateTime<Local>,
    ) -> EngineResult<CacheStatus> {
        let dir = self.cache_dir(key);
        let metadata = match fs::metadata(&dir) {
            Ok(m) if m.is_dir() => m,
            Ok(_) => {
                return Err(EngineError::invariant(format!(
                    "cache path {} exists but is not a directory",
                    dir.display()
                )))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(CacheStatus::Missing),
            Err(e) => return Err(EngineError::io(dir, e)),
        };

        let Some(expiry) = expiry else {
            return Ok(CacheStatus::Fresh);
        };

        let modified: DateTime<Local> = metadata
            .modified()
            .map_err(|e| EngineError::io(&dir, e))?
            .into();
        if expiry.is_expired(modified, now) {
            Ok(CacheStatus::Expired)
        } else {
            Ok(CacheStatus::Fresh)
        }
    }

    /// Delete any previous work dir for `key` and create an empty one.
    pub fn reset_work_dir(&self, key: &CacheKey) -> EngineResult<PathBuf> {
        let dir = self.work_dir(key);
        remove_dir_within(&self.work_root, &dir)?;
        fs::create_dir_all(&dir).map_err(|e| EngineError::io(&dir, e))?;
        Ok(dir)
    }

    /// Move the populated work dir into the cache.
    ///
    /// The cache dir must not exist yet. A single `rename` is atomic within
    /// one filesystem; across filesystems the work dir is copied to a hidden
    /// sibling inside the cache root first and then renamed into place, so
    /// readers never see a partially populated cache dir.
    pub fn promote(&self, key: &CacheKey) -> EngineResult<PathBuf> {
        let work = self.work_dir(key);
        let cache = self.cache_dir(key);

        if !work.is_dir() {
            return Err(EngineError::invariant(format!(
                "cannot promote {}: work directory is missing",
                work.display()
            )));
        }
        if cache.exists() {
            return Err(EngineError::invariant(format!(
                "cannot promote into {}: cache directory already exists",
                cache.display()
            )));
        }

        match fs::rename(&work, &cache) {
            Ok(()) => Ok(cache),
            Err(e) if is_cross_device(&e) => {
                tracing::debug!(work = %work.display(), "work and cache roots are on different filesystems, copying");
                self.promote_by_copy(key)
            }
            Err(e) => Err(EngineError::io(&cache, e)),
        }
    }

    fn promote_by_copy(&self, key: &CacheKey) -> EngineResult<PathBuf> {
        let work = self.work_dir(key);
        let cache = self.cache_dir(key);
        let partial = self.cache_root.join(format!(".{}.partial", key.dir_name()));
        remove_dir_within(&self.cache_root, &partial)?;
        copy_tree(&work, &partial)?;
        fs::rename(&partial, &cache).map_err(|e| EngineError::io(&cache, e))?;
        remove_dir_within(&self.work_root, &work)?;
        Ok(cache)
    }

    /// Delete the cache dir for `key`. Absent dirs are fine.
    pub fn purge(&self, key: &CacheKey) -> EngineResult<()> {
        remove_dir_within(&self.cache_root, &self.cache_dir(key))
    }

    pub fn purge_work(&self, key: &CacheKey) -> EngineResult<()> {
        remove_dir_within(&self.work_root, &self.work_dir(key))
    }

    /// Period keys (`YYYY-MM`) of every period-scoped dir under either root.
    ///
    /// Callers recompute the fingerprint for each key to find their own
    /// dirs, including periods outside the currently configured range.
    pub fn period_keys(&self) -> EngineResult<BTreeSet<String>> {
        let mut keys = BTreeSet::new();
        for root in [&self.cache_root, &self.work_root] {
            let entries = fs::read_dir(root).map_err(|e| EngineError::io(root, e))?;
            for entry in entries {
                let entry = entry.map_err(|e| EngineError::io(root, e))?;
                if let Some(period) = entry.file_name().to_str().and_then(period_prefix) {
                    keys.insert(period.to_string());
                }
            }
        }
        Ok(keys)
    }
}

/// `2014-03` from `2014-03-<32 hex digits>`.
fn period_prefix(name: &str) -> Option<&str> {
    let period = name.get(..7)?;
    let fingerprint = name.get(7..)?.strip_prefix('-')?;
    let valid = crate::settings::parse_month(period).is_some()
        && fingerprint.len() == 32
        && fingerprint.chars().all(|c| c.is_ascii_hexdigit());
    valid.then_some(period)
}

#[cfg(windows)]
const CROSS_DEVICE: i32 = 17; // ERROR_NOT_SAME_DEVICE
#[cfg(not(windows))]
const CROSS_DEVICE: i32 = 18; // EXDEV

fn is_cross_device(error: &std::io::Error) -> bool {
    error.raw_os_error() == Some(CROSS_DEVICE)
}

fn ensure_root(root: &Path) -> EngineResult<PathBuf> {
    fs::create_dir_all(root).map_err(|e| EngineError::io(root, e))?;
    fs::canonicalize(root).map_err(|e| EngineError::io(root, e))
}

/// Recursively delete `dir`, refusing anything not strictly below `root`.
fn remove_dir_within(root: &Path, dir: &Path) -> EngineResult<()> {
    let escapes = dir
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::CurDir));
    if escapes || !dir.starts_with(root) || dir == root {
        return Err(EngineError::invariant(format!(
            "refusing to delete {}: not inside {}",
            dir.display(),
            root.display()
        )));
    }

    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(EngineError::io(dir, e)),
    }
}

fn copy_tree(from: &Path, to: &Path) -> EngineResult<()> {
    for entry in WalkDir::new(from) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(from).to_path_buf();
            EngineError::io(path, std::io::Error::other(e.to_string()))
        })?;
        let relative = entry.path().strip_prefix(from).unwrap_or(entry.path());
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| EngineError::io(&target, e))?;
        } else {
            fs::copy(entry.path(), &target).map_err(|e| EngineError::io(&target, e))?;
        }
    }
    Ok(())
}

/// Total size in bytes of the files under `dir`.
pub fn dir_size(dir: &Path) -> u64 {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}
