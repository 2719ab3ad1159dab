//! Plugin contracts for sources and reports, and their registries.
//!
//! A source plugin only knows how to fetch (`scrape`) and how to apply
//! fetched data to the database (`process`). Caching, idempotency and
//! rollback are the lifecycle engine's job.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │             SourceRegistry               │
//! │   alias → constructor (demo, doilist,    │
//! │   journallist, demo-periodic, custom)    │
//! └──────────────┬───────────────────────────┘
//!                ▼ instantiate(alias, overrides)
//!          SourceInstance  ──▶  Engine::run()
//! ```
//!
//! # Usage
//!
//! ```rust
//! use oacensus::traits::{ReportRegistry, SourceRegistry};
//!
//! let mut sources = SourceRegistry::with_builtins();
//! // sources.register("mysource", || Plugin::Single(Box::new(MySource)));
//! assert!(sources.contains("doilist"));
//!
//! let reports = ReportRegistry::with_builtins();
//! assert!(reports.find("text-dump").is_some());
//! ```

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::SqliteConnection;
use std::collections::BTreeMap;
use std::path::Path;

use crate::cache::CacheExpiry;
use crate::encoding::TextEncoding;
use crate::error::{EngineError, EngineResult};
use crate::fingerprint::{settings_fingerprint, Fingerprint};
use crate::journals::JournalPolicy;
use crate::models::ProcessOutput;
use crate::period::{Period, PeriodRange};
use crate::settings::{
    base_settings, periodic_settings, resolve_alias_chain, AliasDef, PluginSettings,
    SettingSpec, SettingsBuilder, SettingsLayer,
};
use crate::store;

// ═══════════════════════════════════════════════════════════════════════
// Contexts
// ═══════════════════════════════════════════════════════════════════════

/// What a plugin sees while fetching.
pub struct ScrapeContext<'a> {
    pub alias: &'a str,
    /// Provenance tag for rows this source creates.
    pub tag: &'a str,
    pub settings: &'a PluginSettings,
    /// Fresh, empty directory to write fetched data into.
    pub work_dir: &'a Path,
}

/// What a plugin sees while processing.
pub struct ProcessContext<'a> {
    pub alias: &'a str,
    pub tag: &'a str,
    pub settings: &'a PluginSettings,
    /// Promoted cache directory holding what `scrape` wrote.
    pub cache_dir: &'a Path,
}

// ═══════════════════════════════════════════════════════════════════════
// Source Traits
// ═══════════════════════════════════════════════════════════════════════

/// A source fetched and processed as one unit.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use anyhow::Result;
/// use sqlx::SqliteConnection;
/// use oacensus::models::ProcessOutput;
/// use oacensus::store;
/// use oacensus::traits::{ProcessContext, ScrapeContext, Source};
///
/// pub struct Publishers;
///
/// #[async_trait]
/// impl Source for Publishers {
///     fn plugin(&self) -> &str { "publishers" }
///     fn description(&self) -> &str { "One publisher per line of publishers.txt" }
///
///     async fn scrape(&self, ctx: &ScrapeContext<'_>) -> Result<()> {
///         std::fs::write(ctx.work_dir.join("publishers.txt"), "PLOS\nBMC\n")?;
///         Ok(())
///     }
///
///     async fn process(
///         &self,
///         ctx: &ProcessContext<'_>,
///         conn: &mut SqliteConnection,
///     ) -> Result<ProcessOutput> {
///         let raw = std::fs::read_to_string(ctx.cache_dir.join("publishers.txt"))?;
///         let mut n = 0;
///         for name in raw.lines() {
///             store::create_publisher(conn, name, ctx.tag).await?;
///             n += 1;
///         }
///         Ok(ProcessOutput::Records(n))
///     }
/// }
/// ```
#[async_trait]
pub trait Source: Send + Sync {
    /// Built-in plugin name (e.g. `"doilist"`).
    fn plugin(&self) -> &str;

    /// One-line description, shown by `oacensus sources`.
    fn description(&self) -> &str;

    /// Settings this plugin understands, beyond the engine's base settings.
    fn settings(&self) -> Vec<SettingSpec> {
        Vec::new()
    }

    /// Fetch remote data into `ctx.work_dir`.
    async fn scrape(&self, ctx: &ScrapeContext<'_>) -> Result<()>;

    /// Read `ctx.cache_dir` and write tagged rows through `conn`.
    ///
    /// `conn` is an open transaction; it is committed only if this returns
    /// `Ok`.
    async fn process(&self, ctx: &ProcessContext<'_>, conn: &mut SqliteConnection)
        -> Result<ProcessOutput>;

    /// Whether this source's process step has completed.
    ///
    /// Must be answered from durable, tagged rows. The default checks every
    /// provenance table for `tag`.
    async fn is_data_stored(&self, tag: &str, conn: &mut SqliteConnection) -> Result<bool> {
        Ok(store::exists_from_source(conn, tag).await?)
    }
}

/// A source whose unit of work is one calendar month.
#[async_trait]
pub trait PeriodicSource: Send + Sync {
    fn plugin(&self) -> &str;

    fn description(&self) -> &str;

    fn settings(&self) -> Vec<SettingSpec> {
        Vec::new()
    }

    /// Fetch one period's data into `ctx.work_dir`.
    async fn scrape_period(&self, ctx: &ScrapeContext<'_>, period: &Period) -> Result<()>;

    /// Apply one period's cached data inside a transaction.
    async fn process_period(
        &self,
        ctx: &ProcessContext<'_>,
        period: &Period,
        conn: &mut SqliteConnection,
    ) -> Result<ProcessOutput>;

    /// Delete every tagged row for exactly this period. Must be safe to call
    /// when nothing was stored.
    async fn purge_period(
        &self,
        tag: &str,
        period: &Period,
        conn: &mut SqliteConnection,
    ) -> Result<()> {
        store::delete_period_from_source(conn, tag, &period.key()).await?;
        Ok(())
    }

    async fn is_period_stored(
        &self,
        tag: &str,
        period: &Period,
        conn: &mut SqliteConnection,
    ) -> Result<bool> {
        Ok(store::exists_period_from_source(conn, tag, &period.key()).await?)
    }
}

/// A constructed plugin of either kind.
pub enum Plugin {
    Single(Box<dyn Source>),
    Periodic(Box<dyn PeriodicSource>),
}

impl Plugin {
    pub fn name(&self) -> &str {
        match self {
            Plugin::Single(s) => s.plugin(),
            Plugin::Periodic(s) => s.plugin(),
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Plugin::Single(s) => s.description(),
            Plugin::Periodic(s) => s.description(),
        }
    }

    pub fn is_periodic(&self) -> bool {
        matches!(self, Plugin::Periodic(_))
    }

    /// Base settings, then periodic settings, then the plugin's own.
    pub fn declared_settings(&self) -> Vec<SettingSpec> {
        let mut specs = base_settings();
        match self {
            Plugin::Single(s) => specs.extend(s.settings()),
            Plugin::Periodic(s) => {
                specs.extend(periodic_settings());
                specs.extend(s.settings());
            }
        }
        specs
    }
}

// ═══════════════════════════════════════════════════════════════════════
// SourceInstance
// ═══════════════════════════════════════════════════════════════════════

/// A plugin bound to an alias and its resolved settings.
pub struct SourceInstance {
    alias: String,
    tag: String,
    plugin: Plugin,
    settings: PluginSettings,
    excluded: Vec<String>,
}

impl SourceInstance {
    /// Validate settings that the engine itself interprets.
    pub fn new(alias: impl Into<String>, plugin: Plugin, settings: PluginSettings) -> EngineResult<Self> {
        let alias = alias.into();
        let tag = settings.str("source")?.unwrap_or(alias.as_str()).to_string();
        let excluded = settings.str_list("no-hash-settings")?;

        let expiry = CacheExpiry::from_settings(&settings)?;
        TextEncoding::from_settings(&settings)?;
        if settings.contains("update-journal-fields") {
            JournalPolicy::from_settings(&settings)?;
        }
        if plugin.is_periodic() {
            if expiry.is_some() {
                return Err(EngineError::config(format!(
                    "source '{}': cache-expires cannot be used with periodic sources",
                    alias
                )));
            }
            settings.month("start-period")?;
            settings.month("end-period")?;
        }

        Ok(Self {
            alias,
            tag,
            plugin,
            settings,
            excluded,
        })
    }

    /// Resolve defaults and `overrides` for `plugin` without any alias layer.
    pub fn with_overrides(
        alias: impl Into<String>,
        plugin: Plugin,
        overrides: SettingsLayer,
    ) -> EngineResult<Self> {
        let alias = alias.into();
        let settings = SettingsBuilder::new(plugin.declared_settings())
            .layer(format!("run settings for '{}'", alias), overrides)
            .build()?;
        Self::new(alias, plugin, settings)
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn plugin(&self) -> &Plugin {
        &self.plugin
    }

    pub fn settings(&self) -> &PluginSettings {
        &self.settings
    }

    /// Keys left out of the fingerprint.
    pub fn excluded(&self) -> &[String] {
        &self.excluded
    }

    pub fn fingerprint(&self) -> Fingerprint {
        settings_fingerprint(&self.settings, &self.excluded)
    }

    pub fn expiry(&self) -> EngineResult<Option<CacheExpiry>> {
        CacheExpiry::from_settings(&self.settings)
    }

    /// Validated months for a periodic source; `None` for single sources.
    pub fn period_range(&self, today: NaiveDate) -> EngineResult<Option<PeriodRange>> {
        if !self.plugin.is_periodic() {
            return Ok(None);
        }
        let start = self.settings.month("start-period")?.ok_or_else(|| {
            EngineError::config(format!(
                "source '{}': start-period must be provided in YYYY-MM format",
                self.alias
            ))
        })?;
        let end = self.settings.month("end-period")?;
        PeriodRange::new(start, end, today).map(Some)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Report Trait
// ═══════════════════════════════════════════════════════════════════════

/// A report rendered from the database after all sources have run.
#[async_trait]
pub trait Report: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Render the report as text.
    async fn run(&self, conn: &mut SqliteConnection) -> Result<String>;
}

// ═══════════════════════════════════════════════════════════════════════
// Registries
// ═══════════════════════════════════════════════════════════════════════

type Constructor = Box<dyn Fn() -> Plugin + Send + Sync>;

/// Lookup table from built-in plugin name to constructor.
pub struct SourceRegistry {
    constructors: BTreeMap<String, Constructor>,
}

impl SourceRegistry {
    /// Create an empty source registry.
    pub fn new() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// Create a registry with the built-in plugins.
    pub fn with_builtins() -> Self {
        use crate::source_demo::{DemoPeriodicSource, DemoSource};
        use crate::source_doilist::DoiListSource;
        use crate::source_journallist::JournalListSource;

        let mut registry = Self::new();
        registry.register("demo", || Plugin::Single(Box::new(DemoSource)));
        registry.register("doilist", || Plugin::Single(Box::new(DoiListSource::new())));
        registry.register("journallist", || Plugin::Single(Box::new(JournalListSource)));
        registry.register("demo-periodic", || {
            Plugin::Periodic(Box::new(DemoPeriodicSource))
        });
        registry
    }

    /// Register (or replace) a plugin constructor.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn() -> Plugin + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Box::new(constructor));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(|k| k.as_str())
    }

    pub fn create(&self, name: &str) -> Option<Plugin> {
        self.constructors.get(name).map(|ctor| ctor())
    }

    /// Build a source instance for `alias`: walk the alias chain to its
    /// plugin, then layer defaults, alias overrides and run overrides.
    pub fn instantiate(
        &self,
        alias: &str,
        aliases: &BTreeMap<String, AliasDef>,
        run_overrides: &SettingsLayer,
    ) -> EngineResult<SourceInstance> {
        let resolved = resolve_alias_chain(alias, aliases, |name| self.contains(name))?;
        let plugin = self.create(&resolved.plugin).ok_or_else(|| {
            EngineError::config(format!("unknown plugin '{}'", resolved.plugin))
        })?;

        let mut builder = SettingsBuilder::new(plugin.declared_settings());
        for (label, layer) in resolved.layers {
            builder = builder.layer(label, layer);
        }
        let settings = builder
            .layer(format!("run settings for '{}'", alias), run_overrides.clone())
            .build()?;

        SourceInstance::new(alias, plugin, settings)
    }

    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.constructors.len()
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry for reports.
pub struct ReportRegistry {
    reports: Vec<Box<dyn Report>>,
}

impl ReportRegistry {
    pub fn new() -> Self {
        Self {
            reports: Vec::new(),
        }
    }

    /// Create a registry with the built-in reports (`text-dump`, `lists`).
    pub fn with_builtins() -> Self {
        use crate::report::{ListsReport, TextDumpReport};

        let mut registry = Self::new();
        registry.register(Box::new(TextDumpReport));
        registry.register(Box::new(ListsReport));
        registry
    }

    pub fn register(&mut self, report: Box<dyn Report>) {
        self.reports.push(report);
    }

    pub fn reports(&self) -> &[Box<dyn Report>] {
        &self.reports
    }

    pub fn find(&self, name: &str) -> Option<&dyn Report> {
        self.reports
            .iter()
            .find(|r| r.name() == name)
            .map(|r| r.as_ref())
    }
}

impl Default for ReportRegistry {
    fn default() -> Self {
        Self::new()
    }
}
