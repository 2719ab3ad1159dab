//! Source lifecycle controller.
//!
//! Drives one source through fetch → stage → promote → store:
//!
//! ```text
//! INIT ─▶ FETCHING ─▶ CACHED ─▶ PROCESSING ─▶ STORED
//!   │                   ▲           │
//!   └── cache hit ──────┘           └─▶ FAILED (cache kept, rows rolled back)
//! ```
//!
//! `run()` is idempotent: with the cache present and tagged rows stored it
//! does nothing, so it is safe to call again after a crash at any step.

use chrono::{DateTime, Local, NaiveDate};
use sqlx::SqlitePool;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::cache::{CacheDirs, CacheKey, CacheStatus};
use crate::error::{EngineError, EngineResult};
use crate::fingerprint::Fingerprint;
use crate::models::ProcessOutput;
use crate::period::Period;
use crate::progress::{NoProgress, ProgressEvent, ProgressReporter};
use crate::store;
use crate::traits::{Plugin, ProcessContext, ScrapeContext, Source, SourceInstance};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Init,
    Fetching,
    Cached,
    Processing,
    Stored,
    Failed,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Init => "init",
            LifecycleState::Fetching => "fetching",
            LifecycleState::Cached => "cached",
            LifecycleState::Processing => "processing",
            LifecycleState::Stored => "stored",
            LifecycleState::Failed => "failed",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cooperative cancellation flag, checked between sources and periods.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> EngineResult<()> {
        if self.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Outcome of one unit of work (a source, or one period of a source).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub fingerprint: Fingerprint,
    /// Whether `scrape` ran during this call.
    pub fetched: bool,
    /// What `process` returned; `None` when the data was already stored.
    pub output: Option<ProcessOutput>,
}

impl StepOutcome {
    pub fn is_up_to_date(&self) -> bool {
        self.output.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Source(StepOutcome),
    /// One entry per period, in chronological order.
    Periods(Vec<(Period, StepOutcome)>),
}

impl RunOutcome {
    pub fn outputs(&self) -> Vec<&ProcessOutput> {
        match self {
            RunOutcome::Source(step) => step.output.iter().collect(),
            RunOutcome::Periods(steps) => steps.iter().filter_map(|(_, s)| s.output.as_ref()).collect(),
        }
    }
}

/// The lifecycle engine: cache dirs, database, and run-wide knobs.
///
/// One engine runs any number of sources, one after another.
pub struct Engine {
    pub(crate) dirs: CacheDirs,
    pub(crate) pool: SqlitePool,
    pub(crate) progress: Box<dyn ProgressReporter>,
    pub(crate) cancel: Cancellation,
    clock: Option<DateTime<Local>>,
}

impl Engine {
    pub fn new(dirs: CacheDirs, pool: SqlitePool) -> Self {
        Self {
            dirs,
            pool,
            progress: Box::new(NoProgress),
            cancel: Cancellation::new(),
            clock: None,
        }
    }

    pub fn with_progress(mut self, progress: Box<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    /// Pin "now" (cache expiry and period clamping) to a fixed instant.
    pub fn with_clock(mut self, now: DateTime<Local>) -> Self {
        self.clock = Some(now);
        self
    }

    pub fn dirs(&self) -> &CacheDirs {
        &self.dirs
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn now(&self) -> DateTime<Local> {
        self.clock.unwrap_or_else(Local::now)
    }

    pub fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    /// Validate a source's configuration without touching disk or network.
    pub fn preflight(&self, instance: &SourceInstance) -> EngineResult<()> {
        instance.expiry()?;
        instance.period_range(self.today())?;
        Ok(())
    }

    /// Run one source to completion.
    pub async fn run(&self, instance: &SourceInstance) -> EngineResult<RunOutcome> {
        self.preflight(instance)?;
        self.cancel.check()?;

        match instance.plugin() {
            Plugin::Single(source) => self
                .run_single(instance, source.as_ref())
                .await
                .map(RunOutcome::Source),
            Plugin::Periodic(source) => self
                .run_periodic(instance, source.as_ref())
                .await
                .map(RunOutcome::Periods),
        }
    }

    pub(crate) fn transition(&self, instance: &SourceInstance, period: Option<&Period>, state: LifecycleState) {
        tracing::debug!(
            source = instance.alias(),
            period = ?period.map(|p| p.key()),
            state = state.as_str(),
            "lifecycle transition"
        );
        self.progress.report(ProgressEvent::State {
            source: instance.alias().to_string(),
            period: period.map(|p| p.key()),
            state,
        });
    }

    async fn run_single(
        &self,
        instance: &SourceInstance,
        source: &dyn Source,
    ) -> EngineResult<StepOutcome> {
        let fingerprint = instance.fingerprint();
        let key = CacheKey::source(fingerprint);
        let tag = instance.tag();

        self.progress.report(ProgressEvent::Started {
            source: instance.alias().to_string(),
            fingerprint: fingerprint.to_hex(),
            periods: None,
        });
        self.transition(instance, None, LifecycleState::Init);

        let fetched = match self.check_cache(instance, &key).await? {
            CacheStatus::Fresh => {
                self.progress.report(ProgressEvent::CacheHit {
                    source: instance.alias().to_string(),
                    period: None,
                });
                false
            }
            CacheStatus::Missing | CacheStatus::Expired => {
                self.fetch_single(instance, source, &key).await?;
                true
            }
        };
        self.transition(instance, None, LifecycleState::Cached);

        let stored = {
            let mut conn = self.pool.acquire().await?;
            source
                .is_data_stored(tag, &mut conn)
                .await
                .map_err(|e| plugin_failure(instance, None, e))?
        };
        if stored {
            self.progress.report(ProgressEvent::AlreadyStored {
                source: instance.alias().to_string(),
                period: None,
            });
            self.transition(instance, None, LifecycleState::Stored);
            return Ok(StepOutcome {
                fingerprint,
                fetched,
                output: None,
            });
        }

        self.transition(instance, None, LifecycleState::Processing);
        let cache_dir = self.dirs.cache_dir(&key);
        let ctx = ProcessContext {
            alias: instance.alias(),
            tag,
            settings: instance.settings(),
            cache_dir: &cache_dir,
        };

        tracing::info!(source = instance.alias(), "processing cached data");
        let mut tx = self.pool.begin().await?;
        let result = source.process(&ctx, &mut tx).await;
        match result {
            Ok(output) => {
                tx.commit().await?;
                self.transition(instance, None, LifecycleState::Stored);
                Ok(StepOutcome {
                    fingerprint,
                    fetched,
                    output: Some(output),
                })
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(source = instance.alias(), error = %rollback, "rollback failed");
                }
                self.transition(instance, None, LifecycleState::Failed);
                Err(EngineError::Process {
                    source_tag: tag.to_string(),
                    period: None,
                    message: format!("{:#}", e),
                })
            }
        }
    }

    /// Look at the source-wide cache dir. An expired cache is purged
    /// together with the source's stored rows, and reported as missing.
    async fn check_cache(&self, instance: &SourceInstance, key: &CacheKey) -> EngineResult<CacheStatus> {
        let expiry = instance.expiry()?;
        let status = self.dirs.status(key, expiry.as_ref(), self.now())?;
        if status != CacheStatus::Expired {
            return Ok(status);
        }

        tracing::warn!(
            source = instance.alias(),
            cache_dir = %self.dirs.cache_dir(key).display(),
            "cache expired, clearing cache and stored data"
        );
        self.progress.report(ProgressEvent::CacheExpired {
            source: instance.alias().to_string(),
        });

        let mut tx = self.pool.begin().await?;
        let removed = store::delete_all_from_source(&mut tx, instance.tag()).await?;
        tx.commit().await?;
        // Rows go first: a leftover stale dir is just expired again next run.
        self.dirs.purge(key)?;
        tracing::debug!(source = instance.alias(), removed, "purged expired rows");

        Ok(CacheStatus::Expired)
    }

    async fn fetch_single(
        &self,
        instance: &SourceInstance,
        source: &dyn Source,
        key: &CacheKey,
    ) -> EngineResult<()> {
        let tag = instance.tag();
        let mut tx = self.pool.begin().await?;
        let stored = source
            .is_data_stored(tag, &mut tx)
            .await
            .map_err(|e| plugin_failure(instance, None, e))?;
        if stored {
            return Err(EngineError::invariant(format!(
                "source '{}' has stored rows tagged '{}' but no cache at {}; \
                 run `oacensus purge {}` to clear them",
                instance.alias(),
                tag,
                self.dirs.cache_dir(key).display(),
                instance.alias()
            )));
        }
        let removed = store::delete_all_from_source(&mut tx, tag).await?;
        tx.commit().await?;
        if removed > 0 {
            tracing::debug!(source = instance.alias(), removed, "cleared rows left by an earlier run");
        }

        let work_dir = self.dirs.reset_work_dir(key)?;
        self.transition(instance, None, LifecycleState::Fetching);
        tracing::info!(source = instance.alias(), work_dir = %work_dir.display(), "fetching");

        let ctx = ScrapeContext {
            alias: instance.alias(),
            tag,
            settings: instance.settings(),
            work_dir: &work_dir,
        };
        if let Err(error) = source.scrape(&ctx).await {
            self.transition(instance, None, LifecycleState::Failed);
            return Err(EngineError::Fetch {
                source_tag: tag.to_string(),
                error,
            });
        }

        self.dirs.promote(key)?;
        Ok(())
    }
}

/// A plugin's stored-data predicate failed; treat as a processing problem.
pub(crate) fn plugin_failure(
    instance: &SourceInstance,
    period: Option<&Period>,
    error: anyhow::Error,
) -> EngineError {
    EngineError::Process {
        source_tag: instance.tag().to_string(),
        period: period.map(|p| p.key()),
        message: format!("{:#}", error),
    }
}
