//! Periodic lifecycle controller.
//!
//! Applies the source lifecycle to each month of a periodic source in
//! chronological order. Every period has its own fingerprint, cache dir and
//! stored rows, so a failure in one period leaves the others alone and a
//! corrected re-run only redoes the periods that did not finish.

use crate::cache::CacheKey;
use crate::error::{EngineError, EngineResult};
use crate::fingerprint::period_fingerprint;
use crate::lifecycle::{plugin_failure, Engine, LifecycleState, StepOutcome};
use crate::period::Period;
use crate::progress::ProgressEvent;
use crate::traits::{PeriodicSource, ProcessContext, ScrapeContext, SourceInstance};

impl Engine {
    pub(crate) async fn run_periodic(
        &self,
        instance: &SourceInstance,
        source: &dyn PeriodicSource,
    ) -> EngineResult<Vec<(Period, StepOutcome)>> {
        let range = instance.period_range(self.today())?.ok_or_else(|| {
            EngineError::config(format!("source '{}' is not periodic", instance.alias()))
        })?;

        self.progress.report(ProgressEvent::Started {
            source: instance.alias().to_string(),
            fingerprint: instance.fingerprint().to_hex(),
            periods: Some(range.len()),
        });

        let mut outcomes = Vec::with_capacity(range.len());
        for period in range.iter() {
            self.cancel.check()?;
            let outcome = self.run_period(instance, source, &period).await?;
            outcomes.push((period, outcome));
        }
        Ok(outcomes)
    }

    async fn run_period(
        &self,
        instance: &SourceInstance,
        source: &dyn PeriodicSource,
        period: &Period,
    ) -> EngineResult<StepOutcome> {
        let fingerprint = period_fingerprint(instance.settings(), instance.excluded(), &period.key());
        let key = CacheKey::period(fingerprint, period.key());
        let tag = instance.tag();

        self.transition(instance, Some(period), LifecycleState::Init);

        let fetched = if self.dirs.is_cached(&key) {
            self.progress.report(ProgressEvent::CacheHit {
                source: instance.alias().to_string(),
                period: Some(period.key()),
            });
            false
        } else {
            self.fetch_period(instance, source, period, &key).await?;
            true
        };
        self.transition(instance, Some(period), LifecycleState::Cached);

        if self.period_stored(instance, source, period).await? {
            self.progress.report(ProgressEvent::AlreadyStored {
                source: instance.alias().to_string(),
                period: Some(period.key()),
            });
            self.transition(instance, Some(period), LifecycleState::Stored);
            return Ok(StepOutcome {
                fingerprint,
                fetched,
                output: None,
            });
        }

        self.transition(instance, Some(period), LifecycleState::Processing);
        let cache_dir = self.dirs.cache_dir(&key);
        let ctx = ProcessContext {
            alias: instance.alias(),
            tag,
            settings: instance.settings(),
            cache_dir: &cache_dir,
        };

        tracing::info!(source = instance.alias(), period = %period, "processing period");
        let mut tx = self.pool.begin().await?;
        let result = source.process_period(&ctx, period, &mut tx).await;
        let error = match result {
            Ok(output) => {
                tx.commit().await?;
                self.transition(instance, Some(period), LifecycleState::Stored);
                return Ok(StepOutcome {
                    fingerprint,
                    fetched,
                    output: Some(output),
                });
            }
            Err(e) => e,
        };

        if let Err(rollback) = tx.rollback().await {
            tracing::warn!(source = instance.alias(), period = %period, error = %rollback, "rollback failed");
        }
        self.transition(instance, Some(period), LifecycleState::Failed);
        tracing::warn!(
            source = instance.alias(),
            period = %period,
            "processing failed, purging this period's rows so it can be retried"
        );

        let mut purge = self.pool.begin().await?;
        source
            .purge_period(tag, period, &mut purge)
            .await
            .map_err(|e| plugin_failure(instance, Some(period), e))?;
        purge.commit().await?;
        if self.period_stored(instance, source, period).await? {
            return Err(EngineError::invariant(format!(
                "source '{}' still has rows for period {} after purge_period",
                instance.alias(),
                period
            )));
        }

        Err(EngineError::Process {
            source_tag: tag.to_string(),
            period: Some(period.key()),
            message: format!("{:#}", error),
        })
    }

    async fn fetch_period(
        &self,
        instance: &SourceInstance,
        source: &dyn PeriodicSource,
        period: &Period,
        key: &CacheKey,
    ) -> EngineResult<()> {
        let tag = instance.tag();
        if self.period_stored(instance, source, period).await? {
            return Err(EngineError::invariant(format!(
                "source '{}' has stored rows for period {} but no cache at {}; \
                 run `oacensus purge {}` to clear them",
                instance.alias(),
                period,
                self.dirs.cache_dir(key).display(),
                instance.alias()
            )));
        }
        let mut purge = self.pool.begin().await?;
        source
            .purge_period(tag, period, &mut purge)
            .await
            .map_err(|e| plugin_failure(instance, Some(period), e))?;
        purge.commit().await?;

        let work_dir = self.dirs.reset_work_dir(key)?;
        self.transition(instance, Some(period), LifecycleState::Fetching);
        tracing::info!(source = instance.alias(), period = %period, "fetching period");

        let ctx = ScrapeContext {
            alias: instance.alias(),
            tag,
            settings: instance.settings(),
            work_dir: &work_dir,
        };
        if let Err(error) = source.scrape_period(&ctx, period).await {
            self.transition(instance, Some(period), LifecycleState::Failed);
            return Err(EngineError::Fetch {
                source_tag: tag.to_string(),
                error,
            });
        }

        self.dirs.promote(key)?;
        Ok(())
    }

    async fn period_stored(
        &self,
        instance: &SourceInstance,
        source: &dyn PeriodicSource,
        period: &Period,
    ) -> EngineResult<bool> {
        let mut conn = self.pool.acquire().await?;
        source
            .is_period_stored(instance.tag(), period, &mut conn)
            .await
            .map_err(|e| plugin_failure(instance, Some(period), e))
    }
}
