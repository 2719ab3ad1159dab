//! Integration tests for the lifecycle engine.
//!
//! Test plugins count how often `scrape` and `process` run, so each test can
//! prove which steps the engine skipped on a re-run.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Local, TimeZone};
use serde_json::{json, Value};
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use oacensus::cache::{CacheDirs, CacheKey};
use oacensus::db;
use oacensus::error::EngineError;
use oacensus::fingerprint::period_fingerprint;
use oacensus::lifecycle::{Cancellation, Engine, RunOutcome};
use oacensus::migrate;
use oacensus::models::{NewArticle, ProcessOutput};
use oacensus::period::Period;
use oacensus::settings::{SettingSpec, SettingsLayer};
use oacensus::store;
use oacensus::traits::{
    PeriodicSource, Plugin, ProcessContext, ScrapeContext, Source, SourceInstance,
};

// ─── Test Sources ───────────────────────────────────────────────────

#[derive(Clone, Default)]
struct Counters {
    scrapes: Arc<AtomicUsize>,
    processes: Arc<AtomicUsize>,
    fail_scrape: Arc<AtomicBool>,
    fail_process: Arc<AtomicBool>,
}

impl Counters {
    fn scrapes(&self) -> usize {
        self.scrapes.load(Ordering::SeqCst)
    }

    fn processes(&self) -> usize {
        self.processes.load(Ordering::SeqCst)
    }
}

/// Writes two names and stores one publisher per name.
#[derive(Clone, Default)]
struct CountingSource {
    counters: Counters,
}

#[async_trait]
impl Source for CountingSource {
    fn plugin(&self) -> &str {
        "counting"
    }

    fn description(&self) -> &str {
        "Counts scrape and process calls"
    }

    fn settings(&self) -> Vec<SettingSpec> {
        vec![SettingSpec::new("note", "Free text, unused.", Value::Null)]
    }

    async fn scrape(&self, ctx: &ScrapeContext<'_>) -> Result<()> {
        self.counters.scrapes.fetch_add(1, Ordering::SeqCst);
        std::fs::write(ctx.work_dir.join("partial.txt"), "half")?;
        if self.counters.fail_scrape.load(Ordering::SeqCst) {
            bail!("upstream unavailable");
        }
        std::fs::write(ctx.work_dir.join("names.txt"), "PLOS\nBMC\n")?;
        Ok(())
    }

    async fn process(
        &self,
        ctx: &ProcessContext<'_>,
        conn: &mut SqliteConnection,
    ) -> Result<ProcessOutput> {
        self.counters.processes.fetch_add(1, Ordering::SeqCst);
        let raw = std::fs::read_to_string(ctx.cache_dir.join("names.txt"))?;
        let mut n = 0;
        for name in raw.lines() {
            store::create_publisher(conn, name, ctx.tag).await?;
            n += 1;
            if self.counters.fail_process.load(Ordering::SeqCst) {
                bail!("malformed record after {}", name);
            }
        }
        Ok(ProcessOutput::Records(n))
    }
}

/// Counts as stored once it has publishers, so rows it left in other
/// tables are still there when the engine fetches.
#[derive(Clone, Default)]
struct PublishersOnly {
    inner: CountingSource,
}

#[async_trait]
impl Source for PublishersOnly {
    fn plugin(&self) -> &str {
        "publishers-only"
    }

    fn description(&self) -> &str {
        "Stored-data check limited to publishers"
    }

    async fn scrape(&self, ctx: &ScrapeContext<'_>) -> Result<()> {
        self.inner.scrape(ctx).await
    }

    async fn process(
        &self,
        ctx: &ProcessContext<'_>,
        conn: &mut SqliteConnection,
    ) -> Result<ProcessOutput> {
        self.inner.process(ctx, conn).await
    }

    async fn is_data_stored(&self, tag: &str, conn: &mut SqliteConnection) -> Result<bool> {
        let stored: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM publishers WHERE source = ?)")
                .bind(tag)
                .fetch_one(&mut *conn)
                .await?;
        Ok(stored)
    }
}

/// One article list per month; fails processing for `fail_period`.
#[derive(Clone, Default)]
struct CountingPeriodic {
    scraped: Arc<Mutex<Vec<String>>>,
    processed: Arc<Mutex<Vec<String>>>,
    fail_period: Arc<Mutex<Option<String>>>,
}

impl CountingPeriodic {
    fn scraped(&self) -> Vec<String> {
        self.scraped.lock().unwrap().clone()
    }

    fn processed(&self) -> Vec<String> {
        self.processed.lock().unwrap().clone()
    }

    fn fail_on(&self, period: Option<&str>) {
        *self.fail_period.lock().unwrap() = period.map(str::to_string);
    }
}

#[async_trait]
impl PeriodicSource for CountingPeriodic {
    fn plugin(&self) -> &str {
        "counting-periodic"
    }

    fn description(&self) -> &str {
        "Counts per-period scrape and process calls"
    }

    async fn scrape_period(&self, ctx: &ScrapeContext<'_>, period: &Period) -> Result<()> {
        self.scraped.lock().unwrap().push(period.key());
        std::fs::write(ctx.work_dir.join("doi.txt"), format!("10.1/{}", period.key()))?;
        Ok(())
    }

    async fn process_period(
        &self,
        ctx: &ProcessContext<'_>,
        period: &Period,
        conn: &mut SqliteConnection,
    ) -> Result<ProcessOutput> {
        let key = period.key();
        self.processed.lock().unwrap().push(key.clone());
        let doi = std::fs::read_to_string(ctx.cache_dir.join("doi.txt"))?;

        let list = store::create_article_list(conn, &format!("list {}", key), Some(&key), ctx.tag).await?;
        let article = NewArticle {
            doi: Some(doi),
            period: Some(key.clone()),
            ..Default::default()
        };
        let id = store::create_article(conn, &article, ctx.tag).await?;
        store::add_article_to_list(conn, list.id, id, ctx.tag).await?;

        if self.fail_period.lock().unwrap().as_deref() == Some(key.as_str()) {
            bail!("bad data for {}", key);
        }
        Ok(ProcessOutput::ArticleList(list))
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

struct Harness {
    tmp: TempDir,
    pool: SqlitePool,
}

impl Harness {
    async fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("oacensus.sqlite3")).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        Self { tmp, pool }
    }

    fn dirs(&self) -> CacheDirs {
        CacheDirs::new(&self.tmp.path().join("cache"), &self.tmp.path().join("work")).unwrap()
    }

    fn engine(&self) -> Engine {
        Engine::new(self.dirs(), self.pool.clone()).with_clock(fixed_now())
    }

    async fn stored(&self, tag: &str) -> bool {
        let mut conn = self.pool.acquire().await.unwrap();
        store::exists_from_source(&mut conn, tag).await.unwrap()
    }

    async fn period_stored(&self, tag: &str, period: &str) -> bool {
        let mut conn = self.pool.acquire().await.unwrap();
        store::exists_period_from_source(&mut conn, tag, period).await.unwrap()
    }

    async fn publishers(&self, tag: &str) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM publishers WHERE source = ?")
            .bind(tag)
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }
}

fn fixed_now() -> DateTime<Local> {
    Local.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap()
}

fn layer(pairs: &[(&str, Value)]) -> SettingsLayer {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

fn single(alias: &str, source: &CountingSource, settings: &[(&str, Value)]) -> SourceInstance {
    SourceInstance::with_overrides(alias, Plugin::Single(Box::new(source.clone())), layer(settings))
        .unwrap()
}

fn periodic(alias: &str, source: &CountingPeriodic, settings: &[(&str, Value)]) -> SourceInstance {
    SourceInstance::with_overrides(alias, Plugin::Periodic(Box::new(source.clone())), layer(settings))
        .unwrap()
}

fn periods_of(outcome: &RunOutcome) -> Vec<(String, bool, bool)> {
    match outcome {
        RunOutcome::Periods(steps) => steps
            .iter()
            .map(|(p, s)| (p.key(), s.fetched, s.output.is_some()))
            .collect(),
        RunOutcome::Source(_) => panic!("expected a periodic outcome"),
    }
}

// ─── Single Sources ─────────────────────────────────────────────────

#[tokio::test]
async fn test_rerun_is_a_no_op() {
    let h = Harness::new().await;
    let engine = h.engine();
    let source = CountingSource::default();
    let instance = single("pubs", &source, &[]);

    let first = engine.run(&instance).await.unwrap();
    let RunOutcome::Source(step) = &first else { panic!("expected a single outcome") };
    assert!(step.fetched);
    assert_eq!(step.output, Some(ProcessOutput::Records(2)));

    let second = engine.run(&instance).await.unwrap();
    let RunOutcome::Source(step) = &second else { panic!("expected a single outcome") };
    assert!(!step.fetched);
    assert!(step.is_up_to_date());

    assert_eq!(source.counters.scrapes(), 1);
    assert_eq!(source.counters.processes(), 1);
    assert_eq!(h.publishers("pubs").await, 2);
}

#[tokio::test]
async fn test_failed_process_reuses_cache() {
    let h = Harness::new().await;
    let engine = h.engine();
    let source = CountingSource::default();
    let instance = single("pubs", &source, &[]);
    let key = CacheKey::source(instance.fingerprint());

    source.counters.fail_process.store(true, Ordering::SeqCst);
    let err = engine.run(&instance).await.unwrap_err();
    assert!(matches!(err, EngineError::Process { period: None, .. }), "got {err}");
    assert!(err.needs_reprocess_only());
    assert!(!h.stored("pubs").await, "rows must be rolled back");

    let cache_dir = engine.dirs().cache_dir(&key);
    assert!(cache_dir.is_dir());
    let modified = std::fs::metadata(&cache_dir).unwrap().modified().unwrap();
    let content = std::fs::read_to_string(cache_dir.join("names.txt")).unwrap();

    source.counters.fail_process.store(false, Ordering::SeqCst);
    engine.run(&instance).await.unwrap();

    assert_eq!(source.counters.scrapes(), 1, "the cache must not be fetched again");
    assert_eq!(source.counters.processes(), 2);
    assert_eq!(h.publishers("pubs").await, 2);
    assert_eq!(std::fs::metadata(&cache_dir).unwrap().modified().unwrap(), modified);
    assert_eq!(std::fs::read_to_string(cache_dir.join("names.txt")).unwrap(), content);
}

#[tokio::test]
async fn test_failed_fetch_leaves_no_cache() {
    let h = Harness::new().await;
    let engine = h.engine();
    let source = CountingSource::default();
    let instance = single("pubs", &source, &[]);
    let key = CacheKey::source(instance.fingerprint());

    source.counters.fail_scrape.store(true, Ordering::SeqCst);
    let err = engine.run(&instance).await.unwrap_err();
    assert!(matches!(err, EngineError::Fetch { .. }), "got {err}");
    assert!(!engine.dirs().is_cached(&key));
    assert!(!h.stored("pubs").await);
    assert_eq!(source.counters.processes(), 0);

    // The next attempt starts from an empty work dir.
    source.counters.fail_scrape.store(false, Ordering::SeqCst);
    engine.run(&instance).await.unwrap();
    assert_eq!(source.counters.scrapes(), 2);
    assert!(engine.dirs().cache_dir(&key).join("names.txt").is_file());
    assert!(!engine.dirs().work_dir(&key).exists());
}

#[tokio::test]
async fn test_rows_without_cache_are_an_invariant_violation() {
    let h = Harness::new().await;
    let engine = h.engine();
    let source = CountingSource::default();
    let instance = single("pubs", &source, &[]);
    let key = CacheKey::source(instance.fingerprint());

    engine.run(&instance).await.unwrap();
    std::fs::remove_dir_all(engine.dirs().cache_dir(&key)).unwrap();

    let err = engine.run(&instance).await.unwrap_err();
    assert!(matches!(err, EngineError::Invariant(_)), "got {err}");
    assert!(err.to_string().contains("oacensus purge pubs"));
    assert_eq!(source.counters.scrapes(), 1);

    let mut conn = h.pool.acquire().await.unwrap();
    store::delete_all_from_source(&mut conn, "pubs").await.unwrap();
    drop(conn);

    engine.run(&instance).await.unwrap();
    assert_eq!(source.counters.scrapes(), 2);
    assert_eq!(h.publishers("pubs").await, 2);
}

#[tokio::test]
async fn test_leftover_rows_are_cleared_before_fetching() {
    let h = Harness::new().await;
    let engine = h.engine();
    {
        let mut conn = h.pool.acquire().await.unwrap();
        store::create_article_list(&mut conn, "stale", None, "pubs").await.unwrap();
    }

    let source = PublishersOnly::default();
    let instance = SourceInstance::with_overrides(
        "pubs",
        Plugin::Single(Box::new(source.clone())),
        SettingsLayer::new(),
    )
    .unwrap();
    engine.run(&instance).await.unwrap();

    assert_eq!(source.inner.counters.scrapes(), 1);
    assert_eq!(h.publishers("pubs").await, 2);
    let mut conn = h.pool.acquire().await.unwrap();
    assert!(store::article_list_by_name(&mut conn, "stale", "pubs")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_expired_cache_is_purged_and_refetched() {
    let h = Harness::new().await;
    let source = CountingSource::default();
    let instance = single("pubs", &source, &[("cache-expires", json!(1))]);

    // The cache dir gets the real mtime, so run against the real clock first.
    let engine = Engine::new(h.dirs(), h.pool.clone());
    engine.run(&instance).await.unwrap();
    engine.run(&instance).await.unwrap();
    assert_eq!(source.counters.scrapes(), 1);

    let later = Engine::new(h.dirs(), h.pool.clone()).with_clock(Local::now() + Duration::days(3));
    let outcome = later.run(&instance).await.unwrap();
    let RunOutcome::Source(step) = &outcome else { panic!("expected a single outcome") };
    assert!(step.fetched);
    assert!(step.output.is_some());

    assert_eq!(source.counters.scrapes(), 2);
    assert_eq!(source.counters.processes(), 2);
    assert_eq!(h.publishers("pubs").await, 2, "expired rows must be replaced, not duplicated");
}

#[tokio::test]
async fn test_no_hash_settings_share_one_cache() {
    let h = Harness::new().await;
    let engine = h.engine();
    let source = CountingSource::default();
    let a = single(
        "pubs-a",
        &source,
        &[("note", json!("first")), ("no-hash-settings", json!(["note"]))],
    );
    let b = single(
        "pubs-b",
        &source,
        &[("note", json!("second")), ("no-hash-settings", json!(["note"]))],
    );
    assert_eq!(a.fingerprint(), b.fingerprint());

    engine.run(&a).await.unwrap();
    engine.run(&b).await.unwrap();

    assert_eq!(source.counters.scrapes(), 1);
    assert_eq!(source.counters.processes(), 2);
    assert_eq!(h.publishers("pubs-a").await, 2);
    assert_eq!(h.publishers("pubs-b").await, 2);
}

#[tokio::test]
async fn test_cancelled_engine_does_nothing() {
    let h = Harness::new().await;
    let cancel = Cancellation::new();
    let engine = h.engine().with_cancellation(cancel.clone());
    let source = CountingSource::default();
    let instance = single("pubs", &source, &[]);

    cancel.cancel();
    let err = engine.run(&instance).await.unwrap_err();
    assert!(matches!(err, EngineError::Cancelled));
    assert_eq!(source.counters.scrapes(), 0);
}

// ─── Periodic Sources ───────────────────────────────────────────────

#[tokio::test]
async fn test_periods_run_in_order_and_rerun_is_a_no_op() {
    let h = Harness::new().await;
    let engine = h.engine();
    let source = CountingPeriodic::default();
    let instance = periodic(
        "monthly",
        &source,
        &[("start-period", json!("2010-01")), ("end-period", json!("2010-03"))],
    );

    let outcome = engine.run(&instance).await.unwrap();
    assert_eq!(
        periods_of(&outcome),
        vec![
            ("2010-01".to_string(), true, true),
            ("2010-02".to_string(), true, true),
            ("2010-03".to_string(), true, true),
        ]
    );

    let again = engine.run(&instance).await.unwrap();
    assert!(periods_of(&again).iter().all(|(_, fetched, processed)| !fetched && !processed));
    assert_eq!(source.scraped(), vec!["2010-01", "2010-02", "2010-03"]);
    assert_eq!(source.processed(), vec!["2010-01", "2010-02", "2010-03"]);
}

#[tokio::test]
async fn test_failed_period_is_isolated_and_retried_alone() {
    let h = Harness::new().await;
    let engine = h.engine();
    let source = CountingPeriodic::default();
    let instance = periodic(
        "monthly",
        &source,
        &[("start-period", json!("2010-01")), ("end-period", json!("2010-03"))],
    );

    source.fail_on(Some("2010-02"));
    let err = engine.run(&instance).await.unwrap_err();
    match &err {
        EngineError::Process { period, .. } => assert_eq!(period.as_deref(), Some("2010-02")),
        other => panic!("expected a process error, got {other}"),
    }
    assert!(h.period_stored("monthly", "2010-01").await);
    assert!(!h.period_stored("monthly", "2010-02").await);
    assert!(!h.period_stored("monthly", "2010-03").await);
    assert_eq!(source.scraped(), vec!["2010-01", "2010-02"], "later periods wait");

    let p2 = CacheKey::period(
        period_fingerprint(instance.settings(), instance.excluded(), "2010-02"),
        "2010-02",
    );
    assert!(engine.dirs().is_cached(&p2), "the failed period keeps its cache");

    source.fail_on(None);
    let outcome = engine.run(&instance).await.unwrap();
    assert_eq!(
        periods_of(&outcome),
        vec![
            ("2010-01".to_string(), false, false),
            ("2010-02".to_string(), false, true),
            ("2010-03".to_string(), true, true),
        ]
    );
    assert_eq!(source.scraped(), vec!["2010-01", "2010-02", "2010-03"]);
    assert_eq!(source.processed(), vec!["2010-01", "2010-02", "2010-02", "2010-03"]);
}

#[tokio::test]
async fn test_extending_the_range_keeps_earlier_periods() {
    let h = Harness::new().await;
    let engine = h.engine();
    let source = CountingPeriodic::default();

    let short = periodic(
        "monthly",
        &source,
        &[("start-period", json!("2010-01")), ("end-period", json!("2010-02"))],
    );
    engine.run(&short).await.unwrap();

    let long = periodic(
        "monthly",
        &source,
        &[("start-period", json!("2010-01")), ("end-period", json!("2010-04"))],
    );
    assert_eq!(short.fingerprint(), long.fingerprint());
    engine.run(&long).await.unwrap();

    assert_eq!(source.scraped(), vec!["2010-01", "2010-02", "2010-03", "2010-04"]);
}

#[tokio::test]
async fn test_end_period_in_current_month_fails_before_fetching() {
    let h = Harness::new().await;
    let engine = h.engine();
    let source = CountingPeriodic::default();
    let instance = periodic(
        "monthly",
        &source,
        &[("start-period", json!("2026-08")), ("end-period", json!("2026-10"))],
    );

    let err = engine.run(&instance).await.unwrap_err();
    assert!(err.is_user_error(), "got {err}");
    assert!(source.scraped().is_empty());

    let open_ended = periodic("monthly", &source, &[("start-period", json!("2026-08"))]);
    let outcome = engine.run(&open_ended).await.unwrap();
    let keys: Vec<String> = periods_of(&outcome).into_iter().map(|(k, _, _)| k).collect();
    assert_eq!(keys, vec!["2026-08", "2026-09"]);
}

#[tokio::test]
async fn test_periodic_source_rejects_cache_expiry() {
    let source = CountingPeriodic::default();
    let result = SourceInstance::with_overrides(
        "monthly",
        Plugin::Periodic(Box::new(source)),
        layer(&[("start-period", json!("2010-01")), ("cache-expires", json!(5))]),
    );
    assert!(matches!(result, Err(EngineError::Configuration(_))));
}

#[tokio::test]
async fn test_unknown_setting_is_rejected() {
    let source = CountingSource::default();
    let result = SourceInstance::with_overrides(
        "pubs",
        Plugin::Single(Box::new(source)),
        layer(&[("colour", json!("blue"))]),
    );
    let err = result.err().expect("unknown keys must fail");
    assert!(err.to_string().contains("colour"));
}

#[tokio::test]
async fn test_alias_overrides_reach_the_plugin() {
    let h = Harness::new().await;
    let engine = h.engine();
    let registry = oacensus::traits::SourceRegistry::with_builtins();

    let aliases: BTreeMap<String, oacensus::settings::AliasDef> = toml::from_str(
        r#"
        [base]
        plugin = "demo"
        [base.settings]
        data-file = "words.txt"

        [child]
        parent = "base"
        "#,
    )
    .unwrap();

    let instance = registry.instantiate("child", &aliases, &SettingsLayer::new()).unwrap();
    assert_eq!(instance.settings().str("data-file").unwrap(), Some("words.txt"));

    engine.run(&instance).await.unwrap();
    let key = CacheKey::source(instance.fingerprint());
    assert!(engine.dirs().cache_dir(&key).join("words.txt").is_file());
    assert_eq!(h.publishers("child").await, 3);
}
