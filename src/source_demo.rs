//! Demo sources that need no network access.
//!
//! `demo` writes a small word file and stores one publisher per word.
//! `demo-periodic` writes one file per month and stores a one-article list
//! per month. Both are useful for trying out a config and for tests.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::SqliteConnection;

use crate::models::{NewArticle, ProcessOutput};
use crate::period::Period;
use crate::settings::SettingSpec;
use crate::store;
use crate::traits::{PeriodicSource, ProcessContext, ScrapeContext, Source};

const DEMO_WORDS: &str = "foo bar baz";

pub struct DemoSource;

impl DemoSource {
    fn data_file(settings: &crate::settings::PluginSettings) -> Result<String> {
        Ok(settings.str("data-file")?.unwrap_or("data.txt").to_string())
    }
}

#[async_trait]
impl Source for DemoSource {
    fn plugin(&self) -> &str {
        "demo"
    }

    fn description(&self) -> &str {
        "Writes a few words to a file and stores one publisher per word"
    }

    fn settings(&self) -> Vec<SettingSpec> {
        vec![SettingSpec::new(
            "data-file",
            "Name of the file written into the cache directory.",
            Value::from("data.txt"),
        )]
    }

    async fn scrape(&self, ctx: &ScrapeContext<'_>) -> Result<()> {
        let path = ctx.work_dir.join(Self::data_file(ctx.settings)?);
        std::fs::write(&path, DEMO_WORDS)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    async fn process(
        &self,
        ctx: &ProcessContext<'_>,
        conn: &mut SqliteConnection,
    ) -> Result<ProcessOutput> {
        let path = ctx.cache_dir.join(Self::data_file(ctx.settings)?);
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let mut count = 0;
        for word in raw.split_whitespace() {
            store::create_publisher(conn, word, ctx.tag).await?;
            count += 1;
        }
        Ok(ProcessOutput::Records(count))
    }
}

pub struct DemoPeriodicSource;

#[async_trait]
impl PeriodicSource for DemoPeriodicSource {
    fn plugin(&self) -> &str {
        "demo-periodic"
    }

    fn description(&self) -> &str {
        "Stores one article list per month, each holding a single article"
    }

    fn settings(&self) -> Vec<SettingSpec> {
        vec![SettingSpec::new(
            "list-name",
            "Prefix for the monthly article list names.",
            Value::from("demo"),
        )]
    }

    async fn scrape_period(&self, ctx: &ScrapeContext<'_>, period: &Period) -> Result<()> {
        let path = ctx.work_dir.join(format!("{}.txt", period.key()));
        let body = format!("10.9999/demo.{}\n", period.key());
        std::fs::write(&path, body)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    async fn process_period(
        &self,
        ctx: &ProcessContext<'_>,
        period: &Period,
        conn: &mut SqliteConnection,
    ) -> Result<ProcessOutput> {
        let path = ctx.cache_dir.join(format!("{}.txt", period.key()));
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let prefix = ctx.settings.str("list-name")?.unwrap_or("demo");
        let key = period.key();

        let list = store::create_article_list(conn, &format!("{} {}", prefix, key), Some(&key), ctx.tag)
            .await?;
        for doi in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let article = NewArticle {
                title: Some(format!("Demo article for {}", key)),
                doi: Some(doi.to_string()),
                date_published: Some(period.start.to_string()),
                period: Some(key.clone()),
                ..Default::default()
            };
            let id = store::create_article(conn, &article, ctx.tag).await?;
            store::add_article_to_list(conn, list.id, id, ctx.tag).await?;
        }
        Ok(ProcessOutput::ArticleList(list))
    }
}
