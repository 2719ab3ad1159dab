//! DOI list source.
//!
//! Reads a newline-separated list of DOIs from a local file or a URL and
//! stores it as an article list. Articles already in the database (from
//! any source) are reused; missing ones are created with this source's tag.
//!
//! # Configuration
//!
//! ```toml
//! [aliases.wellcome]
//! plugin = "doilist"
//!
//! [aliases.wellcome.settings]
//! path = "data/wellcome-dois.txt"
//! list-name = "Wellcome Trust"
//! ```

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::SqliteConnection;
use std::time::Duration;

use crate::encoding::TextEncoding;
use crate::models::{NewArticle, ProcessOutput};
use crate::settings::SettingSpec;
use crate::store;
use crate::traits::{ProcessContext, ScrapeContext, Source};

const DOI_FILE: &str = "dois.txt";

pub struct DoiListSource {
    client: reqwest::Client,
}

impl DoiListSource {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    async fn download(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", url))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("GET {} returned {}: {}", url, status, body_text);
        }
        Ok(response.text().await?)
    }
}

impl Default for DoiListSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Trimmed, non-empty lines; `doi:` prefixes are dropped.
fn parse_dois(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            line.strip_prefix("doi:")
                .or_else(|| line.strip_prefix("DOI:"))
                .unwrap_or(line)
                .trim()
                .to_string()
        })
        .collect()
}

#[async_trait]
impl Source for DoiListSource {
    fn plugin(&self) -> &str {
        "doilist"
    }

    fn description(&self) -> &str {
        "Stores a list of DOIs read from a file or URL as an article list"
    }

    fn settings(&self) -> Vec<SettingSpec> {
        vec![
            SettingSpec::new("path", "Local file containing one DOI per line.", Value::Null),
            SettingSpec::new("url", "URL of a file containing one DOI per line.", Value::Null),
            SettingSpec::new("list-name", "Name of the article list to create.", Value::from("DOI list")),
        ]
    }

    async fn scrape(&self, ctx: &ScrapeContext<'_>) -> Result<()> {
        let dest = ctx.work_dir.join(DOI_FILE);
        match (ctx.settings.str("path")?, ctx.settings.str("url")?) {
            (Some(path), None) => {
                std::fs::copy(path, &dest)
                    .with_context(|| format!("Failed to copy {} to {}", path, dest.display()))?;
            }
            (None, Some(url)) => {
                let body = self.download(url).await?;
                std::fs::write(&dest, body)
                    .with_context(|| format!("Failed to write {}", dest.display()))?;
            }
            (Some(_), Some(_)) => bail!("doilist: set either 'path' or 'url', not both"),
            (None, None) => bail!("doilist: one of 'path' or 'url' is required"),
        }
        Ok(())
    }

    async fn process(
        &self,
        ctx: &ProcessContext<'_>,
        conn: &mut SqliteConnection,
    ) -> Result<ProcessOutput> {
        let path = ctx.cache_dir.join(DOI_FILE);
        let raw = TextEncoding::from_settings(ctx.settings)?.read_to_string(&path)?;
        let name = ctx.settings.str("list-name")?.unwrap_or("DOI list");

        let list = store::create_article_list(conn, name, None, ctx.tag).await?;
        for doi in parse_dois(&raw) {
            let article_id = match store::article_by_doi(conn, &doi).await? {
                Some(existing) => existing.id,
                None => {
                    let article = NewArticle {
                        doi: Some(doi.clone()),
                        ..Default::default()
                    };
                    store::create_article(conn, &article, ctx.tag).await?
                }
            };
            store::add_article_to_list(conn, list.id, article_id, ctx.tag).await?;
        }
        Ok(ProcessOutput::ArticleList(list))
    }
}
