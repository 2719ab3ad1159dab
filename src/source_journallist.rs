//! Journal list source.
//!
//! Reads a tab-separated file of journals and stores it as a journal list.
//! The first line names the columns; `issn` is required and `title`,
//! `eissn`, `url`, `license` and `free-to-read` are optional. Other
//! columns are ignored.
//!
//! Existing journals (matched by ISSN) are enriched according to
//! `update-journal-fields`; new ones are only created when
//! `add-new-journals` is set.
//!
//! # Configuration
//!
//! ```toml
//! [aliases.doaj]
//! plugin = "journallist"
//!
//! [aliases.doaj.settings]
//! path = "data/doaj.tsv"
//! list-name = "DOAJ"
//! encoding = "chardet"
//! add-new-journals = true
//! update-journal-fields = ["license", "is_free_to_read"]
//! ```

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::SqliteConnection;

use crate::encoding::TextEncoding;
use crate::journals::{journal_settings, JournalChange, JournalPolicy};
use crate::models::{NewJournal, ProcessOutput};
use crate::settings::SettingSpec;
use crate::store;
use crate::traits::{ProcessContext, ScrapeContext, Source};

const JOURNAL_FILE: &str = "journals.tsv";

pub struct JournalListSource;

/// One data row, keyed by ISSN.
#[derive(Debug, Clone)]
struct JournalRow {
    issn: String,
    fields: NewJournal,
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "y" | "1" => Some(true),
        "false" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

fn parse_journals(raw: &str) -> Result<Vec<JournalRow>> {
    let mut lines = raw.lines().filter(|l| !l.trim().is_empty());
    let Some(header) = lines.next() else {
        return Ok(Vec::new());
    };
    let columns: Vec<String> = header
        .split('\t')
        .map(|c| c.trim().to_ascii_lowercase())
        .collect();
    let Some(issn_col) = columns.iter().position(|c| c == "issn") else {
        bail!("journal file header has no 'issn' column");
    };

    let mut rows = Vec::new();
    for line in lines {
        let cells: Vec<&str> = line.split('\t').map(str::trim).collect();
        let cell = |name: &str| -> Option<String> {
            let idx = columns.iter().position(|c| c == name)?;
            cells
                .get(idx)
                .filter(|v| !v.is_empty())
                .map(|v| v.to_string())
        };

        let Some(issn) = cells.get(issn_col).filter(|v| !v.is_empty()) else {
            continue;
        };
        rows.push(JournalRow {
            issn: issn.to_string(),
            fields: NewJournal {
                title: cell("title").unwrap_or_default(),
                eissn: cell("eissn"),
                url: cell("url"),
                license: cell("license"),
                is_free_to_read: cell("free-to-read").as_deref().and_then(parse_flag),
                ..Default::default()
            },
        });
    }
    Ok(rows)
}

#[async_trait]
impl Source for JournalListSource {
    fn plugin(&self) -> &str {
        "journallist"
    }

    fn description(&self) -> &str {
        "Creates or enriches journals from a tab-separated file and stores them as a journal list"
    }

    fn settings(&self) -> Vec<SettingSpec> {
        let mut specs = vec![
            SettingSpec::required("path", "Tab-separated journal file with a header line."),
            SettingSpec::new("list-name", "Name of the journal list to create.", Value::from("Journal list")),
        ];
        specs.extend(journal_settings());
        specs
    }

    async fn scrape(&self, ctx: &ScrapeContext<'_>) -> Result<()> {
        let path = ctx.settings.str("path")?.unwrap_or_default();
        let dest = ctx.work_dir.join(JOURNAL_FILE);
        std::fs::copy(path, &dest)
            .with_context(|| format!("Failed to copy {} to {}", path, dest.display()))?;
        Ok(())
    }

    async fn process(
        &self,
        ctx: &ProcessContext<'_>,
        conn: &mut SqliteConnection,
    ) -> Result<ProcessOutput> {
        let encoding = TextEncoding::from_settings(ctx.settings)?;
        let policy = JournalPolicy::from_settings(ctx.settings)?;
        let raw = encoding.read_to_string(&ctx.cache_dir.join(JOURNAL_FILE))?;
        let name = ctx.settings.str("list-name")?.unwrap_or("Journal list");

        let mut rows = parse_journals(&raw)?;
        if let Some(limit) = policy.limit {
            rows.truncate(limit);
        }

        let list = store::create_journal_list(conn, name, ctx.tag).await?;
        let (mut created, mut updated, mut skipped) = (0, 0, 0);
        for row in &rows {
            match policy
                .create_or_modify(conn, ctx.tag, &row.issn, &row.fields, Some(&list))
                .await?
            {
                JournalChange::Created(_) => created += 1,
                JournalChange::Updated(_) => updated += 1,
                JournalChange::Skipped => skipped += 1,
            }
        }
        tracing::info!(
            source = ctx.tag,
            created,
            updated,
            skipped,
            "journal list '{}' stored",
            name
        );
        Ok(ProcessOutput::JournalList(list))
    }
}
