//! Built-in reports and the report driver.
//!
//! Reports run after every configured source has finished and read the
//! database only. Output goes to stdout; progress and logs stay on stderr.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{SqliteConnection, SqlitePool};
use std::fmt::Write;

use crate::error::EngineError;
use crate::store;
use crate::traits::{Report, ReportRegistry};

/// Row counts per provenance tag and table.
pub struct TextDumpReport;

#[async_trait]
impl Report for TextDumpReport {
    fn name(&self) -> &str {
        "text-dump"
    }

    fn description(&self) -> &str {
        "Row counts for every source, table by table"
    }

    async fn run(&self, conn: &mut SqliteConnection) -> Result<String> {
        let sources = store::distinct_sources(conn).await?;
        let mut out = String::new();

        writeln!(out, "oacensus database contents")?;
        writeln!(out, "==========================")?;
        if sources.is_empty() {
            writeln!(out)?;
            writeln!(out, "  (no stored data)")?;
            return Ok(out);
        }

        let mut totals = vec![0i64; store::PROVENANCE_TABLES.len()];
        for source in &sources {
            writeln!(out)?;
            writeln!(out, "  {}", source)?;
            let counts = store::counts_for_source(conn, source).await?;
            for (i, (table, n)) in counts.iter().enumerate() {
                totals[i] += n;
                if *n > 0 {
                    writeln!(out, "    {:<28} {:>8}", table, n)?;
                }
            }
        }

        writeln!(out)?;
        writeln!(out, "  Total")?;
        writeln!(out, "  {}", "-".repeat(38))?;
        for (table, n) in store::PROVENANCE_TABLES.iter().zip(&totals) {
            writeln!(out, "    {:<28} {:>8}", table, n)?;
        }
        Ok(out)
    }
}

/// Every article and journal list with its member count.
pub struct ListsReport;

#[async_trait]
impl Report for ListsReport {
    fn name(&self) -> &str {
        "lists"
    }

    fn description(&self) -> &str {
        "Article and journal lists with member counts"
    }

    async fn run(&self, conn: &mut SqliteConnection) -> Result<String> {
        let lists = store::list_summaries(conn).await?;
        let mut out = String::new();
        if lists.is_empty() {
            writeln!(out, "No lists stored.")?;
            return Ok(out);
        }

        writeln!(out, "{:<8} {:<32} {:<20} {:>8}", "KIND", "NAME", "SOURCE", "MEMBERS")?;
        writeln!(out, "{}", "-".repeat(71))?;
        for list in &lists {
            writeln!(
                out,
                "{:<8} {:<32} {:<20} {:>8}",
                list.kind,
                truncate(&list.name, 32),
                truncate(&list.source, 20),
                list.members
            )?;
        }
        Ok(out)
    }
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        s.to_string()
    } else {
        let mut t: String = s.chars().take(width.saturating_sub(1)).collect();
        t.push('…');
        t
    }
}

/// Run the named reports in order and print each to stdout.
///
/// Unknown names are rejected before any report runs.
pub async fn run_reports(registry: &ReportRegistry, names: &[String], pool: &SqlitePool) -> Result<()> {
    let mut reports = Vec::with_capacity(names.len());
    for name in names {
        match registry.find(name) {
            Some(report) => reports.push(report),
            None => {
                let known: Vec<&str> = registry.reports().iter().map(|r| r.name()).collect();
                return Err(EngineError::config(format!(
                    "Unknown report '{}'. Available: {}",
                    name,
                    known.join(", ")
                ))
                .into());
            }
        }
    }

    let mut conn = pool.acquire().await?;
    for report in reports {
        tracing::info!(report = report.name(), "running report");
        let text = report.run(&mut conn).await?;
        print!("{}", text);
        if !text.ends_with('\n') {
            println!();
        }
    }
    Ok(())
}
