//! `oacensus sources`: configured runs with their cache and store state.

use anyhow::Result;

use crate::cache::{dir_size, CacheKey, CacheStatus};
use crate::config::Config;
use crate::fingerprint::period_fingerprint;
use crate::lifecycle::Engine;
use crate::store;
use crate::traits::SourceRegistry;

/// Status line for one configured run.
#[derive(Debug, Clone)]
pub struct SourceStatus {
    pub alias: String,
    pub plugin: String,
    pub fingerprint: String,
    pub cache: String,
    /// Bytes under the cache dir(s).
    pub cache_bytes: u64,
    pub stored_rows: i64,
}

/// Resolve every configured run and inspect its cache and stored rows.
///
/// Nothing is fetched, processed or purged; an expired cache is only
/// reported as such.
pub async fn source_statuses(
    config: &Config,
    registry: &SourceRegistry,
    engine: &Engine,
) -> Result<Vec<SourceStatus>> {
    let mut statuses = Vec::with_capacity(config.runs.len());
    let mut conn = engine.pool().acquire().await?;

    for run in &config.runs {
        let instance = registry.instantiate(&run.source, &config.aliases, &run.settings)?;
        let fingerprint = instance.fingerprint();

        let (cache, cache_bytes) = match instance.period_range(engine.today())? {
            Some(range) => {
                let cached: Vec<CacheKey> = range
                    .iter()
                    .map(|p| {
                        let fp = period_fingerprint(instance.settings(), instance.excluded(), &p.key());
                        CacheKey::period(fp, p.key())
                    })
                    .filter(|key| engine.dirs().is_cached(key))
                    .collect();
                let bytes: u64 = cached.iter().map(|k| dir_size(&engine.dirs().cache_dir(k))).sum();
                (format!("{}/{} periods", cached.len(), range.len()), bytes)
            }
            None => {
                let key = CacheKey::source(fingerprint);
                let expiry = instance.expiry()?;
                let status = match engine.dirs().status(&key, expiry.as_ref(), engine.now())? {
                    CacheStatus::Fresh => "cached",
                    CacheStatus::Expired => "expired",
                    CacheStatus::Missing => "missing",
                };
                (status.to_string(), dir_size(&engine.dirs().cache_dir(&key)))
            }
        };

        let stored_rows = store::counts_for_source(&mut conn, instance.tag())
            .await?
            .iter()
            .map(|(_, n)| n)
            .sum();

        statuses.push(SourceStatus {
            alias: instance.alias().to_string(),
            plugin: instance.plugin().name().to_string(),
            fingerprint: fingerprint.to_hex(),
            cache,
            cache_bytes,
            stored_rows,
        });
    }

    Ok(statuses)
}

pub async fn list_sources(config: &Config, registry: &SourceRegistry, engine: &Engine) -> Result<()> {
    let statuses = source_statuses(config, registry, engine).await?;
    if statuses.is_empty() {
        println!("No [[run]] entries configured.");
        return Ok(());
    }

    println!(
        "{:<20} {:<14} {:<32}  {:<16} {:>10} {:>8}",
        "SOURCE", "PLUGIN", "FINGERPRINT", "CACHE", "SIZE", "ROWS"
    );
    for s in &statuses {
        println!(
            "{:<20} {:<14} {:<32}  {:<16} {:>10} {:>8}",
            s.alias,
            s.plugin,
            s.fingerprint,
            s.cache,
            format_bytes(s.cache_bytes),
            s.stored_rows
        );
    }
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
