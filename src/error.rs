//! Error taxonomy for the scraper lifecycle engine.
//!
//! Plugins return `anyhow::Result` from their hooks; the engine maps those
//! failures onto [`EngineError`] so callers can tell a failed fetch (re-run
//! fetches again) from a failed process step (re-run reuses the cache).

use std::path::PathBuf;
use thiserror::Error;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid settings, period bounds, or alias chains. Raised before any I/O.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The plugin's `scrape()` failed. Nothing was promoted to the cache.
    #[error("fetch failed for source '{source_tag}': {error:#}")]
    Fetch {
        source_tag: String,
        error: anyhow::Error,
    },

    /// The plugin's `process()` failed. The transaction was rolled back
    /// and the cache directory was kept.
    #[error("processing failed for source '{source_tag}'{}: {message}", period_suffix(.period))]
    Process {
        source_tag: String,
        period: Option<String>,
        message: String,
    },

    /// Cache and store disagree about what a previous run completed.
    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("run cancelled")]
    Cancelled,

    #[error("i/o error on {path}: {error}")]
    Io {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

fn period_suffix(period: &Option<String>) -> String {
    match period {
        Some(p) => format!(" in period {}", p),
        None => String::new(),
    }
}

impl EngineError {
    pub fn config(msg: impl Into<String>) -> Self {
        EngineError::Configuration(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        EngineError::Invariant(msg.into())
    }

    pub fn io(path: impl Into<PathBuf>, error: std::io::Error) -> Self {
        EngineError::Io {
            path: path.into(),
            error,
        }
    }

    /// Errors caused by user input rather than by a bug or the environment.
    pub fn is_user_error(&self) -> bool {
        matches!(self, EngineError::Configuration(_) | EngineError::Cancelled)
    }

    /// True when a retry can skip fetching and only re-run processing.
    pub fn needs_reprocess_only(&self) -> bool {
        matches!(self, EngineError::Process { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_error_mentions_period() {
        let err = EngineError::Process {
            source_tag: "pubmed".to_string(),
            period: Some("2014-03".to_string()),
            message: "bad xml".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "processing failed for source 'pubmed' in period 2014-03: bad xml"
        );
        assert!(err.needs_reprocess_only());
        assert!(!err.is_user_error());
    }

    #[test]
    fn fetch_error_keeps_original_message() {
        let err = EngineError::Fetch {
            source_tag: "doaj".to_string(),
            error: anyhow::anyhow!("connection reset"),
        };
        assert!(err.to_string().contains("connection reset"));
        assert!(!err.needs_reprocess_only());
    }
}
