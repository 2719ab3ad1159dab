//! Run progress reporting.
//!
//! Reports what the lifecycle controller is doing for each source (and
//! period) so users can see which steps were skipped thanks to the cache or
//! already-stored data. Progress is emitted on **stderr** so stdout remains
//! parseable for scripts.

use std::io::Write;

use crate::lifecycle::LifecycleState;

/// A single progress event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProgressEvent {
    /// A source run begins. `periods` is set for periodic sources.
    Started {
        source: String,
        fingerprint: String,
        periods: Option<usize>,
    },
    /// The controller moved to a new state.
    State {
        source: String,
        period: Option<String>,
        state: LifecycleState,
    },
    /// Scraped data was already cached; no fetch needed.
    CacheHit {
        source: String,
        period: Option<String>,
    },
    /// The cache was older than `cache-expires` and was purged with its rows.
    CacheExpired { source: String },
    /// Rows for this source (or period) exist; processing skipped.
    AlreadyStored {
        source: String,
        period: Option<String>,
    },
}

/// Reports run progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the lifecycle controllers.
    fn report(&self, event: ProgressEvent);
}

fn label(source: &str, period: &Option<String>) -> String {
    match period {
        Some(p) => format!("{} [{}]", source, p),
        None => source.to_string(),
    }
}

/// Human-friendly progress on stderr: "run pubmed [2014-03]  fetching".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Started {
                source,
                fingerprint,
                periods,
            } => match periods {
                Some(n) => format!("run {}  {}  ({} periods)\n", source, fingerprint, n),
                None => format!("run {}  {}\n", source, fingerprint),
            },
            ProgressEvent::State {
                source,
                period,
                state,
            } => format!("run {}  {}\n", label(source, period), state),
            ProgressEvent::CacheHit { source, period } => {
                format!("run {}  scraped data is already cached\n", label(source, period))
            }
            ProgressEvent::CacheExpired { source } => {
                format!("run {}  cache expired, clearing cache and stored data\n", source)
            }
            ProgressEvent::AlreadyStored { source, period } => {
                format!("run {}  data is already stored\n", label(source, period))
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::Started {
                source,
                fingerprint,
                periods,
            } => serde_json::json!({
                "event": "started",
                "source": source,
                "fingerprint": fingerprint,
                "periods": periods
            }),
            ProgressEvent::State {
                source,
                period,
                state,
            } => serde_json::json!({
                "event": "state",
                "source": source,
                "period": period,
                "state": state.as_str()
            }),
            ProgressEvent::CacheHit { source, period } => serde_json::json!({
                "event": "cache_hit",
                "source": source,
                "period": period
            }),
            ProgressEvent::CacheExpired { source } => serde_json::json!({
                "event": "cache_expired",
                "source": source
            }),
            ProgressEvent::AlreadyStored { source, period } => serde_json::json!({
                "event": "already_stored",
                "source": source,
                "period": period
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Auto,
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Build a reporter for this mode.
    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Auto => Self::default_for_tty().reporter(),
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
