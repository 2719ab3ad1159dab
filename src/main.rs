//! # oacensus CLI
//!
//! ```bash
//! oacensus --config ./oacensus.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `oacensus init` | Create the SQLite database and run schema migrations |
//! | `oacensus run [ALIAS...]` | Run configured sources in order, then reports |
//! | `oacensus sources` | Show each configured source's fingerprint, cache and rows |
//! | `oacensus purge <alias>` | Delete a source's cache and stored rows |
//! | `oacensus report [NAME...]` | Run reports only |
//! | `oacensus completions <shell>` | Print shell completions |
//!
//! Exit status is 2 for configuration and input errors, 1 for anything else.

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use oacensus::cache::CacheKey;
use oacensus::config::{self, Config};
use oacensus::error::EngineError;
use oacensus::fingerprint::period_fingerprint;
use oacensus::lifecycle::{Cancellation, Engine, RunOutcome};
use oacensus::progress::ProgressMode;
use oacensus::traits::{ReportRegistry, SourceInstance, SourceRegistry};
use oacensus::{db, migrate, report, sources, store};

/// Scrape bibliographic sources into SQLite and report on them.
#[derive(Parser)]
#[command(name = "oacensus", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./oacensus.toml")]
    config: PathBuf,

    /// Progress output on stderr. `auto` shows human progress on a TTY.
    #[arg(long, global = true, value_enum, default_value = "auto")]
    progress: ProgressMode,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run more than once.
    Init,

    /// Run configured sources in order, then the configured reports.
    Run {
        /// Only run these aliases (default: every [[run]] entry).
        aliases: Vec<String>,

        /// Skip the configured reports.
        #[arg(long)]
        no_reports: bool,
    },

    /// List configured sources with fingerprint, cache state and stored rows.
    Sources,

    /// Delete cached data and stored rows for a configured source.
    ///
    /// This is the way out when a source has stored rows but its cache
    /// directory is gone. For periodic sources every cached period is
    /// removed, including periods outside the configured range.
    Purge {
        /// Alias of a configured [[run]] source.
        alias: String,
    },

    /// Run reports against the database.
    Report {
        /// Report names (default: the configured [[report]] entries).
        names: Vec<String>,
    },

    /// Print shell completions.
    Completions {
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();

    let cli = Cli::parse();
    match dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            let user_error = e
                .downcast_ref::<EngineError>()
                .map(EngineError::is_user_error)
                .unwrap_or(false);
            if user_error {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

async fn dispatch(cli: Cli) -> Result<()> {
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        let name = cmd.get_name().to_string();
        generate(shell, &mut cmd, name, &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            cfg.cache_dirs()?;
            println!("Database initialized at {}.", cfg.db.path.display());
            pool.close().await;
        }
        Commands::Run {
            aliases,
            no_reports,
        } => {
            let cancel = Cancellation::new();
            let engine = open_engine(&cfg, cli.progress)
                .await?
                .with_cancellation(cancel.clone());
            cancel_on_interrupt(cancel);
            run_sources(&cfg, &engine, &aliases).await?;
            if !no_reports && !cfg.reports.is_empty() {
                report::run_reports(&ReportRegistry::with_builtins(), &cfg.report_names(), engine.pool())
                    .await?;
            }
            engine.pool().close().await;
        }
        Commands::Sources => {
            let engine = open_engine(&cfg, ProgressMode::Off).await?;
            sources::list_sources(&cfg, &SourceRegistry::with_builtins(), &engine).await?;
            engine.pool().close().await;
        }
        Commands::Purge { alias } => {
            let engine = open_engine(&cfg, ProgressMode::Off).await?;
            purge_source(&cfg, &engine, &alias).await?;
            engine.pool().close().await;
        }
        Commands::Report { names } => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            let names = if names.is_empty() { cfg.report_names() } else { names };
            report::run_reports(&ReportRegistry::with_builtins(), &names, &pool).await?;
            pool.close().await;
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}

async fn open_engine(cfg: &Config, progress: ProgressMode) -> Result<Engine> {
    let pool = db::connect(cfg).await?;
    migrate::run_migrations(&pool).await?;
    Ok(Engine::new(cfg.cache_dirs()?, pool).with_progress(progress.reporter()))
}

/// Resolve and validate every selected run before any of them fetches.
fn instantiate_runs(cfg: &Config, engine: &Engine, only: &[String]) -> Result<Vec<SourceInstance>> {
    let registry = SourceRegistry::with_builtins();
    let mut instances = Vec::new();
    for run in cfg.selected_runs(only)? {
        let instance = registry.instantiate(&run.source, &cfg.aliases, &run.settings)?;
        engine.preflight(&instance)?;
        instances.push(instance);
    }
    Ok(instances)
}

fn cancel_on_interrupt(cancel: Cancellation) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after the current step");
            cancel.cancel();
        }
    });
}

async fn run_sources(cfg: &Config, engine: &Engine, only: &[String]) -> Result<()> {
    let instances = instantiate_runs(cfg, engine, only)?;
    for instance in &instances {
        let outcome = engine.run(instance).await?;
        print_outcome(instance, &outcome);
    }
    Ok(())
}

fn print_outcome(instance: &SourceInstance, outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Source(step) => match &step.output {
            Some(output) => println!("{}: stored {}", instance.alias(), output),
            None => println!("{}: up to date", instance.alias()),
        },
        RunOutcome::Periods(steps) => {
            let processed = steps.iter().filter(|(_, s)| !s.is_up_to_date()).count();
            println!(
                "{}: {} periods, {} processed, {} up to date",
                instance.alias(),
                steps.len(),
                processed,
                steps.len() - processed
            );
        }
    }
}

async fn purge_source(cfg: &Config, engine: &Engine, alias: &str) -> Result<()> {
    let run = cfg.run_for(alias)?;
    let instance = SourceRegistry::with_builtins().instantiate(&run.source, &cfg.aliases, &run.settings)?;

    let mut tx = engine.pool().begin().await?;
    let removed = store::delete_all_from_source(&mut tx, instance.tag()).await?;
    tx.commit().await?;

    let mut keys = vec![CacheKey::source(instance.fingerprint())];
    if instance.plugin().is_periodic() {
        // Periods that left the configured range still carry this source's
        // fingerprint, so every period key on disk is checked.
        for period in engine.dirs().period_keys()? {
            let fp = period_fingerprint(instance.settings(), instance.excluded(), &period);
            keys.push(CacheKey::period(fp, period));
        }
    }
    let mut dirs = 0;
    for key in &keys {
        if engine.dirs().is_cached(key) {
            dirs += 1;
        }
        engine.dirs().purge(key)?;
        engine.dirs().purge_work(key)?;
    }

    println!(
        "Purged {}: {} rows tagged '{}', {} cache director{}.",
        alias,
        removed,
        instance.tag(),
        dirs,
        if dirs == 1 { "y" } else { "ies" }
    );
    Ok(())
}
