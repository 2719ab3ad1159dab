//! # oacensus
//!
//! Scrapes bibliographic data sources into a local SQLite database and
//! reports on open-access status.
//!
//! Every source goes through the same lifecycle: its resolved settings are
//! fingerprinted, fetched data is staged in a work directory and promoted
//! into a cache directory named by the fingerprint, and the cached data is
//! applied to the database in one transaction. Re-running a source with
//! the same settings skips whatever is already done.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌───────────┐   ┌──────────┐
//! │  Settings   │──▶│ Fingerprint  │──▶│ Cache/Work│──▶│  SQLite  │
//! │  Resolver   │   │              │   │   Dirs    │   │ (tagged) │
//! └─────────────┘   └──────────────┘   └───────────┘   └────┬─────┘
//!                                                          │
//!                                                          ▼
//!                                                    ┌──────────┐
//!                                                    │ Reports  │
//!                                                    └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! oacensus init                 # create database
//! oacensus run                  # run every [[run]] source, then reports
//! oacensus sources              # cache and store state per source
//! oacensus purge my-doilist     # drop a source's cache and rows
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`settings`] | Layered plugin settings and alias chains |
//! | [`fingerprint`] | Stable settings fingerprints |
//! | [`cache`] | Cache and work directories, expiry |
//! | [`period`] | Monthly period ranges |
//! | [`lifecycle`] | Source lifecycle controller |
//! | [`periodic`] | Per-period lifecycle controller |
//! | [`traits`] | Source and report plugin contracts, registries |
//! | [`store`] | Provenance-tagged database access |
//! | [`journals`] | Journal create-or-update rules shared by journal sources |
//! | [`encoding`] | Decoding fetched text per the `encoding` setting |
//! | [`report`] | Built-in reports and the report driver |
//! | [`progress`] | Run progress on stderr |
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod cache;
pub mod config;
pub mod db;
pub mod encoding;
pub mod error;
pub mod fingerprint;
pub mod journals;
pub mod lifecycle;
pub mod migrate;
pub mod models;
pub mod period;
pub mod periodic;
pub mod progress;
pub mod report;
pub mod settings;
pub mod source_demo;
pub mod source_doilist;
pub mod source_journallist;
pub mod sources;
pub mod store;
pub mod traits;
