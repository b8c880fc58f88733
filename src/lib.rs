//! # sitesieve - filter pipeline for RNA editing candidate sites
//!
//! sitesieve narrows a large set of candidate variant sites down to a plausible
//! subset by chaining named filters (quality and depth thresholds, known-SNP
//! exclusion, repeat regions, splice junctions, DNA-RNA comparison, statistical
//! tests). Every run produces a new list that is attached under its input in a
//! provenance tree, so the path from the raw calls to any result stays visible.
//!
//! ## Features
//!
//! - **Background runs**: filters execute on a blocking worker with cooperative cancellation
//! - **Progress bus**: any number of observers receive ordered, throttled progress events
//! - **Lineage tracking**: derived lists form a tree that round-trips through project files
//! - **Pluggable storage**: filters delegate row selection to a [`store::RecordStore`]
//!
//! ## Quick Start
//!
//! ```bash
//! sitesieve run --sites calls.tsv --known dbsnp=dbsnp.tsv \
//!     --step quality:quality=20,depth=6 --step editing_type --step known_snp@dbsnp \
//!     --project project.json
//! sitesieve tree project.json
//! ```

pub mod bus;
pub mod cli;
pub mod config;
pub mod filters;
pub mod lineage;
pub mod session;
pub mod stats;
pub mod store;
pub mod task;

pub use cli::{Cli, Output};
pub use config::{SieveConfig, Settings};
pub use session::Session;

/// Result type alias for sitesieve operations
pub type Result<T> = anyhow::Result<T>;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
