//! Record store adapter
//!
//! The filter pipeline never evaluates row-level predicates itself. It hands a named
//! [`Operation`] to a [`RecordStore`], which materializes the matching rows into a new
//! table and later streams them back as typed [`Record`]s.
//!
//! ```text
//! ┌──────────────┐  select_working_set   ┌──────────────┐
//! │  FilterTask  │ ────────────────────▶ │              │
//! │              │  run_filter_operation │ RecordStore  │
//! │  (background │ ────────────────────▶ │  (memory,    │
//! │   task)      │  deduplicate          │   SQL, ...)  │
//! │              │ ────────────────────▶ │              │
//! │              │ ◀──────────────────── │              │
//! └──────────────┘      stream_rows      └──────────────┘
//! ```
//!
//! Every potentially long call receives the run's [`CancellationToken`]. Stores that
//! honour it return [`Interrupted`] so the task can report the run as cancelled.

pub mod import;
pub mod memory;
pub mod record;

pub use memory::{Annotation, MemoryStore};
pub use record::{Base, MalformedRow, Record, Row, SiteKey};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tokio_util::sync::CancellationToken;

/// Operation names understood by stores
pub mod ops {
    pub const QUALITY_DEPTH: &str = "quality_depth";
    pub const EDITING_TYPE: &str = "editing_type";
    pub const KNOWN_SNP: &str = "known_snp";
    pub const REPEAT_REGION: &str = "repeat_region";
    pub const SPLICE_JUNCTION: &str = "splice_junction";
    pub const DNA_RNA: &str = "dna_rna";
    pub const RETAIN_SITES: &str = "retain_sites";
}

/// Opaque reference to a physical table inside a store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Handle {
    pub table: String,
    /// Number of rows in the table when the handle was produced
    pub rows: usize,
}

impl Handle {
    pub fn new(table: impl Into<String>, rows: usize) -> Self {
        Self {
            table: table.into(),
            rows,
        }
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} rows)", self.table, self.rows)
    }
}

/// A typed operation parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ParamValue {
    Integer(i64),
    Float(f64),
    Text(String),
    Base(Base),
    Tables(Vec<String>),
    Sites(Vec<SiteKey>),
}

/// Named parameters of an operation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationParams(BTreeMap<String, ParamValue>);

impl OperationParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: ParamValue) -> Self {
        self.0.insert(key.to_string(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.0.get(key)
    }

    pub fn float(&self, key: &str) -> Result<f64> {
        match self.0.get(key) {
            Some(ParamValue::Float(v)) => Ok(*v),
            Some(ParamValue::Integer(v)) => Ok(*v as f64),
            other => anyhow::bail!("parameter '{key}' must be a number, got {other:?}"),
        }
    }

    pub fn integer(&self, key: &str) -> Result<i64> {
        match self.0.get(key) {
            Some(ParamValue::Integer(v)) => Ok(*v),
            other => anyhow::bail!("parameter '{key}' must be an integer, got {other:?}"),
        }
    }

    pub fn base(&self, key: &str) -> Result<Base> {
        match self.0.get(key) {
            Some(ParamValue::Base(b)) => Ok(*b),
            other => anyhow::bail!("parameter '{key}' must be a base, got {other:?}"),
        }
    }

    pub fn tables(&self, key: &str) -> Result<&[String]> {
        match self.0.get(key) {
            Some(ParamValue::Tables(t)) => Ok(t),
            other => anyhow::bail!("parameter '{key}' must list tables, got {other:?}"),
        }
    }

    pub fn sites(&self, key: &str) -> Result<&[SiteKey]> {
        match self.0.get(key) {
            Some(ParamValue::Sites(s)) => Ok(s),
            other => anyhow::bail!("parameter '{key}' must list sites, got {other:?}"),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }
}

/// A named filter operation to run against an input table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub name: String,
    /// Dedicated result-table prefix of the filter kind that issued the operation
    pub result_table: String,
    pub params: OperationParams,
}

impl Operation {
    pub fn new(name: &str, result_table: &str, params: OperationParams) -> Self {
        Self {
            name: name.to_string(),
            result_table: result_table.to_string(),
            params,
        }
    }
}

/// Lazy, finite, one-shot sequence of rows
pub type RowStream = Box<dyn Iterator<Item = Row> + Send>;

/// Returned by stores that stopped early because the run was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("store operation interrupted by cancellation")]
pub struct Interrupted;

/// Backing storage that physically executes filter operations
pub trait RecordStore: Send + Sync {
    /// Resolve a table name into a handle
    fn select_working_set(&self, name: &str) -> Result<Handle>;

    /// Materialize the rows of `input` that satisfy `operation` into a new table
    fn run_filter_operation(
        &self,
        input: &Handle,
        operation: &Operation,
        cancel: &CancellationToken,
    ) -> Result<Handle>;

    /// Collapse rows sharing a site into the first occurrence
    fn deduplicate(&self, result: &Handle, cancel: &CancellationToken) -> Result<Handle>;

    /// Stream the rows of a table
    fn stream_rows(&self, result: &Handle) -> Result<RowStream>;

    /// Rows of a table that could not be parsed
    ///
    /// Result tables never carry these forward, so a run reports the malformed rows of
    /// its input once and every derived table holds only members.
    fn malformed_rows(&self, _table: &Handle) -> Result<Vec<MalformedRow>> {
        Ok(Vec::new())
    }

    /// Release a table produced by a run that will not be kept
    fn drop_result(&self, result: &Handle) -> Result<()>;
}
