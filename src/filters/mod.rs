//! Filter catalog
//!
//! Each filter kind knows its option fields, the readiness requirements over them,
//! the store operation it issues (with its dedicated result table) and how to
//! name and describe the list it produces.

pub mod options;
pub mod readiness;
pub mod site;
pub mod statistical;

pub use options::{FieldKind, FieldSpec, OptionError, OptionSet};
pub use readiness::{ReadinessGate, Requirement};

use crate::config::StatsConfig;
use crate::task::WarningLog;
use crate::store::{Handle, Operation, OperationParams, ParamValue, RecordStore};
use anyhow::Result;
use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Kind of table a filter takes as its selected sources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    KnownSites,
    Regions,
    Junctions,
    DnaRecords,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceKind::KnownSites => "known-site tables",
            SourceKind::Regions => "region tables",
            SourceKind::Junctions => "junction tables",
            SourceKind::DnaRecords => "DNA record tables",
        };
        f.write_str(name)
    }
}

/// What a filter needs while it materializes its result set
pub struct RunContext<'a> {
    pub store: &'a dyn RecordStore,
    pub cancel: &'a CancellationToken,
    pub stats: &'a StatsConfig,
    pub(crate) warnings: RefCell<&'a mut WarningLog>,
}

impl RunContext<'_> {
    /// Record a recoverable problem; it is delivered with the run's other warnings
    pub fn warn(&self, cause: impl Into<String>) {
        self.warnings.borrow_mut().push(cause);
    }
}

/// A kind of filter that narrows a list of sites
pub trait SiteFilter: Send + Sync {
    /// Stable identifier used on the command line and in logs
    fn key(&self) -> &'static str;

    /// Human-readable filter name
    fn name(&self) -> &'static str;

    /// Result-table prefix dedicated to this filter kind
    fn result_table(&self) -> &'static str;

    fn fields(&self) -> &'static [FieldSpec];

    fn source(&self) -> Option<SourceKind> {
        None
    }

    /// Requirements the option set must meet before a run may start
    fn gate(&self) -> ReadinessGate {
        let gate = ReadinessGate::for_fields(self.fields());
        match self.source() {
            Some(_) => gate.require(Requirement::SourceSelected),
            None => gate,
        }
    }

    fn default_options(&self) -> OptionSet {
        OptionSet::with_defaults(self.fields())
    }

    /// Store operation implementing this filter for the given options
    fn operation(&self, options: &OptionSet) -> Result<Operation>;

    /// Summary of the options used, stored as the output list's description
    fn describe(&self, options: &OptionSet) -> String;

    fn output_name(&self, input_name: &str) -> String {
        format!("{input_name} | {}", self.name())
    }

    /// Materialize the rows of `input` this filter keeps into a new table
    fn materialize(&self, ctx: &RunContext<'_>, input: &Handle, options: &OptionSet) -> Result<Handle> {
        let operation = self.operation(options)?;
        ctx.store.run_filter_operation(input, &operation, ctx.cancel)
    }
}

/// Typed parameters for every declared field, plus the selected sources
pub(crate) fn field_params(
    fields: &[FieldSpec],
    options: &OptionSet,
    with_sources: bool,
) -> Result<OperationParams> {
    let mut params = OperationParams::new();
    for field in fields {
        params = params.with(field.name, options.param(field)?);
    }
    if with_sources {
        params = params.with("sources", ParamValue::Tables(options.sources().to_vec()));
    }
    Ok(params)
}

/// Every filter kind, in catalog order
pub fn catalog() -> Vec<Arc<dyn SiteFilter>> {
    vec![
        Arc::new(site::QualityFilter),
        Arc::new(site::EditingTypeFilter),
        Arc::new(site::KnownSnpFilter),
        Arc::new(site::RepeatRegionFilter),
        Arc::new(site::SpliceJunctionFilter),
        Arc::new(site::DnaRnaFilter),
        Arc::new(statistical::FisherFilter),
        Arc::new(statistical::LikelihoodRatioFilter),
    ]
}

pub fn by_key(key: &str) -> Option<Arc<dyn SiteFilter>> {
    catalog().into_iter().find(|filter| filter.key() == key)
}
