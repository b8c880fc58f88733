//! Filters decided by an external statistics script
//!
//! The input rows are exported to a temporary TSV, the script writes per-site
//! statistics, and the sites passing the cutoffs are handed back to the store
//! as a `retain_sites` operation.

mod fisher;
mod likelihood_ratio;

pub use fisher::FisherFilter;
pub use likelihood_ratio::LikelihoodRatioFilter;

use super::{FieldKind, FieldSpec, OptionSet, ReadinessGate, Requirement, RunContext, SiteFilter};
use crate::stats::{StatsRunner, read_statistics, write_records};
use crate::store::{Handle, Interrupted, ParamValue, SiteKey};
use anyhow::{Context, Result};
use std::path::Path;

pub(crate) const SCRIPT: FieldSpec =
    FieldSpec::new("script", FieldKind::Path, "statistics script run by the configured interpreter");

/// Numeric fields parse, and a script path is set
pub(crate) fn script_gate(fields: &[FieldSpec]) -> ReadinessGate {
    fields
        .iter()
        .filter(|f| f.kind != FieldKind::Path)
        .fold(ReadinessGate::new(), |gate, f| gate.require(Requirement::Field(*f)))
        .require(Requirement::ScriptPath(SCRIPT.name))
}

/// Run the filter's script over `input` and retain the sites `keep` accepts
pub(crate) fn retain_by_script(
    filter: &dyn SiteFilter,
    ctx: &RunContext<'_>,
    input: &Handle,
    options: &OptionSet,
    thresholds: Vec<String>,
    columns: usize,
    keep: impl Fn(&[f64]) -> bool,
) -> Result<Handle> {
    let script = options
        .get(SCRIPT.name)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .context("no statistics script configured")?;
    let runner = StatsRunner::new(ctx.stats)?;

    let workdir = tempfile::Builder::new()
        .prefix("sitesieve-stats-")
        .tempdir()
        .context("Failed to create a working directory for the statistics script")?;
    let input_path = workdir.path().join("input.tsv");
    let output_path = workdir.path().join("output.tsv");

    let mut records = Vec::with_capacity(input.rows);
    for row in ctx.store.stream_rows(input)? {
        if ctx.cancel.is_cancelled() {
            return Err(Interrupted.into());
        }
        // Malformed rows are reported by the run itself
        if let Ok(record) = row {
            records.push(record);
        }
    }
    let exported = write_records(&input_path, &records)?;
    tracing::debug!("Exported {} records for {}", exported, filter.key());

    runner.run(Path::new(script), &input_path, &output_path, &thresholds, ctx.cancel)?;

    let statistics = read_statistics(&output_path, columns)?;
    for skipped in statistics.skipped {
        ctx.warn(skipped);
    }
    let sites: Vec<SiteKey> = statistics
        .sites
        .into_iter()
        .filter(|stat| keep(&stat.values))
        .map(|stat| stat.site)
        .collect();
    tracing::debug!("{} of {} sites pass {}", sites.len(), exported, filter.key());

    let mut operation = filter.operation(options)?;
    operation.params = operation.params.with("sites", ParamValue::Sites(sites));
    ctx.store.run_filter_operation(input, &operation, ctx.cancel)
}
