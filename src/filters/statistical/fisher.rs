use super::{SCRIPT, retain_by_script, script_gate};
use crate::filters::{
    FieldKind, FieldSpec, OptionSet, ReadinessGate, RunContext, SiteFilter, field_params,
};
use crate::store::{Handle, Operation, ops};
use anyhow::Result;

const FIELDS: &[FieldSpec] = &[
    SCRIPT,
    FieldSpec::new("pvalue", FieldKind::Float, "largest accepted p-value").with_default("0.01"),
    FieldSpec::new("fdr", FieldKind::Float, "largest accepted false discovery rate").with_default("0.01"),
];

/// Fisher's exact test of observed against expected allele counts
///
/// The script writes `chrom pos pvalue fdr` per site; sites with both values
/// at or below their cutoffs are kept.
pub struct FisherFilter;

impl SiteFilter for FisherFilter {
    fn key(&self) -> &'static str {
        "fisher"
    }

    fn name(&self) -> &'static str {
        "Fisher's exact test filter"
    }

    fn result_table(&self) -> &'static str {
        "fetfilter_results"
    }

    fn fields(&self) -> &'static [FieldSpec] {
        FIELDS
    }

    fn gate(&self) -> ReadinessGate {
        script_gate(FIELDS)
    }

    fn operation(&self, options: &OptionSet) -> Result<Operation> {
        Ok(Operation::new(
            ops::RETAIN_SITES,
            self.result_table(),
            field_params(FIELDS, options, false)?,
        ))
    }

    fn describe(&self, options: &OptionSet) -> String {
        format!(
            "Fisher p <= {}, FDR <= {}",
            options.get("pvalue").unwrap_or("?"),
            options.get("fdr").unwrap_or("?")
        )
    }

    fn materialize(&self, ctx: &RunContext<'_>, input: &Handle, options: &OptionSet) -> Result<Handle> {
        let params = self.operation(options)?.params;
        let pvalue = params.float("pvalue")?;
        let fdr = params.float("fdr")?;
        retain_by_script(
            self,
            ctx,
            input,
            options,
            vec![pvalue.to_string(), fdr.to_string()],
            2,
            move |values| values[0] <= pvalue && values[1] <= fdr,
        )
    }
}
