use super::{SCRIPT, retain_by_script, script_gate};
use crate::filters::{
    FieldKind, FieldSpec, OptionSet, ReadinessGate, RunContext, SiteFilter, field_params,
};
use crate::store::{Handle, Operation, OperationParams, ops};
use anyhow::Result;

const FIELDS: &[FieldSpec] = &[
    SCRIPT,
    FieldSpec::new("threshold", FieldKind::Float, "smallest accepted log likelihood ratio")
        .with_default("4.0"),
];

/// Likelihood-ratio test of editing against sequencing error
///
/// The script writes `chrom pos llr` per site.
pub struct LikelihoodRatioFilter;

impl SiteFilter for LikelihoodRatioFilter {
    fn key(&self) -> &'static str {
        "likelihood_ratio"
    }

    fn name(&self) -> &'static str {
        "Likelihood ratio test filter"
    }

    fn result_table(&self) -> &'static str {
        "llrfilter_results"
    }

    fn fields(&self) -> &'static [FieldSpec] {
        FIELDS
    }

    fn gate(&self) -> ReadinessGate {
        script_gate(FIELDS)
    }

    fn operation(&self, options: &OptionSet) -> Result<Operation> {
        let params: OperationParams = field_params(FIELDS, options, false)?;
        Ok(Operation::new(ops::RETAIN_SITES, self.result_table(), params))
    }

    fn describe(&self, options: &OptionSet) -> String {
        format!("LLR >= {}", options.get("threshold").unwrap_or("?"))
    }

    fn materialize(&self, ctx: &RunContext<'_>, input: &Handle, options: &OptionSet) -> Result<Handle> {
        let threshold = self.operation(options)?.params.float("threshold")?;
        retain_by_script(
            self,
            ctx,
            input,
            options,
            vec![threshold.to_string()],
            1,
            move |values| values[0] >= threshold,
        )
    }
}
