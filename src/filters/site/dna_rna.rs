use crate::filters::{FieldKind, FieldSpec, OptionSet, SiteFilter, SourceKind, field_params};
use crate::store::{Operation, ops};
use anyhow::Result;

const FIELDS: &[FieldSpec] = &[FieldSpec::new(
    "max_dna_alt",
    FieldKind::Integer,
    "largest alternate read count tolerated in the DNA call",
)
.with_default("0")];

/// Keeps RNA sites whose matched DNA call shows no (or little) alternate allele
pub struct DnaRnaFilter;

impl SiteFilter for DnaRnaFilter {
    fn key(&self) -> &'static str {
        "dna_rna"
    }

    fn name(&self) -> &'static str {
        "DNA-RNA filter"
    }

    fn result_table(&self) -> &'static str {
        "drfilter_results"
    }

    fn fields(&self) -> &'static [FieldSpec] {
        FIELDS
    }

    fn source(&self) -> Option<SourceKind> {
        Some(SourceKind::DnaRecords)
    }

    fn operation(&self, options: &OptionSet) -> Result<Operation> {
        Ok(Operation::new(
            ops::DNA_RNA,
            self.result_table(),
            field_params(FIELDS, options, true)?,
        ))
    }

    fn describe(&self, options: &OptionSet) -> String {
        format!(
            "DNA alt reads <= {} in {}",
            options.get("max_dna_alt").unwrap_or("?"),
            options.sources().join(", ")
        )
    }
}
