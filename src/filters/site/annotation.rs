//! Filters that exclude sites found in reference annotations

use crate::filters::{FieldKind, FieldSpec, OptionSet, SiteFilter, SourceKind, field_params};
use crate::store::{Operation, ops};
use anyhow::Result;

/// Drops sites listed in any selected known-variant table
pub struct KnownSnpFilter;

impl SiteFilter for KnownSnpFilter {
    fn key(&self) -> &'static str {
        "known_snp"
    }

    fn name(&self) -> &'static str {
        "Known SNP filter"
    }

    fn result_table(&self) -> &'static str {
        "dbsnpfilter_results"
    }

    fn fields(&self) -> &'static [FieldSpec] {
        &[]
    }

    fn source(&self) -> Option<SourceKind> {
        Some(SourceKind::KnownSites)
    }

    fn operation(&self, options: &OptionSet) -> Result<Operation> {
        Ok(Operation::new(
            ops::KNOWN_SNP,
            self.result_table(),
            field_params(&[], options, true)?,
        ))
    }

    fn describe(&self, options: &OptionSet) -> String {
        format!("not in {}", options.sources().join(", "))
    }
}

/// Drops sites inside repeat regions
pub struct RepeatRegionFilter;

impl SiteFilter for RepeatRegionFilter {
    fn key(&self) -> &'static str {
        "repeat_region"
    }

    fn name(&self) -> &'static str {
        "Repeat region filter"
    }

    fn result_table(&self) -> &'static str {
        "rrfilter_results"
    }

    fn fields(&self) -> &'static [FieldSpec] {
        &[]
    }

    fn source(&self) -> Option<SourceKind> {
        Some(SourceKind::Regions)
    }

    fn operation(&self, options: &OptionSet) -> Result<Operation> {
        Ok(Operation::new(
            ops::REPEAT_REGION,
            self.result_table(),
            field_params(&[], options, true)?,
        ))
    }

    fn describe(&self, options: &OptionSet) -> String {
        format!("outside regions of {}", options.sources().join(", "))
    }
}

const SPLICE_FIELDS: &[FieldSpec] = &[FieldSpec::new(
    "edge",
    FieldKind::Integer,
    "distance in bp from a junction that still counts as near",
)
.with_default("2")];

/// Drops sites close to a splice junction
pub struct SpliceJunctionFilter;

impl SiteFilter for SpliceJunctionFilter {
    fn key(&self) -> &'static str {
        "splice_junction"
    }

    fn name(&self) -> &'static str {
        "Splice junction filter"
    }

    fn result_table(&self) -> &'static str {
        "spfilter_results"
    }

    fn fields(&self) -> &'static [FieldSpec] {
        SPLICE_FIELDS
    }

    fn source(&self) -> Option<SourceKind> {
        Some(SourceKind::Junctions)
    }

    fn operation(&self, options: &OptionSet) -> Result<Operation> {
        Ok(Operation::new(
            ops::SPLICE_JUNCTION,
            self.result_table(),
            field_params(SPLICE_FIELDS, options, true)?,
        ))
    }

    fn describe(&self, options: &OptionSet) -> String {
        format!(
            "more than {} bp from junctions in {}",
            options.get("edge").unwrap_or("?"),
            options.sources().join(", ")
        )
    }
}
