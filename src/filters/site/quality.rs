use crate::filters::{FieldKind, FieldSpec, OptionSet, SiteFilter, field_params};
use crate::store::{Operation, ops};
use anyhow::Result;

const FIELDS: &[FieldSpec] = &[
    FieldSpec::new("quality", FieldKind::Float, "minimum call quality").with_default("20"),
    FieldSpec::new("depth", FieldKind::Integer, "minimum read depth").with_default("6"),
];

/// Keeps sites whose call quality and read depth reach the thresholds
pub struct QualityFilter;

impl SiteFilter for QualityFilter {
    fn key(&self) -> &'static str {
        "quality"
    }

    fn name(&self) -> &'static str {
        "Quality/depth filter"
    }

    fn result_table(&self) -> &'static str {
        "qualityfilter_results"
    }

    fn fields(&self) -> &'static [FieldSpec] {
        FIELDS
    }

    fn operation(&self, options: &OptionSet) -> Result<Operation> {
        Ok(Operation::new(
            ops::QUALITY_DEPTH,
            self.result_table(),
            field_params(FIELDS, options, false)?,
        ))
    }

    fn describe(&self, options: &OptionSet) -> String {
        format!(
            "quality >= {}, depth >= {}",
            options.get("quality").unwrap_or("?"),
            options.get("depth").unwrap_or("?")
        )
    }
}
