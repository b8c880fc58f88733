use crate::filters::{FieldKind, FieldSpec, OptionSet, SiteFilter, field_params};
use crate::store::{Operation, ops};
use anyhow::Result;

const FIELDS: &[FieldSpec] = &[
    FieldSpec::new("reference", FieldKind::Base, "reference base").with_default("A"),
    FieldSpec::new("alternate", FieldKind::Base, "edited base").with_default("G"),
];

/// Keeps one base substitution type (A-to-I editing reads as A>G by default)
pub struct EditingTypeFilter;

impl SiteFilter for EditingTypeFilter {
    fn key(&self) -> &'static str {
        "editing_type"
    }

    fn name(&self) -> &'static str {
        "Editing type filter"
    }

    fn result_table(&self) -> &'static str {
        "specificfilter_results"
    }

    fn fields(&self) -> &'static [FieldSpec] {
        FIELDS
    }

    fn operation(&self, options: &OptionSet) -> Result<Operation> {
        Ok(Operation::new(
            ops::EDITING_TYPE,
            self.result_table(),
            field_params(FIELDS, options, false)?,
        ))
    }

    fn describe(&self, options: &OptionSet) -> String {
        format!(
            "{}>{} only",
            options.get("reference").unwrap_or("?").to_uppercase(),
            options.get("alternate").unwrap_or("?").to_uppercase()
        )
    }
}
