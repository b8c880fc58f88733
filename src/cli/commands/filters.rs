use crate::cli::Output;
use crate::filters::catalog;
use anyhow::Result;

/// List every filter with its options and source tables
pub fn execute(output: &Output) -> Result<()> {
    let filters = catalog();
    output.count("🧬", "Available filters", filters.len());

    for filter in filters {
        output.blank_line();
        output.step(&format!("{} ({})", filter.key(), filter.name()));
        output.table_row("Result table", filter.result_table());
        if let Some(source) = filter.source() {
            output.table_row("Sources", &source.to_string());
        }
        for field in filter.fields() {
            let default = field
                .default
                .map(|d| format!(" [default: {d}]"))
                .unwrap_or_default();
            output.table_row(
                field.name,
                &format!("{} - {}{}", field.kind, field.help, default),
            );
        }
    }
    Ok(())
}
