//! Configuration command implementations

use crate::cli::{ConfigCommands, Output};
use crate::config::SieveConfig;
use anyhow::{Result, bail};
use std::path::Path;

/// Execute config commands
pub fn execute(cmd: ConfigCommands, config: Option<&Path>, output: &Output) -> Result<()> {
    let config = SieveConfig::load_with_custom_config(config)?;
    match cmd {
        ConfigCommands::Show { format } => show(&config, &format),
        ConfigCommands::Validate => validate(&config, output),
    }
}

fn show(config: &SieveConfig, format: &str) -> Result<()> {
    let settings = config.settings()?;
    let rendered = match format {
        "toml" => toml::to_string_pretty(&settings)?,
        "json" => serde_json::to_string_pretty(&settings)?,
        "yaml" | "yml" => serde_yml::to_string(&settings)?,
        other => bail!("Unsupported format '{other}' (use toml, json or yaml)"),
    };
    println!("{}", rendered.trim_end());
    Ok(())
}

fn validate(config: &SieveConfig, output: &Output) -> Result<()> {
    output.header("✅ Validating Configuration");
    match config.settings() {
        Ok(settings) => {
            output.success("Configuration is valid");
            output.table_row(
                "Progress buckets",
                &settings.pipeline.progress_buckets.to_string(),
            );
            output.table_row("Warning limit", &settings.pipeline.warning_limit.to_string());
            output.table_row("Interpreter", &settings.stats.interpreter);
            output.table_row("Drop empty lists", &settings.output.drop_empty.to_string());
            Ok(())
        }
        Err(e) => {
            output.error(&format!("Configuration is invalid: {e:#}"));
            Err(e)
        }
    }
}
