use super::{Settings, smart_load};
use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
};
use std::path::Path;

// Embed the default config at compile time
const DEFAULT_CONFIG: &str = include_str!("../../default-config.toml");

/// Layered configuration: defaults, user, repository, custom file, environment
pub struct SieveConfig {
    figment: Figment,
}

impl SieveConfig {
    pub fn load() -> Result<Self> {
        Self::load_with_custom_config(None)
    }

    pub fn load_with_custom_config(custom_config: Option<&Path>) -> Result<Self> {
        let user = Self::user_config_dir();
        let mut figment = Figment::new()
            .merge(Toml::string(DEFAULT_CONFIG)) // Embedded defaults
            // User config - support multiple formats
            .merge(Toml::file(format!("{user}/config.toml")))
            .merge(Json::file(format!("{user}/config.json")))
            .merge(Yaml::file(format!("{user}/config.yaml")))
            .merge(Yaml::file(format!("{user}/config.yml")))
            // Repository config
            .merge(Toml::file("sitesieve.toml"))
            .merge(Json::file("sitesieve.json"))
            .merge(Yaml::file("sitesieve.yaml"))
            .merge(Yaml::file("sitesieve.yml"));

        if let Some(path) = custom_config {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            figment = figment.merge(smart_load::auto(path));
        }

        // Environment variables sit above every file
        figment = figment.merge(Env::prefixed("SITESIEVE_").split("__"));

        Ok(SieveConfig { figment })
    }

    /// Apply a command-line override on top of every other layer
    pub fn with_override<T: serde::Serialize>(mut self, key: &str, value: T) -> Self {
        self.figment = self.figment.merge(Serialized::default(key, value));
        self
    }

    /// Extract and validate the typed settings
    pub fn settings(&self) -> Result<Settings> {
        let settings: Settings = self
            .figment
            .extract()
            .context("Failed to parse configuration")?;
        settings.validate()?;
        Ok(settings)
    }

    /// Get a nested object/section as JSON
    pub fn get_section(&self, path: &str) -> Result<serde_json::Value> {
        Ok(self.figment.extract_inner(path)?)
    }

    fn user_config_dir() -> String {
        match std::env::var("HOME") {
            Ok(home) => format!("{home}/.config/sitesieve"),
            Err(_) => "~/.config/sitesieve".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_config_loads_defaults() {
        Jail::expect_with(|jail| {
            let home = jail.directory().display().to_string();
            jail.set_env("HOME", home);
            let config = SieveConfig::load().expect("Should load default config");
            let settings = config.settings().expect("defaults are valid");
            assert_eq!(settings, Settings::default());
            assert_eq!(
                config.get_section("stats").unwrap()["interpreter"],
                serde_json::json!("Rscript")
            );
            Ok(())
        });
    }

    #[test]
    fn test_layers_override_in_order() {
        Jail::expect_with(|jail| {
            let home = jail.directory().display().to_string();
            jail.set_env("HOME", home);
            jail.create_file("sitesieve.toml", "[pipeline]\nwarning_limit = 10\nprogress_buckets = 7")?;
            jail.create_file("custom.yaml", "pipeline:\n  progress_buckets: 20\n")?;
            jail.set_env("SITESIEVE_STATS__POLL_INTERVAL_MS", "5");

            let config = SieveConfig::load_with_custom_config(Some(Path::new("custom.yaml")))
                .unwrap()
                .with_override("stats.interpreter", "Rscript-4.3");
            let settings = config.settings().unwrap();

            assert_eq!(settings.pipeline.warning_limit, 10);
            assert_eq!(settings.pipeline.progress_buckets, 20);
            assert_eq!(settings.stats.poll_interval_ms, 5);
            assert_eq!(settings.stats.interpreter, "Rscript-4.3");
            Ok(())
        });
    }

    #[test]
    fn test_invalid_layer_fails_validation() {
        Jail::expect_with(|jail| {
            let home = jail.directory().display().to_string();
            jail.set_env("HOME", home);
            jail.set_env("SITESIEVE_PIPELINE__PROGRESS_BUCKETS", "0");
            let config = SieveConfig::load().unwrap();
            assert!(config.settings().is_err());
            Ok(())
        });
    }

    #[test]
    fn test_missing_custom_config_is_an_error() {
        Jail::expect_with(|jail| {
            let home = jail.directory().display().to_string();
            jail.set_env("HOME", home);
            assert!(SieveConfig::load_with_custom_config(Some(Path::new("missing.toml"))).is_err());
            Ok(())
        });
    }
}
