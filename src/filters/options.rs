//! Filter option sets
//!
//! Options are edited as text (the way a form or a command line supplies them)
//! and only converted to typed operation parameters once a run is prepared.

use crate::store::{Base, ParamValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Declared type of an option field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Integer,
    Float,
    Text,
    Path,
    Base,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldKind::Integer => "integer",
            FieldKind::Float => "number",
            FieldKind::Text => "text",
            FieldKind::Path => "path",
            FieldKind::Base => "base",
        };
        f.write_str(name)
    }
}

/// Description of one option a filter accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub default: Option<&'static str>,
    pub help: &'static str,
}

impl FieldSpec {
    pub const fn new(name: &'static str, kind: FieldKind, help: &'static str) -> Self {
        Self {
            name,
            kind,
            default: None,
            help,
        }
    }

    pub const fn with_default(mut self, default: &'static str) -> Self {
        self.default = Some(default);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OptionError {
    #[error("option '{0}' is required")]
    Missing(String),

    #[error("option '{field}' expects {kind}, got '{value}'")]
    Invalid {
        field: String,
        kind: FieldKind,
        value: String,
    },

    #[error("option '{field}' must not be negative, got '{value}'")]
    Negative { field: String, value: String },
}

/// Convert raw option text into a typed parameter
pub fn parse_value(field: &FieldSpec, raw: &str) -> Result<ParamValue, OptionError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(OptionError::Missing(field.name.to_string()));
    }
    let invalid = || OptionError::Invalid {
        field: field.name.to_string(),
        kind: field.kind,
        value: value.to_string(),
    };

    match field.kind {
        FieldKind::Integer => {
            let parsed: i64 = value.parse().map_err(|_| invalid())?;
            if parsed < 0 {
                return Err(OptionError::Negative {
                    field: field.name.to_string(),
                    value: value.to_string(),
                });
            }
            Ok(ParamValue::Integer(parsed))
        }
        FieldKind::Float => {
            let parsed: f64 = value.parse().map_err(|_| invalid())?;
            if !parsed.is_finite() {
                return Err(invalid());
            }
            Ok(ParamValue::Float(parsed))
        }
        FieldKind::Base => value.parse::<Base>().map(ParamValue::Base).map_err(|_| invalid()),
        FieldKind::Text | FieldKind::Path => Ok(ParamValue::Text(value.to_string())),
    }
}

/// Current values and selected source tables of one filter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptionSet {
    values: BTreeMap<String, String>,
    sources: Vec<String>,
}

impl OptionSet {
    /// Option set pre-filled with every field default
    pub fn with_defaults(fields: &[FieldSpec]) -> Self {
        let values = fields
            .iter()
            .filter_map(|f| f.default.map(|d| (f.name.to_string(), d.to_string())))
            .collect();
        Self {
            values,
            sources: Vec::new(),
        }
    }

    pub fn set(&mut self, name: &str, value: &str) {
        self.values.insert(name.to_string(), value.to_string());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Select a source table; selecting it twice keeps a single entry
    pub fn select_source(&mut self, table: &str) {
        if !self.sources.iter().any(|s| s == table) {
            self.sources.push(table.to_string());
        }
    }

    pub fn deselect_source(&mut self, table: &str) {
        self.sources.retain(|s| s != table);
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn values(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Typed value of a declared field
    pub fn param(&self, field: &FieldSpec) -> Result<ParamValue, OptionError> {
        parse_value(field, self.get(field.name).unwrap_or(""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEPTH: FieldSpec = FieldSpec::new("depth", FieldKind::Integer, "minimum depth").with_default("6");
    const QUALITY: FieldSpec = FieldSpec::new("quality", FieldKind::Float, "minimum quality");

    #[test]
    fn test_defaults_and_parsing() {
        let mut options = OptionSet::with_defaults(&[DEPTH, QUALITY]);
        assert_eq!(options.param(&DEPTH), Ok(ParamValue::Integer(6)));
        assert_eq!(options.param(&QUALITY), Err(OptionError::Missing("quality".into())));

        options.set("quality", " 20.5 ");
        assert_eq!(options.param(&QUALITY), Ok(ParamValue::Float(20.5)));

        options.set("depth", "-1");
        assert!(matches!(options.param(&DEPTH), Err(OptionError::Negative { .. })));
        options.set("depth", "six");
        assert!(matches!(options.param(&DEPTH), Err(OptionError::Invalid { .. })));
    }

    #[test]
    fn test_base_fields() {
        let field = FieldSpec::new("reference", FieldKind::Base, "reference base");
        assert_eq!(parse_value(&field, "a"), Ok(ParamValue::Base(Base::A)));
        assert!(parse_value(&field, "Z").is_err());
    }

    #[test]
    fn test_sources_are_unique_and_ordered() {
        let mut options = OptionSet::default();
        options.select_source("dbsnp");
        options.select_source("local");
        options.select_source("dbsnp");
        assert_eq!(options.sources(), &["dbsnp", "local"]);
        options.deselect_source("dbsnp");
        assert_eq!(options.sources(), &["local"]);
    }
}
