//! Readiness gate
//!
//! A filter may only start once its option set satisfies every requirement of its
//! gate. Evaluation only reads the option snapshot it is given, so it can run as
//! often as options change and always yields the same answer for the same input.

use super::options::{FieldSpec, OptionSet};

#[derive(Debug, Clone, PartialEq)]
pub enum Requirement {
    /// At least one record-store source table is selected
    SourceSelected,
    /// The field is present and parses as its declared kind
    Field(FieldSpec),
    /// A script path has been entered
    ScriptPath(&'static str),
}

impl Requirement {
    /// `None` when satisfied, otherwise the reason it is not
    pub fn check(&self, options: &OptionSet) -> Option<String> {
        match self {
            Requirement::SourceSelected => options
                .sources()
                .is_empty()
                .then(|| "no source table selected".to_string()),
            Requirement::Field(field) => options.param(field).err().map(|e| e.to_string()),
            Requirement::ScriptPath(name) => options
                .get(name)
                .is_none_or(|path| path.trim().is_empty())
                .then(|| format!("script path '{name}' is not set")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadinessGate {
    requirements: Vec<Requirement>,
}

impl ReadinessGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require(mut self, requirement: Requirement) -> Self {
        self.requirements.push(requirement);
        self
    }

    /// Gate requiring every declared field to parse
    pub fn for_fields(fields: &[FieldSpec]) -> Self {
        fields
            .iter()
            .fold(Self::new(), |gate, field| gate.require(Requirement::Field(*field)))
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    /// Every unmet requirement, in declaration order
    pub fn evaluate(&self, options: &OptionSet) -> Vec<String> {
        self.requirements
            .iter()
            .filter_map(|r| r.check(options))
            .collect()
    }

    pub fn is_ready(&self, options: &OptionSet) -> bool {
        self.requirements.iter().all(|r| r.check(options).is_none())
    }
}
