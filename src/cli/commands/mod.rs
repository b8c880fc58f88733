//! Command implementations for the sitesieve CLI
//!
//! Each command lives in its own module.

pub mod config;
pub mod filters;
pub mod run;
pub mod tree;
