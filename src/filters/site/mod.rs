//! Filters evaluated entirely by the record store

mod annotation;
mod dna_rna;
mod editing_type;
mod quality;

pub use annotation::{KnownSnpFilter, RepeatRegionFilter, SpliceJunctionFilter};
pub use dna_rna::DnaRnaFilter;
pub use editing_type::EditingTypeFilter;
pub use quality::QualityFilter;
