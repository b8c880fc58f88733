//! Typed site records streamed out of a record store

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A nucleotide as reported in a variant call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Base {
    A,
    C,
    G,
    T,
    N,
}

impl FromStr for Base {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "A" | "a" => Ok(Base::A),
            "C" | "c" => Ok(Base::C),
            "G" | "g" => Ok(Base::G),
            "T" | "t" => Ok(Base::T),
            "N" | "n" => Ok(Base::N),
            other => Err(format!("'{other}' is not a nucleotide (expected A, C, G, T or N)")),
        }
    }
}

impl fmt::Display for Base {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Base::A => "A",
            Base::C => "C",
            Base::G => "G",
            Base::T => "T",
            Base::N => "N",
        };
        f.write_str(symbol)
    }
}

/// Genomic coordinate of a site (1-based position)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SiteKey {
    pub chrom: String,
    pub position: u64,
}

impl SiteKey {
    pub fn new(chrom: impl Into<String>, position: u64) -> Self {
        Self {
            chrom: chrom.into(),
            position,
        }
    }
}

impl fmt::Display for SiteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chrom, self.position)
    }
}

/// A single candidate site
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub chrom: String,
    pub position: u64,
    pub reference: Base,
    pub alternate: Base,
    pub quality: f64,
    pub depth: u32,
    /// Reads supporting the reference base
    #[serde(default)]
    pub ref_count: u32,
    /// Reads supporting the alternate base
    #[serde(default)]
    pub alt_count: u32,
    /// Filter-specific auxiliary values
    #[serde(default)]
    pub aux: BTreeMap<String, f64>,
}

impl Record {
    pub fn new(chrom: impl Into<String>, position: u64, reference: Base, alternate: Base) -> Self {
        Self {
            chrom: chrom.into(),
            position,
            reference,
            alternate,
            quality: 0.0,
            depth: 0,
            ref_count: 0,
            alt_count: 0,
            aux: BTreeMap::new(),
        }
    }

    pub fn with_quality(mut self, quality: f64, depth: u32) -> Self {
        self.quality = quality;
        self.depth = depth;
        self
    }

    pub fn with_counts(mut self, ref_count: u32, alt_count: u32) -> Self {
        self.ref_count = ref_count;
        self.alt_count = alt_count;
        self
    }

    pub fn key(&self) -> SiteKey {
        SiteKey::new(self.chrom.clone(), self.position)
    }
}

/// A row the store could not turn into a [`Record`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MalformedRow {
    /// Where the row came from (file line, table row index)
    pub origin: String,
    pub reason: String,
}

impl fmt::Display for MalformedRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed row at {}: {}", self.origin, self.reason)
    }
}

/// One item of a row stream
pub type Row = std::result::Result<Record, MalformedRow>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_parsing() {
        assert_eq!("A".parse::<Base>().unwrap(), Base::A);
        assert_eq!(" g ".parse::<Base>().unwrap(), Base::G);
        assert!("R".parse::<Base>().is_err());
        assert!("".parse::<Base>().is_err());
    }

    #[test]
    fn test_record_key() {
        let record = Record::new("chr1", 1042, Base::A, Base::G).with_quality(30.0, 12);
        assert_eq!(record.key(), SiteKey::new("chr1", 1042));
        assert_eq!(record.key().to_string(), "chr1:1042");
    }
}
