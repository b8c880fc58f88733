//! Tab-separated loaders for site tables and annotations
//!
//! Site files carry one candidate per line:
//! `chrom  pos  ref  alt  quality  depth  [ref_count  alt_count]`.
//! Lines that do not parse are kept as [`MalformedRow`]s so the run that
//! streams them can report each one as a warning.

use super::memory::Annotation;
use super::record::{Base, MalformedRow, Record, Row, SiteKey};
use anyhow::{Context, Result, anyhow};
use std::io::Read;
use std::path::Path;

fn tsv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .comment(Some(b'#'))
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader)
}

fn field<'a>(record: &'a csv::StringRecord, index: usize, name: &str) -> Result<&'a str, String> {
    record
        .get(index)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| format!("missing {name} column"))
}

fn parse_number<T: std::str::FromStr>(value: &str, name: &str) -> Result<T, String> {
    value
        .parse::<T>()
        .map_err(|_| format!("{name} '{value}' is not a valid number"))
}

fn parse_site(record: &csv::StringRecord) -> Result<Record, String> {
    let chrom = field(record, 0, "chrom")?;
    let position: u64 = parse_number(field(record, 1, "pos")?, "pos")?;
    if position == 0 {
        return Err("pos must be 1-based".to_string());
    }
    let reference: Base = field(record, 2, "ref")?.parse()?;
    let alternate: Base = field(record, 3, "alt")?.parse()?;
    let quality: f64 = parse_number(field(record, 4, "quality")?, "quality")?;
    let depth: u32 = parse_number(field(record, 5, "depth")?, "depth")?;

    let mut site = Record::new(chrom, position, reference, alternate).with_quality(quality, depth);
    if record.len() >= 8 {
        let ref_count = parse_number(field(record, 6, "ref_count")?, "ref_count")?;
        let alt_count = parse_number(field(record, 7, "alt_count")?, "alt_count")?;
        site = site.with_counts(ref_count, alt_count);
    }
    Ok(site)
}

/// Parse site rows from any reader; `origin` prefixes row locations
pub fn parse_sites<R: Read>(reader: R, origin: &str) -> Vec<Row> {
    let mut rows = Vec::new();
    for (index, result) in tsv_reader(reader).records().enumerate() {
        let row = match result {
            Ok(record) => {
                let line = record
                    .position()
                    .map(|p| p.line())
                    .unwrap_or(index as u64 + 1);
                parse_site(&record).map_err(|reason| MalformedRow {
                    origin: format!("{origin}:{line}"),
                    reason,
                })
            }
            Err(e) => Err(MalformedRow {
                origin: format!("{origin}:{}", e.position().map(|p| p.line()).unwrap_or(0)),
                reason: e.to_string(),
            }),
        };
        rows.push(row);
    }
    rows
}

/// Load a site file
pub fn read_sites(path: &Path) -> Result<Vec<Row>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open site file: {}", path.display()))?;
    let rows = parse_sites(file, &path.display().to_string());
    tracing::debug!("Read {} site rows from {}", rows.len(), path.display());
    Ok(rows)
}

fn strict_records<R: Read>(reader: R, origin: &str) -> Result<Vec<csv::StringRecord>> {
    tsv_reader(reader)
        .records()
        .map(|r| r.with_context(|| format!("Failed to read {origin}")))
        .collect()
}

fn parse_positions<R: Read>(reader: R, origin: &str) -> Result<Vec<SiteKey>> {
    strict_records(reader, origin)?
        .iter()
        .map(|record| -> Result<SiteKey> {
            let chrom = field(record, 0, "chrom").map_err(|e| anyhow!(e))?;
            let position: u64 = parse_number(field(record, 1, "pos").map_err(|e| anyhow!(e))?, "pos")
                .map_err(|e| anyhow!(e))?;
            Ok(SiteKey::new(chrom, position))
        })
        .collect::<Result<Vec<_>>>()
        .with_context(|| format!("Invalid position list: {origin}"))
}

/// Parse a known-site list (`chrom  pos`)
pub fn parse_known_sites<R: Read>(reader: R, origin: &str) -> Result<Annotation> {
    Ok(Annotation::known_sites(parse_positions(reader, origin)?))
}

/// Parse junction positions (`chrom  pos`)
pub fn parse_junctions<R: Read>(reader: R, origin: &str) -> Result<Annotation> {
    Ok(Annotation::junctions(parse_positions(reader, origin)?))
}

/// Parse BED intervals (`chrom  start  end`, 0-based half-open)
pub fn parse_regions<R: Read>(reader: R, origin: &str) -> Result<Annotation> {
    let intervals = strict_records(reader, origin)?
        .iter()
        .map(|record| -> Result<(String, u64, u64)> {
            let chrom = field(record, 0, "chrom").map_err(|e| anyhow!(e))?.to_string();
            let start: u64 = parse_number(field(record, 1, "start").map_err(|e| anyhow!(e))?, "start")
                .map_err(|e| anyhow!(e))?;
            let end: u64 = parse_number(field(record, 2, "end").map_err(|e| anyhow!(e))?, "end")
                .map_err(|e| anyhow!(e))?;
            Ok((chrom, start, end))
        })
        .collect::<Result<Vec<_>>>()
        .with_context(|| format!("Invalid BED file: {origin}"))?;
    Ok(Annotation::regions(intervals))
}

fn open(path: &Path) -> Result<std::fs::File> {
    std::fs::File::open(path).with_context(|| format!("Failed to open {}", path.display()))
}

pub fn read_known_sites(path: &Path) -> Result<Annotation> {
    parse_known_sites(open(path)?, &path.display().to_string())
}

pub fn read_junctions(path: &Path) -> Result<Annotation> {
    parse_junctions(open(path)?, &path.display().to_string())
}

pub fn read_regions(path: &Path) -> Result<Annotation> {
    parse_regions(open(path)?, &path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sites_keeps_malformed_rows() {
        let input = "# chrom\tpos\tref\talt\tqual\tdepth\n\
                     chr1\t100\tA\tG\t30.5\t12\n\
                     chr1\t101\tA\tX\t30\t12\n\
                     chr2\t5\tT\tC\t18\t7\t4\t3\n";
        let rows = parse_sites(input.as_bytes(), "sites.tsv");

        assert_eq!(rows.len(), 3);
        let first = rows[0].as_ref().unwrap();
        assert_eq!(first.position, 100);
        assert_eq!(first.quality, 30.5);

        let bad = rows[1].as_ref().unwrap_err();
        assert!(bad.origin.starts_with("sites.tsv:"));
        assert!(bad.reason.contains("nucleotide"));

        let counted = rows[2].as_ref().unwrap();
        assert_eq!((counted.ref_count, counted.alt_count), (4, 3));
    }

    #[test]
    fn test_parse_regions_rejects_bad_lines() {
        assert!(parse_regions("chr1\t10\t20\n".as_bytes(), "ok.bed").is_ok());
        assert!(parse_regions("chr1\tten\t20\n".as_bytes(), "bad.bed").is_err());
    }

    #[test]
    fn test_parse_known_sites() {
        let annotation = parse_known_sites("chr1\t10\nchr1\t10\nchrX\t99\n".as_bytes(), "snp").unwrap();
        assert_eq!(annotation.len(), 2);
    }
}
