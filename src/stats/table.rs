//! Tab-separated exchange files for statistics scripts

use crate::store::{Record, SiteKey};
use anyhow::{Context, Result};
use std::path::Path;

/// One line of script output: a site and the statistics computed for it
#[derive(Debug, Clone, PartialEq)]
pub struct SiteStatistic {
    pub site: SiteKey,
    pub values: Vec<f64>,
}

/// Write records as `chrom pos ref alt quality depth ref_count alt_count`
pub fn write_records<'a, I>(path: &Path, records: I) -> Result<usize>
where
    I: IntoIterator<Item = &'a Record>,
{
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    let mut written = 0;
    for record in records {
        writer.write_record([
            record.chrom.clone(),
            record.position.to_string(),
            record.reference.to_string(),
            record.alternate.to_string(),
            record.quality.to_string(),
            record.depth.to_string(),
            record.ref_count.to_string(),
            record.alt_count.to_string(),
        ])?;
        written += 1;
    }
    writer.flush()?;
    Ok(written)
}

/// Parsed script output
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statistics {
    pub sites: Vec<SiteStatistic>,
    /// Sites whose values did not parse (e.g. `NA`), one message each
    pub skipped: Vec<String>,
}

/// Read `chrom pos value...` lines, requiring at least `columns` values per site
///
/// A line with too few columns or a bad position means the script is broken and
/// fails the read. A site whose values do not parse is only skipped.
pub fn read_statistics(path: &Path, columns: usize) -> Result<Statistics> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .comment(Some(b'#'))
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open statistics output {}", path.display()))?;

    let mut statistics = Statistics::default();
    for (index, result) in reader.records().enumerate() {
        let line = index + 1;
        let record = result.with_context(|| format!("{}:{line}", path.display()))?;
        if record.len() < columns + 2 {
            anyhow::bail!(
                "{}:{line}: expected chrom, pos and {columns} value(s), got {} column(s)",
                path.display(),
                record.len()
            );
        }
        let position: u64 = record[1]
            .parse()
            .with_context(|| format!("{}:{line}: invalid position '{}'", path.display(), &record[1]))?;
        let site = SiteKey::new(&record[0], position);

        let values: Result<Vec<f64>, &str> = record
            .iter()
            .skip(2)
            .take(columns)
            .map(|v| v.parse::<f64>().map_err(|_| v))
            .collect();
        match values {
            Ok(values) => statistics.sites.push(SiteStatistic { site, values }),
            Err(value) => statistics.skipped.push(format!(
                "{}:{line}: skipped {site} with non-numeric statistic '{value}'",
                path.display()
            )),
        }
    }
    Ok(statistics)
}
