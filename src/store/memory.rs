//! In-memory record store
//!
//! Reference implementation of [`RecordStore`] that keeps every table in process
//! memory. Operations are evaluated in parallel with rayon and honour the run's
//! cancellation token between rows.

use super::record::{MalformedRow, Record, Row, SiteKey};
use super::{Handle, Interrupted, Operation, RecordStore, RowStream, ops};
use anyhow::{Context, Result, anyhow, bail};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;

/// How often sequential passes poll the cancellation token
const CANCEL_POLL_ROWS: usize = 4096;

/// Reference data a filter compares sites against
#[derive(Debug, Clone)]
pub enum Annotation {
    /// Known variant positions (e.g. dbSNP)
    KnownSites(HashSet<SiteKey>),
    /// Merged, sorted 0-based half-open intervals per chromosome (e.g. RepeatMasker)
    Regions(HashMap<String, Vec<(u64, u64)>>),
    /// Sorted junction positions per chromosome
    Junctions(HashMap<String, Vec<u64>>),
}

impl Annotation {
    pub fn known_sites<I: IntoIterator<Item = SiteKey>>(sites: I) -> Self {
        Annotation::KnownSites(sites.into_iter().collect())
    }

    /// Build a region annotation; overlapping or touching intervals are merged
    pub fn regions<I, S>(intervals: I) -> Self
    where
        I: IntoIterator<Item = (S, u64, u64)>,
        S: Into<String>,
    {
        let mut by_chrom: HashMap<String, Vec<(u64, u64)>> = HashMap::new();
        for (chrom, start, end) in intervals {
            if end > start {
                by_chrom.entry(chrom.into()).or_default().push((start, end));
            }
        }
        for intervals in by_chrom.values_mut() {
            intervals.sort_unstable();
            let mut merged: Vec<(u64, u64)> = Vec::with_capacity(intervals.len());
            for &(start, end) in intervals.iter() {
                match merged.last_mut() {
                    Some(last) if start <= last.1 => last.1 = last.1.max(end),
                    _ => merged.push((start, end)),
                }
            }
            *intervals = merged;
        }
        Annotation::Regions(by_chrom)
    }

    pub fn junctions<I: IntoIterator<Item = SiteKey>>(sites: I) -> Self {
        let mut by_chrom: HashMap<String, Vec<u64>> = HashMap::new();
        for site in sites {
            by_chrom.entry(site.chrom).or_default().push(site.position);
        }
        for positions in by_chrom.values_mut() {
            positions.sort_unstable();
            positions.dedup();
        }
        Annotation::Junctions(by_chrom)
    }

    pub fn len(&self) -> usize {
        match self {
            Annotation::KnownSites(sites) => sites.len(),
            Annotation::Regions(map) => map.values().map(Vec::len).sum(),
            Annotation::Junctions(map) => map.values().map(Vec::len).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn kind(&self) -> &'static str {
        match self {
            Annotation::KnownSites(_) => "known sites",
            Annotation::Regions(_) => "regions",
            Annotation::Junctions(_) => "junctions",
        }
    }

    /// Whether a 1-based position falls inside a region
    fn covers(&self, chrom: &str, position: u64) -> bool {
        let Annotation::Regions(map) = self else {
            return false;
        };
        let Some(intervals) = map.get(chrom) else {
            return false;
        };
        // 0-based [start, end) covers 1-based p when start < p <= end
        let idx = intervals.partition_point(|&(start, _)| start < position);
        idx > 0 && position <= intervals[idx - 1].1
    }

    fn within(&self, chrom: &str, position: u64, edge: u64) -> bool {
        let Annotation::Junctions(map) = self else {
            return false;
        };
        let Some(positions) = map.get(chrom) else {
            return false;
        };
        let lower = position.saturating_sub(edge);
        let idx = positions.partition_point(|&p| p < lower);
        positions
            .get(idx)
            .is_some_and(|&p| p <= position.saturating_add(edge))
    }
}

#[derive(Debug, Clone)]
enum Table {
    Records(Arc<Vec<Row>>),
    Annotation(Arc<Annotation>),
}

type Predicate = Box<dyn Fn(&Record) -> bool + Send + Sync>;

/// Record store backed by process memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Table>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a record table, replacing any table with the same name
    pub fn insert_records(&self, name: &str, rows: Vec<Row>) -> Result<Handle> {
        let handle = Handle::new(name, rows.len());
        self.write()?
            .insert(name.to_string(), Table::Records(Arc::new(rows)));
        tracing::debug!("Registered record table {}", handle);
        Ok(handle)
    }

    /// Register an annotation table, replacing any table with the same name
    pub fn insert_annotation(&self, name: &str, annotation: Annotation) -> Result<()> {
        tracing::debug!(
            "Registered {} table {} ({} entries)",
            annotation.kind(),
            name,
            annotation.len()
        );
        self.write()?
            .insert(name.to_string(), Table::Annotation(Arc::new(annotation)));
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables
            .read()
            .map(|tables| tables.contains_key(name))
            .unwrap_or(false)
    }

    /// Sorted table names
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tables
            .read()
            .map(|tables| tables.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, Table>>> {
        self.tables
            .write()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }

    fn table(&self, name: &str) -> Result<Table> {
        let tables = self
            .tables
            .read()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        tables
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("no such table: {name}"))
    }

    fn records(&self, name: &str) -> Result<Arc<Vec<Row>>> {
        match self.table(name)? {
            Table::Records(rows) => Ok(rows),
            Table::Annotation(a) => bail!("table {name} holds {}, not records", a.kind()),
        }
    }

    fn annotations(&self, operation: &Operation) -> Result<Vec<Arc<Annotation>>> {
        let sources = operation.params.tables("sources")?;
        if sources.is_empty() {
            bail!("operation {} needs at least one source table", operation.name);
        }
        sources
            .iter()
            .map(|name| match self.table(name)? {
                Table::Annotation(a) => Ok(a),
                Table::Records(_) => bail!("table {name} holds records, not annotations"),
            })
            .collect()
    }

    fn predicate(&self, operation: &Operation) -> Result<Predicate> {
        let params = &operation.params;
        let predicate: Predicate = match operation.name.as_str() {
            ops::QUALITY_DEPTH => {
                let quality = params.float("quality")?;
                let depth = params.integer("depth")?;
                Box::new(move |r: &Record| r.quality >= quality && i64::from(r.depth) >= depth)
            }
            ops::EDITING_TYPE => {
                let reference = params.base("reference")?;
                let alternate = params.base("alternate")?;
                Box::new(move |r: &Record| r.reference == reference && r.alternate == alternate)
            }
            ops::KNOWN_SNP => {
                let sources = self.annotations(operation)?;
                for source in &sources {
                    if !matches!(source.as_ref(), Annotation::KnownSites(_)) {
                        bail!("known SNP filter needs known-site tables, got {}", source.kind());
                    }
                }
                Box::new(move |r: &Record| {
                    let key = r.key();
                    !sources.iter().any(|source| match source.as_ref() {
                        Annotation::KnownSites(sites) => sites.contains(&key),
                        _ => false,
                    })
                })
            }
            ops::REPEAT_REGION => {
                let sources = self.annotations(operation)?;
                for source in &sources {
                    if !matches!(source.as_ref(), Annotation::Regions(_)) {
                        bail!("repeat filter needs region tables, got {}", source.kind());
                    }
                }
                Box::new(move |r: &Record| {
                    !sources.iter().any(|s| s.covers(&r.chrom, r.position))
                })
            }
            ops::SPLICE_JUNCTION => {
                let sources = self.annotations(operation)?;
                for source in &sources {
                    if !matches!(source.as_ref(), Annotation::Junctions(_)) {
                        bail!("splice filter needs junction tables, got {}", source.kind());
                    }
                }
                let edge = u64::try_from(params.integer("edge")?)
                    .context("splice junction edge must not be negative")?;
                Box::new(move |r: &Record| {
                    !sources.iter().any(|s| s.within(&r.chrom, r.position, edge))
                })
            }
            ops::DNA_RNA => {
                let max_alt = params.integer("max_dna_alt")?;
                let mut dna: HashMap<SiteKey, u32> = HashMap::new();
                for name in params.tables("sources")? {
                    for row in self.records(name)?.iter().flatten() {
                        dna.entry(row.key()).or_insert(row.alt_count);
                    }
                }
                Box::new(move |r: &Record| {
                    dna.get(&r.key())
                        .is_some_and(|&alt| i64::from(alt) <= max_alt)
                })
            }
            ops::RETAIN_SITES => {
                let keep: HashSet<SiteKey> = params.sites("sites")?.iter().cloned().collect();
                Box::new(move |r: &Record| keep.contains(&r.key()))
            }
            other => bail!("unsupported operation: {other}"),
        };
        Ok(predicate)
    }

    fn unique_table_name(prefix: &str) -> String {
        let id = uuid::Uuid::new_v4().simple().to_string();
        format!("{}_{}", prefix, &id[..8])
    }
}

impl RecordStore for MemoryStore {
    fn select_working_set(&self, name: &str) -> Result<Handle> {
        let rows = self.records(name)?;
        Ok(Handle::new(name, rows.len()))
    }

    fn run_filter_operation(
        &self,
        input: &Handle,
        operation: &Operation,
        cancel: &CancellationToken,
    ) -> Result<Handle> {
        let rows = self.records(&input.table)?;
        let predicate = self
            .predicate(operation)
            .with_context(|| format!("Failed to prepare operation {}", operation.name))?;

        tracing::trace!(
            "Evaluating {} over {} rows of {}",
            operation.name,
            rows.len(),
            input.table
        );

        // Malformed rows stay behind; runs report them through `malformed_rows`
        let matched: Vec<Row> = rows
            .par_iter()
            .filter(|row| {
                !cancel.is_cancelled()
                    && match row {
                        Ok(record) => predicate(record),
                        Err(_) => false,
                    }
            })
            .cloned()
            .collect();

        if cancel.is_cancelled() {
            return Err(Interrupted.into());
        }

        let name = Self::unique_table_name(&operation.result_table);
        self.insert_records(&name, matched)
    }

    fn deduplicate(&self, result: &Handle, cancel: &CancellationToken) -> Result<Handle> {
        let rows = self.records(&result.table)?;
        let mut seen: HashSet<SiteKey> = HashSet::with_capacity(rows.len());
        let mut unique: Vec<Row> = Vec::with_capacity(rows.len());
        let mut duplicates = 0usize;

        for (index, row) in rows.iter().enumerate() {
            if index % CANCEL_POLL_ROWS == 0 && cancel.is_cancelled() {
                return Err(Interrupted.into());
            }
            match row {
                Ok(record) if !seen.insert(record.key()) => duplicates += 1,
                _ => unique.push(row.clone()),
            }
        }

        if duplicates == 0 {
            return Ok(Handle::new(result.table.clone(), rows.len()));
        }

        tracing::debug!("Removed {} duplicate rows from {}", duplicates, result.table);
        self.insert_records(&format!("{}_dedup", result.table), unique)
    }

    fn stream_rows(&self, result: &Handle) -> Result<RowStream> {
        let rows = self.records(&result.table)?;
        let len = rows.len();
        Ok(Box::new((0..len).map(move |i| rows[i].clone())))
    }

    fn malformed_rows(&self, table: &Handle) -> Result<Vec<MalformedRow>> {
        let rows = self.records(&table.table)?;
        Ok(rows.iter().filter_map(|row| row.as_ref().err().cloned()).collect())
    }

    fn drop_result(&self, result: &Handle) -> Result<()> {
        if self.write()?.remove(&result.table).is_none() {
            tracing::debug!("Table {} was already gone", result.table);
        }
        Ok(())
    }
}
