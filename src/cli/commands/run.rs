//! `sitesieve run`: load tables and chain filters over them

use crate::bus::{ProgressEvent, ProgressListener};
use crate::cli::Output;
use crate::config::SieveConfig;
use crate::lineage::ListKind;
use crate::session::Session;
use crate::store::{MemoryStore, import};
use crate::task::RunOutcome;
use anyhow::{Context, Result, anyhow, bail};
use clap::Args;
use indicatif::ProgressBar;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// Table holding the loaded candidate sites
const SITES_TABLE: &str = "sites";

#[derive(Args)]
pub struct RunArgs {
    /// Candidate sites (chrom pos ref alt quality depth [ref_count alt_count])
    #[arg(long, value_name = "FILE")]
    pub sites: PathBuf,

    /// Known variant positions to load as a source table
    #[arg(long, value_name = "NAME=FILE")]
    pub known: Vec<String>,

    /// BED regions (e.g. repeats) to load as a source table
    #[arg(long, value_name = "NAME=FILE")]
    pub regions: Vec<String>,

    /// Splice junction positions to load as a source table
    #[arg(long, value_name = "NAME=FILE")]
    pub junctions: Vec<String>,

    /// DNA calls in site format to load as a source table
    #[arg(long, value_name = "NAME=FILE")]
    pub dna: Vec<String>,

    /// Filter step, applied in order to the previous step's result
    #[arg(long = "step", value_name = "KEY[:opt=value,...][@source+source]", required = true)]
    pub steps: Vec<StepSpec>,

    /// Save the resulting lineage to this project file (.json, .yaml)
    #[arg(long, value_name = "FILE")]
    pub project: Option<PathBuf>,

    /// Discard lists that come out empty
    #[arg(long)]
    pub drop_empty: bool,

    /// Interpreter for statistical filter scripts
    #[arg(long, value_name = "PROGRAM")]
    pub interpreter: Option<String>,

    /// Maximum number of warnings kept per step
    #[arg(long, value_name = "N")]
    pub warning_limit: Option<usize>,
}

/// One `--step` argument
#[derive(Debug, Clone, PartialEq)]
pub struct StepSpec {
    pub key: String,
    pub options: Vec<(String, String)>,
    pub sources: Vec<String>,
}

impl FromStr for StepSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (head, sources) = match s.split_once('@') {
            Some((head, sources)) => (head, sources),
            None => (s, ""),
        };
        let (key, options) = match head.split_once(':') {
            Some((key, options)) => (key, options),
            None => (head, ""),
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("step '{s}' has no filter key"));
        }

        let options = options
            .split(',')
            .filter(|pair| !pair.trim().is_empty())
            .map(|pair| {
                pair.split_once('=')
                    .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                    .ok_or_else(|| format!("option '{pair}' in step '{s}' is not name=value"))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let sources = sources
            .split('+')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();

        Ok(StepSpec {
            key: key.to_string(),
            options,
            sources,
        })
    }
}

fn parse_named(spec: &str) -> Result<(&str, &Path)> {
    let (name, path) = spec
        .split_once('=')
        .ok_or_else(|| anyhow!("'{spec}' must be NAME=FILE"))?;
    if name.trim().is_empty() {
        bail!("'{spec}' has an empty table name");
    }
    Ok((name.trim(), Path::new(path.trim())))
}

fn load_tables(args: &RunArgs, output: &Output) -> Result<MemoryStore> {
    let store = MemoryStore::new();

    let rows = import::read_sites(&args.sites)?;
    let handle = store.insert_records(SITES_TABLE, rows)?;
    output.verbose(&format!("Loaded {} rows from {}", handle.rows, args.sites.display()));

    for spec in &args.known {
        let (name, path) = parse_named(spec)?;
        store.insert_annotation(name, import::read_known_sites(path)?)?;
    }
    for spec in &args.regions {
        let (name, path) = parse_named(spec)?;
        store.insert_annotation(name, import::read_regions(path)?)?;
    }
    for spec in &args.junctions {
        let (name, path) = parse_named(spec)?;
        store.insert_annotation(name, import::read_junctions(path)?)?;
    }
    for spec in &args.dna {
        let (name, path) = parse_named(spec)?;
        store.insert_records(name, import::read_sites(path)?)?;
    }
    Ok(store)
}

/// Feeds progress events into a terminal progress bar
struct BarListener {
    bar: ProgressBar,
}

impl ProgressListener for BarListener {
    fn on_progress(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Updated { current, total, .. } => {
                self.bar.set_length(*total as u64);
                self.bar.set_position(*current as u64);
            }
            event if event.is_terminal() => self.bar.finish_and_clear(),
            _ => {}
        }
    }
}

pub async fn execute(args: RunArgs, config: Option<&Path>, output: &Output) -> Result<()> {
    let mut config = SieveConfig::load_with_custom_config(config)?;
    if args.drop_empty {
        config = config.with_override("output.drop_empty", true);
    }
    if let Some(interpreter) = &args.interpreter {
        config = config.with_override("stats.interpreter", interpreter);
    }
    if let Some(limit) = args.warning_limit {
        config = config.with_override("pipeline.warning_limit", limit);
    }
    let settings = config.settings()?;

    let store = Arc::new(load_tables(&args, output)?);
    let session = Session::open(store, SITES_TABLE, "All sites", ListKind::Site, settings)?;
    let mut current = session.active()?;

    output.header("🧬 Filtering candidate sites");
    for (index, step) in args.steps.iter().enumerate() {
        let mut task = session
            .task_by_key(&step.key, current)
            .with_context(|| format!("Step {}", index + 1))?;
        for (name, value) in &step.options {
            task.set_option(name, value)?;
        }
        for source in &step.sources {
            task.select_source(source)?;
        }

        let name = task.filter().name();
        let bar = output.progress_bar(name);
        let _progress = task.add_progress_listener(Arc::new(BarListener { bar: bar.clone() }));

        let handle = task.start()?;
        let cancel = handle.cancel_token();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
        let report = handle.wait().await;
        interrupt.abort();
        bar.finish_and_clear();
        let report = report?;

        for warning in &report.warnings {
            output.warning(warning);
        }
        if report.suppressed_warnings > 0 {
            output.warning(&format!(
                "{} more warnings were not shown",
                report.suppressed_warnings
            ));
        }

        match &report.outcome {
            RunOutcome::Completed(list) => {
                output.success(&format!(
                    "{}: kept {} of {} sites ({:.2?})",
                    name, list.member_count, report.input_members, report.elapsed
                ));
                if session.apply_empty_policy(&report)? {
                    output.info("Empty result discarded; stopping");
                    break;
                }
                current = list.id;
                session.set_active(current)?;
            }
            RunOutcome::Cancelled => {
                output.warning(&format!("{name}: cancelled"));
                break;
            }
            RunOutcome::Failed { cause } => {
                bail!("{name} failed: {cause}");
            }
        }
    }

    output.blank_line();
    if !output.is_quiet() {
        print!("{}", session.snapshot()?.render());
    }

    if let Some(path) = &args.project {
        session.save(path)?;
        output.success(&format!("Project saved to {}", path.display()));
    }
    Ok(())
}
