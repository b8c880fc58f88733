//! Background body of a filter run
//!
//! ```text
//! Started ─▶ materialize ─▶ deduplicate ─▶ stream rows ─▶ attach ─▶ Completed
//!                 │              │             │
//!                 └──────────────┴─────────────┴──▶ Exception / Cancelled
//! ```
//!
//! Whatever happens inside, the run ends with exactly one terminal event, and all
//! collected warnings are delivered right before it.

use super::TaskState;
use super::warnings::WarningLog;
use crate::bus::{Broadcaster, CompletedList, ProgressEvent};
use crate::config::Settings;
use crate::filters::{OptionSet, RunContext, SiteFilter};
use crate::lineage::{LineageTree, ListId};
use crate::store::{Handle, Interrupted, RecordStore};
use anyhow::{Context, Result, anyhow};
use std::cell::RefCell;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How a run ended
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(CompletedList),
    Cancelled,
    Failed { cause: String },
}

impl RunOutcome {
    pub fn state(&self) -> TaskState {
        match self {
            RunOutcome::Completed(_) => TaskState::Completed,
            RunOutcome::Cancelled => TaskState::Cancelled,
            RunOutcome::Failed { .. } => TaskState::Failed,
        }
    }
}

/// Summary handed back to whoever awaits the run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// Members of the input list
    pub input_members: usize,
    /// Rows consumed from the result stream
    pub processed: usize,
    /// Rows in the deduplicated result set
    pub total: usize,
    pub warnings: Vec<String>,
    pub suppressed_warnings: usize,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn completed(&self) -> Option<&CompletedList> {
        match &self.outcome {
            RunOutcome::Completed(list) => Some(list),
            _ => None,
        }
    }
}

/// Handle to a started run
#[derive(Debug)]
pub struct RunHandle {
    join: JoinHandle<RunReport>,
    cancel: CancellationToken,
    state: Arc<Mutex<TaskState>>,
}

impl RunHandle {
    /// Request cooperative cancellation
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> TaskState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the terminal event and collect the report
    pub async fn wait(self) -> Result<RunReport> {
        self.join.await.context("Filter run was aborted")
    }
}

/// Everything the background body owns
pub(super) struct Run {
    pub filter: Arc<dyn SiteFilter>,
    pub input: ListId,
    pub options: OptionSet,
    pub store: Arc<dyn RecordStore>,
    pub lineage: Arc<RwLock<LineageTree>>,
    pub settings: Settings,
    pub bus: Broadcaster,
    pub cancel: CancellationToken,
    pub state: Arc<Mutex<TaskState>>,
}

#[derive(Default)]
struct Counters {
    input: usize,
    processed: usize,
    total: usize,
}

impl Run {
    pub fn spawn(self) -> Result<RunHandle> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| anyhow!("filter runs must be started inside a Tokio runtime"))?;
        let cancel = self.cancel.clone();
        let state = self.state.clone();
        let join = runtime.spawn_blocking(move || self.execute());
        Ok(RunHandle {
            join,
            cancel,
            state,
        })
    }

    fn execute(self) -> RunReport {
        let started = Instant::now();
        tracing::debug!("Starting {} on list {}", self.filter.key(), self.input);
        self.bus.emit_progress(&ProgressEvent::Started);

        let mut warnings = WarningLog::new(self.settings.pipeline.warning_limit);
        let mut counters = Counters::default();
        let mut tables: Vec<Handle> = Vec::new();

        let result = catch_unwind(AssertUnwindSafe(|| {
            self.body(&mut warnings, &mut counters, &mut tables)
        }));

        let outcome = match result {
            Ok(Ok(Some(list))) => RunOutcome::Completed(list),
            Ok(Ok(None)) => RunOutcome::Cancelled,
            Ok(Err(e)) if self.cancel.is_cancelled() || e.is::<Interrupted>() => {
                tracing::debug!("{} interrupted: {:#}", self.filter.key(), e);
                RunOutcome::Cancelled
            }
            Ok(Err(e)) => RunOutcome::Failed {
                cause: format!("{e:#}"),
            },
            Err(panic) => RunOutcome::Failed {
                cause: panic_message(panic.as_ref()),
            },
        };

        self.release_tables(&outcome, &tables);

        let (warnings, suppressed) = warnings.into_parts();
        for cause in &warnings {
            self.bus.emit_progress(&ProgressEvent::Warning {
                cause: cause.clone(),
            });
        }
        if suppressed > 0 {
            tracing::warn!(
                "{} further warnings from {} were suppressed",
                suppressed,
                self.filter.key()
            );
        }

        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = outcome.state();
        let elapsed = started.elapsed();
        match &outcome {
            RunOutcome::Completed(list) => {
                tracing::info!(
                    "{} kept {} of {} input sites as '{}' in {:?}",
                    self.filter.key(),
                    list.member_count,
                    counters.input,
                    list.name,
                    elapsed
                );
                self.bus.emit_progress(&ProgressEvent::Completed {
                    result: list.clone(),
                });
            }
            RunOutcome::Cancelled => {
                tracing::info!(
                    "{} cancelled after {} of {} rows",
                    self.filter.key(),
                    counters.processed,
                    counters.total
                );
                self.bus.emit_progress(&ProgressEvent::Cancelled);
            }
            RunOutcome::Failed { cause } => {
                tracing::error!("{} failed: {}", self.filter.key(), cause);
                self.bus.emit_progress(&ProgressEvent::Exception {
                    cause: cause.clone(),
                });
            }
        }

        RunReport {
            outcome,
            input_members: counters.input,
            processed: counters.processed,
            total: counters.total,
            warnings,
            suppressed_warnings: suppressed,
            elapsed,
        }
    }

    /// Materialize, deduplicate, count and attach; `Ok(None)` means the run noticed cancellation
    fn body(
        &self,
        warnings: &mut WarningLog,
        counters: &mut Counters,
        tables: &mut Vec<Handle>,
    ) -> Result<Option<CompletedList>> {
        let (input_name, backing) = {
            let lineage = self
                .lineage
                .read()
                .map_err(|_| anyhow!("lineage lock poisoned"))?;
            let list = lineage.list(self.input)?;
            counters.input = list.member_count;
            (list.name.clone(), list.backing.clone())
        };

        let input = self
            .store
            .select_working_set(&backing)
            .with_context(|| format!("Failed to open working set {backing}"))?;
        for malformed in self.store.malformed_rows(&input)? {
            warnings.push(malformed.to_string());
        }

        let ctx = RunContext {
            store: self.store.as_ref(),
            cancel: &self.cancel,
            stats: &self.settings.stats,
            warnings: RefCell::new(&mut *warnings),
        };
        let materialized = self
            .filter
            .materialize(&ctx, &input, &self.options)
            .with_context(|| format!("{} failed on {}", self.filter.name(), input.table))?;
        tables.push(materialized.clone());

        let result = self.store.deduplicate(&materialized, &self.cancel)?;
        if result.table != materialized.table {
            tables.push(result.clone());
        }

        counters.total = result.rows;
        let step = result.rows / self.settings.pipeline.progress_buckets.max(1) + 1;
        let mut members = 0;

        for row in self.store.stream_rows(&result)? {
            if self.cancel.is_cancelled() {
                return Ok(None);
            }
            counters.processed += 1;
            match row {
                Ok(_) => members += 1,
                Err(malformed) => warnings.push(malformed.to_string()),
            }
            if counters.processed % step == 0 {
                self.bus.emit_progress(&ProgressEvent::Updated {
                    message: format!("{}: {} rows", self.filter.name(), counters.processed),
                    current: counters.processed,
                    total: counters.total.max(counters.processed),
                });
            }
        }

        let name = self.filter.output_name(&input_name);
        let description = self.filter.describe(&self.options);
        let id = self
            .lineage
            .write()
            .map_err(|_| anyhow!("lineage lock poisoned"))?
            .create_child(self.input, &name, &description, &result.table, members)?;

        Ok(Some(CompletedList {
            id,
            parent: self.input,
            name,
            member_count: members,
            backing: result,
        }))
    }

    /// Drop every table the run created that no list refers to
    fn release_tables(&self, outcome: &RunOutcome, tables: &[Handle]) {
        let keep = match outcome {
            RunOutcome::Completed(list) => Some(list.backing.table.as_str()),
            _ => None,
        };
        for table in tables.iter().filter(|t| Some(t.table.as_str()) != keep) {
            if let Err(e) = self.store.drop_result(table) {
                tracing::warn!("Failed to drop result table {}: {:#}", table.table, e);
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown cause".to_string());
    format!("filter run panicked: {detail}")
}
