//! Filter task lifecycle
//!
//! A [`FilterTask`] is one configured, runnable instance of a filter over an
//! explicit input list. It moves through
//!
//! ```text
//! NotReady <──▶ Ready ──start──▶ Running ──▶ Completed | Cancelled | Failed
//! ```
//!
//! and cannot be reused once started.

mod run;
mod warnings;

pub use run::{RunHandle, RunOutcome, RunReport};
pub use warnings::WarningLog;

use crate::bus::{Broadcaster, OptionsListener, ProgressListener, Subscription};
use crate::config::Settings;
use crate::filters::{OptionSet, ReadinessGate, SiteFilter};
use crate::lineage::{LineageTree, ListId};
use crate::store::RecordStore;
use run::Run;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    NotReady,
    Ready,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Cancelled | TaskState::Failed
        )
    }

    /// Options may only change before the run starts
    pub fn is_configurable(self) -> bool {
        matches!(self, TaskState::NotReady | TaskState::Ready)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::NotReady => "not ready",
            TaskState::Ready => "ready",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Cancelled => "cancelled",
            TaskState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("filter is not ready: {}", .0.join("; "))]
    NotReady(Vec<String>),

    #[error("filter task was already started (state: {0})")]
    AlreadyStarted(TaskState),

    #[error("options cannot change once the task is {0}")]
    OptionsLocked(TaskState),

    #[error("filter '{filter}' has no option '{option}'")]
    UnknownOption { filter: String, option: String },

    #[error("failed to start filter run: {0}")]
    Spawn(String),
}

/// One configured run of a filter over an explicit input list
pub struct FilterTask {
    filter: Arc<dyn SiteFilter>,
    gate: ReadinessGate,
    input: ListId,
    options: OptionSet,
    store: Arc<dyn RecordStore>,
    lineage: Arc<RwLock<LineageTree>>,
    settings: Settings,
    bus: Broadcaster,
    cancel: CancellationToken,
    state: Arc<Mutex<TaskState>>,
}

impl FilterTask {
    pub fn new(
        filter: Arc<dyn SiteFilter>,
        input: ListId,
        store: Arc<dyn RecordStore>,
        lineage: Arc<RwLock<LineageTree>>,
        settings: Settings,
    ) -> Self {
        let gate = filter.gate();
        let options = filter.default_options();
        let state = if gate.is_ready(&options) {
            TaskState::Ready
        } else {
            TaskState::NotReady
        };
        Self {
            filter,
            gate,
            input,
            options,
            store,
            lineage,
            settings,
            bus: Broadcaster::new(),
            cancel: CancellationToken::new(),
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn filter(&self) -> &Arc<dyn SiteFilter> {
        &self.filter
    }

    pub fn input(&self) -> ListId {
        self.input
    }

    pub fn options(&self) -> &OptionSet {
        &self.options
    }

    pub fn state(&self) -> TaskState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_ready(&self) -> bool {
        self.gate.is_ready(&self.options)
    }

    /// Reasons the task cannot start yet
    pub fn unmet_requirements(&self) -> Vec<String> {
        self.gate.evaluate(&self.options)
    }

    /// Token shared with the run; cancelling it before start makes the run stop at once
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn add_progress_listener(&self, listener: Arc<dyn ProgressListener>) -> Subscription {
        self.bus.add_progress_listener(listener)
    }

    pub fn add_options_listener(&self, listener: Arc<dyn OptionsListener>) -> Subscription {
        self.bus.add_options_listener(listener)
    }

    /// Set an option value; returns the re-evaluated readiness
    pub fn set_option(&mut self, name: &str, value: &str) -> Result<bool, TaskError> {
        if !self.filter.fields().iter().any(|f| f.name == name) {
            return Err(TaskError::UnknownOption {
                filter: self.filter.key().to_string(),
                option: name.to_string(),
            });
        }
        self.edit(|options| options.set(name, value))
    }

    pub fn select_source(&mut self, table: &str) -> Result<bool, TaskError> {
        self.edit(|options| options.select_source(table))
    }

    pub fn deselect_source(&mut self, table: &str) -> Result<bool, TaskError> {
        self.edit(|options| options.deselect_source(table))
    }

    fn edit(&mut self, change: impl FnOnce(&mut OptionSet)) -> Result<bool, TaskError> {
        let ready = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if !state.is_configurable() {
                return Err(TaskError::OptionsLocked(*state));
            }
            change(&mut self.options);
            let ready = self.gate.is_ready(&self.options);
            *state = if ready {
                TaskState::Ready
            } else {
                TaskState::NotReady
            };
            ready
        };
        tracing::trace!("Options of {} changed; ready = {}", self.filter.key(), ready);
        self.bus.emit_options(ready);
        Ok(ready)
    }

    /// Start the run on a blocking worker of the current Tokio runtime
    pub fn start(&mut self) -> Result<RunHandle, TaskError> {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if !state.is_configurable() {
                return Err(TaskError::AlreadyStarted(*state));
            }
            let unmet = self.gate.evaluate(&self.options);
            if !unmet.is_empty() {
                return Err(TaskError::NotReady(unmet));
            }
            *state = TaskState::Running;
        }

        let run = Run {
            filter: self.filter.clone(),
            input: self.input,
            options: self.options.clone(),
            store: self.store.clone(),
            lineage: self.lineage.clone(),
            settings: self.settings.clone(),
            bus: self.bus.clone(),
            cancel: self.cancel.clone(),
            state: self.state.clone(),
        };
        run.spawn().map_err(|e| {
            *self.state.lock().unwrap_or_else(|e| e.into_inner()) = TaskState::Ready;
            TaskError::Spawn(e.to_string())
        })
    }
}
