//! Interactive session state and project files
//!
//! A [`Session`] ties one record store to one lineage tree. It creates filter
//! tasks over explicit input lists, applies the empty-result policy, and saves
//! the lineage as a project file (`.json`, `.yaml` or `.yml`).

use crate::config::Settings;
use crate::filters::{self, SiteFilter};
use crate::lineage::{LineageSnapshot, LineageTree, ListId, ListKind};
use crate::store::{Handle, RecordStore};
use crate::task::{FilterTask, RunReport};
use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, RwLock};

/// Current project file layout
pub const PROJECT_FORMAT_VERSION: u32 = 1;

/// On-disk project contents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectFile {
    pub format_version: u32,
    pub lineage: LineageSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProjectFormat {
    Json,
    Yaml,
}

impl ProjectFormat {
    fn from_path(path: &Path) -> Result<Self> {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
            .as_deref()
        {
            Some("json") => Ok(ProjectFormat::Json),
            Some("yaml") | Some("yml") => Ok(ProjectFormat::Yaml),
            _ => bail!(
                "Unsupported project file {} (use .json, .yaml or .yml)",
                path.display()
            ),
        }
    }
}

impl ProjectFile {
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = match ProjectFormat::from_path(path)? {
            ProjectFormat::Json => serde_json::to_string_pretty(self)?,
            ProjectFormat::Yaml => serde_yml::to_string(self)?,
        };
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write project file: {}", path.display()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let format = ProjectFormat::from_path(path)?;
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read project file: {}", path.display()))?;
        let project: ProjectFile = match format {
            ProjectFormat::Json => serde_json::from_str(&content)?,
            ProjectFormat::Yaml => serde_yml::from_str(&content)?,
        };
        if project.format_version > PROJECT_FORMAT_VERSION {
            bail!(
                "Project {} uses format version {}, newer than supported version {}",
                path.display(),
                project.format_version,
                PROJECT_FORMAT_VERSION
            );
        }
        Ok(project)
    }

    /// Rebuild the lineage tree recorded in the project
    pub fn lineage(&self) -> Result<LineageTree> {
        LineageTree::from_snapshot(&self.lineage).context("Corrupt lineage in project file")
    }
}

pub struct Session {
    store: Arc<dyn RecordStore>,
    lineage: Arc<RwLock<LineageTree>>,
    settings: Settings,
}

impl Session {
    /// Start a session whose root list is the whole of `table`
    pub fn open(
        store: Arc<dyn RecordStore>,
        table: &str,
        root_name: &str,
        kind: ListKind,
        settings: Settings,
    ) -> Result<Self> {
        let working_set = store
            .select_working_set(table)
            .with_context(|| format!("Failed to open root table {table}"))?;
        let malformed = store.malformed_rows(&working_set)?.len();
        let members = working_set.rows.saturating_sub(malformed);
        if malformed > 0 {
            tracing::warn!("{} of {} rows in {} could not be parsed", malformed, working_set.rows, table);
        }
        let lineage = LineageTree::new(kind, root_name, &working_set.table, members);
        Ok(Self::with_lineage(store, lineage, settings))
    }

    /// Resume a session from a saved project
    pub fn load(store: Arc<dyn RecordStore>, path: &Path, settings: Settings) -> Result<Self> {
        let lineage = ProjectFile::load(path)?.lineage()?;
        for id in lineage.preorder() {
            if let Some(list) = lineage.get(id)
                && store.select_working_set(&list.backing).is_err()
            {
                tracing::warn!("List '{}' refers to missing table {}", list.name, list.backing);
            }
        }
        Ok(Self::with_lineage(store, lineage, settings))
    }

    pub fn with_lineage(store: Arc<dyn RecordStore>, lineage: LineageTree, settings: Settings) -> Self {
        Self {
            store,
            lineage: Arc::new(RwLock::new(lineage)),
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn lineage(&self) -> &Arc<RwLock<LineageTree>> {
        &self.lineage
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Copy of the current tree
    pub fn snapshot(&self) -> Result<LineageTree> {
        self.lineage
            .read()
            .map(|tree| tree.clone())
            .map_err(|_| anyhow!("lineage lock poisoned"))
    }

    pub fn active(&self) -> Result<ListId> {
        Ok(self.snapshot()?.active())
    }

    pub fn set_active(&self, id: ListId) -> Result<()> {
        self.lineage
            .write()
            .map_err(|_| anyhow!("lineage lock poisoned"))?
            .set_active(id)?;
        Ok(())
    }

    /// New task running `filter` over `input`
    pub fn task(&self, filter: Arc<dyn SiteFilter>, input: ListId) -> FilterTask {
        FilterTask::new(
            filter,
            input,
            self.store.clone(),
            self.lineage.clone(),
            self.settings.clone(),
        )
    }

    pub fn task_by_key(&self, key: &str, input: ListId) -> Result<FilterTask> {
        let filter = filters::by_key(key).ok_or_else(|| anyhow!("Unknown filter '{key}'"))?;
        Ok(self.task(filter, input))
    }

    /// Delete a leaf list and release its table
    pub fn discard(&self, id: ListId) -> Result<()> {
        let removed = self
            .lineage
            .write()
            .map_err(|_| anyhow!("lineage lock poisoned"))?
            .delete(id)?;
        self.store
            .drop_result(&Handle::new(removed.backing.as_str(), removed.member_count))
            .with_context(|| format!("Failed to release table {}", removed.backing))?;
        tracing::debug!("Discarded list '{}'", removed.name);
        Ok(())
    }

    /// Discard a completed but empty result when `output.drop_empty` is set
    pub fn apply_empty_policy(&self, report: &RunReport) -> Result<bool> {
        match report.completed() {
            Some(list) if list.member_count == 0 && self.settings.output.drop_empty => {
                self.discard(list.id)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let project = ProjectFile {
            format_version: PROJECT_FORMAT_VERSION,
            lineage: self.snapshot()?.to_snapshot(),
        };
        project.save(path)?;
        tracing::info!("Saved project to {}", path.display());
        Ok(())
    }
}
