//! Flat, indexed persistence of the lineage tree
//!
//! The tree is written as a linkage array: slot 0 holds the root and entry `i`
//! of [`LineageSnapshot::entries`] occupies slot `i + 1`. Every entry names the
//! slot of its parent, which must come earlier in the array. Entries are emitted
//! in pre-order, so child order is reproduced exactly on reload.

use super::{DerivedList, LineageTree, ListKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metadata of one persisted list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkageEntry {
    /// Slot of the parent in the linkage array (0 is the root)
    pub parent: usize,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub comments: String,
    pub backing: String,
    pub member_count: usize,
}

/// Persisted form of a [`LineageTree`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageSnapshot {
    pub kind: ListKind,
    pub root: LinkageEntry,
    pub entries: Vec<LinkageEntry>,
    /// Slot of the active list
    #[serde(default)]
    pub active: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkageError {
    #[error("entry at slot {slot} refers to parent slot {parent}, which is not before it")]
    ForwardReference { slot: usize, parent: usize },

    #[error("active slot {active} is outside the linkage array of {len} slots")]
    ActiveOutOfRange { active: usize, len: usize },
}

fn entry(list: &DerivedList, parent: usize) -> LinkageEntry {
    LinkageEntry {
        parent,
        name: list.name.clone(),
        description: list.description.clone(),
        comments: list.comments.clone(),
        backing: list.backing.clone(),
        member_count: list.member_count,
    }
}

impl LineageTree {
    /// Flatten the tree into its linkage form
    pub fn to_snapshot(&self) -> LineageSnapshot {
        let order = self.preorder();
        let slots: HashMap<_, _> = order.iter().enumerate().map(|(slot, id)| (*id, slot)).collect();

        let mut entries = Vec::with_capacity(order.len().saturating_sub(1));
        let mut root = None;
        for id in &order {
            let Some(list) = self.get(*id) else { continue };
            match list.parent {
                None => root = Some(entry(list, 0)),
                Some(parent) => entries.push(entry(list, slots.get(&parent).copied().unwrap_or(0))),
            }
        }

        let root_list = self.list(self.root()).ok();
        LineageSnapshot {
            kind: root_list.map(|l| l.kind).unwrap_or_default(),
            root: root.unwrap_or_else(|| LinkageEntry {
                parent: 0,
                name: String::new(),
                description: String::new(),
                comments: String::new(),
                backing: String::new(),
                member_count: 0,
            }),
            entries,
            active: slots.get(&self.active()).copied().unwrap_or(0),
        }
    }

    /// Rebuild a tree from its linkage form
    pub fn from_snapshot(snapshot: &LineageSnapshot) -> Result<Self, LinkageError> {
        let len = snapshot.entries.len() + 1;
        if snapshot.active >= len {
            return Err(LinkageError::ActiveOutOfRange {
                active: snapshot.active,
                len,
            });
        }

        let root = &snapshot.root;
        let mut tree = LineageTree::new(snapshot.kind, &root.name, &root.backing, root.member_count);
        let root_id = tree.root();
        if let Some(list) = tree.nodes.get_mut(&root_id) {
            list.description = root.description.clone();
            list.comments = root.comments.clone();
        }

        let mut ids = Vec::with_capacity(len);
        ids.push(root_id);
        for (index, entry) in snapshot.entries.iter().enumerate() {
            let slot = index + 1;
            if entry.parent >= slot {
                return Err(LinkageError::ForwardReference {
                    slot,
                    parent: entry.parent,
                });
            }
            let id = tree
                .create_child(
                    ids[entry.parent],
                    &entry.name,
                    &entry.description,
                    &entry.backing,
                    entry.member_count,
                )
                .map_err(|_| LinkageError::ForwardReference {
                    slot,
                    parent: entry.parent,
                })?;
            if let Some(list) = tree.nodes.get_mut(&id) {
                list.comments = entry.comments.clone();
            }
            ids.push(id);
        }

        tree.active = ids[snapshot.active];
        Ok(tree)
    }
}
