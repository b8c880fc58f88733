//! Derived-list lineage tree
//!
//! Every list of sites or probes the user works with is a node in a single tree.
//! The root is the unfiltered universe of records; every other node was produced
//! from its parent by exactly one filter run. Nodes live in an arena keyed by
//! [`ListId`] so observers can hold cheap, copyable references to them.

pub mod linkage;

pub use linkage::{LineageSnapshot, LinkageEntry, LinkageError};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identifier of a node within one [`LineageTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ListId(u32);

impl fmt::Display for ListId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What the records of a list represent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListKind {
    /// Candidate editing sites
    #[default]
    Site,
    /// Probes (reporter positions)
    Probe,
}

impl fmt::Display for ListKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListKind::Site => f.write_str("site"),
            ListKind::Probe => f.write_str("probe"),
        }
    }
}

/// A named, described collection of records
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedList {
    pub id: ListId,
    pub kind: ListKind,
    pub name: String,
    pub description: String,
    pub comments: String,
    /// Table in the record store that holds the members
    pub backing: String,
    pub member_count: usize,
    pub parent: Option<ListId>,
    pub children: Vec<ListId>,
}

impl DerivedList {
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LineageError {
    #[error("list {0} does not exist")]
    UnknownList(ListId),

    #[error("the root list cannot be deleted")]
    RootNotDeletable,

    #[error("list '{name}' still has {children} derived list(s); delete them first")]
    HasChildren { name: String, children: usize },
}

/// Provenance tree of derived lists
#[derive(Debug, Clone)]
pub struct LineageTree {
    nodes: BTreeMap<ListId, DerivedList>,
    root: ListId,
    active: ListId,
    next_id: u32,
}

impl LineageTree {
    /// Create a tree whose root is the unfiltered record set in `backing`
    pub fn new(kind: ListKind, name: &str, backing: &str, member_count: usize) -> Self {
        let root = ListId(0);
        let mut nodes = BTreeMap::new();
        nodes.insert(
            root,
            DerivedList {
                id: root,
                kind,
                name: name.to_string(),
                description: String::new(),
                comments: String::new(),
                backing: backing.to_string(),
                member_count,
                parent: None,
                children: Vec::new(),
            },
        );
        Self {
            nodes,
            root,
            active: root,
            next_id: 1,
        }
    }

    pub fn root(&self) -> ListId {
        self.root
    }

    pub fn active(&self) -> ListId {
        self.active
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: ListId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn get(&self, id: ListId) -> Option<&DerivedList> {
        self.nodes.get(&id)
    }

    pub fn list(&self, id: ListId) -> Result<&DerivedList, LineageError> {
        self.nodes.get(&id).ok_or(LineageError::UnknownList(id))
    }

    fn list_mut(&mut self, id: ListId) -> Result<&mut DerivedList, LineageError> {
        self.nodes.get_mut(&id).ok_or(LineageError::UnknownList(id))
    }

    pub fn parent(&self, id: ListId) -> Option<ListId> {
        self.get(id).and_then(|list| list.parent)
    }

    pub fn children(&self, id: ListId) -> &[ListId] {
        self.get(id).map(|list| list.children.as_slice()).unwrap_or(&[])
    }

    /// Attach a new list as the last child of `parent`
    pub fn create_child(
        &mut self,
        parent: ListId,
        name: &str,
        description: &str,
        backing: &str,
        member_count: usize,
    ) -> Result<ListId, LineageError> {
        let kind = self.list(parent)?.kind;
        let id = ListId(self.next_id);
        self.next_id += 1;

        self.nodes.insert(
            id,
            DerivedList {
                id,
                kind,
                name: name.to_string(),
                description: description.to_string(),
                comments: String::new(),
                backing: backing.to_string(),
                member_count,
                parent: Some(parent),
                children: Vec::new(),
            },
        );
        self.list_mut(parent)?.children.push(id);

        tracing::debug!("Attached list {} '{}' under {}", id, name, parent);
        Ok(id)
    }

    pub fn set_active(&mut self, id: ListId) -> Result<(), LineageError> {
        self.list(id)?;
        self.active = id;
        Ok(())
    }

    /// Remove a leaf list; returns the detached node
    pub fn delete(&mut self, id: ListId) -> Result<DerivedList, LineageError> {
        let list = self.list(id)?;
        let Some(parent) = list.parent else {
            return Err(LineageError::RootNotDeletable);
        };
        if !list.children.is_empty() {
            return Err(LineageError::HasChildren {
                name: list.name.clone(),
                children: list.children.len(),
            });
        }

        self.list_mut(parent)?.children.retain(|child| *child != id);
        if self.active == id {
            self.active = parent;
        }
        let removed = self.nodes.remove(&id).ok_or(LineageError::UnknownList(id))?;
        tracing::debug!("Deleted list {} '{}'", id, removed.name);
        Ok(removed)
    }

    pub fn rename(&mut self, id: ListId, name: &str) -> Result<(), LineageError> {
        self.list_mut(id)?.name = name.to_string();
        Ok(())
    }

    pub fn set_comments(&mut self, id: ListId, comments: &str) -> Result<(), LineageError> {
        self.list_mut(id)?.comments = comments.to_string();
        Ok(())
    }

    /// Path from `id` up to and including the root
    pub fn ancestors(&self, id: ListId) -> Vec<ListId> {
        let mut path = Vec::new();
        let mut current = self.get(id).map(|list| list.id);
        while let Some(node) = current {
            path.push(node);
            current = self.parent(node);
        }
        path
    }

    pub fn depth(&self, id: ListId) -> usize {
        self.ancestors(id).len().saturating_sub(1)
    }

    /// Nodes in pre-order (parents before children, children in insertion order)
    pub fn preorder(&self) -> Vec<ListId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            order.push(id);
            for child in self.children(id).iter().rev() {
                stack.push(*child);
            }
        }
        order
    }

    /// Human-readable outline of the tree, marking the active list
    pub fn render(&self) -> String {
        let mut out = String::new();
        for id in self.preorder() {
            let Some(list) = self.get(id) else { continue };
            let indent = "  ".repeat(self.depth(id));
            let marker = if id == self.active { "*" } else { "-" };
            out.push_str(&format!(
                "{indent}{marker} {} [{} {}s]",
                list.name, list.member_count, list.kind
            ));
            if !list.description.is_empty() {
                out.push_str(&format!(" {}", list.description));
            }
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> LineageTree {
        LineageTree::new(ListKind::Site, "All sites", "rna", 100)
    }

    #[test]
    fn test_create_child_appends_in_order() {
        let mut tree = tree();
        let root = tree.root();
        let a = tree.create_child(root, "a", "first", "t_a", 60).unwrap();
        let b = tree.create_child(root, "b", "second", "t_b", 40).unwrap();

        assert_eq!(tree.children(root), &[a, b]);
        assert_eq!(tree.parent(a), Some(root));
        assert_eq!(tree.list(b).unwrap().kind, ListKind::Site);
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn test_create_child_under_unknown_parent_fails() {
        let mut tree = tree();
        let err = tree.create_child(ListId(42), "x", "", "t", 0).unwrap_err();
        assert_eq!(err, LineageError::UnknownList(ListId(42)));
    }

    #[test]
    fn test_delete_rules() {
        let mut tree = tree();
        let root = tree.root();
        let a = tree.create_child(root, "a", "", "t_a", 10).unwrap();
        let b = tree.create_child(a, "b", "", "t_b", 5).unwrap();

        assert_eq!(tree.delete(root), Err(LineageError::RootNotDeletable));
        assert!(matches!(
            tree.delete(a),
            Err(LineageError::HasChildren { children: 1, .. })
        ));

        tree.set_active(b).unwrap();
        let removed = tree.delete(b).unwrap();
        assert_eq!(removed.name, "b");
        assert_eq!(tree.active(), a);
        assert!(tree.children(a).is_empty());
        assert!(tree.delete(a).is_ok());
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_metadata_mutation() {
        let mut tree = tree();
        let root = tree.root();
        let a = tree.create_child(root, "a", "quality >= 20", "t_a", 10).unwrap();
        tree.rename(a, "high quality").unwrap();
        tree.set_comments(a, "checked by hand").unwrap();

        let list = tree.list(a).unwrap();
        assert_eq!(list.name, "high quality");
        assert_eq!(list.comments, "checked by hand");
        assert_eq!(list.description, "quality >= 20");
    }

    #[test]
    fn test_preorder_and_render() {
        let mut tree = tree();
        let root = tree.root();
        let a = tree.create_child(root, "a", "", "t_a", 10).unwrap();
        let b = tree.create_child(root, "b", "", "t_b", 10).unwrap();
        let c = tree.create_child(a, "c", "", "t_c", 5).unwrap();

        assert_eq!(tree.preorder(), vec![root, a, c, b]);
        assert_eq!(tree.depth(c), 2);
        assert_eq!(tree.ancestors(c), vec![c, a, root]);

        tree.set_active(c).unwrap();
        let rendered = tree.render();
        assert!(rendered.contains("    * c [5 sites]"));
        assert!(rendered.starts_with("- All sites"));
    }
}
