#![forbid(unsafe_code)]

//! Point-in-time tree snapshots.
//!
//! A [`SimpleTree<T>`] is a consistent, non-live copy of every node's local
//! value, taken under the tree's transaction lock. It supports the same
//! ancestor-branch folding as the live tree without touching the
//! propagation graph — later writes to the live tree never show through.

use std::collections::HashMap;

use ahash::RandomState;
use braid_core::{Operator, Value};

/// One copied node: tag, parentage, and the local value at snapshot time.
#[derive(Debug, Clone)]
pub struct SimpleNode<T: Value> {
    tag: String,
    parent_tag: Option<String>,
    depth: u32,
    value: T,
}

impl<T: Value> SimpleNode<T> {
    pub(crate) fn new(tag: String, parent_tag: Option<String>, depth: u32, value: T) -> Self {
        Self {
            tag,
            parent_tag,
            depth,
            value,
        }
    }

    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    #[must_use]
    pub fn parent_tag(&self) -> Option<&str> {
        self.parent_tag.as_deref()
    }

    #[must_use]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    #[must_use]
    pub fn value(&self) -> &T {
        &self.value
    }
}

/// A frozen copy of a tree's node values with branch folding.
pub struct SimpleTree<T: Value> {
    nodes: HashMap<String, SimpleNode<T>, RandomState>,
    root_tag: String,
    operator: Operator<T>,
}

impl<T: Value> SimpleTree<T> {
    pub(crate) fn new(
        nodes: HashMap<String, SimpleNode<T>, RandomState>,
        root_tag: String,
        operator: Operator<T>,
    ) -> Self {
        Self {
            nodes,
            root_tag,
            operator,
        }
    }

    #[must_use]
    pub fn get(&self, tag: &str) -> Option<&SimpleNode<T>> {
        self.nodes.get(tag)
    }

    #[must_use]
    pub fn root_tag(&self) -> &str {
        &self.root_tag
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All copied tags, in no particular order.
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// The root→`tag` chain of copied values, root first. `None` for an
    /// unknown tag.
    #[must_use]
    pub fn branch_at(&self, tag: &str) -> Option<Vec<&SimpleNode<T>>> {
        let mut chain = Vec::new();
        let mut cursor = Some(tag);
        while let Some(current) = cursor {
            let node = self.nodes.get(current)?;
            cursor = node.parent_tag();
            chain.push(node);
        }
        chain.reverse();
        Some(chain)
    }

    /// Left-fold the root→`tag` chain through the tree operator, as of
    /// snapshot time.
    #[must_use]
    pub fn resolve_at(&self, tag: &str) -> Option<T> {
        let chain = self.branch_at(tag)?;
        chain
            .into_iter()
            .map(|node| node.value.clone())
            .reduce(|a, b| (self.operator)(a, b))
    }
}

impl<T: Value + std::fmt::Debug> std::fmt::Debug for SimpleTree<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimpleTree")
            .field("root", &self.root_tag)
            .field("nodes", &self.nodes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TreeError;
    use crate::tree::Tree;

    fn sample() -> SimpleTree<String> {
        let tree = Tree::new(
            "r",
            "R".to_string(),
            |a, b| format!("{a}/{b}"),
            |root| {
                let a = root.fork("a", "A".to_string())?;
                a.fork("b", "B".to_string())?;
                root.fork("c", "C".to_string())?;
                Ok::<(), TreeError>(())
            },
        );
        tree.snapshot().expect("snapshot")
    }

    #[test]
    fn copies_every_node() {
        let snapshot = sample();
        assert_eq!(snapshot.len(), 4);
        assert!(!snapshot.is_empty());
        let mut tags: Vec<&str> = snapshot.tags().collect();
        tags.sort_unstable();
        assert_eq!(tags, vec!["a", "b", "c", "r"]);
    }

    #[test]
    fn nodes_keep_parentage_and_depth() {
        let snapshot = sample();
        let b = snapshot.get("b").expect("b");
        assert_eq!(b.tag(), "b");
        assert_eq!(b.parent_tag(), Some("a"));
        assert_eq!(b.depth(), 2);
        assert_eq!(b.value(), &"B".to_string());
        assert_eq!(snapshot.get("r").expect("r").parent_tag(), None);
    }

    #[test]
    fn branch_folding_matches_live_semantics() {
        let snapshot = sample();
        assert_eq!(snapshot.resolve_at("r"), Some("R".to_string()));
        assert_eq!(snapshot.resolve_at("b"), Some("R/A/B".to_string()));
        assert_eq!(snapshot.resolve_at("c"), Some("R/C".to_string()));
        assert_eq!(snapshot.resolve_at("missing"), None);
    }

    #[test]
    fn branch_at_walks_root_first() {
        let snapshot = sample();
        let chain = snapshot.branch_at("b").expect("chain");
        let tags: Vec<&str> = chain.iter().map(|n| n.tag()).collect();
        assert_eq!(tags, vec!["r", "a", "b"]);
    }
}
