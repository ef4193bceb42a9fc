#![forbid(unsafe_code)]

//! Tag-addressed hierarchical derived values.
//!
//! A [`Tree<T>`] maintains a registry of [`Node`]s keyed by unique string
//! tags. The full structure materializes lazily: the caller-supplied build
//! callback runs exactly once, under a double-checked compute-once cell, on
//! the first access from any thread. A build failure (duplicate tag, or an
//! error returned by the callback) is sticky — every later access reports
//! the same error rather than retrying into a half-registered tree.
//!
//! # Transactions
//!
//! [`transaction`](Tree::transaction) overwrites several nodes' local
//! values atomically: under one process-wide tree lock it validates every
//! tag first (rejecting before any mutation), silently installs each value,
//! then issues exactly one forced dispatch from the shallowest updated
//! node. The normal join/fold chain refolds every affected active
//! descendant in a single coherent wave — one notification per descendant,
//! never a torn intermediate combination. The lock covers the silent writes
//! and that one trigger, not a whole fan-out of independent per-node
//! dispatch storms.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use ahash::RandomState;
use braid_core::{Operator, Value};
use tracing::debug;

use crate::error::TreeError;
use crate::node::Node;
use crate::snapshot::{SimpleNode, SimpleTree};

/// Registry and operator shared by every node of one tree.
pub(crate) struct TreeShared<T: Value> {
    pub(crate) operator: Operator<T>,
    pub(crate) nodes: Mutex<HashMap<String, Node<T>, RandomState>>,
    txn_lock: Mutex<()>,
}

impl<T: Value> TreeShared<T> {
    /// The fold operator as an owned closure, for wiring node joins.
    pub(crate) fn operator_fn(&self) -> impl Fn(T, T) -> T + Send + Sync + 'static {
        let operator = Arc::clone(&self.operator);
        move |a, b| operator(a, b)
    }
}

type Builder<T> = Box<dyn FnOnce(&Node<T>) -> Result<(), TreeError> + Send>;

/// A lazily built, transactional registry of hierarchical derived values.
pub struct Tree<T: Value> {
    shared: Arc<TreeShared<T>>,
    root_tag: String,
    pending: Mutex<Option<(T, Builder<T>)>>,
    build_gate: Mutex<()>,
    built: OnceLock<Result<(), TreeError>>,
}

impl<T: Value> Tree<T> {
    /// Describe a tree without building it.
    ///
    /// `builder` runs exactly once, on first access, with the root node; it
    /// registers the rest of the structure via [`Node::fork`].
    #[must_use]
    pub fn new(
        root_tag: impl Into<String>,
        root_value: T,
        operator: impl Fn(T, T) -> T + Send + Sync + 'static,
        builder: impl FnOnce(&Node<T>) -> Result<(), TreeError> + Send + 'static,
    ) -> Self {
        Self {
            shared: Arc::new(TreeShared {
                operator: Arc::new(operator) as Operator<T>,
                nodes: Mutex::new(HashMap::default()),
                txn_lock: Mutex::new(()),
            }),
            root_tag: root_tag.into(),
            pending: Mutex::new(Some((root_value, Box::new(builder)))),
            build_gate: Mutex::new(()),
            built: OnceLock::new(),
        }
    }

    /// Build on first call; afterwards return the sticky build result.
    fn ensure_built(&self) -> Result<(), TreeError> {
        if let Some(result) = self.built.get() {
            return result.clone();
        }
        let _gate = self.build_gate.lock().expect("tree build gate");
        if let Some(result) = self.built.get() {
            return result.clone();
        }
        let result = self.run_build();
        let _ = self.built.set(result.clone());
        result
    }

    fn run_build(&self) -> Result<(), TreeError> {
        let (root_value, builder) = self
            .pending
            .lock()
            .expect("tree builder lock")
            .take()
            .expect("tree builds exactly once");
        debug!(root = %self.root_tag, "building tree");
        let root = Node::root(
            self.root_tag.clone(),
            root_value,
            Arc::downgrade(&self.shared),
        );
        self.shared
            .nodes
            .lock()
            .expect("tree nodes lock")
            .insert(self.root_tag.clone(), root.clone());
        builder(&root)
    }

    /// The node registered under `tag`, building the tree first if needed.
    pub fn get(&self, tag: &str) -> Result<Node<T>, TreeError> {
        self.ensure_built()?;
        self.shared
            .nodes
            .lock()
            .expect("tree nodes lock")
            .get(tag)
            .cloned()
            .ok_or_else(|| TreeError::UnknownTag {
                tag: tag.to_string(),
            })
    }

    /// The root node.
    pub fn root(&self) -> Result<Node<T>, TreeError> {
        self.get(&self.root_tag)
    }

    #[must_use]
    pub fn root_tag(&self) -> &str {
        &self.root_tag
    }

    /// The root→`tag` ancestor chain, root first.
    pub fn branch_at(&self, tag: &str) -> Result<Vec<Node<T>>, TreeError> {
        self.ensure_built()?;
        let nodes = self.shared.nodes.lock().expect("tree nodes lock");
        let mut chain = Vec::new();
        let mut cursor = Some(tag.to_string());
        while let Some(current) = cursor {
            let node = nodes
                .get(&current)
                .cloned()
                .ok_or(TreeError::UnknownTag { tag: current })?;
            cursor = node.parent_tag().map(str::to_string);
            chain.push(node);
        }
        chain.reverse();
        Ok(chain)
    }

    /// Left-fold the root→`tag` chain of local values through the tree
    /// operator — the same result live propagation would deliver, computed
    /// on demand from a point-in-time read.
    pub fn resolve_at(&self, tag: &str) -> Result<T, TreeError> {
        let chain = self.branch_at(tag)?;
        let folded = chain
            .iter()
            .map(Node::value)
            .reduce(|a, b| (self.shared.operator)(a, b))
            .expect("branch always contains the root");
        Ok(folded)
    }

    /// Atomically overwrite the local values of several nodes, then refold
    /// the affected subtree in one coordinated wave.
    ///
    /// Every tag is validated before any mutation; an unknown tag rejects
    /// the whole transaction untouched. The forced dispatch is issued from
    /// the shallowest updated node only — descendants recompute through the
    /// normal join/fold chain, so each active observer sees exactly one
    /// consistent notification instead of one per updated node.
    pub fn transaction(&self, entries: &[(&str, T)]) -> Result<(), TreeError> {
        self.ensure_built()?;
        if entries.is_empty() {
            return Err(TreeError::EmptyTransaction);
        }
        let _txn = self.shared.txn_lock.lock().expect("tree transaction lock");
        let mut targets: Vec<(Node<T>, T)> = Vec::with_capacity(entries.len());
        {
            let nodes = self.shared.nodes.lock().expect("tree nodes lock");
            for (tag, value) in entries {
                let node = nodes.get(*tag).cloned().ok_or_else(|| TreeError::UnknownTag {
                    tag: (*tag).to_string(),
                })?;
                targets.push((node, value.clone()));
            }
        }
        for (node, value) in &targets {
            node.silent_set(value.clone());
        }
        let pivot = targets
            .iter()
            .map(|(node, _)| node)
            .min_by_key(|node| node.depth())
            .expect("transaction entries validated non-empty");
        debug!(pivot = %pivot.tag(), entries = targets.len(), "transaction dispatching");
        pivot.force_dispatch();
        Ok(())
    }

    /// A consistent, non-live copy of every node's local value, taken under
    /// the transaction lock.
    pub fn snapshot(&self) -> Result<SimpleTree<T>, TreeError> {
        self.ensure_built()?;
        let _txn = self.shared.txn_lock.lock().expect("tree transaction lock");
        let nodes = self.shared.nodes.lock().expect("tree nodes lock");
        let copied = nodes
            .iter()
            .map(|(tag, node)| {
                (
                    tag.clone(),
                    SimpleNode::new(
                        tag.clone(),
                        node.parent_tag().map(str::to_string),
                        node.depth(),
                        node.value(),
                    ),
                )
            })
            .collect();
        Ok(SimpleTree::new(
            copied,
            self.root_tag.clone(),
            Arc::clone(&self.shared.operator),
        ))
    }
}
