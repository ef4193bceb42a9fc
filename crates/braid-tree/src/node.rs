#![forbid(unsafe_code)]

//! Tree nodes: a local source path joined with the parent's branch value.
//!
//! Every node owns a *local* path holding its own value. The root's derived
//! value is its local path directly; every other node's is a binary
//! [`Join`] — slot 0 the parent's derived branch value, slot 1 the local
//! value — folded left-to-right with the tree's operator. Setting a node's
//! local value therefore recomputes the branch value of its whole active
//! subtree through ordinary propagation.

use std::sync::{Arc, Weak};

use braid_core::{Getter, Join, Path, Value};
use tracing::debug;

use crate::error::TreeError;
use crate::tree::TreeShared;

/// Join slot carrying this node's own value; slot 0 is the parent branch.
pub(crate) const LOCAL_SLOT: usize = 1;

enum NodeCore<T: Value> {
    /// The root: derived value is the local path itself.
    Root,
    /// A forked node: derived value is the parent⊕local join.
    Forked(Join<T>),
}

struct NodeInner<T: Value> {
    tag: String,
    parent_tag: Option<String>,
    depth: u32,
    local: Path<T>,
    core: NodeCore<T>,
    tree: Weak<TreeShared<T>>,
}

/// One tag-addressed node. Cheap to clone; clones share the node.
pub struct Node<T: Value> {
    inner: Arc<NodeInner<T>>,
}

impl<T: Value> Clone for Node<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Value> Node<T> {
    pub(crate) fn root(tag: String, value: T, tree: Weak<TreeShared<T>>) -> Self {
        Self {
            inner: Arc::new(NodeInner {
                tag,
                parent_tag: None,
                depth: 0,
                local: Path::source(Some(value)),
                core: NodeCore::Root,
                tree,
            }),
        }
    }

    /// Register a child of this node under `tag`, seeded with `value`.
    ///
    /// Fails with [`TreeError::DuplicateTag`] if the tag is already taken —
    /// registration mutates nothing in that case.
    pub fn fork(&self, tag: impl Into<String>, value: T) -> Result<Node<T>, TreeError> {
        let tag = tag.into();
        let tree = self.inner.tree.upgrade().ok_or(TreeError::Detached)?;
        let mut nodes = tree.nodes.lock().expect("tree nodes lock");
        if nodes.contains_key(&tag) {
            return Err(TreeError::DuplicateTag { tag });
        }
        debug!(parent = %self.inner.tag, tag = %tag, "node forked");
        let local = Path::source(Some(value));
        let join = Join::new(
            vec![self.path(), local.clone()],
            tree.operator_fn(),
        );
        let node = Self {
            inner: Arc::new(NodeInner {
                tag: tag.clone(),
                parent_tag: Some(self.inner.tag.clone()),
                depth: self.inner.depth + 1,
                local,
                core: NodeCore::Forked(join),
                tree: self.inner.tree.clone(),
            }),
        };
        nodes.insert(tag, node.clone());
        Ok(node)
    }

    #[must_use]
    pub fn tag(&self) -> &str {
        &self.inner.tag
    }

    #[must_use]
    pub fn parent_tag(&self) -> Option<&str> {
        self.inner.parent_tag.as_deref()
    }

    /// Root is 0; every fork is one deeper than its parent.
    #[must_use]
    pub fn depth(&self) -> u32 {
        self.inner.depth
    }

    /// This node's own (unfolded) value.
    #[must_use]
    pub fn value(&self) -> T {
        self.inner
            .local
            .current()
            .expect("node local always holds a committed value")
    }

    /// Write this node's own value through the dedup CAS, propagating the
    /// recomputed branch value to every active descendant.
    pub fn set(&self, value: T) -> bool {
        self.inner.local.set(value)
    }

    /// The node's derived path: the folded root→node branch value while
    /// active. Activate it, subscribe to it, derive from it.
    #[must_use]
    pub fn path(&self) -> Path<T> {
        match &self.inner.core {
            NodeCore::Root => self.inner.local.clone(),
            NodeCore::Forked(join) => join.path().clone(),
        }
    }

    /// The derived branch value most recently committed, if any.
    #[must_use]
    pub fn resolved(&self) -> Option<T> {
        self.path().current()
    }

    /// A getter over the node's derived path.
    #[must_use]
    pub fn getter(&self) -> Getter<T> {
        Getter::of(&self.path())
    }

    /// Transaction write: overwrite the local value everywhere it is held,
    /// without dispatching.
    pub(crate) fn silent_set(&self, value: T) {
        self.inner.local.silent_store(value.clone());
        if let NodeCore::Forked(join) = &self.inner.core {
            join.write_slot_silent(LOCAL_SLOT, value);
        }
    }

    /// Transaction dispatch: recompute (for a fork) and re-emit the derived
    /// value so the subtree refolds in one wave.
    pub(crate) fn force_dispatch(&self) {
        match &self.inner.core {
            NodeCore::Root => self.inner.local.force_dispatch(),
            NodeCore::Forked(join) => join.force_refresh(),
        }
    }
}

impl<T: Value + std::fmt::Debug> std::fmt::Debug for Node<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("tag", &self.inner.tag)
            .field("parent", &self.inner.parent_tag)
            .field("depth", &self.inner.depth)
            .field("value", &self.inner.local.current())
            .finish()
    }
}
