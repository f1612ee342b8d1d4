//! The hierarchical dirty tracker.
//!
//! Every object segment and cache segment owns one node of a tracker tree. A node only knows its
//! parent: marking a node dirty walks the parent chain and marks every ancestor, so "is anything
//! below me modified?" is a single flag read at any level. There is no way to clean a node; a
//! tree stays dirty until the buffer is reserialized and decoded again, which builds a fresh tree.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug)]
struct TrackerNode {
    dirty: AtomicBool,
    parent: Option<Arc<TrackerNode>>,
}

/// A node in the dirty tracker tree.
pub struct DirtyTracker {
    node: Arc<TrackerNode>,
}

impl DirtyTracker {
    /// Creates a clean root node.
    pub fn root() -> Self {
        Self {
            node: Arc::new(TrackerNode {
                dirty: AtomicBool::new(false),
                parent: None,
            }),
        }
    }

    /// Creates a clean child wired to this node.
    pub fn create_child(&self) -> Self {
        Self {
            node: Arc::new(TrackerNode {
                dirty: AtomicBool::new(false),
                parent: Some(Arc::clone(&self.node)),
            }),
        }
    }

    /// Marks this node and every ancestor dirty. Idempotent.
    pub fn mark_dirty(&self) {
        let mut current = Some(&self.node);
        while let Some(node) = current {
            // A dirty node always has dirty ancestors, so the walk can stop early.
            if node.dirty.swap(true, Ordering::AcqRel) {
                break;
            }
            current = node.parent.as_ref();
        }
    }

    /// True once this node or any descendant was marked dirty.
    pub fn is_dirty(&self) -> bool {
        self.node.dirty.load(Ordering::Acquire)
    }

    /// Number of ancestors above this node.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self.node.parent.as_ref();
        while let Some(node) = current {
            depth += 1;
            current = node.parent.as_ref();
        }
        depth
    }
}

impl Default for DirtyTracker {
    fn default() -> Self {
        Self::root()
    }
}

impl fmt::Debug for DirtyTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DirtyTracker(depth={}, dirty={})",
            self.depth(),
            self.is_dirty()
        )
    }
}
