//! Reference-counted object pool.
//!
//! Rust's `Rc`/`Arc` already give us acquire/release-on-drop for free, so
//! this isn't a manual refcount scheme; it's a *tracking* pool that can
//! forcibly drop every node it still holds a strong reference to, the way
//! a pool destructor would regardless of ref counts, to defuse cycles left
//! behind by a parse error. Parent -> child edges in the document tree are
//! the pool's strong references; child -> parent back-pointers are `Weak`
//! and never tracked here, so a cycle is not expressible through the pool
//! at all.

use std::any::Any;
use std::rc::Rc;
use std::sync::Mutex;

/// Tracks every live `Rc<dyn Any>` handed to it so a caller can wipe them
/// all out in one step after an error, instead of relying on each node's
/// `Drop` impl to run in the right order.
#[derive(Default)]
pub struct NodePool {
    live: Mutex<Vec<Rc<dyn Any>>>,
}

impl NodePool {
    pub fn new() -> NodePool {
        NodePool::default()
    }

    /// Start tracking a node. The pool itself does not affect the node's
    /// lifetime beyond holding one more strong reference.
    pub fn track<T: Any + 'static>(&self, node: Rc<T>) -> Rc<T> {
        self.live.lock().unwrap().push(node.clone());
        node
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().unwrap().len()
    }

    /// Forcibly release every tracked node, regardless of who else still
    /// holds a strong reference. Intended to run on a parse error, so that
    /// a half-built document tree can't leak via a cycle introduced by a
    /// buggy element implementation.
    pub fn teardown(&self) {
        self.live.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn teardown_drops_all_tracked_nodes() {
        let pool = NodePool::new();
        let a = pool.track(Rc::new(1));
        let b = pool.track(Rc::new(2));
        assert_eq!(pool.live_count(), 2);

        let weak_a = Rc::downgrade(&a);
        drop(a);
        drop(b);
        assert!(weak_a.upgrade().is_some(), "pool still holds a strong ref");

        pool.teardown();
        assert_eq!(pool.live_count(), 0);
        assert!(weak_a.upgrade().is_none());
    }
}
