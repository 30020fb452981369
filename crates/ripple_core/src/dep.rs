//! Dependencies and the dependency-collection stack
//!
//! A [`Dep`] is a publish point: watchers subscribe to it while they
//! evaluate, and [`Dep::notify`] tells every subscriber to update.
//!
//! The collection stack names the watcher currently evaluating. It is an
//! explicit stack so that a nested evaluation (a lazy watcher read while a
//! render watcher runs) restores the outer watcher when it finishes.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use rustc_hash::FxBuildHasher;
use smallvec::SmallVec;

use crate::config;
use crate::watcher::{Watcher, WeakWatcher};

static NEXT_DEP_ID: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static TARGET_STACK: RefCell<Vec<Option<Watcher>>> = const { RefCell::new(Vec::new()) };
}

struct DepInner {
    id: u64,
    subs: RefCell<IndexMap<u64, WeakWatcher, FxBuildHasher>>,
}

/// A publish point with an insertion-ordered set of subscribing watchers.
///
/// Subscribers are held weakly. A watcher whose last handle is dropped stops
/// receiving notifications and is pruned on the next notify.
#[derive(Clone)]
pub struct Dep(Rc<DepInner>);

impl Dep {
    pub fn new() -> Self {
        Self(Rc::new(DepInner {
            id: NEXT_DEP_ID.fetch_add(1, Ordering::Relaxed),
            subs: RefCell::new(IndexMap::default()),
        }))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// Subscribe a watcher. Adding the same watcher twice is a no-op.
    pub fn add_sub(&self, watcher: &Watcher) {
        self.0
            .subs
            .borrow_mut()
            .entry(watcher.id())
            .or_insert_with(|| watcher.downgrade());
    }

    pub fn remove_sub(&self, watcher: &Watcher) {
        self.0.subs.borrow_mut().shift_remove(&watcher.id());
    }

    /// Register the active watcher, if any, with this dependency
    pub fn depend(&self) {
        if let Some(target) = current_target() {
            target.add_dep(self);
        }
    }

    /// Tell every subscriber to update.
    ///
    /// Works on a snapshot, since updating a subscriber may subscribe or
    /// unsubscribe others. Outside async mode subscribers run in id order.
    pub fn notify(&self) {
        let mut subs = self.live_subs();
        if !config::async_mode() {
            subs.sort_by_key(Watcher::id);
        }
        for sub in subs {
            sub.update();
        }
    }

    /// Upgrade every subscriber, dropping the entries of dead watchers
    fn live_subs(&self) -> SmallVec<[Watcher; 8]> {
        let mut live = SmallVec::new();
        self.0.subs.borrow_mut().retain(|_, weak| match weak.upgrade() {
            Some(watcher) => {
                live.push(watcher);
                true
            }
            None => false,
        });
        live
    }

    pub fn subscriber_count(&self) -> usize {
        self.live_subs().len()
    }

    /// Subscriber ids in subscription order
    pub fn subscriber_ids(&self) -> Vec<u64> {
        self.live_subs().iter().map(Watcher::id).collect()
    }

    pub fn has_subscriber(&self, watcher: &Watcher) -> bool {
        self.0.subs.borrow().contains_key(&watcher.id())
    }
}

impl Default for Dep {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Dep {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for Dep {}

impl fmt::Debug for Dep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dep")
            .field("id", &self.0.id)
            .field("subs", &self.subscriber_ids())
            .finish()
    }
}

// =========================================================================
// Collection stack
// =========================================================================

/// Make `target` the active watcher. `None` suspends collection.
pub fn push_target(target: Option<Watcher>) {
    TARGET_STACK.with(|stack| stack.borrow_mut().push(target));
}

/// Restore the previously active watcher
pub fn pop_target() {
    TARGET_STACK.with(|stack| {
        stack.borrow_mut().pop();
    });
}

/// The watcher currently collecting dependencies
pub fn current_target() -> Option<Watcher> {
    TARGET_STACK.with(|stack| stack.borrow().last().cloned().flatten())
}

/// Whether a read right now would register a dependency
pub fn is_tracking() -> bool {
    TARGET_STACK.with(|stack| matches!(stack.borrow().last(), Some(Some(_))))
}

/// Nesting depth of the collection stack
pub fn target_depth() -> usize {
    TARGET_STACK.with(|stack| stack.borrow().len())
}

/// Run `f` with dependency collection suspended
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _guard = TargetGuard::push(None);
    f()
}

/// Pops the collection stack when dropped
pub(crate) struct TargetGuard(());

impl TargetGuard {
    pub(crate) fn push(target: Option<Watcher>) -> Self {
        push_target(target);
        Self(())
    }
}

impl Drop for TargetGuard {
    fn drop(&mut self) {
        pop_target();
    }
}
