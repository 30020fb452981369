//! Watchers
//!
//! A [`Watcher`] wraps a re-evaluation function and records every
//! [`Dep`] read while it runs. When one of those changes the watcher is
//! updated according to its mode:
//!
//! - **lazy** watchers only mark themselves dirty and re-evaluate on the next
//!   read (this is how [`Computed`](crate::computed::Computed) works)
//! - **sync** watchers run immediately
//! - everything else is queued on the [`scheduler`](crate::scheduler)
//!
//! After every evaluation the confirmed dependency set is exactly the set of
//! dependencies read during that evaluation. Dropped dependencies are
//! unsubscribed.
//!
//! ```rust
//! use ripple_core::{observe, ObjectRef, Value, Watcher};
//!
//! let state = ObjectRef::from_pairs([("count", 1)]);
//! observe(&Value::from(state.clone()), false);
//!
//! let reader = state.clone();
//! let watcher = Watcher::builder(move || Ok(reader.get("count")))
//!     .lazy()
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(watcher.evaluate_if_dirty().unwrap(), Value::from(1));
//! state.set("count", 2).unwrap();
//! assert!(watcher.is_dirty());
//! assert_eq!(watcher.evaluate_if_dirty().unwrap(), Value::from(2));
//! ```

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use rustc_hash::FxHashSet;
use slotmap::{new_key_type, SlotMap};

use crate::config;
use crate::dep::{untracked, Dep, TargetGuard};
use crate::error::{ReactiveError, Result};
use crate::path::parse_path;
use crate::scheduler;
use crate::traverse::traverse;
use crate::value::Value;

static NEXT_WATCHER_ID: AtomicU64 = AtomicU64::new(1);

type Getter = Box<dyn FnMut() -> Result<Value>>;
type Callback = Box<dyn FnMut(&Value, &Value) -> Result<()>>;
type Hook = Box<dyn FnMut()>;

new_key_type! {
    /// Handle of a watcher inside a [`WatcherRegistry`]
    pub struct WatcherKey;
}

/// Dependencies with O(1) membership by id
#[derive(Default)]
struct DepSet {
    list: Vec<Dep>,
    ids: FxHashSet<u64>,
}

struct WatcherInner {
    id: u64,
    expression: String,
    getter: RefCell<Getter>,
    callback: RefCell<Option<Callback>>,
    before: RefCell<Option<Hook>>,
    after: RefCell<Option<Hook>>,
    value: RefCell<Value>,
    active: Cell<bool>,
    dirty: Cell<bool>,
    lazy: bool,
    sync: bool,
    deep: bool,
    user: bool,
    deps: RefCell<DepSet>,
    new_deps: RefCell<DepSet>,
    registry: RefCell<Option<(Weak<RefCell<SlotMap<WatcherKey, Watcher>>>, WatcherKey)>>,
}

/// A tracked computation.
///
/// Dependencies hold watchers weakly, so a watcher keeps reacting only while
/// a handle to it (or its [`WatcherRegistry`]) is alive.
#[derive(Clone)]
pub struct Watcher(Rc<WatcherInner>);

/// Non-owning handle kept in a dependency's subscriber set
#[derive(Clone)]
pub(crate) struct WeakWatcher(Weak<WatcherInner>);

impl WeakWatcher {
    pub(crate) fn upgrade(&self) -> Option<Watcher> {
        self.0.upgrade().map(Watcher)
    }
}

impl Watcher {
    /// Start building a watcher around a re-evaluation function
    pub fn builder(getter: impl FnMut() -> Result<Value> + 'static) -> WatcherBuilder {
        WatcherBuilder::new(Box::new(getter))
    }

    /// Start building a watcher that reads a dot-delimited path from `root`.
    ///
    /// An invalid path warns and produces a watcher that always evaluates to
    /// `Undefined`.
    pub fn from_path(root: &Value, path: &str) -> WatcherBuilder {
        let getter: Getter = match parse_path(path) {
            Some(parsed) => {
                let root = root.clone();
                Box::new(move || Ok(parsed.get(&root)))
            }
            None => {
                config::warn(&format!(
                    "Failed watching path: \"{path}\". Watchers only accept simple dot-delimited paths."
                ));
                Box::new(|| Ok(Value::Undefined))
            }
        };
        WatcherBuilder::new(getter).expression(path)
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// Diagnostic name of the watched expression
    pub fn expression(&self) -> &str {
        &self.0.expression
    }

    /// The last evaluated value
    pub fn value(&self) -> Value {
        self.0.value.borrow().clone()
    }

    pub fn is_dirty(&self) -> bool {
        self.0.dirty.get()
    }

    pub fn is_active(&self) -> bool {
        self.0.active.get()
    }

    pub fn is_lazy(&self) -> bool {
        self.0.lazy
    }

    pub fn is_user(&self) -> bool {
        self.0.user
    }

    /// Number of confirmed dependencies
    pub fn dep_count(&self) -> usize {
        self.0.deps.borrow().list.len()
    }

    /// Whether `dep` is in the confirmed dependency set
    pub fn depends_on(&self, dep: &Dep) -> bool {
        self.0.deps.borrow().ids.contains(&dep.id())
    }

    pub(crate) fn downgrade(&self) -> WeakWatcher {
        WeakWatcher(Rc::downgrade(&self.0))
    }

    /// Run the getter with this watcher collecting dependencies.
    ///
    /// Errors from user watchers are reported and produce `Undefined`;
    /// errors from internal watchers are returned. Either way the dependency
    /// sets are reconciled before returning.
    ///
    /// Evaluating a watcher from inside its own getter returns
    /// [`ReactiveError::Reentrant`] and leaves the outer collection untouched.
    pub fn evaluate(&self) -> Result<Value> {
        let Ok(mut getter) = self.0.getter.try_borrow_mut() else {
            return Err(ReactiveError::Reentrant(self.0.id));
        };
        let guard = TargetGuard::push(Some(self.clone()));
        let result = getter();
        drop(getter);

        let value = match result {
            Ok(value) => value,
            Err(err) if self.0.user => {
                config::handle_error(&err, &format!("getter for watcher \"{}\"", self.0.expression));
                Value::Undefined
            }
            Err(err) => {
                drop(guard);
                self.cleanup_deps();
                return Err(err);
            }
        };

        // Touch every nested property while still collecting
        if self.0.deep {
            traverse(&value);
        }
        drop(guard);
        self.cleanup_deps();
        Ok(value)
    }

    /// Record a dependency read during the current evaluation
    pub fn add_dep(&self, dep: &Dep) {
        let id = dep.id();
        let fresh = {
            let mut new_deps = self.0.new_deps.borrow_mut();
            if new_deps.ids.insert(id) {
                new_deps.list.push(dep.clone());
                true
            } else {
                false
            }
        };
        if fresh && !self.0.deps.borrow().ids.contains(&id) {
            dep.add_sub(self);
        }
    }

    /// Make the newly collected set the confirmed set, unsubscribing from
    /// anything that was not read this time.
    fn cleanup_deps(&self) {
        let collected = self.0.new_deps.take();
        let previous = self.0.deps.replace(collected);
        let current = self.0.deps.borrow();
        for dep in previous.list {
            if !current.ids.contains(&dep.id()) {
                dep.remove_sub(self);
            }
        }
    }

    /// React to a change in one of the dependencies
    pub fn update(&self) {
        if self.0.lazy {
            self.0.dirty.set(true);
        } else if self.0.sync {
            if let Err(err) = self.run() {
                config::handle_error(&err, &format!("sync watcher \"{}\"", self.0.expression));
            }
        } else {
            scheduler::queue_watcher(self.clone());
        }
    }

    /// Re-evaluate and fire the callback if the value changed.
    ///
    /// Object-like values and deep watchers always fire, since their
    /// contents may have changed in place. A run that re-enters the
    /// watcher's own evaluation stores nothing and fires nothing.
    pub fn run(&self) -> Result<()> {
        if !self.0.active.get() {
            return Ok(());
        }
        let value = match self.evaluate() {
            Ok(value) => value,
            Err(err @ ReactiveError::Reentrant(_)) if self.0.user => {
                config::handle_error(&err, &format!("getter for watcher \"{}\"", self.0.expression));
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        let changed = !value.same(&self.0.value.borrow()) || value.is_object_like() || self.0.deep;
        if changed {
            let old = self.0.value.replace(value.clone());
            self.invoke_callback(&value, &old)?;
        }
        Ok(())
    }

    fn invoke_callback(&self, value: &Value, old: &Value) -> Result<()> {
        let result = match self.0.callback.try_borrow_mut() {
            Ok(mut slot) => match slot.as_mut() {
                Some(callback) => callback(value, old),
                None => Ok(()),
            },
            Err(_) => Err(ReactiveError::Reentrant(self.0.id)),
        };
        match result {
            Err(err) if self.0.user => {
                config::handle_error(&err, &format!("callback for watcher \"{}\"", self.0.expression));
                Ok(())
            }
            other => other,
        }
    }

    /// Evaluate if dirty and return the current value. Lazy watchers only.
    pub fn evaluate_if_dirty(&self) -> Result<Value> {
        if self.0.dirty.get() {
            let value = self.evaluate()?;
            *self.0.value.borrow_mut() = value;
            self.0.dirty.set(false);
        }
        Ok(self.value())
    }

    /// Register every confirmed dependency of this watcher with the watcher
    /// currently collecting.
    pub fn depend_on_all(&self) {
        let deps = self.0.deps.borrow().list.clone();
        for dep in deps {
            dep.depend();
        }
    }

    /// Leave the registry, unsubscribe from every dependency, and go inactive.
    ///
    /// A pending scheduler run of a torn-down watcher does nothing.
    pub fn teardown(&self) {
        if !self.0.active.get() {
            return;
        }
        if let Some((registry, key)) = self.0.registry.borrow_mut().take() {
            if let Some(registry) = registry.upgrade() {
                registry.borrow_mut().remove(key);
            }
        }
        let deps = self.0.deps.take();
        for dep in deps.list {
            dep.remove_sub(self);
        }
        self.0.active.set(false);
    }

    pub(crate) fn call_before(&self) {
        if let Ok(mut hook) = self.0.before.try_borrow_mut() {
            if let Some(hook) = hook.as_mut() {
                hook();
            }
        }
    }

    pub(crate) fn call_after(&self) {
        if let Ok(mut hook) = self.0.after.try_borrow_mut() {
            if let Some(hook) = hook.as_mut() {
                hook();
            }
        }
    }
}

impl PartialEq for Watcher {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for Watcher {}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("id", &self.0.id)
            .field("expression", &self.0.expression)
            .field("lazy", &self.0.lazy)
            .field("sync", &self.0.sync)
            .field("deep", &self.0.deep)
            .field("user", &self.0.user)
            .field("dirty", &self.0.dirty.get())
            .field("active", &self.0.active.get())
            .finish()
    }
}

// =========================================================================
// Builder
// =========================================================================

/// Configures and creates a [`Watcher`]
pub struct WatcherBuilder {
    getter: Getter,
    callback: Option<Callback>,
    before: Option<Hook>,
    after: Option<Hook>,
    lazy: bool,
    sync: bool,
    deep: bool,
    user: bool,
    immediate: bool,
    registry: Option<WatcherRegistry>,
    expression: String,
}

impl WatcherBuilder {
    fn new(getter: Getter) -> Self {
        Self {
            getter,
            callback: None,
            before: None,
            after: None,
            lazy: false,
            sync: false,
            deep: false,
            user: false,
            immediate: false,
            registry: None,
            expression: String::from("<fn>"),
        }
    }

    /// Called with `(new, old)` whenever a run produces a changed value
    pub fn callback(mut self, callback: impl FnMut(&Value, &Value) -> Result<()> + 'static) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Defer evaluation until read; changes only mark the watcher dirty
    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    /// Run inline on every change instead of queueing
    pub fn sync(mut self) -> Self {
        self.sync = true;
        self
    }

    /// Depend on everything reachable from the value
    pub fn deep(mut self) -> Self {
        self.deep = true;
        self
    }

    /// Mark as user-created: errors are reported instead of returned
    pub fn user(mut self) -> Self {
        self.user = true;
        self
    }

    /// Fire the callback once with `(value, Undefined)` right after creation
    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }

    /// Hook run by the scheduler just before each queued run
    pub fn before(mut self, hook: impl FnMut() + 'static) -> Self {
        self.before = Some(Box::new(hook));
        self
    }

    /// Hook run after a flush pass that included this watcher
    pub fn after(mut self, hook: impl FnMut() + 'static) -> Self {
        self.after = Some(Box::new(hook));
        self
    }

    pub fn registry(mut self, registry: &WatcherRegistry) -> Self {
        self.registry = Some(registry.clone());
        self
    }

    pub fn expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = expression.into();
        self
    }

    /// Create the watcher, evaluating it once unless it is lazy
    pub fn build(self) -> Result<Watcher> {
        let watcher = Watcher(Rc::new(WatcherInner {
            id: NEXT_WATCHER_ID.fetch_add(1, Ordering::Relaxed),
            expression: self.expression,
            getter: RefCell::new(self.getter),
            callback: RefCell::new(self.callback),
            before: RefCell::new(self.before),
            after: RefCell::new(self.after),
            value: RefCell::new(Value::Undefined),
            active: Cell::new(true),
            dirty: Cell::new(self.lazy),
            lazy: self.lazy,
            sync: self.sync,
            deep: self.deep,
            user: self.user,
            deps: RefCell::new(DepSet::default()),
            new_deps: RefCell::new(DepSet::default()),
            registry: RefCell::new(None),
        }));

        if let Some(registry) = &self.registry {
            let key = registry.0.borrow_mut().insert(watcher.clone());
            *watcher.0.registry.borrow_mut() = Some((Rc::downgrade(&registry.0), key));
        }

        if !self.lazy {
            match watcher.evaluate() {
                Ok(value) => *watcher.0.value.borrow_mut() = value,
                Err(err) => {
                    watcher.teardown();
                    return Err(err);
                }
            }
        }

        if self.immediate {
            let value = watcher.value();
            untracked(|| watcher.invoke_callback(&value, &Value::Undefined))?;
        }

        tracing::trace!(id = watcher.id(), expression = %watcher.expression(), "watcher created");
        Ok(watcher)
    }
}

// =========================================================================
// Registry
// =========================================================================

/// The watchers owned by one component, torn down together
#[derive(Clone, Default)]
pub struct WatcherRegistry(Rc<RefCell<SlotMap<WatcherKey, Watcher>>>);

impl WatcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn get(&self, key: WatcherKey) -> Option<Watcher> {
        self.0.borrow().get(key).cloned()
    }

    /// Registered watchers in no particular order
    pub fn watchers(&self) -> Vec<Watcher> {
        self.0.borrow().values().cloned().collect()
    }

    /// Tear down every registered watcher
    pub fn teardown_all(&self) {
        let watchers = self.watchers();
        tracing::debug!(count = watchers.len(), "tearing down watcher registry");
        for watcher in watchers {
            watcher.teardown();
        }
    }
}

// =========================================================================
// User watchers
// =========================================================================

/// Options for [`watch`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WatchOptions {
    pub deep: bool,
    pub immediate: bool,
    pub sync: bool,
}

/// Watch `source` and call `callback` with `(new, old)` when it changes.
///
/// The result is a user watcher: errors from the source or the callback go
/// to the error channel. Call [`Watcher::teardown`] to stop watching.
pub fn watch(
    source: impl FnMut() -> Result<Value> + 'static,
    callback: impl FnMut(&Value, &Value) -> Result<()> + 'static,
    options: WatchOptions,
) -> Result<Watcher> {
    apply_options(Watcher::builder(source), options)
        .callback(callback)
        .build()
}

/// Watch a dot-delimited path under `root`
pub fn watch_path(
    root: &Value,
    path: &str,
    callback: impl FnMut(&Value, &Value) -> Result<()> + 'static,
    options: WatchOptions,
) -> Result<Watcher> {
    apply_options(Watcher::from_path(root, path), options)
        .callback(callback)
        .build()
}

fn apply_options(mut builder: WatcherBuilder, options: WatchOptions) -> WatcherBuilder {
    builder = builder.user();
    if options.deep {
        builder = builder.deep();
    }
    if options.sync {
        builder = builder.sync();
    }
    if options.immediate {
        builder = builder.immediate();
    }
    builder
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::observe;
    use crate::property::property_dep;
    use crate::value::ObjectRef;
    use pretty_assertions::assert_eq;

    fn state(pairs: &[(&str, i32)]) -> ObjectRef {
        let obj: ObjectRef = pairs.iter().map(|(k, v)| (*k, *v)).collect();
        observe(&Value::from(obj.clone()), false);
        obj
    }

    fn recorder() -> (Rc<RefCell<Vec<(Value, Value)>>>, impl FnMut(&Value, &Value) -> Result<()>) {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let sink = calls.clone();
        (calls, move |new: &Value, old: &Value| {
            sink.borrow_mut().push((new.clone(), old.clone()));
            Ok(())
        })
    }

    #[test]
    fn test_eager_watcher_evaluates_on_build() {
        let obj = state(&[("a", 1)]);
        let reader = obj.clone();
        let w = Watcher::builder(move || Ok(reader.get("a"))).build().unwrap();
        assert_eq!(w.value(), Value::from(1));
        assert!(w.depends_on(&property_dep(&obj, "a").unwrap()));
    }

    #[test]
    fn test_lazy_watcher_memoizes() {
        let obj = state(&[("a", 1)]);
        let calls = Rc::new(Cell::new(0));
        let (reader, counter) = (obj.clone(), calls.clone());
        let w = Watcher::builder(move || {
            counter.set(counter.get() + 1);
            Ok(reader.get("a"))
        })
        .lazy()
        .build()
        .unwrap();

        assert_eq!(calls.get(), 0);
        w.evaluate_if_dirty().unwrap();
        w.evaluate_if_dirty().unwrap();
        assert_eq!(calls.get(), 1);

        obj.set("a", 2).unwrap();
        assert!(w.is_dirty());
        assert_eq!(calls.get(), 1);
        assert_eq!(w.evaluate_if_dirty().unwrap(), Value::from(2));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_dependency_set_shrinks() {
        let obj = state(&[("flag", 1), ("a", 10), ("b", 20)]);
        let reader = obj.clone();
        let w = Watcher::builder(move || {
            if reader.get("flag") == Value::from(1) {
                Ok(reader.get("a"))
            } else {
                Ok(reader.get("b"))
            }
        })
        .sync()
        .build()
        .unwrap();

        let dep_a = property_dep(&obj, "a").unwrap();
        let dep_b = property_dep(&obj, "b").unwrap();
        assert!(w.depends_on(&dep_a));
        assert!(!w.depends_on(&dep_b));

        obj.set("flag", 0).unwrap();
        assert!(!w.depends_on(&dep_a));
        assert!(w.depends_on(&dep_b));
        assert!(!dep_a.has_subscriber(&w));
        assert_eq!(w.dep_count(), 2);
    }

    #[test]
    fn test_sync_callback_receives_new_and_old() {
        let obj = state(&[("a", 1)]);
        let (calls, callback) = recorder();
        let reader = obj.clone();
        let _watcher = Watcher::builder(move || Ok(reader.get("a")))
            .sync()
            .callback(callback)
            .build()
            .unwrap();

        obj.set("a", 2).unwrap();
        obj.set("a", 2).unwrap();
        assert_eq!(*calls.borrow(), vec![(Value::from(2), Value::from(1))]);
    }

    #[test]
    fn test_internal_getter_error_is_returned() {
        let err = Watcher::builder(|| Err(ReactiveError::evaluation("nope")))
            .build()
            .unwrap_err();
        assert!(matches!(err, ReactiveError::Evaluation(_)));
    }

    #[test]
    fn test_user_getter_error_is_reported() {
        let reported = Rc::new(RefCell::new(Vec::new()));
        let sink = reported.clone();
        config::set_error_handler(move |_, info| sink.borrow_mut().push(info.to_string()));

        let w = Watcher::builder(|| Err(ReactiveError::evaluation("nope")))
            .user()
            .expression("broken")
            .build()
            .unwrap();
        assert_eq!(w.value(), Value::Undefined);
        assert_eq!(*reported.borrow(), vec!["getter for watcher \"broken\"".to_string()]);
    }

    #[test]
    fn test_user_callback_error_is_reported() {
        let reported = Rc::new(Cell::new(0));
        let sink = reported.clone();
        config::set_error_handler(move |_, _| sink.set(sink.get() + 1));

        let obj = state(&[("a", 1)]);
        let reader = obj.clone();
        let _watcher = watch(
            move || Ok(reader.get("a")),
            |_, _| Err(ReactiveError::callback("bad")),
            WatchOptions {
                sync: true,
                ..Default::default()
            },
        )
        .unwrap();

        obj.set("a", 2).unwrap();
        assert_eq!(reported.get(), 1);
    }

    #[test]
    fn test_reentrant_callback_is_reported() {
        let reported = Rc::new(RefCell::new(Vec::new()));
        let sink = reported.clone();
        config::set_error_handler(move |err, _| sink.borrow_mut().push(err.to_string()));

        let obj = state(&[("a", 1)]);
        let (reader, writer) = (obj.clone(), obj.clone());
        let _watcher = watch(
            move || Ok(reader.get("a")),
            move |new, _| {
                let next = new.as_number().unwrap_or(0.0) + 1.0;
                writer.set("a", next)
            },
            WatchOptions {
                sync: true,
                ..Default::default()
            },
        )
        .unwrap();

        obj.set("a", 2).unwrap();
        assert_eq!(obj.get("a"), Value::from(3));
        assert_eq!(reported.borrow().len(), 1);
        assert!(reported.borrow()[0].contains("re-entered"));
    }

    #[test]
    fn test_immediate_fires_with_undefined_old() {
        let obj = state(&[("a", 5)]);
        let (calls, callback) = recorder();
        let reader = obj.clone();
        let _watcher = watch(
            move || Ok(reader.get("a")),
            callback,
            WatchOptions {
                immediate: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(*calls.borrow(), vec![(Value::from(5), Value::Undefined)]);
    }

    #[test]
    fn test_deep_watcher_sees_nested_writes() {
        let inner = ObjectRef::from_pairs([("leaf", 1)]);
        let root = ObjectRef::from_pairs([("inner", inner.clone())]);
        observe(&Value::from(root.clone()), false);

        let (calls, callback) = recorder();
        let reader = root.clone();
        let _watcher = watch(
            move || Ok(reader.get("inner")),
            callback,
            WatchOptions {
                deep: true,
                sync: true,
                ..Default::default()
            },
        )
        .unwrap();

        inner.set("leaf", 2).unwrap();
        assert_eq!(calls.borrow().len(), 1);
    }

    #[test]
    fn test_path_watcher() {
        let inner = ObjectRef::from_pairs([("b", 1)]);
        let root = Value::from(ObjectRef::from_pairs([("a", inner.clone())]));
        observe(&root, false);

        let (calls, callback) = recorder();
        let _watcher = watch_path(
            &root,
            "a.b",
            callback,
            WatchOptions {
                sync: true,
                ..Default::default()
            },
        )
        .unwrap();

        inner.set("b", 2).unwrap();
        assert_eq!(*calls.borrow(), vec![(Value::from(2), Value::from(1))]);
    }

    #[test]
    fn test_invalid_path_warns() {
        let warnings = Rc::new(Cell::new(0));
        let sink = warnings.clone();
        config::set_warn_handler(move |_| sink.set(sink.get() + 1));

        let w = Watcher::from_path(&Value::Null, "a[0]").build().unwrap();
        assert_eq!(w.value(), Value::Undefined);
        assert_eq!(warnings.get(), 1);
    }

    #[test]
    fn test_teardown_unsubscribes_and_deactivates() {
        let obj = state(&[("a", 1)]);
        let (calls, callback) = recorder();
        let reader = obj.clone();
        let w = Watcher::builder(move || Ok(reader.get("a")))
            .sync()
            .callback(callback)
            .build()
            .unwrap();

        w.teardown();
        assert!(!w.is_active());
        assert_eq!(property_dep(&obj, "a").unwrap().subscriber_count(), 0);
        obj.set("a", 2).unwrap();
        assert!(calls.borrow().is_empty());
        assert!(w.run().is_ok());
    }

    #[test]
    fn test_registry_teardown_all() {
        let registry = WatcherRegistry::new();
        let obj = state(&[("a", 1)]);
        for _ in 0..3 {
            let reader = obj.clone();
            Watcher::builder(move || Ok(reader.get("a")))
                .registry(&registry)
                .build()
                .unwrap();
        }
        assert_eq!(registry.len(), 3);
        assert_eq!(property_dep(&obj, "a").unwrap().subscriber_count(), 3);

        registry.teardown_all();
        assert!(registry.is_empty());
        assert_eq!(property_dep(&obj, "a").unwrap().subscriber_count(), 0);
    }

    #[test]
    fn test_failed_build_leaves_registry() {
        let registry = WatcherRegistry::new();
        let result = Watcher::builder(|| Err(ReactiveError::evaluation("x")))
            .registry(&registry)
            .build();
        assert!(result.is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_getter_writing_its_own_dependency_stays_subscribed() {
        let reported = Rc::new(RefCell::new(Vec::new()));
        let sink = reported.clone();
        config::set_error_handler(move |err, _| sink.borrow_mut().push(err.to_string()));

        let obj = state(&[("a", 1)]);
        let (calls, callback) = recorder();
        let reader = obj.clone();
        let w = watch(
            move || {
                if reader.get("a").as_number().unwrap_or(0.0) > 10.0 {
                    reader.set("a", 10)?;
                }
                Ok(reader.get("a"))
            },
            callback,
            WatchOptions {
                sync: true,
                ..Default::default()
            },
        )
        .unwrap();

        obj.set("a", 20).unwrap();
        let dep = property_dep(&obj, "a").unwrap();
        assert!(w.depends_on(&dep));
        assert!(dep.has_subscriber(&w));
        assert_eq!(*calls.borrow(), vec![(Value::from(10), Value::from(1))]);
        assert_eq!(reported.borrow().len(), 1);
        assert!(reported.borrow()[0].contains("re-entered"));

        obj.set("a", 5).unwrap();
        assert_eq!(
            *calls.borrow(),
            vec![
                (Value::from(10), Value::from(1)),
                (Value::from(5), Value::from(10)),
            ]
        );
    }

    #[test]
    fn test_dropped_watcher_releases_its_graph() {
        let marker = Rc::new(());
        {
            let obj = state(&[("a", 1)]);
            let (reader, held) = (obj.clone(), marker.clone());
            let _watcher = Watcher::builder(move || {
                let _ = Rc::strong_count(&held);
                Ok(reader.get("a"))
            })
            .build()
            .unwrap();
            assert_eq!(Rc::strong_count(&marker), 2);
        }
        assert_eq!(Rc::strong_count(&marker), 1);
    }

    #[test]
    fn test_dropped_watcher_stops_reacting() {
        let obj = state(&[("a", 1)]);
        let (calls, callback) = recorder();
        let reader = obj.clone();
        drop(
            Watcher::builder(move || Ok(reader.get("a")))
                .sync()
                .callback(callback)
                .build()
                .unwrap(),
        );

        obj.set("a", 2).unwrap();
        assert!(calls.borrow().is_empty());
        assert_eq!(property_dep(&obj, "a").unwrap().subscriber_count(), 0);
    }
}
