//! Container observation
//!
//! An [`Observer`] is attached to every reactive object or array. It owns the
//! container's structural dependency, which is notified when keys are added
//! or removed (objects) or when the sequence is structurally mutated (arrays).
//!
//! The structural helpers [`set`] and [`del`] exist because adding or
//! removing a key cannot be intercepted per key in advance.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use crate::config;
use crate::dep::Dep;
use crate::error::{ReactiveError, Result};
use crate::property::define_reactive;
use crate::value::{ArrayRef, ObjectRef, Value, WeakContainer};

thread_local! {
    static SHOULD_OBSERVE: Cell<bool> = const { Cell::new(true) };
}

/// Enable or disable creation of new observers on this thread
pub fn toggle_observing(enabled: bool) {
    SHOULD_OBSERVE.with(|flag| flag.set(enabled));
}

pub fn is_observing() -> bool {
    SHOULD_OBSERVE.with(Cell::get)
}

/// Run `f` with observer creation suspended, restoring the previous setting
pub fn without_observing<R>(f: impl FnOnce() -> R) -> R {
    let previous = is_observing();
    toggle_observing(false);
    let result = f();
    toggle_observing(previous);
    result
}

struct ObserverInner {
    dep: Dep,
    value: WeakContainer,
    /// Number of independent roots using this container as top-level state
    vm_count: Cell<u32>,
}

/// Per-container observation record
#[derive(Clone)]
pub struct Observer(Rc<ObserverInner>);

impl Observer {
    fn attach_object(obj: &ObjectRef) -> Self {
        let observer = Self(Rc::new(ObserverInner {
            dep: Dep::new(),
            value: WeakContainer::Object(obj.downgrade()),
            vm_count: Cell::new(0),
        }));
        // Attach before walking so cycles resolve to this observer
        obj.data_mut().observer = Some(observer.clone());
        for key in obj.keys() {
            define_reactive(obj, &key, None, None, false);
        }
        observer
    }

    fn attach_array(arr: &ArrayRef) -> Self {
        let observer = Self(Rc::new(ObserverInner {
            dep: Dep::new(),
            value: WeakContainer::Array(arr.downgrade()),
            vm_count: Cell::new(0),
        }));
        arr.data_mut().observer = Some(observer.clone());
        observe_array(&arr.to_vec());
        observer
    }

    /// The structural dependency of the container
    pub fn dep(&self) -> &Dep {
        &self.0.dep
    }

    /// The observed container, while it is alive
    pub fn value(&self) -> Option<Value> {
        self.0.value.upgrade()
    }

    pub fn vm_count(&self) -> u32 {
        self.0.vm_count.get()
    }

    pub fn ptr_eq(&self, other: &Observer) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("dep", &self.0.dep.id())
            .field("vm_count", &self.0.vm_count.get())
            .finish()
    }
}

/// Observe a container, returning its observer.
///
/// Idempotent: an already observed container returns its existing observer.
/// Returns `None` for primitives, render nodes, framework-internal objects,
/// non-extensible containers, and while observation is suspended. With
/// `as_root` the container's root-use count is incremented.
pub fn observe(value: &Value, as_root: bool) -> Option<Observer> {
    let observer = match value {
        Value::Object(obj) => match obj.observer() {
            Some(existing) => Some(existing),
            None if is_observing() && obj.is_extensible() && !obj.is_internal() => {
                Some(Observer::attach_object(obj))
            }
            None => None,
        },
        Value::Array(arr) => match arr.observer() {
            Some(existing) => Some(existing),
            None if is_observing() && arr.is_extensible() => Some(Observer::attach_array(arr)),
            None => None,
        },
        _ => return None,
    };

    if as_root {
        if let Some(observer) = &observer {
            observer.0.vm_count.set(observer.0.vm_count.get() + 1);
        }
    }
    observer
}

/// Observe each element of a sequence
pub fn observe_array(items: &[Value]) {
    for item in items {
        observe(item, false);
    }
}

/// Register the active watcher with the structural dependency of every
/// observed element, recursing into nested sequences.
pub fn depend_array(arr: &ArrayRef) {
    for item in arr.iter() {
        if let Some(observer) = item.observer() {
            observer.dep().depend();
        }
        if let Value::Array(inner) = &item {
            depend_array(inner);
        }
    }
}

/// Key for the structural helpers
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PropKey {
    Name(Rc<str>),
    Index(usize),
}

impl From<&str> for PropKey {
    fn from(name: &str) -> Self {
        PropKey::Name(Rc::from(name))
    }
}

impl From<String> for PropKey {
    fn from(name: String) -> Self {
        PropKey::Name(Rc::from(name))
    }
}

impl From<usize> for PropKey {
    fn from(index: usize) -> Self {
        PropKey::Index(index)
    }
}

impl fmt::Display for PropKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropKey::Name(name) => f.write_str(name),
            PropKey::Index(index) => write!(f, "{index}"),
        }
    }
}

/// Add or assign a property so that the addition is reactive.
///
/// Existing keys are assigned through their interceptor. New keys on an
/// observed object get an interceptor and the object's structural
/// dependency is notified. Unobserved objects are assigned directly. For
/// arrays the element is spliced in, which notifies through the array's
/// observer.
pub fn set(target: &Value, key: impl Into<PropKey>, value: impl Into<Value>) -> Result<Value> {
    let key = key.into();
    let value = value.into();
    match (target, &key) {
        (Value::Array(arr), PropKey::Index(index)) => {
            let index = *index;
            if arr.is_frozen() {
                return Err(ReactiveError::FrozenSequence);
            }
            let len = arr.len();
            if index >= len && !arr.is_extensible() {
                return Err(ReactiveError::NotExtensible(index.to_string()));
            }
            if index > len {
                // Pad so the splice lands at `index`
                arr.data_mut().items.resize(index, Value::Undefined);
            }
            arr.splice(index, 1, vec![value.clone()])?;
            Ok(value)
        }
        (Value::Object(obj), PropKey::Name(name)) => {
            if obj.has(name) {
                obj.set(name, value.clone())?;
                return Ok(value);
            }
            let observer = obj.observer();
            if obj.is_internal() || observer.as_ref().is_some_and(|ob| ob.vm_count() > 0) {
                config::warn(
                    "Avoid adding reactive properties to a framework instance or its root state \
                     at runtime - declare it upfront.",
                );
                return Ok(value);
            }
            let Some(observer) = observer else {
                obj.set(name, value.clone())?;
                return Ok(value);
            };
            define_reactive(obj, name, Some(value.clone()), None, false);
            observer.dep().notify();
            Ok(value)
        }
        (Value::Object(_), PropKey::Index(_)) | (Value::Array(_), PropKey::Name(_)) => {
            config::warn(&format!("Cannot set property \"{key}\": key kind does not match container"));
            Ok(value)
        }
        _ => {
            config::warn(&format!(
                "Cannot set reactive property \"{key}\" on undefined, null, or primitive value: {}",
                target.to_display_string()
            ));
            Ok(value)
        }
    }
}

/// Delete a property and notify the object's structural dependency.
pub fn del(target: &Value, key: impl Into<PropKey>) -> Result<()> {
    let key = key.into();
    match (target, &key) {
        (Value::Array(arr), PropKey::Index(index)) => {
            if *index < arr.len() {
                arr.splice(*index, 1, Vec::new())?;
            }
            Ok(())
        }
        (Value::Object(obj), PropKey::Name(name)) => {
            let observer = obj.observer();
            if obj.is_internal() || observer.as_ref().is_some_and(|ob| ob.vm_count() > 0) {
                config::warn(
                    "Avoid deleting properties on a framework instance or its root state \
                     - just set it to null.",
                );
                return Ok(());
            }
            if !obj.remove(name) {
                return Ok(());
            }
            if let Some(observer) = observer {
                observer.dep().notify();
            }
            Ok(())
        }
        (Value::Object(_), PropKey::Index(_)) | (Value::Array(_), PropKey::Name(_)) => {
            config::warn(&format!("Cannot delete property \"{key}\": key kind does not match container"));
            Ok(())
        }
        _ => {
            config::warn(&format!(
                "Cannot delete reactive property \"{key}\" on undefined, null, or primitive value: {}",
                target.to_display_string()
            ));
            Ok(())
        }
    }
}
