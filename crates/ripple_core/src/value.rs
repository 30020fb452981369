//! Dynamic value model
//!
//! Reactive state is a graph of [`Value`]s. Containers ([`ObjectRef`],
//! [`ArrayRef`]) are shared handles compared by identity; everything else is
//! compared by value. Object properties are stored in an insertion-ordered
//! table where each entry is either plain data, a user accessor pair, or an
//! installed property interceptor.

use std::cell::{Ref, RefCell, RefMut};
use std::cmp::Ordering;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use crate::error::{ReactiveError, Result};
use crate::observer::Observer;
use crate::property::{self, Interceptor};

/// Read accessor installed on a property
pub type GetFn = Rc<dyn Fn() -> Value>;

/// Write accessor installed on a property
pub type SetFn = Rc<dyn Fn(Value)>;

/// A value in the reactive data graph
#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Object(ObjectRef),
    Array(ArrayRef),
    /// Framework-internal render node. Never observed or traversed.
    Node(NodeRef),
}

impl Value {
    /// Identity comparison used by the write path.
    ///
    /// Containers compare by pointer, primitives by value, and NaN is the
    /// same as NaN.
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            _ => self == other,
        }
    }

    /// True for objects, arrays and render nodes
    pub fn is_object_like(&self) -> bool {
        matches!(self, Value::Object(_) | Value::Array(_) | Value::Node(_))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayRef> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// The observer attached to this container, if any
    pub fn observer(&self) -> Option<Observer> {
        match self {
            Value::Object(o) => o.observer(),
            Value::Array(a) => a.observer(),
            _ => None,
        }
    }

    /// Frozen containers are skipped by observation and traversal
    pub fn is_frozen(&self) -> bool {
        match self {
            Value::Object(o) => o.is_frozen(),
            Value::Array(a) => a.is_frozen(),
            _ => false,
        }
    }

    /// String form used for default sequence ordering
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::Str(s) => s.to_string(),
            Value::Object(_) => "[object Object]".to_string(),
            Value::Array(a) => a
                .to_vec()
                .iter()
                .map(|v| match v {
                    Value::Undefined | Value::Null => String::new(),
                    other => other.to_display_string(),
                })
                .collect::<Vec<_>>()
                .join(","),
            Value::Node(n) => format!("[node {}]", n.tag()),
        }
    }

    /// Default ordering for `ArrayRef::sort`: undefined last, everything else
    /// by its string form.
    pub fn default_order(a: &Value, b: &Value) -> Ordering {
        match (a.is_undefined(), b.is_undefined()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => a.to_display_string().cmp(&b.to_display_string()),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let text = if n > 0.0 { "Infinity" } else { "-Infinity" };
        text.to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Array(a), Value::Array(b)) => a.ptr_eq(b),
            (Value::Node(a), Value::Node(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Rc::from(s))
    }
}

impl From<ObjectRef> for Value {
    fn from(o: ObjectRef) -> Self {
        Value::Object(o)
    }
}

impl From<ArrayRef> for Value {
    fn from(a: ArrayRef) -> Self {
        Value::Array(a)
    }
}

impl From<NodeRef> for Value {
    fn from(n: NodeRef) -> Self {
        Value::Node(n)
    }
}

// =========================================================================
// Objects
// =========================================================================

/// Storage behind a property key
#[derive(Clone)]
pub(crate) enum Slot {
    Data(Value),
    Accessor {
        get: Option<GetFn>,
        set: Option<SetFn>,
    },
    Reactive(Interceptor),
}

#[derive(Clone)]
pub(crate) struct Property {
    pub(crate) slot: Slot,
    pub(crate) configurable: bool,
    pub(crate) writable: bool,
}

impl Property {
    pub(crate) fn data(value: Value) -> Self {
        Self {
            slot: Slot::Data(value),
            configurable: true,
            writable: true,
        }
    }
}

pub(crate) struct ObjectData {
    pub(crate) props: IndexMap<Rc<str>, Property>,
    pub(crate) extensible: bool,
    pub(crate) frozen: bool,
    /// Framework-owned instance; never observed, rejects structural helpers
    pub(crate) internal: bool,
    pub(crate) observer: Option<Observer>,
}

/// Shared handle to a keyed container
#[derive(Clone)]
pub struct ObjectRef(Rc<RefCell<ObjectData>>);

impl ObjectRef {
    pub fn new() -> Self {
        Self(Rc::new(RefCell::new(ObjectData {
            props: IndexMap::new(),
            extensible: true,
            frozen: false,
            internal: false,
            observer: None,
        })))
    }

    /// Create a framework-owned object (e.g. a component instance).
    /// Such objects are never observed.
    pub fn new_internal() -> Self {
        let obj = Self::new();
        obj.0.borrow_mut().internal = true;
        obj
    }

    /// Build an object from key/value pairs, in order
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<Rc<str>>,
        V: Into<Value>,
    {
        let obj = Self::new();
        {
            let mut data = obj.0.borrow_mut();
            for (k, v) in pairs {
                data.props.insert(k.into(), Property::data(v.into()));
            }
        }
        obj
    }

    pub(crate) fn data(&self) -> Ref<'_, ObjectData> {
        self.0.borrow()
    }

    pub(crate) fn data_mut(&self) -> RefMut<'_, ObjectData> {
        self.0.borrow_mut()
    }

    pub(crate) fn downgrade(&self) -> Weak<RefCell<ObjectData>> {
        Rc::downgrade(&self.0)
    }

    pub(crate) fn from_inner(inner: Rc<RefCell<ObjectData>>) -> Self {
        Self(inner)
    }

    /// Read a property, registering the active watcher if it is intercepted
    pub fn get(&self, key: &str) -> Value {
        property::get_property(self, key)
    }

    /// Write a property through its interceptor or accessor.
    ///
    /// Writing an unknown key adds a plain, non-reactive property; use
    /// [`crate::observer::set`] to add a reactive one.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        property::set_property(self, key, value.into())
    }

    /// Install a user accessor pair, replacing any existing configurable
    /// property.
    pub fn define_accessor(
        &self,
        key: &str,
        get: Option<GetFn>,
        set: Option<SetFn>,
    ) -> Result<()> {
        let mut data = self.0.borrow_mut();
        match data.props.get(key).map(|prop| prop.configurable) {
            Some(false) => return Err(ReactiveError::ReadOnlyProperty(key.to_string())),
            None if !data.extensible => {
                return Err(ReactiveError::NotExtensible(key.to_string()))
            }
            _ => {}
        }
        data.props.insert(
            Rc::from(key),
            Property {
                slot: Slot::Accessor { get, set },
                configurable: true,
                writable: true,
            },
        );
        Ok(())
    }

    /// Mark a property non-configurable. Interception skips such properties.
    pub fn seal_property(&self, key: &str) {
        if let Some(prop) = self.0.borrow_mut().props.get_mut(key) {
            prop.configurable = false;
        }
    }

    /// Remove a property without notifying anyone.
    ///
    /// Returns false for missing or non-configurable keys.
    pub fn remove(&self, key: &str) -> bool {
        let mut data = self.0.borrow_mut();
        let removable = data.props.get(key).is_some_and(|prop| prop.configurable);
        if removable {
            data.props.shift_remove(key);
        }
        removable
    }

    pub fn has(&self, key: &str) -> bool {
        self.0.borrow().props.contains_key(key)
    }

    /// Own keys in insertion order. Reading keys does not register dependencies.
    pub fn keys(&self) -> Vec<Rc<str>> {
        self.0.borrow().props.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().props.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().props.is_empty()
    }

    /// Forbid adding new keys
    pub fn prevent_extensions(&self) {
        self.0.borrow_mut().extensible = false;
    }

    /// Forbid adding keys, reconfiguring keys, and writing data properties
    pub fn freeze(&self) {
        let mut data = self.0.borrow_mut();
        data.extensible = false;
        data.frozen = true;
        for prop in data.props.values_mut() {
            prop.configurable = false;
            prop.writable = false;
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.0.borrow().frozen
    }

    pub fn is_extensible(&self) -> bool {
        self.0.borrow().extensible
    }

    pub fn is_internal(&self) -> bool {
        self.0.borrow().internal
    }

    pub fn observer(&self) -> Option<Observer> {
        self.0.borrow().observer.clone()
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

impl Default for ObjectRef {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> FromIterator<(K, V)> for ObjectRef
where
    K: Into<Rc<str>>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from_pairs(iter)
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Keys only; values may be cyclic
        match self.0.try_borrow() {
            Ok(data) => f
                .debug_struct("ObjectRef")
                .field("keys", &data.props.keys().collect::<Vec<_>>())
                .field("observed", &data.observer.is_some())
                .finish(),
            Err(_) => f.write_str("ObjectRef(<borrowed>)"),
        }
    }
}

// =========================================================================
// Arrays
// =========================================================================

pub(crate) struct ArrayData {
    pub(crate) items: Vec<Value>,
    pub(crate) extensible: bool,
    pub(crate) frozen: bool,
    pub(crate) observer: Option<Observer>,
}

/// Shared handle to a sequence.
///
/// Reads are plain. The structural mutation methods (`push`, `pop`, `shift`,
/// `unshift`, `splice`, `sort`, `reverse`) are intercepted and notify the
/// sequence's observer. Index assignment through [`ArrayRef::set_raw`] is not
/// intercepted.
#[derive(Clone)]
pub struct ArrayRef(Rc<RefCell<ArrayData>>);

impl ArrayRef {
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    pub fn from_vec(items: Vec<Value>) -> Self {
        Self(Rc::new(RefCell::new(ArrayData {
            items,
            extensible: true,
            frozen: false,
            observer: None,
        })))
    }

    pub(crate) fn data(&self) -> Ref<'_, ArrayData> {
        self.0.borrow()
    }

    pub(crate) fn data_mut(&self) -> RefMut<'_, ArrayData> {
        self.0.borrow_mut()
    }

    pub(crate) fn downgrade(&self) -> Weak<RefCell<ArrayData>> {
        Rc::downgrade(&self.0)
    }

    pub(crate) fn from_inner(inner: Rc<RefCell<ArrayData>>) -> Self {
        Self(inner)
    }

    /// Element at `index`, or `Undefined` past the end
    pub fn get(&self, index: usize) -> Value {
        self.0.borrow().items.get(index).cloned().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().items.is_empty()
    }

    /// Snapshot of the elements
    pub fn to_vec(&self) -> Vec<Value> {
        self.0.borrow().items.clone()
    }

    /// Iterate over a snapshot, so the sequence may be mutated meanwhile
    pub fn iter(&self) -> std::vec::IntoIter<Value> {
        self.to_vec().into_iter()
    }

    /// Assign an element directly. Not intercepted: nobody is notified.
    pub fn set_raw(&self, index: usize, value: impl Into<Value>) -> Result<()> {
        let mut data = self.0.borrow_mut();
        if data.frozen {
            return Err(ReactiveError::FrozenSequence);
        }
        if index >= data.items.len() {
            if !data.extensible {
                return Err(ReactiveError::NotExtensible(index.to_string()));
            }
            let len = index
                .checked_add(1)
                .ok_or_else(|| ReactiveError::NotExtensible(index.to_string()))?;
            data.items.resize(len, Value::Undefined);
        }
        data.items[index] = value.into();
        Ok(())
    }

    pub fn prevent_extensions(&self) {
        self.0.borrow_mut().extensible = false;
    }

    pub fn freeze(&self) {
        let mut data = self.0.borrow_mut();
        data.extensible = false;
        data.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.0.borrow().frozen
    }

    pub fn is_extensible(&self) -> bool {
        self.0.borrow().extensible
    }

    pub fn observer(&self) -> Option<Observer> {
        self.0.borrow().observer.clone()
    }

    pub fn ptr_eq(&self, other: &ArrayRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

impl Default for ArrayRef {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Into<Value>> FromIterator<V> for ArrayRef {
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
        Self::from_vec(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Debug for ArrayRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(data) => f
                .debug_struct("ArrayRef")
                .field("len", &data.items.len())
                .field("observed", &data.observer.is_some())
                .finish(),
            Err(_) => f.write_str("ArrayRef(<borrowed>)"),
        }
    }
}

// =========================================================================
// Render nodes
// =========================================================================

/// Opaque render node produced by the render step
#[derive(Clone, Debug)]
pub struct NodeRef(Rc<NodeData>);

#[derive(Debug)]
struct NodeData {
    tag: Rc<str>,
}

impl NodeRef {
    pub fn new(tag: &str) -> Self {
        Self(Rc::new(NodeData { tag: Rc::from(tag) }))
    }

    pub fn tag(&self) -> &str {
        &self.0.tag
    }

    pub fn ptr_eq(&self, other: &NodeRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// Non-owning reference from an observer back to its container
#[derive(Clone)]
pub(crate) enum WeakContainer {
    Object(Weak<RefCell<ObjectData>>),
    Array(Weak<RefCell<ArrayData>>),
}

impl WeakContainer {
    pub(crate) fn upgrade(&self) -> Option<Value> {
        match self {
            WeakContainer::Object(w) => w.upgrade().map(|o| Value::Object(ObjectRef::from_inner(o))),
            WeakContainer::Array(w) => w.upgrade().map(|a| Value::Array(ArrayRef::from_inner(a))),
        }
    }
}
