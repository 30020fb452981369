//! Property interception
//!
//! [`define_reactive`] turns one property of one object into an intercepted
//! record: a dependency, the captured value (or the prior accessor pair), and
//! the observer of the value if it is itself a container. Reads through
//! [`ObjectRef::get`] register the active watcher; writes through
//! [`ObjectRef::set`] notify.

use std::rc::Rc;

use crate::dep::{self, Dep};
use crate::error::{ReactiveError, Result};
use crate::observer::{self, depend_array, Observer};
use crate::value::{GetFn, ObjectRef, Property, SetFn, Slot, Value};

/// Hook called before an intercepted write goes through, with the new value
pub type CustomSetter = Rc<dyn Fn(&Value)>;

/// Per-property interception record
#[derive(Clone)]
pub(crate) struct Interceptor {
    pub(crate) dep: Dep,
    pub(crate) getter: Option<GetFn>,
    pub(crate) setter: Option<SetFn>,
    pub(crate) value: Value,
    pub(crate) child: Option<Observer>,
    pub(crate) custom_setter: Option<CustomSetter>,
    pub(crate) shallow: bool,
}

/// Install an interceptor on `obj[key]`.
///
/// Non-configurable and already intercepted properties are left alone. When
/// `initial` is `None` the current value is captured. Unless `shallow`, the
/// value is observed so nested containers become reactive too.
pub fn define_reactive(
    obj: &ObjectRef,
    key: &str,
    initial: Option<Value>,
    custom_setter: Option<CustomSetter>,
    shallow: bool,
) {
    let (getter, setter, current) = {
        let data = obj.data();
        match data.props.get(key) {
            Some(prop) if !prop.configurable => return,
            Some(Property {
                slot: Slot::Reactive(_),
                ..
            }) => return,
            Some(Property {
                slot: Slot::Accessor { get, set },
                ..
            }) => (get.clone(), set.clone(), None),
            Some(Property {
                slot: Slot::Data(value),
                ..
            }) => (None, None, Some(value.clone())),
            None => (None, None, None),
        }
    };

    let value = match initial {
        Some(value) => value,
        None => match (&getter, &setter) {
            (None, _) => current.unwrap_or_default(),
            (Some(get), Some(_)) => get(),
            (Some(_), None) => Value::Undefined,
        },
    };

    let child = if shallow {
        None
    } else {
        observer::observe(&value, false)
    };

    let interceptor = Interceptor {
        dep: Dep::new(),
        getter,
        setter,
        value,
        child,
        custom_setter,
        shallow,
    };
    let mut data = obj.data_mut();
    if data.props.contains_key(key) || data.extensible {
        data.props.insert(
            Rc::from(key),
            Property {
                slot: Slot::Reactive(interceptor),
                configurable: true,
                writable: true,
            },
        );
    }
}

/// The dependency of an intercepted property
pub fn property_dep(obj: &ObjectRef, key: &str) -> Option<Dep> {
    match obj.data().props.get(key) {
        Some(Property {
            slot: Slot::Reactive(i),
            ..
        }) => Some(i.dep.clone()),
        _ => None,
    }
}

pub(crate) fn get_property(obj: &ObjectRef, key: &str) -> Value {
    let slot = match obj.data().props.get(key) {
        None => return Value::Undefined,
        Some(prop) => match &prop.slot {
            Slot::Data(value) => return value.clone(),
            slot => slot.clone(),
        },
    };

    match slot {
        Slot::Accessor { get: Some(get), .. } => get(),
        Slot::Reactive(interceptor) => intercepted_get(interceptor),
        _ => Value::Undefined,
    }
}

fn intercepted_get(interceptor: Interceptor) -> Value {
    let value = match &interceptor.getter {
        Some(get) => get(),
        None => interceptor.value,
    };
    if dep::is_tracking() {
        interceptor.dep.depend();
        if let Some(child) = &interceptor.child {
            // Structural registration: keys added later with `set` notify
            // through the child's dep, not through any per-key dep.
            child.dep().depend();
            if let Value::Array(arr) = &value {
                depend_array(arr);
            }
        }
    }
    value
}

pub(crate) fn set_property(obj: &ObjectRef, key: &str, new_value: Value) -> Result<()> {
    let slot = {
        let data = obj.data();
        match data.props.get(key) {
            None => None,
            Some(prop) => {
                if let Slot::Data(_) = prop.slot {
                    if !prop.writable {
                        return Err(ReactiveError::ReadOnlyProperty(key.to_string()));
                    }
                }
                Some(prop.slot.clone())
            }
        }
    };

    match slot {
        None => {
            let mut data = obj.data_mut();
            if !data.extensible {
                return Err(ReactiveError::NotExtensible(key.to_string()));
            }
            data.props.insert(Rc::from(key), Property::data(new_value));
            Ok(())
        }
        Some(Slot::Data(_)) => {
            if let Some(prop) = obj.data_mut().props.get_mut(key) {
                prop.slot = Slot::Data(new_value);
            }
            Ok(())
        }
        Some(Slot::Accessor { set: Some(set), .. }) => {
            set(new_value);
            Ok(())
        }
        Some(Slot::Accessor { set: None, .. }) => {
            Err(ReactiveError::ReadOnlyProperty(key.to_string()))
        }
        Some(Slot::Reactive(interceptor)) => intercepted_set(obj, key, interceptor, new_value),
    }
}

fn intercepted_set(
    obj: &ObjectRef,
    key: &str,
    interceptor: Interceptor,
    new_value: Value,
) -> Result<()> {
    let current = match &interceptor.getter {
        Some(get) => get(),
        None => interceptor.value.clone(),
    };
    if current.same(&new_value) {
        return Ok(());
    }
    if let Some(custom_setter) = &interceptor.custom_setter {
        custom_setter(&new_value);
    }
    if interceptor.getter.is_some() && interceptor.setter.is_none() {
        return Err(ReactiveError::ReadOnlyProperty(key.to_string()));
    }

    if let Some(set) = &interceptor.setter {
        set(new_value.clone());
    }
    let child = if interceptor.shallow {
        None
    } else {
        observer::observe(&new_value, false)
    };
    {
        let mut data = obj.data_mut();
        if let Some(Property {
            slot: Slot::Reactive(stored),
            ..
        }) = data.props.get_mut(key)
        {
            if stored.setter.is_none() {
                stored.value = new_value;
            }
            stored.child = child;
        }
    }

    interceptor.dep.notify();
    Ok(())
}
