//! Computed values
//!
//! A [`Computed`] is a lazy watcher read through one protocol: re-evaluate
//! if dirty, then hand every dependency to whichever watcher is reading.
//! A render watcher that reads a computed therefore subscribes directly to
//! the computed's inputs and is notified when they change.

use std::rc::Rc;

use crate::config;
use crate::dep;
use crate::error::Result;
use crate::value::{ObjectRef, Value};
use crate::watcher::Watcher;

/// Memoized derived value
#[derive(Clone, Debug)]
pub struct Computed {
    watcher: Watcher,
}

impl Computed {
    pub fn new(getter: impl FnMut() -> Result<Value> + 'static) -> Result<Self> {
        let watcher = Watcher::builder(getter)
            .lazy()
            .expression("computed")
            .build()?;
        Ok(Self { watcher })
    }

    /// Current value, re-evaluated only if an input changed since last read
    pub fn get(&self) -> Result<Value> {
        let value = self.watcher.evaluate_if_dirty()?;
        if dep::is_tracking() {
            self.watcher.depend_on_all();
        }
        Ok(value)
    }

    pub fn is_dirty(&self) -> bool {
        self.watcher.is_dirty()
    }

    pub fn watcher(&self) -> &Watcher {
        &self.watcher
    }

    pub fn teardown(&self) {
        self.watcher.teardown();
    }
}

/// Install a computed value as a read-only accessor `obj[key]`.
///
/// Evaluation errors are reported and read as `Undefined`.
pub fn define_computed(
    obj: &ObjectRef,
    key: &str,
    getter: impl FnMut() -> Result<Value> + 'static,
) -> Result<Computed> {
    let computed = Computed::new(getter)?;
    let reader = computed.clone();
    let info = format!("computed property \"{key}\"");
    obj.define_accessor(
        key,
        Some(Rc::new(move || {
            reader.get().unwrap_or_else(|err| {
                config::handle_error(&err, &info);
                Value::Undefined
            })
        })),
        None,
    )?;
    Ok(computed)
}
