//! Ripple Core Runtime
//!
//! Dependency tracking and batched update scheduling for a component UI
//! runtime:
//!
//! - **Observation**: containers are walked once and every property gets an
//!   interceptor; reads register the active watcher, writes notify
//! - **Watchers**: render, computed (lazy), and user watchers with exact
//!   per-evaluation dependency sets
//! - **Scheduling**: dirty watchers run once per tick in creation order,
//!   with runaway-loop containment
//!
//! # Example
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use ripple_core::{observe, tick, ObjectRef, Value, Watcher};
//!
//! let state = ObjectRef::from_pairs([("a", 1)]);
//! observe(&Value::from(state.clone()), true);
//!
//! let calls = Rc::new(RefCell::new(Vec::new()));
//! let (reader, sink) = (state.clone(), calls.clone());
//! let _render = Watcher::builder(move || Ok(reader.get("a")))
//!     .callback(move |new, old| {
//!         sink.borrow_mut().push((new.clone(), old.clone()));
//!         Ok(())
//!     })
//!     .build()
//!     .unwrap();
//!
//! state.set("a", 2).unwrap();
//! assert!(calls.borrow().is_empty());
//!
//! tick::run_microtasks();
//! assert_eq!(*calls.borrow(), vec![(Value::from(2), Value::from(1))]);
//! ```

pub mod array;
pub mod computed;
pub mod config;
pub mod dep;
pub mod error;
pub mod observer;
pub mod path;
pub mod property;
pub mod scheduler;
pub mod tick;
pub mod traverse;
pub mod value;
pub mod watcher;

pub use computed::{define_computed, Computed};
pub use config::ReactiveConfig;
pub use dep::{untracked, Dep};
pub use error::{ReactiveError, Result};
pub use observer::{del, observe, set, toggle_observing, without_observing, Observer, PropKey};
pub use path::{parse_path, PropertyPath};
pub use property::{define_reactive, CustomSetter};
pub use scheduler::queue_watcher;
pub use tick::{
    next_tick, next_tick_deferred, ChannelScheduler, HostScheduler, ScheduledFlush, Tick, TickKind,
};
pub use traverse::traverse;
pub use value::{ArrayRef, GetFn, NodeRef, ObjectRef, SetFn, Value};
pub use watcher::{watch, watch_path, WatchOptions, Watcher, WatcherBuilder, WatcherKey, WatcherRegistry};
