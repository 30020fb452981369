//! Engine configuration and the error/warning channels
//!
//! Configuration is per thread, like the rest of the engine state. Hosts
//! usually install it once at startup:
//!
//! ```rust
//! use ripple_core::config::{self, ReactiveConfig};
//!
//! let cfg = ReactiveConfig::from_toml_str("max_update_count = 50").unwrap();
//! config::configure(cfg);
//! assert_eq!(config::current().max_update_count, 50);
//! ```

use std::cell::RefCell;
use std::fs;
use std::path::Path;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::{ReactiveError, Result};

/// Callback receiving reported errors together with a short context string
pub type ErrorHandler = Rc<dyn Fn(&ReactiveError, &str)>;

/// Callback receiving warning messages
pub type WarnHandler = Rc<dyn Fn(&str)>;

/// Tunables for the engine
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReactiveConfig {
    /// Batch watcher runs into the next tick. When false the scheduler flushes
    /// synchronously and notifications run in ascending watcher id order.
    pub async_mode: bool,
    /// Suppress all warnings
    pub silent: bool,
    /// Re-entries of one watcher within a single flush before it is halted
    pub max_update_count: u32,
}

impl Default for ReactiveConfig {
    fn default() -> Self {
        Self {
            async_mode: true,
            silent: false,
            max_update_count: 100,
        }
    }
}

impl ReactiveConfig {
    /// Parse a config from TOML text. Missing keys keep their defaults.
    pub fn from_toml_str(src: &str) -> Result<Self> {
        Ok(toml::from_str(src)?)
    }

    /// Load a config from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

#[derive(Default)]
struct Channels {
    error_handler: Option<ErrorHandler>,
    warn_handler: Option<WarnHandler>,
}

thread_local! {
    static CONFIG: RefCell<ReactiveConfig> = RefCell::new(ReactiveConfig::default());
    static CHANNELS: RefCell<Channels> = RefCell::new(Channels::default());
}

/// Install a config for the current thread
pub fn configure(config: ReactiveConfig) {
    CONFIG.with(|c| *c.borrow_mut() = config);
}

/// Snapshot of the active config
pub fn current() -> ReactiveConfig {
    CONFIG.with(|c| c.borrow().clone())
}

/// Modify the active config in place
pub fn update(f: impl FnOnce(&mut ReactiveConfig)) {
    CONFIG.with(|c| f(&mut c.borrow_mut()));
}

pub(crate) fn async_mode() -> bool {
    CONFIG.with(|c| c.borrow().async_mode)
}

pub(crate) fn max_update_count() -> u32 {
    CONFIG.with(|c| c.borrow().max_update_count)
}

/// Route reported errors to `handler` instead of the log
pub fn set_error_handler(handler: impl Fn(&ReactiveError, &str) + 'static) {
    CHANNELS.with(|c| c.borrow_mut().error_handler = Some(Rc::new(handler)));
}

/// Route warnings to `handler` instead of the log
pub fn set_warn_handler(handler: impl Fn(&str) + 'static) {
    CHANNELS.with(|c| c.borrow_mut().warn_handler = Some(Rc::new(handler)));
}

/// Remove installed handlers, falling back to `tracing`
pub fn clear_handlers() {
    CHANNELS.with(|c| *c.borrow_mut() = Channels::default());
}

/// Report an error that must not propagate to the caller
pub fn handle_error(err: &ReactiveError, info: &str) {
    // Clone the handler out so it may install handlers itself
    let handler = CHANNELS.with(|c| c.borrow().error_handler.clone());
    match handler {
        Some(handler) => handler(err, info),
        None => tracing::error!("Error in {}: {}", info, err),
    }
}

/// Emit a warning unless the config is silent
pub fn warn(msg: &str) {
    if CONFIG.with(|c| c.borrow().silent) {
        return;
    }
    let handler = CHANNELS.with(|c| c.borrow().warn_handler.clone());
    match handler {
        Some(handler) => handler(msg),
        None => tracing::warn!("{}", msg),
    }
}
