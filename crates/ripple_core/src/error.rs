//! Error types for the reactive core

use thiserror::Error;

/// Errors produced by watchers, interceptors, and the tick primitive
#[derive(Error, Debug)]
pub enum ReactiveError {
    /// A watcher's re-evaluation function failed
    #[error("evaluation failed: {0}")]
    Evaluation(String),

    /// A watcher callback or tick callback failed
    #[error("callback failed: {0}")]
    Callback(String),

    /// Write to a property that only has a read accessor, or a frozen property
    #[error("cannot assign to read-only property \"{0}\"")]
    ReadOnlyProperty(String),

    /// New key on a container that no longer accepts properties
    #[error("cannot add property \"{0}\": object is not extensible")]
    NotExtensible(String),

    /// Structural mutation of a frozen sequence
    #[error("cannot mutate a frozen sequence")]
    FrozenSequence,

    /// A watcher tried to evaluate (or call back) while already doing so
    #[error("watcher {0} re-entered its own evaluation")]
    Reentrant(u64),

    /// A host scheduling primitive refused the continuation
    #[error("host scheduler unavailable: {0}")]
    SchedulerUnavailable(String),

    /// A flush continuation was run on a thread other than the engine's
    #[error("flush continuation run off the engine thread")]
    ForeignThread,

    /// Failed to read a config file
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// Config text did not parse
    #[error("invalid config: {0}")]
    Config(#[from] toml::de::Error),
}

impl ReactiveError {
    /// Convenience constructor for getter failures
    pub fn evaluation(msg: impl Into<String>) -> Self {
        Self::Evaluation(msg.into())
    }

    /// Convenience constructor for callback failures
    pub fn callback(msg: impl Into<String>) -> Self {
        Self::Callback(msg.into())
    }
}

/// Result type for reactive operations
pub type Result<T> = std::result::Result<T, ReactiveError>;
