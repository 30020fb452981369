//! Deferred callback flush
//!
//! [`next_tick`] collects callbacks and runs them all in one continuation on
//! the next asynchronous tick. However many callbacks are registered during a
//! synchronous turn, only one continuation is scheduled.
//!
//! The continuation is handed to the first installed [`HostScheduler`] that
//! accepts it, microtask-class schedulers first. When none accepts (or none
//! is installed) it goes to a built-in thread-local microtask queue, which
//! the host drains with [`run_microtasks`].
//!
//! ```rust
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use ripple_core::tick::{next_tick, run_microtasks};
//!
//! let ran = Rc::new(Cell::new(0));
//! for _ in 0..3 {
//!     let ran = ran.clone();
//!     next_tick(move || {
//!         ran.set(ran.get() + 1);
//!         Ok(())
//!     });
//! }
//! assert_eq!(ran.get(), 0);
//! assert_eq!(run_microtasks(), 1);
//! assert_eq!(ran.get(), 3);
//! ```

use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::thread::{self, ThreadId};

use tokio::sync::{mpsc, oneshot};

use crate::config;
use crate::error::{ReactiveError, Result};

/// The flush entry point handed to host schedulers
pub type Continuation = fn();

/// Class of a host scheduling primitive
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TickKind {
    /// Runs before the host yields to rendering or I/O
    Microtask,
    /// Runs on a later turn of the host loop
    Macrotask,
}

/// A host primitive able to run a continuation later on this thread
pub trait HostScheduler {
    fn kind(&self) -> TickKind;

    /// Arrange for `continuation` to run once. An error means the primitive
    /// is unavailable and the next one should be tried.
    fn schedule(&self, continuation: Continuation) -> Result<()>;
}

struct TickState {
    callbacks: Vec<Box<dyn FnOnce()>>,
    pending: bool,
    using_microtask: bool,
}

thread_local! {
    static TICK: RefCell<TickState> = RefCell::new(TickState {
        callbacks: Vec::new(),
        pending: false,
        using_microtask: true,
    });
    static SCHEDULERS: RefCell<Vec<Rc<dyn HostScheduler>>> = RefCell::new(Vec::new());
    static MICROTASKS: RefCell<VecDeque<Continuation>> = RefCell::new(VecDeque::new());
}

/// Install a host scheduler for this thread.
///
/// Schedulers are tried microtask-class first, then in installation order.
pub fn install_scheduler(scheduler: impl HostScheduler + 'static) {
    SCHEDULERS.with(|schedulers| {
        let mut schedulers = schedulers.borrow_mut();
        schedulers.push(Rc::new(scheduler));
        schedulers.sort_by_key(|s| s.kind());
    });
}

/// Remove every installed host scheduler
pub fn clear_schedulers() {
    SCHEDULERS.with(|schedulers| schedulers.borrow_mut().clear());
}

/// Whether the last flush was scheduled as a microtask
pub fn is_using_microtask() -> bool {
    TICK.with(|tick| tick.borrow().using_microtask)
}

/// Run `callback` on the next tick. Errors go to the error channel.
pub fn next_tick(callback: impl FnOnce() -> Result<()> + 'static) {
    let wrapped: Box<dyn FnOnce()> = Box::new(move || {
        if let Err(err) = callback() {
            config::handle_error(&err, "nextTick");
        }
    });
    let schedule = TICK.with(|tick| {
        let mut tick = tick.borrow_mut();
        tick.callbacks.push(wrapped);
        !std::mem::replace(&mut tick.pending, true)
    });
    if schedule {
        schedule_flush();
    }
}

/// A [`Tick`] that resolves once the next tick has flushed
pub fn next_tick_deferred() -> Tick {
    let (tx, rx) = oneshot::channel();
    next_tick(move || {
        // The receiver may have been dropped; nothing to resolve then
        let _ = tx.send(());
        Ok(())
    });
    Tick { rx }
}

fn schedule_flush() {
    let schedulers = SCHEDULERS.with(|schedulers| schedulers.borrow().clone());
    for scheduler in schedulers {
        match scheduler.schedule(flush_callbacks) {
            Ok(()) => {
                let micro = scheduler.kind() == TickKind::Microtask;
                TICK.with(|tick| tick.borrow_mut().using_microtask = micro);
                return;
            }
            Err(err) => {
                tracing::debug!(kind = ?scheduler.kind(), %err, "host scheduler refused flush, falling back");
            }
        }
    }
    MICROTASKS.with(|queue| queue.borrow_mut().push_back(flush_callbacks));
    TICK.with(|tick| tick.borrow_mut().using_microtask = true);
}

/// Run the pending callbacks. Callbacks registered while flushing go to the
/// next tick.
fn flush_callbacks() {
    let callbacks = TICK.with(|tick| {
        let mut tick = tick.borrow_mut();
        tick.pending = false;
        std::mem::take(&mut tick.callbacks)
    });
    tracing::trace!(count = callbacks.len(), "flushing tick callbacks");
    for callback in callbacks {
        callback();
    }
}

/// Drain the built-in microtask queue, including tasks queued while
/// draining. Returns the number of continuations run.
pub fn run_microtasks() -> usize {
    let mut ran = 0;
    while let Some(task) = MICROTASKS.with(|queue| queue.borrow_mut().pop_front()) {
        task();
        ran += 1;
    }
    ran
}

/// Future resolving after the tick it was created for has flushed
#[derive(Debug)]
pub struct Tick {
    rx: oneshot::Receiver<()>,
}

impl Tick {
    /// Check without waiting whether the tick has flushed
    pub fn try_resolved(&mut self) -> bool {
        self.rx.try_recv().is_ok()
    }
}

impl Future for Tick {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        // A dropped sender means the callback list was discarded; resolve
        // rather than hang.
        Pin::new(&mut self.rx).poll(cx).map(|_| ())
    }
}

/// A flush continuation bound to the thread whose engine state it drains
#[derive(Debug)]
pub struct ScheduledFlush {
    continuation: Continuation,
    owner: ThreadId,
}

impl ScheduledFlush {
    /// The thread the continuation must run on
    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    /// Run the continuation.
    ///
    /// Engine state is thread-local, so on any other thread this refuses
    /// with [`ReactiveError::ForeignThread`] and the flush may be handed
    /// back to the owner.
    pub fn run(&self) -> Result<()> {
        if thread::current().id() != self.owner {
            tracing::error!(owner = ?self.owner, "flush continuation run off the engine thread");
            return Err(ReactiveError::ForeignThread);
        }
        (self.continuation)();
        Ok(())
    }
}

/// Host scheduler backed by an unbounded tokio channel.
///
/// The receiving loop must run each [`ScheduledFlush`] on the thread that
/// scheduled it, for example inside a `LocalSet` or a current-thread
/// runtime. Until that run happens no further tick is scheduled.
///
/// ```rust,ignore
/// let (scheduler, mut rx) = ChannelScheduler::new();
/// install_scheduler(scheduler);
/// while let Some(flush) = rx.recv().await {
///     flush.run()?;
/// }
/// ```
#[derive(Clone, Debug)]
pub struct ChannelScheduler {
    tx: mpsc::UnboundedSender<ScheduledFlush>,
}

impl ChannelScheduler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ScheduledFlush>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl HostScheduler for ChannelScheduler {
    fn kind(&self) -> TickKind {
        TickKind::Macrotask
    }

    fn schedule(&self, continuation: Continuation) -> Result<()> {
        let flush = ScheduledFlush {
            continuation,
            owner: thread::current().id(),
        };
        self.tx
            .send(flush)
            .map_err(|_| ReactiveError::SchedulerUnavailable("channel receiver dropped".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Refusing;

    impl HostScheduler for Refusing {
        fn kind(&self) -> TickKind {
            TickKind::Microtask
        }

        fn schedule(&self, _: Continuation) -> Result<()> {
            Err(ReactiveError::SchedulerUnavailable("test".into()))
        }
    }

    #[test]
    fn test_callbacks_run_in_registration_order() {
        let order = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            next_tick(move || {
                order.borrow_mut().push(i);
                Ok(())
            });
        }
        assert_eq!(run_microtasks(), 1);
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn test_callback_error_is_reported_and_flush_continues() {
        let reported = Rc::new(RefCell::new(String::new()));
        let sink = reported.clone();
        config::set_error_handler(move |_, info| *sink.borrow_mut() = info.to_string());

        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        next_tick(|| Err(ReactiveError::callback("boom")));
        next_tick(move || {
            flag.set(true);
            Ok(())
        });
        run_microtasks();

        assert_eq!(&*reported.borrow(), "nextTick");
        assert!(ran.get());
    }

    #[test]
    fn test_nested_registration_goes_to_next_tick() {
        let ran = Rc::new(Cell::new(0));
        let outer = ran.clone();
        next_tick(move || {
            let inner = outer.clone();
            next_tick(move || {
                inner.set(inner.get() + 1);
                Ok(())
            });
            Ok(())
        });
        // The nested flush is queued while draining and drained too
        assert_eq!(run_microtasks(), 2);
        assert_eq!(ran.get(), 1);
    }

    #[test]
    fn test_refusing_scheduler_falls_back() {
        install_scheduler(Refusing);
        next_tick(|| Ok(()));
        assert!(is_using_microtask());
        assert_eq!(run_microtasks(), 1);
        clear_schedulers();
    }

    #[test]
    fn test_channel_scheduler_receives_flush() {
        let (scheduler, mut rx) = ChannelScheduler::new();
        install_scheduler(scheduler);

        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        next_tick(move || {
            flag.set(true);
            Ok(())
        });
        assert!(!is_using_microtask());
        assert_eq!(run_microtasks(), 0);

        rx.try_recv().unwrap().run().unwrap();
        assert!(ran.get());
        clear_schedulers();
    }

    #[test]
    fn test_flush_refuses_foreign_thread() {
        let (scheduler, mut rx) = ChannelScheduler::new();
        install_scheduler(scheduler);

        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        next_tick(move || {
            flag.set(true);
            Ok(())
        });
        let flush = rx.try_recv().unwrap();
        assert_eq!(flush.owner(), thread::current().id());

        let (flush, result) = thread::spawn(move || {
            let result = flush.run();
            (flush, result)
        })
        .join()
        .unwrap();
        assert!(matches!(result, Err(ReactiveError::ForeignThread)));
        assert!(!ran.get());

        flush.run().unwrap();
        assert!(ran.get());
        clear_schedulers();
    }

    #[test]
    fn test_closed_channel_falls_back() {
        let (scheduler, rx) = ChannelScheduler::new();
        drop(rx);
        install_scheduler(scheduler);
        next_tick(|| Ok(()));
        assert!(is_using_microtask());
        assert_eq!(run_microtasks(), 1);
        clear_schedulers();
    }

    #[test]
    fn test_deferred_tick_resolves() {
        let mut tick = next_tick_deferred();
        assert!(!tick.try_resolved());
        run_microtasks();
        assert!(tick.try_resolved());
    }
}
