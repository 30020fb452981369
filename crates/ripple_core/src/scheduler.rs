//! Batched update scheduler
//!
//! Watchers that are neither lazy nor sync are queued here when a dependency
//! changes. A watcher is queued at most once per pass. The queue is flushed
//! once per tick in ascending watcher id order, so parents (created first)
//! update before children and user watchers before the render watcher of the
//! same component.

use std::cell::RefCell;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::config;
use crate::tick;
use crate::watcher::Watcher;

#[derive(Default)]
struct SchedulerState {
    queue: Vec<Watcher>,
    /// Ids currently queued and not yet run
    has: FxHashSet<u64>,
    /// Re-entries per id within the current pass
    circular: FxHashMap<u64, u32>,
    /// Ids skipped for the rest of the pass after a runaway loop
    halted: FxHashSet<u64>,
    /// A flush has been requested
    waiting: bool,
    flushing: bool,
    index: usize,
}

thread_local! {
    static STATE: RefCell<SchedulerState> = RefCell::new(SchedulerState::default());
}

/// Queue a watcher for the next flush.
///
/// Duplicates are ignored. During a flush the watcher is inserted by id
/// after the entry currently running, so it still runs in this pass.
pub fn queue_watcher(watcher: Watcher) {
    let id = watcher.id();
    let request_flush = STATE.with(|state| {
        let mut state = state.borrow_mut();
        if !state.has.insert(id) {
            return false;
        }
        if state.flushing {
            let mut at = state.queue.len();
            while at > state.index + 1 && state.queue[at - 1].id() > id {
                at -= 1;
            }
            state.queue.insert(at, watcher);
        } else {
            state.queue.push(watcher);
        }
        !std::mem::replace(&mut state.waiting, true)
    });

    if !request_flush {
        return;
    }
    if config::async_mode() {
        tick::next_tick(|| {
            flush_scheduler_queue();
            Ok(())
        });
    } else {
        flush_scheduler_queue();
    }
}

/// Run every queued watcher, then the post-flush hooks.
pub fn flush_scheduler_queue() {
    let queued = STATE.with(|state| {
        let mut state = state.borrow_mut();
        state.flushing = true;
        // Parents before children, user watchers before render watchers
        state.queue.sort_by_key(Watcher::id);
        state.queue.len()
    });
    tracing::debug!(queued, "flushing scheduler queue");

    let max_updates = config::max_update_count();
    let mut index = 0;
    loop {
        // The queue may grow while running, so read the length every time
        let next = STATE.with(|state| {
            let mut state = state.borrow_mut();
            state.index = index;
            state
                .queue
                .get(index)
                .cloned()
                .map(|watcher| {
                    let halted = state.halted.contains(&watcher.id());
                    (watcher, halted)
                })
        });
        let Some((watcher, halted)) = next else {
            break;
        };
        index += 1;
        if halted {
            continue;
        }

        let id = watcher.id();
        watcher.call_before();
        STATE.with(|state| state.borrow_mut().has.remove(&id));
        if let Err(err) = watcher.run() {
            config::handle_error(&err, "scheduler flush");
        }

        let runaway = STATE.with(|state| {
            let mut state = state.borrow_mut();
            if !state.has.contains(&id) {
                return false;
            }
            let count = state.circular.entry(id).or_insert(0);
            *count += 1;
            if *count > max_updates {
                state.halted.insert(id);
                true
            } else {
                false
            }
        });
        if runaway {
            tracing::warn!(id, "halting runaway watcher");
            config::warn(&format!(
                "You may have an infinite update loop in watcher with expression \"{}\"",
                watcher.expression()
            ));
        }
    }

    let processed = reset_state();
    tracing::debug!(ran = processed.len(), "scheduler queue flushed");

    for watcher in processed.iter().rev() {
        if watcher.is_active() {
            watcher.call_after();
        }
    }
}

/// Clear all scheduler state, returning the queue of the finished pass
fn reset_state() -> Vec<Watcher> {
    STATE.with(|state| std::mem::take(&mut *state.borrow_mut()).queue)
}

/// Whether any watcher is queued and not yet run
pub fn has_pending() -> bool {
    STATE.with(|state| !state.borrow().has.is_empty())
}

pub fn is_flushing() -> bool {
    STATE.with(|state| state.borrow().flushing)
}
