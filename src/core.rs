use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    future::poll_fn,
    mem::replace,
    rc::Rc,
    thread::AccessError,
};

use derive_ex::derive_ex;

use crate::{
    effect::EffectStack,
    error::ReactiveError,
    scheduler::{flush_jobs, SchedulerState},
    scope::{EffectScope, Owner},
};

#[cfg(test)]
mod tests;

thread_local! {
    static GLOBALS: RefCell<Globals> = RefCell::new(Globals::new());
    static NEXT_ID: Cell<u64> = const { Cell::new(0) };
}

pub(crate) struct Globals {
    is_runtime_exists: bool,
    pub(crate) effects: EffectStack,
    pub(crate) scopes: Vec<EffectScope>,
    pub(crate) owner: Option<Owner>,
    pub(crate) scheduler: SchedulerState,
    pub(crate) error_handler: Option<Rc<dyn Fn(&ReactiveError)>>,
    pub(crate) warn_handler: Option<Rc<dyn Fn(&str)>>,
}
impl Globals {
    fn new() -> Self {
        Self {
            is_runtime_exists: false,
            effects: EffectStack::new(),
            scopes: Vec::new(),
            owner: None,
            scheduler: SchedulerState::default(),
            error_handler: None,
            warn_handler: None,
        }
    }
    pub(crate) fn with<T>(f: impl FnOnce(&mut Self) -> T) -> T {
        GLOBALS.with(|g| f(&mut g.borrow_mut()))
    }
    pub(crate) fn try_with<T>(f: impl FnOnce(&mut Self) -> T) -> Result<T, AccessError> {
        GLOBALS.try_with(|g| f(&mut g.borrow_mut()))
    }
    pub(crate) fn assert_exists(&self) {
        if !self.is_runtime_exists {
            panic!("`Runtime` is not created.");
        }
    }
}

/// Returns a number unique within the current thread.
pub(crate) fn next_id() -> u64 {
    NEXT_ID.with(|id| {
        let value = id.get();
        id.set(value + 1);
        value
    })
}

/// Stops collecting dependencies until the matching [`reset_tracking`].
pub fn pause_tracking() {
    Globals::with(|g| g.effects.pause())
}

/// Resumes collecting dependencies until the matching [`reset_tracking`].
pub fn enable_tracking() {
    Globals::with(|g| g.effects.enable())
}

/// Restores the tracking state saved by the last [`pause_tracking`] or [`enable_tracking`].
pub fn reset_tracking() {
    Globals::with(|g| g.effects.reset())
}

/// Returns `true` if a read would be recorded as a dependency right now.
pub fn is_tracking() -> bool {
    Globals::try_with(|g| g.effects.is_tracking()).unwrap_or(false)
}

/// Calls `f` without recording any dependency.
pub fn untrack<T>(f: impl FnOnce() -> T) -> T {
    let _guard = UntrackGuard::new();
    f()
}

/// Pauses tracking while alive.
pub struct UntrackGuard(());

impl UntrackGuard {
    pub fn new() -> Self {
        pause_tracking();
        Self(())
    }
}
impl Default for UntrackGuard {
    fn default() -> Self {
        Self::new()
    }
}
impl Drop for UntrackGuard {
    fn drop(&mut self) {
        let _ = Globals::try_with(|g| g.effects.reset());
    }
}

/// Reactive runtime.
///
/// Owns the job queues of the current thread. Jobs are queued by effects and watchers,
/// and run when the host calls [`Runtime::flush`].
#[derive_ex(Default)]
#[default(Self::new())]
pub struct Runtime {
    _private: (),
}
impl Runtime {
    pub fn new() -> Self {
        if Globals::with(|g| replace(&mut g.is_runtime_exists, true)) {
            panic!("Only one `Runtime` can exist in the same thread at the same time.");
        };
        Self { _private: () }
    }

    /// Runs every queued job and callback until the queues are empty.
    ///
    /// Returns `false` if no flush was requested or a flush is already running.
    pub fn flush(&mut self) -> bool {
        let start = Globals::with(|g| g.scheduler.begin_flush());
        if !start {
            return false;
        }
        let mut seen = HashMap::new();
        flush_jobs(&mut seen);
        let wakers = Globals::with(|g| g.scheduler.finish_tick());
        for waker in wakers {
            waker.wake();
        }
        true
    }

    /// Waits until a flush is requested.
    pub async fn wait_for_ready(&mut self) {
        poll_fn(|cx| Globals::with(|g| g.scheduler.poll_ready(cx))).await
    }

    pub fn is_flush_pending(&self) -> bool {
        Globals::with(|g| g.scheduler.is_flush_pending())
    }

    /// Discards every queued job, the active scopes and the installed handlers.
    pub fn reset(&mut self) {
        let old = Globals::with(|g| {
            let mut new = Globals::new();
            new.is_runtime_exists = true;
            new.scheduler.set_epoch(g.scheduler.epoch() + 1);
            replace(g, new)
        });
        drop_globals(old);
    }

    /// Replaces the handler for errors raised by user callbacks.
    ///
    /// Without a handler, errors are logged with `tracing::error!`.
    pub fn set_error_handler(&mut self, handler: impl Fn(&ReactiveError) + 'static) {
        Globals::with(|g| g.error_handler = Some(Rc::new(handler)));
    }

    /// Replaces the handler for development warnings.
    ///
    /// Without a handler, warnings are logged with `tracing::warn!`.
    pub fn set_warn_handler(&mut self, handler: impl Fn(&str) + 'static) {
        Globals::with(|g| g.warn_handler = Some(Rc::new(handler)));
    }
}
impl Drop for Runtime {
    fn drop(&mut self) {
        let old = Globals::try_with(|g| {
            let mut new = Globals::new();
            new.scheduler.set_epoch(g.scheduler.epoch() + 1);
            replace(g, new)
        });
        if let Ok(old) = old {
            drop_globals(old);
        }
    }
}

// Dropped outside the borrow, since queued jobs may own effects and scopes.
fn drop_globals(mut old: Globals) {
    for waker in old.scheduler.take_tick_wakers() {
        waker.wake();
    }
}
