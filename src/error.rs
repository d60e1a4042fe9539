use std::{
    any::Any,
    error::Error,
    panic::{catch_unwind, AssertUnwindSafe},
};

use parse_display::Display;

use crate::core::Globals;


/// Where a user-code error was caught.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display)]
pub enum ErrorCode {
    #[display("watcher getter")]
    WatchGetter,
    #[display("watcher callback")]
    WatchCallback,
    #[display("watcher cleanup function")]
    WatchCleanup,
    #[display("scheduler flush")]
    Scheduler,
}

#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[display("error in {code}: {message}")]
pub struct ReactiveError {
    pub code: ErrorCode,
    pub message: String,
}

impl ReactiveError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
    fn from_panic(code: ErrorCode, payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        Self::new(code, message)
    }
}
impl Error for ReactiveError {}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
#[display("detect cyclic dependency")]
pub struct CyclicError(());

impl CyclicError {
    pub(crate) fn new() -> Self {
        Self(())
    }
}
impl Error for CyclicError {}

/// Calls `f`, routing a panic to the error handler.
///
/// Returns `None` if `f` panicked.
pub fn call_with_error_handling<T>(code: ErrorCode, f: impl FnOnce() -> T) -> Option<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(payload) => {
            handle_error(&ReactiveError::from_panic(code, payload));
            None
        }
    }
}

/// Reports an error to the handler installed by [`Runtime::set_error_handler`](crate::core::Runtime::set_error_handler).
pub fn handle_error(e: &ReactiveError) {
    let handler = Globals::try_with(|g| g.error_handler.clone()).ok().flatten();
    if let Some(handler) = handler {
        handler(e);
    } else {
        tracing::error!(code = %e.code, "{}", e.message);
    }
}

/// Reports a usage warning.
pub fn warn(message: &str) {
    let handler = Globals::try_with(|g| g.warn_handler.clone()).ok().flatten();
    if let Some(handler) = handler {
        handler(message);
    } else {
        tracing::warn!("{message}");
    }
}
