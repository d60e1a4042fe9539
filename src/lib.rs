//! A fine-grained reactive dependency engine with a batched job scheduler.
//!
//! Containers wrapped by [`reactive`] record which effects read which keys,
//! and writes re-run exactly those effects. [`Ref`] boxes a single value,
//! [`Computed`] caches a derived value, and [`watch`] turns changes into callbacks
//! that are batched by the scheduler and run on [`core::Runtime::flush`].

pub mod core;

mod computed;
mod dep;
mod effect;
mod error;
mod raw;
mod reactive;
mod refs;
mod scheduler;
mod scope;
mod value;
mod watch;

#[cfg(test)]
mod test_helpers;

pub use computed::*;
pub use dep::*;
pub use effect::*;
pub use error::*;
pub use raw::*;
pub use reactive::*;
pub use refs::*;
pub use scheduler::*;
pub use scope::*;
pub use value::*;
pub use watch::*;
