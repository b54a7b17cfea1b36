#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

//! Named mutual exclusion across processes that share nothing but a store.
//!
//! Exclusion comes entirely from the store's atomic insert-if-absent on the
//! lock name. On top of it, [`Coordinator`] offers polling acquisition with
//! bounded retry ([`Coordinator::lock`]), event-driven acquisition on deletion
//! notifications ([`Coordinator::wait_lock`]), optional leases that let the
//! store reap locks of crashed holders, and scoped execution that always
//! releases after the caller's work.

pub mod configuration;
pub mod coordinator;
pub mod error;
pub mod handle;
pub mod lease;
pub mod record;
pub mod store;
pub mod strategy;
pub mod timer;

pub use coordinator::{Coordinator, CoordinatorConfig, PollOptions, WaitOptions};
pub use error::Error;
pub use handle::LockHandle;
pub use record::LockRecord;
