//! Crash-resilient batch orchestration.
//!
//! A supervisor (the [`watchdog`]) launches a host process that may die at
//! any moment. Inside the host, the [`runner`] walks a durable [`ledger`],
//! persisting each item as in progress before handing it to a pluggable
//! processor. A host that dies mid-item leaves that evidence behind; the
//! next load charges the crash to the item, and after `max_crashes` the item
//! is excluded instead of retried. A zero-content sentinel file tells the
//! watchdog whether to relaunch.
//!
//! - **[`core`]**: pure transitions, selection, invariants and the watchdog
//!   decision. No I/O.
//! - **[`io`]**: files and processes (ledger store, sentinel, config,
//!   launcher and processor seams).
//!
//! [`host`], [`start`] and [`status`] wire both layers into CLI commands.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod host;
pub mod io;
pub mod ledger;
pub mod logging;
pub mod runner;
pub mod start;
pub mod status;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod watchdog;
