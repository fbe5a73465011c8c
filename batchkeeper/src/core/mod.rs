//! Deterministic, pure logic shared by the batch runner and the watchdog.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! ledger state and return deterministic outputs suitable for tests.

pub mod decide;
pub mod invariants;
pub mod selector;
pub mod transitions;
pub mod types;
