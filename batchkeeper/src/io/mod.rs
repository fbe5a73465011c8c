//! I/O helpers: files, processes and the two pluggable seams.

pub mod config;
pub mod init;
pub mod launcher;
pub mod ledger_store;
pub mod process;
pub mod processor;
pub mod qc_notes;
pub mod sentinel;
pub mod source;
pub mod template;
