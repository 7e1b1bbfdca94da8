//! Core types, algorithms and trait definitions for profile deduplication.
//!
//! This crate has no HTTP or database dependencies. The
//! matcher, resolver and diff recorder are pure functions over profiles; the
//! remote profile store, the merge ledger and the configuration store are
//! expressed as traits implemented by the backend crates.

pub mod config;
pub mod diff;
pub mod error;
pub mod matcher;
pub mod merge;
pub mod operation;
pub mod profile;
pub mod remote;
pub mod store;
pub mod time;

pub use error::{Error, ErrorKind, Result};
