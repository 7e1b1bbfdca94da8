//! Adapters for the remote profile store.
//!
//! [`BrazeClient`] talks to the CRM vendor's REST API; [`MemoryProfileStore`]
//! keeps profiles in process for local runs and tests. Both implement
//! [`dedup_core::remote::ProfileStore`].

mod braze;
mod memory;

pub mod error;

pub use braze::{BrazeClient, BrazeConfig};
pub use error::{Error, Result};
pub use memory::MemoryProfileStore;
