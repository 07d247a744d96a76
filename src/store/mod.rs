//! Backing-store boundary.
//!
//! The broker sits in front of two independently-failing stores: the CRM
//! database (system of record for identities and orders) and the ERP
//! (loyalty balances). Both are reached through the [`BackingStore`] trait;
//! the crate ships an in-memory implementation with failure injection for
//! tests and demos.

pub mod memory;
pub mod traits;

pub use memory::InMemoryStore;
pub use traits::{BackingStore, StoreError, StoreId};
