//! A lock-free, linearizable, resizable open-addressed hash table keyed by
//! opaque 128-bit hash values, with epoch-based safe memory reclamation for
//! the items it stores.
//!
//! The table itself ("hihat") never hashes keys or resolves collisions
//! between two different keys that map to the same [`Hv`] -- that is a
//! caller concern, same as any other open-addressed scheme built on raw
//! hash values rather than keys. What it guarantees is that every
//! operation ([`Table::get`], [`Table::put`], [`Table::replace`],
//! [`Table::add`], [`Table::remove`]) appears to take effect atomically at
//! some point between its call and return, across any number of
//! concurrent threads, including while the table is being migrated to a
//! larger or smaller backing store.
//!
//! ```
//! use epochmap::{Hv, Table};
//! use std::sync::Arc;
//!
//! let table: Table<&'static str> = Table::new();
//! table.add(Hv::new(1), Arc::new("one"));
//! assert_eq!(table.get(Hv::new(1)).as_deref(), Some(&"one"));
//! ```

mod bucket;
mod config;
mod hash;
mod item;
mod migrate;
mod record;
mod smr;
mod store;
mod table;
mod view;

pub use crate::config::{Config, ConfigBuilder};
pub use crate::hash::Hv;
pub use crate::table::Table;
