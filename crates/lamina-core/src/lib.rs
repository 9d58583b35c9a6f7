//! # Lamina Core
//!
//! An in-memory, columnar, transactional data store with bitmap indexing.
//!
//! Records are organized as a Structure-of-Arrays across typed columns.
//! Transactions are snapshot-isolated: each one works over a private
//! selection bitmap seeded from the collection's fill, stages mutations in
//! compact per-column commit buffers, and applies them under chunk-sharded
//! locks. Computed bitmap indices stay consistent with their base columns
//! because they replay the exact same commit stream, and the same stream
//! feeds replication sinks and snapshot restore.
//!
//! ## Quick Start
//!
//! ```rust
//! use lamina_core::{Collection, ColumnSpec};
//!
//! # fn main() -> lamina_core::Result<()> {
//! let players = Collection::new();
//! players.create_column("name", ColumnSpec::string())?;
//! players.create_column("age", ColumnSpec::i32())?;
//!
//! players.insert(|row| {
//!     row.set_string("name", "Merlin")?;
//!     row.set_i32("age", 55)
//! })?;
//!
//! players.query(|txn| {
//!     let seniors = txn.with_i64("age", |age| age >= 40).count();
//!     assert_eq!(seniors, 1);
//!     Ok(())
//! })?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod bitmap;
pub mod collection;
mod column;
pub mod commit;
pub mod error;
pub mod sink;
mod snapshot;
pub mod txn;


pub use bitmap::Bitmap;
pub use collection::{Collection, Options, EXPIRE_COLUMN};
pub use column::{ColumnKind, ColumnSpec, Value};
pub use commit::{Accessor, Buffer, Commit, Op};
pub use error::{Error, Result};
pub use sink::{ChannelSink, CommitSink, WriterSink};
pub use txn::{Row, Txn};
