mod aggregates;
pub mod backend;
mod connection;
pub mod descriptor;
mod error;
mod listing;
pub mod mapreduce;
pub mod query;
mod temporal;

pub use backend::{Backend, MemoryBackend, SqliteBackend, StoreBackend};
pub use connection::{Connection, index_specs};
pub use descriptor::{ConnectionDescriptor, DEFAULT_PORT};
pub use error::{DbError, Result};
pub use listing::RawEvents;
pub use query::translate;
