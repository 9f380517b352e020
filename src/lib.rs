//! sqlsink - schema-synthesizing SQLite sink.
//!
//! Persists a stream of self-describing, arbitrarily nested typed records
//! into SQLite, deriving one table per record type and one view per topic
//! on first sight, optionally exploding nested sub-records into linked
//! child tables, and batching writes transactionally.

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod model;
pub mod reflect;
pub mod store;

pub use config::{NestingMode, SinkConfig};
pub use error::{Result, SinkError};
pub use model::{
    FieldDef, FieldKind, MessageType, Record, RecordError, Scalar, ScalarKind, Timestamp, TypeKey,
    Value,
};
pub use store::{HandleState, Store};
