//! Core types and traits for relmap.
//!
//! This crate provides the mapping layer between records and rows:
//!
//! - `Model` trait and `Schema` declarations for struct mapping
//! - `Registry` caching record and association metadata
//! - `Document` / `Collection` for field access by name
//! - Mutators (`Structset`, `Changeset`, `Dirty`, `Map`) producing a `Mutation` tree
//! - `Adapter` trait the persister drives
//! - `Outcome` re-export from asupersync for cancel-correct operations

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub mod adapter;
pub mod association;
pub mod collection;
pub mod convert;
pub mod cursor;
pub mod document;
pub mod error;
pub mod meta;
pub mod mutation;
pub mod mutator;
pub mod query;
pub mod record;
pub mod types;
pub mod value;

pub use adapter::{Adapter, Transaction};
pub use association::{Association, AssociationKind, AssociationMeta};
pub use collection::Collection;
pub use cursor::{ColumnInfo, Cursor, Row, RowCursor, Scanner};
pub use document::Document;
pub use error::{
    ConnectionError, ConnectionErrorKind, Error, MappingError, NotFoundError, QueryError,
    QueryErrorKind, Result, TransactionError, TransactionErrorKind, TypeError, fault,
};
pub use meta::{Flags, RecordMeta, Registry, table_name};
pub use mutation::{AssocMutation, Cascade, Mutate, Mutation, Mutator, Reload, Unscoped};
pub use mutator::{Changes, Changeset, Dirty, Map, MapEntry, Snapshot, Structset};
pub use query::{Aggregate, CmpOp, Filter, Query, Sort};
pub use record::{FieldDef, FieldMut, FieldRef, Model, Record, RecordList, Schema, TypeInfo};
pub use types::{FieldType, FieldValue, Timestamp};
pub use value::{Value, ValueKey};
