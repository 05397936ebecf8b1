//! relmap - record mapping and cascading persistence for relational databases.
//!
//! relmap maps plain Rust structs onto rows and writes whole object graphs in
//! one call:
//!
//! - `#[derive(Model)]` schemas with inferred tables, keys and associations
//! - Four ways to describe a write: `Structset`, `Changeset`, `Dirty` and `Map`
//! - Cascading insert/update across belongs-to, has-one and has-many
//! - Batched preloading of association paths without N+1 queries
//! - Any storage backend behind the async `Adapter` trait
//!
//! # Quick Start
//!
//! ```ignore
//! use relmap::prelude::*;
//!
//! #[derive(Debug, Default, Model)]
//! struct User {
//!     id: i64,
//!     name: String,
//!     orders: Option<Vec<Order>>,
//! }
//!
//! async fn example(cx: &Cx, repo: &Repository<impl Adapter>) {
//!     let mut user = User { name: "ann".into(), orders: Some(vec![Order::default()]), ..User::default() };
//!     // One transaction: the user, then its orders with `user_id` filled in
//!     repo.insert(cx, &mut user, &[]).await;
//!
//!     let mut users = Vec::new();
//!     repo.find_all(cx, &mut users, Filter::All).await;
//!     repo.preload_all(cx, &mut users, "orders").await;
//! }
//! ```

pub use relmap_core::*;
pub use relmap_macros::Model;
pub use relmap_repo::{ErrorTranslator, RecordIterator, Repository, RepositoryConfig};

/// Everything needed to declare records and drive a repository.
pub mod prelude {
    pub use crate::{
        // Adapter surface
        Adapter,
        Aggregate,
        // Records
        Association,
        AssociationKind,
        // Mutators
        Cascade,
        Changeset,
        Collection,
        Cursor,
        Cx,
        Dirty,
        Document,
        Error,
        FieldDef,
        FieldMut,
        FieldRef,
        Filter,
        Map,
        Model,
        Mutate,
        Mutation,
        Mutator,
        Outcome,
        Query,
        RecordIterator,
        Registry,
        Reload,
        // Repository
        Repository,
        RepositoryConfig,
        Result,
        RowCursor,
        Schema,
        Sort,
        Structset,
        Timestamp,
        Transaction,
        Unscoped,
        Value,
    };
}
