//! Repository layer for relmap.
//!
//! `relmap-repo` drives an [`Adapter`](relmap_core::Adapter) from the mapping
//! layer in `relmap-core`:
//!
//! - **Cascading saves**: belongs-to targets, then the record, then has-one
//!   and has-many children, all from one `Mutation` tree.
//! - **Batched preloading**: one query per association path, fanned out to
//!   every record that shares a key.
//! - **Batched iteration**: walk a large table in primary key order without
//!   holding every row at once.
//! - **Transactions**: saves with nested mutations run in a transaction that
//!   rolls back on any non-`Ok` outcome.
//!
//! # Example
//!
//! ```ignore
//! let repo = Repository::new(adapter, Arc::new(Registry::new()));
//!
//! let mut order = Order { buyer: Some(user), ..Order::default() };
//! repo.insert(&cx, &mut order, &[]).await?;
//!
//! let mut orders = Vec::new();
//! repo.find_all(&cx, &mut orders, Filter::eq("status", "paid")).await?;
//! repo.preload_all(&cx, &mut orders, "buyer.address").await?;
//! ```

/// Unwrap an `Outcome::Ok`, returning every other outcome unchanged.
macro_rules! try_outcome {
    ($expr:expr) => {
        match $expr {
            ::asupersync::Outcome::Ok(value) => value,
            ::asupersync::Outcome::Err(e) => return ::asupersync::Outcome::Err(e),
            ::asupersync::Outcome::Cancelled(r) => return ::asupersync::Outcome::Cancelled(r),
            ::asupersync::Outcome::Panicked(p) => return ::asupersync::Outcome::Panicked(p),
        }
    };
}

/// Lift a `relmap_core::Result` into an `Outcome`, returning on error.
macro_rules! try_result {
    ($expr:expr) => {
        match $expr {
            Ok(value) => value,
            Err(e) => return ::asupersync::Outcome::Err(e),
        }
    };
}

pub mod config;
pub mod iterate;
mod persist;
mod preload;
pub mod repository;
mod scan;

pub use config::RepositoryConfig;
pub use iterate::RecordIterator;
pub use repository::{ErrorTranslator, Repository};
