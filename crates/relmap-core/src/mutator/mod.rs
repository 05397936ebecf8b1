//! Strategies that turn a document's state into a [`Mutation`].
//!
//! - [`Structset`] writes every non-zero field, for inserts.
//! - [`Changeset`] diffs against a snapshot taken earlier.
//! - [`Dirty`] is a snapshot kept inside the record itself.
//! - [`Map`] applies an explicit, possibly nested, set of values.
//!
//! [`Mutation`]: crate::mutation::Mutation

mod changeset;
mod dirty;
mod map;
mod structset;

pub use changeset::{Changes, Changeset, Snapshot};
pub use dirty::Dirty;
pub use map::{Map, MapEntry};
pub use structset::Structset;

use crate::meta::{Flags, RecordMeta};

/// Timestamp columns of `meta` that carry `flag`.
fn timestamp_fields(meta: &RecordMeta, flag: Flags) -> impl Iterator<Item = &String> {
    meta.fields().iter().filter(move |field| {
        meta.field_type(field)
            .is_some_and(|kind| Flags::infer(field, kind) == flag)
    })
}
