//! Storage adapter traits.
//!
//! The core never produces SQL. It hands an [`Adapter`] a table, a
//! [`Filter`](crate::query::Filter) built from key equality or IN-lists and a
//! [`Mutation`], and trusts the adapter to translate them for its dialect.
//!
//! All operations integrate with asupersync's structured concurrency via the
//! `Cx` context; cancellation and deadlines are the adapter's business.

use crate::cursor::Cursor;
use crate::error::Error;
use crate::mutation::Mutation;
use crate::query::{Aggregate, Query};
use crate::value::Value;
use asupersync::{Cx, Outcome};

/// A storage backend.
///
/// # Example
///
/// ```rust,ignore
/// let id = adapter.insert(&cx, "users", "id", &mutation).await;
/// let tx = adapter.begin(&cx).await?;
/// tx.update(&cx, &Query::from("users").filter(Filter::eq("id", id)), &changes).await?;
/// tx.commit(&cx).await?;
/// ```
pub trait Adapter: Send + Sync {
    /// The transaction type returned by [`Adapter::begin`].
    type Tx<'a>: Transaction
    where
        Self: 'a;

    /// Run a read and return a cursor over its rows.
    fn query(
        &self,
        cx: &Cx,
        query: &Query,
    ) -> impl Future<Output = Outcome<Box<dyn Cursor>, Error>> + Send;

    /// Compute `aggregate` over `field` for the rows matching the query.
    ///
    /// `field` is `*` for a plain row count. The query arrives without
    /// ordering, limit or offset.
    fn aggregate(
        &self,
        cx: &Cx,
        query: &Query,
        aggregate: Aggregate,
        field: &str,
    ) -> impl Future<Output = Outcome<i64, Error>> + Send;

    /// Insert one row and return its generated primary key.
    fn insert(
        &self,
        cx: &Cx,
        table: &str,
        primary_field: &str,
        mutation: &Mutation,
    ) -> impl Future<Output = Outcome<Value, Error>> + Send;

    /// Insert many rows in one statement.
    ///
    /// `fields` is the union of the columns set by `mutations`. Returns one
    /// generated key per mutation, in order.
    fn insert_all(
        &self,
        cx: &Cx,
        table: &str,
        primary_field: &str,
        fields: &[String],
        mutations: &[Mutation],
    ) -> impl Future<Output = Outcome<Vec<Value>, Error>> + Send;

    /// Apply `mutation` to every row matching the query. Returns rows affected.
    fn update(
        &self,
        cx: &Cx,
        query: &Query,
        mutation: &Mutation,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;

    /// Delete every row matching the query. Returns rows affected.
    fn delete(&self, cx: &Cx, query: &Query) -> impl Future<Output = Outcome<u64, Error>> + Send;

    /// Begin a transaction.
    fn begin(&self, cx: &Cx) -> impl Future<Output = Outcome<Self::Tx<'_>, Error>> + Send;
}

/// An open transaction. Dropping it without committing is a rollback.
pub trait Transaction: Adapter {
    fn commit(self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;

    fn rollback(self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;
}
