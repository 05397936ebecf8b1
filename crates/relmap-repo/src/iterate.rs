//! Walking large result sets one batch at a time.

use crate::persist::scoped;
use crate::repository::Repository;
use asupersync::{Cx, Outcome};
use relmap_core::{Adapter, Cursor, Document, Error, Filter, Model, Query, Sort, Value};
use std::marker::PhantomData;

/// Rows fetched per batch unless [`RecordIterator::batch_size`] says otherwise.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Reads the records of a query in primary key order, fetching
/// `batch_size` rows per round trip.
///
/// Created by [`Repository::iterate`]. Each record is tracked for changes
/// as it is produced, so it can be passed straight to `update`.
pub struct RecordIterator<'r, A, T> {
    repo: &'r Repository<A>,
    query: Query,
    batch_size: usize,
    current: usize,
    cursor: Option<Box<dyn Cursor>>,
    fields: Vec<String>,
    done: bool,
    _record: PhantomData<fn() -> T>,
}

impl<'r, A, T: Model> RecordIterator<'r, A, T> {
    pub(crate) fn new(repo: &'r Repository<A>, query: Query) -> Self {
        let meta = repo.registry().meta_of::<T>();
        let mut query = scoped(&meta, query).unpaged();
        for field in meta.primary_fields() {
            query = query.sort(Sort::asc(field.as_str()));
        }
        Self {
            repo,
            query,
            batch_size: DEFAULT_BATCH_SIZE,
            current: 0,
            cursor: None,
            fields: Vec::new(),
            done: false,
            _record: PhantomData,
        }
    }

    /// Rows per fetch. Zero is treated as one.
    #[must_use]
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Begin at the record whose primary key is `values`, inclusive.
    #[must_use]
    pub fn start(self, values: Vec<Value>) -> Self {
        self.bound(values, Filter::gte)
    }

    /// Stop after the record whose primary key is `values`, inclusive.
    #[must_use]
    pub fn finish(self, values: Vec<Value>) -> Self {
        self.bound(values, Filter::lte)
    }

    fn bound(mut self, values: Vec<Value>, cmp: fn(String, Value) -> Filter) -> Self {
        let meta = self.repo.registry().meta_of::<T>();
        for (field, value) in meta.primary_fields().iter().zip(values) {
            self.query = self.query.filter(cmp(field.clone(), value));
        }
        self
    }

    /// The query each batch is cut from.
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Release the open cursor. Later calls to `next` return `None`.
    pub fn close(&mut self) {
        if let Some(mut cursor) = self.cursor.take() {
            cursor.close();
        }
        self.done = true;
    }
}

impl<A: Adapter, T: Model> RecordIterator<'_, A, T> {
    /// The next record, or `None` once the query is exhausted.
    pub async fn next(&mut self, cx: &Cx) -> Outcome<Option<T>, Error> {
        let outcome = self.advance(cx).await;
        if !matches!(outcome, Outcome::Ok(Some(_))) {
            self.close();
        }
        self.repo.translate(outcome)
    }

    async fn advance(&mut self, cx: &Cx) -> Outcome<Option<T>, Error> {
        if self.done {
            return Outcome::Ok(None);
        }
        if self.current % self.batch_size == 0 {
            try_outcome!(self.fetch(cx).await);
        }

        let Some(cursor) = self.cursor.as_mut() else {
            return Outcome::Ok(None);
        };
        if !cursor.next() {
            return Outcome::Ok(None);
        }

        let mut record = T::default();
        {
            let mut doc = Document::new(&mut record, self.repo.registry());
            let mut scanners = doc.scanners(&self.fields);
            try_result!(cursor.scan(&mut scanners));
            try_result!(doc.assign(scanners));
            doc.track_changes();
        }
        self.current += 1;
        Outcome::Ok(Some(record))
    }

    async fn fetch(&mut self, cx: &Cx) -> Outcome<(), Error> {
        if let Some(mut cursor) = self.cursor.take() {
            cursor.close();
        }
        let query = self
            .query
            .clone()
            .limit(self.batch_size)
            .offset(self.current);
        tracing::debug!(table = %query.table, offset = self.current, batch = self.batch_size, "Fetching batch");

        let mut cursor = try_outcome!(self.repo.adapter().query(cx, &query).await);
        self.fields = match cursor.fields() {
            Ok(fields) => fields,
            Err(e) => {
                cursor.close();
                return Outcome::Err(e);
            }
        };
        self.cursor = Some(cursor);
        Outcome::Ok(())
    }
}

impl<A, T> Drop for RecordIterator<'_, A, T> {
    fn drop(&mut self) {
        if let Some(mut cursor) = self.cursor.take() {
            cursor.close();
        }
    }
}

impl<A, T> std::fmt::Debug for RecordIterator<'_, A, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordIterator")
            .field("query", &self.query)
            .field("batch_size", &self.batch_size)
            .field("current", &self.current)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}
