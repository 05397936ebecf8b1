//! Indexed access to a sequence of records.

use crate::document::{Document, scalar_at};
use crate::meta::{RecordMeta, Registry};
use crate::record::{Model, RecordList};
use crate::value::Value;
use std::sync::Arc;

/// A handle over a `Vec` of records of one type.
///
/// Like [`Document`], the collection writes through to the underlying
/// vector. [`Collection::slice`] narrows the visible window without
/// copying.
pub struct Collection<'a> {
    list: &'a mut dyn RecordList,
    meta: Arc<RecordMeta>,
    registry: &'a Registry,
    start: usize,
    end: Option<usize>,
}

impl<'a> Collection<'a> {
    pub fn new<T: Model>(list: &'a mut Vec<T>, registry: &'a Registry) -> Self {
        let meta = registry.meta_of::<T>();
        Self::from_parts(list, meta, registry)
    }

    pub fn from_list(list: &'a mut dyn RecordList, registry: &'a Registry) -> Self {
        let meta = registry.meta(list.element());
        Self::from_parts(list, meta, registry)
    }

    pub(crate) fn from_parts(
        list: &'a mut dyn RecordList,
        meta: Arc<RecordMeta>,
        registry: &'a Registry,
    ) -> Self {
        Self {
            list,
            meta,
            registry,
            start: 0,
            end: None,
        }
    }

    pub fn registry(&self) -> &'a Registry {
        self.registry
    }

    pub fn meta(&self) -> &Arc<RecordMeta> {
        &self.meta
    }

    pub fn table(&self) -> &str {
        self.meta.table()
    }

    pub fn primary_field(&self) -> &str {
        self.meta.primary_field()
    }

    pub fn primary_fields(&self) -> &[String] {
        self.meta.primary_fields()
    }

    /// Primary key of every element; one value per element for a single
    /// key, one list per element for a composite key.
    pub fn primary_values(&self) -> Vec<Value> {
        let paths = self.meta.primary_index();
        (0..self.len())
            .map(|i| {
                let record = self.list.at(self.start + i);
                let mut values: Vec<Value> = paths
                    .iter()
                    .map(|path| scalar_at(record, path).map_or(Value::Null, |slot| slot.value()))
                    .collect();
                if values.len() == 1 {
                    values.pop().unwrap_or(Value::Null)
                } else {
                    Value::Array(values)
                }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        let end = self.end.unwrap_or_else(|| self.list.count());
        end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Document of the element at `index`. Panics when out of range.
    pub fn get(&mut self, index: usize) -> Document<'_> {
        assert!(index < self.len(), "collection index {index} out of range");
        let meta = Arc::clone(&self.meta);
        Document::from_parts(self.list.at_mut(self.start + index), meta, self.registry)
    }

    /// Scalar value of `field` on the element at `index`.
    pub fn value_at(&self, index: usize, field: &str) -> Option<Value> {
        if index >= self.len() {
            return None;
        }
        let path = self.meta.index(field)?;
        scalar_at(self.list.at(self.start + index), path).map(|slot| slot.value())
    }

    /// Append a zero-valued element and return its document.
    ///
    /// Only valid on an unsliced collection.
    pub fn add(&mut self) -> Document<'_> {
        debug_assert!(self.start == 0 && self.end.is_none());
        let meta = Arc::clone(&self.meta);
        Document::from_parts(self.list.push_zero(), meta, self.registry)
    }

    /// Remove every element.
    pub fn reset(&mut self) {
        self.list.truncate_records(self.start);
        self.end = None;
    }

    pub fn swap(&mut self, a: usize, b: usize) {
        self.list.swap_records(self.start + a, self.start + b);
    }

    pub fn truncate(&mut self, len: usize) {
        if len < self.len() {
            self.list.truncate_records(self.start + len);
            self.end = None;
        }
    }

    /// A view of elements `start..end` of this collection.
    pub fn slice(&mut self, start: usize, end: usize) -> Collection<'_> {
        let end = end.min(self.len());
        let start = start.min(end);
        Collection {
            list: &mut *self.list,
            meta: Arc::clone(&self.meta),
            registry: self.registry,
            start: self.start + start,
            end: Some(self.start + end),
        }
    }

    /// Split into one document per element, all borrowed for `'a`.
    pub fn into_documents(self) -> Vec<Document<'a>> {
        let len = self.len();
        let Self {
            list,
            meta,
            registry,
            start,
            ..
        } = self;
        list.records_mut()
            .into_iter()
            .skip(start)
            .take(len)
            .map(|record| Document::from_parts(record, Arc::clone(&meta), registry))
            .collect()
    }
}

impl std::fmt::Debug for Collection<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("table", &self.meta.table())
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}
