//! Field-by-name access to a single record.

use crate::Result;
use crate::association::{Association, AssociationKind};
use crate::cursor::{Route, Scanner};
use crate::error::{Error, MappingError, TypeError, fault};
use crate::meta::{Flags, RecordMeta, Registry};
use crate::mutator::{Changes, Snapshot};
use crate::record::{FieldMut, FieldRef, Model, Record, ScalarSlot};
use crate::types::FieldType;
use crate::value::Value;
use std::sync::Arc;

/// A handle over one record instance.
///
/// The document borrows the record exclusively for its lifetime and writes
/// through to it; it owns nothing but the shared metadata.
pub struct Document<'a> {
    record: &'a mut dyn Record,
    meta: Arc<RecordMeta>,
    registry: &'a Registry,
}

impl<'a> Document<'a> {
    pub fn new<T: Model>(record: &'a mut T, registry: &'a Registry) -> Self {
        let meta = registry.meta_of::<T>();
        Self::from_parts(record, meta, registry)
    }

    pub fn from_record(record: &'a mut dyn Record, registry: &'a Registry) -> Self {
        let meta = registry.meta(record.type_info());
        Self::from_parts(record, meta, registry)
    }

    pub(crate) fn from_parts(
        record: &'a mut dyn Record,
        meta: Arc<RecordMeta>,
        registry: &'a Registry,
    ) -> Self {
        Self {
            record,
            meta,
            registry,
        }
    }

    /// A shorter-lived document over the same record.
    pub fn reborrow(&mut self) -> Document<'_> {
        Document {
            record: &mut *self.record,
            meta: Arc::clone(&self.meta),
            registry: self.registry,
        }
    }

    pub fn registry(&self) -> &'a Registry {
        self.registry
    }

    pub fn meta(&self) -> &Arc<RecordMeta> {
        &self.meta
    }

    pub fn record(&self) -> &dyn Record {
        &*self.record
    }

    pub fn record_mut(&mut self) -> &mut dyn Record {
        &mut *self.record
    }

    pub fn table(&self) -> &str {
        self.meta.table()
    }

    pub fn fields(&self) -> &[String] {
        self.meta.fields()
    }

    pub fn field_type(&self, field: &str) -> Option<FieldType> {
        self.meta.field_type(field)
    }

    /// Current value of a scalar field. `None` for unknown fields.
    pub fn value(&self, field: &str) -> Option<Value> {
        read_value(&*self.record, &self.meta, field)
    }

    /// Assign a scalar field, converting the value when needed.
    ///
    /// Returns false for unknown fields and values that cannot be converted.
    pub fn set_value(&mut self, field: &str, value: impl Into<Value>) -> bool {
        let Some(path) = self.meta.index(field) else {
            return false;
        };
        match scalar_at_mut(&mut *self.record, path) {
            Some(slot) => slot.assign(value.into()),
            None => false,
        }
    }

    /// Whether the field differs from a previously captured value.
    pub fn changed_since(&self, field: &str, snapshot: &Value) -> bool {
        self.meta
            .index(field)
            .and_then(|path| scalar_at(&*self.record, path))
            .is_some_and(|slot| slot.changed_since(snapshot))
    }

    pub fn is_zero(&self, field: &str) -> bool {
        self.meta
            .index(field)
            .and_then(|path| scalar_at(&*self.record, path))
            .is_none_or(|slot| slot.is_zero_value())
    }

    pub fn primary_field(&self) -> &str {
        self.meta.primary_field()
    }

    pub fn primary_fields(&self) -> &[String] {
        self.meta.primary_fields()
    }

    pub fn primary_value(&self) -> Value {
        let field = self.meta.primary_field();
        self.value(field).unwrap_or(Value::Null)
    }

    pub fn primary_values(&self) -> Vec<Value> {
        self.meta
            .primary_index()
            .iter()
            .map(|path| scalar_at(&*self.record, path).map_or(Value::Null, |slot| slot.value()))
            .collect()
    }

    /// Primary key as one value: the field itself, or an array of the
    /// fields of a composite key.
    pub fn key(&self) -> Value {
        let mut values = self.primary_values();
        if values.len() == 1 {
            values.pop().unwrap_or(Value::Null)
        } else {
            Value::Array(values)
        }
    }

    /// Whether every primary key field holds a non-zero value.
    pub fn is_persisted(&self) -> bool {
        self.meta.has_primary_key() && self.primary_values().iter().all(|v| !v.is_zero())
    }

    pub fn belongs_to(&self) -> &[String] {
        self.meta.belongs_to()
    }

    pub fn has_one(&self) -> &[String] {
        self.meta.has_one()
    }

    pub fn has_many(&self) -> &[String] {
        self.meta.has_many()
    }

    pub fn preload(&self) -> &[String] {
        self.meta.preload()
    }

    pub fn flag(&self, flag: Flags) -> bool {
        self.meta.flag(flag)
    }

    /// Association by field name. Unknown names are a programmer error.
    pub fn association(&mut self, name: &str) -> Association<'_> {
        let meta = self.association_meta(name);
        Association::new(meta, &mut *self.record, self.registry)
    }

    /// Consuming form of [`Document::association`].
    pub fn into_association(self, name: &str) -> Association<'a> {
        let meta = self.association_meta(name);
        Association::new(meta, self.record, self.registry)
    }

    fn association_meta(&self, name: &str) -> Arc<crate::association::AssociationMeta> {
        match self.meta.index(name) {
            Some(path) if self.meta.field_type(name).is_none() => {
                self.registry.association(self.meta.type_info(), path)
            }
            _ => fault(MappingError::UnknownField {
                record: self.meta.type_info().name().to_string(),
                field: name.to_string(),
            }),
        }
    }

    /// One scan destination per requested column.
    ///
    /// `assoc.field` columns route into a belongs-to or has-one target;
    /// anything unknown is discarded.
    pub fn scanners<S: AsRef<str>>(&self, fields: &[S]) -> Vec<Scanner> {
        fields
            .iter()
            .map(|field| Scanner::new(self.route(&self.meta, field.as_ref())))
            .collect()
    }

    fn route(&self, meta: &RecordMeta, field: &str) -> Route {
        if meta.field_type(field).is_some() {
            return Route::Field(field.to_string());
        }
        let Some((head, rest)) = field.split_once('.') else {
            return Route::Discard;
        };
        let Some(path) = meta.index(head) else {
            return Route::Discard;
        };
        if meta.field_type(head).is_some() {
            return Route::Discard;
        }
        let assoc = self.registry.association(meta.type_info(), path);
        if assoc.kind() == AssociationKind::HasMany {
            return Route::Discard;
        }
        let target = self.registry.meta(assoc.target());
        match self.route(&target, rest) {
            Route::Discard => Route::Discard,
            inner => Route::Nested(head.to_string(), Box::new(inner)),
        }
    }

    /// Apply scanned values to the record.
    pub fn assign(&mut self, scanners: Vec<Scanner>) -> Result<()> {
        for scanner in scanners {
            let (route, value) = scanner.into_parts();
            if let Some(value) = value {
                self.assign_route(&route, value)?;
            }
        }
        Ok(())
    }

    fn assign_route(&mut self, route: &Route, value: Value) -> Result<()> {
        match route {
            Route::Field(field) => {
                let actual = value.type_name();
                if self.set_value(field, value) {
                    Ok(())
                } else {
                    Err(Error::Type(TypeError {
                        expected: self.field_type(field).map_or("known field", FieldType::name),
                        actual: actual.to_string(),
                        column: Some(field.clone()),
                    }))
                }
            }
            Route::Nested(name, inner) => {
                let mut assoc = self.association(name);
                // An all-NULL joined row must not conjure an empty target.
                if value.is_null() && !assoc.is_present() {
                    return Ok(());
                }
                let (mut target, _) = assoc.document();
                target.assign_route(inner, value)
            }
            Route::Capture | Route::Discard => Ok(()),
        }
    }

    /// Changes since the embedded change tracker was last initialized.
    ///
    /// `None` when the record carries no tracker or it was never initialized.
    pub fn changes(&mut self) -> Option<Changes> {
        let snapshot = self.record.dirty_state()?.snapshot()?.clone();
        Some(snapshot.changes(self))
    }

    /// Snapshot the record into its embedded change tracker, if it has one.
    pub fn track_changes(&mut self) {
        if self.record.dirty_state().is_none() {
            return;
        }
        let snapshot = Snapshot::capture(self);
        if let Some(dirty) = self.record.dirty_state() {
            dirty.set(snapshot);
        }
    }

    /// Re-capture associations into an initialized tracker, keeping the
    /// field values it already holds. Used after preloading.
    pub fn track_associations(&mut self) {
        let Some(previous) = self
            .record
            .dirty_state()
            .and_then(|dirty| dirty.snapshot().cloned())
        else {
            return;
        };
        let mut snapshot = Snapshot::capture(self);
        snapshot.keep_values(previous);
        if let Some(dirty) = self.record.dirty_state() {
            dirty.set(snapshot);
        }
    }
}

impl std::fmt::Debug for Document<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for field in self.fields() {
            map.entry(field, &self.value(field).unwrap_or(Value::Null));
        }
        map.finish()
    }
}

pub(crate) fn read_value(record: &dyn Record, meta: &RecordMeta, field: &str) -> Option<Value> {
    let path = meta.index(field)?;
    scalar_at(record, path).map(|slot| slot.value())
}

pub(crate) fn embedded_at<'r>(record: &'r dyn Record, parents: &[usize]) -> Option<&'r dyn Record> {
    let mut current = record;
    for &i in parents {
        match current.field_at(i) {
            FieldRef::Embedded(inner) => current = inner,
            _ => return None,
        }
    }
    Some(current)
}

pub(crate) fn embedded_at_mut<'r>(
    record: &'r mut dyn Record,
    parents: &[usize],
) -> Option<&'r mut dyn Record> {
    let mut current = record;
    for &i in parents {
        match current.field_at_mut(i) {
            FieldMut::Embedded(inner) => current = inner,
            _ => return None,
        }
    }
    Some(current)
}

pub(crate) fn scalar_at<'r>(record: &'r dyn Record, path: &[usize]) -> Option<&'r dyn ScalarSlot> {
    let (last, parents) = path.split_last()?;
    match embedded_at(record, parents)?.field_at(*last) {
        FieldRef::Scalar(slot) => Some(slot),
        _ => None,
    }
}

pub(crate) fn scalar_at_mut<'r>(
    record: &'r mut dyn Record,
    path: &[usize],
) -> Option<&'r mut dyn ScalarSlot> {
    let (last, parents) = path.split_last()?;
    match embedded_at_mut(record, parents)?.field_at_mut(*last) {
        FieldMut::Scalar(slot) => Some(slot),
        _ => None,
    }
}
