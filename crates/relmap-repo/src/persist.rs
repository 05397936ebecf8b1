//! Cascading persistence of a `Mutation` tree.
//!
//! A save runs in three phases. Belongs-to targets go first because their
//! keys feed the record's reference fields. The record itself goes next.
//! Has-one and has-many children go last because they need the record's key.
//! [`Persister::insert`] and [`Persister::update`] recurse through the same
//! phases for every nested mutation.
//!
//! The persister never opens a transaction; the repository wraps it in one.

use crate::config::RepositoryConfig;
use crate::scan;
use asupersync::{Cx, Outcome};
use relmap_core::{
    Adapter, AssocMutation, Collection, Document, Error, Filter, Flags, MappingError, Mutate,
    Mutation, Query, RecordMeta, Timestamp, Value, fault,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Outcome<T, Error>> + Send + 'a>>;

const LOCK_FIELD: &str = "lock_version";

pub(crate) struct Persister<'r, A> {
    adapter: &'r A,
    config: &'r RepositoryConfig,
}

impl<'r, A: Adapter> Persister<'r, A> {
    pub(crate) fn new(adapter: &'r A, config: &'r RepositoryConfig) -> Self {
        Self { adapter, config }
    }

    /// Insert `doc` and everything its mutation carries.
    pub(crate) fn insert<'a>(
        &'a self,
        cx: &'a Cx,
        mut doc: Document<'a>,
        mut mutation: Mutation,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            try_outcome!(self.save_belongs_to(cx, &mut doc, &mut mutation).await);

            let table = doc.table().to_string();
            let primary = single_primary(&doc);
            tracing::debug!(table = %table, fields = mutation.mutates().len(), "Inserting record");
            let id = try_outcome!(
                self.adapter
                    .insert(cx, &table, primary.as_deref().unwrap_or_default(), &mutation)
                    .await
            );
            if let Some(field) = &primary {
                if !id.is_null() {
                    doc.set_value(field, id);
                }
            }

            if (mutation.reload() || self.config.reload_after_save) && doc.is_persisted() {
                let query = Query::from(table).filter(key_filter(&doc)).unscoped();
                try_outcome!(self.reload(cx, &mut doc, &query).await);
            }

            try_outcome!(self.save_has_one(cx, &mut doc, &mut mutation).await);
            self.save_has_many(cx, &mut doc, &mut mutation, true).await
        })
    }

    /// Update the rows matching `filter` and everything the mutation carries.
    ///
    /// An empty mutation skips the record's own statement but still cascades.
    pub(crate) fn update<'a>(
        &'a self,
        cx: &'a Cx,
        mut doc: Document<'a>,
        mut mutation: Mutation,
        filter: Filter,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            try_outcome!(self.save_belongs_to(cx, &mut doc, &mut mutation).await);

            if !mutation.is_empty() {
                let meta = Arc::clone(doc.meta());
                let reload_query = Query::from(meta.table()).filter(filter.clone()).unscoped();
                let mut query = Query::from(meta.table()).filter(filter);
                if mutation.unscoped() {
                    query = query.unscoped();
                }
                let mut query = scoped(&meta, query);

                let mut version = None;
                if meta.flag(Flags::VERSIONING) {
                    let current = doc.value(LOCK_FIELD).unwrap_or(Value::Null);
                    let next = current.as_i64().unwrap_or_default() + 1;
                    query = query.filter(Filter::eq(LOCK_FIELD, current));
                    mutation.add(Mutate::set(LOCK_FIELD, next));
                    version = Some(next);
                }

                tracing::debug!(
                    table = %meta.table(),
                    filter = %query.filter,
                    fields = mutation.mutates().len(),
                    "Updating record"
                );
                let updated = try_outcome!(self.adapter.update(cx, &query, &mutation).await);
                if updated == 0 {
                    return Outcome::Err(Error::not_found(meta.table()));
                }
                if let Some(next) = version {
                    doc.set_value(LOCK_FIELD, next);
                }

                if mutation.reload() || self.config.reload_after_save {
                    try_outcome!(self.reload(cx, &mut doc, &reload_query).await);
                }
            }

            try_outcome!(self.save_has_one(cx, &mut doc, &mut mutation).await);
            self.save_has_many(cx, &mut doc, &mut mutation, false).await
        })
    }

    /// Bulk insert `col` in one statement and write the generated keys back.
    pub(crate) async fn insert_all(
        &self,
        cx: &Cx,
        col: &mut Collection<'_>,
        mutations: Vec<Mutation>,
    ) -> Outcome<(), Error> {
        if mutations.is_empty() {
            return Outcome::Ok(());
        }

        let table = col.table().to_string();
        let primary = if col.meta().has_primary_key() && col.primary_fields().len() == 1 {
            Some(col.primary_field().to_string())
        } else {
            None
        };

        let mut fields: Vec<String> = Vec::new();
        for mutate in mutations.iter().flat_map(Mutation::mutates) {
            if let Mutate::Set { field, .. } = mutate {
                if !fields.contains(field) {
                    fields.push(field.clone());
                }
            }
        }

        tracing::debug!(
            table = %table,
            rows = mutations.len(),
            fields = fields.len(),
            "Bulk inserting records"
        );
        let ids = try_outcome!(
            self.adapter
                .insert_all(cx, &table, primary.as_deref().unwrap_or_default(), &fields, &mutations)
                .await
        );

        if let Some(field) = primary {
            for (i, id) in ids.into_iter().enumerate().take(col.len()) {
                if !id.is_null() {
                    col.get(i).set_value(&field, id);
                }
            }
        }
        Outcome::Ok(())
    }

    /// Delete every row matching `query`, softly when the type is flagged.
    pub(crate) async fn delete_all(
        &self,
        cx: &Cx,
        meta: &RecordMeta,
        query: Query,
    ) -> Outcome<u64, Error> {
        let soft = soft_delete(meta);
        self.delete_rows(cx, meta, query, soft.as_ref()).await
    }

    /// Delete the row of `doc` by primary key. Zero rows is `NotFound`.
    ///
    /// A soft delete also writes the deletion marker into the record.
    pub(crate) async fn delete_one(&self, cx: &Cx, doc: &mut Document<'_>) -> Outcome<(), Error> {
        let meta = Arc::clone(doc.meta());
        let query = Query::from(meta.table()).filter(key_filter(doc));
        let soft = soft_delete(&meta);
        let deleted = try_outcome!(self.delete_rows(cx, &meta, query, soft.as_ref()).await);
        if deleted == 0 {
            return Outcome::Err(Error::not_found(meta.table()));
        }
        for mutate in soft.iter().flat_map(Mutation::mutates) {
            if let Some(value) = mutate.value() {
                doc.set_value(mutate.field(), value.clone());
            }
        }
        Outcome::Ok(())
    }

    async fn delete_rows(
        &self,
        cx: &Cx,
        meta: &RecordMeta,
        query: Query,
        soft: Option<&Mutation>,
    ) -> Outcome<u64, Error> {
        let query = scoped(meta, query);
        match soft {
            Some(mutation) => {
                tracing::debug!(table = %meta.table(), filter = %query.filter, "Soft deleting records");
                self.adapter.update(cx, &query, mutation).await
            }
            None => {
                tracing::debug!(table = %meta.table(), filter = %query.filter, "Deleting records");
                self.adapter.delete(cx, &query).await
            }
        }
    }

    async fn reload(&self, cx: &Cx, doc: &mut Document<'_>, query: &Query) -> Outcome<(), Error> {
        let mut cursor = try_outcome!(self.adapter.query(cx, &query.clone().limit(1)).await);
        match scan::scan_one(cursor.as_mut(), doc) {
            Ok(true) => Outcome::Ok(()),
            Ok(false) => Outcome::Err(Error::not_found(doc.table())),
            Err(e) => Outcome::Err(e),
        }
    }

    async fn save_belongs_to(
        &self,
        cx: &Cx,
        doc: &mut Document<'_>,
        mutation: &mut Mutation,
    ) -> Outcome<(), Error> {
        let meta = Arc::clone(doc.meta());
        for field in meta.belongs_to() {
            let Some(child) = take_one(mutation, field) else {
                continue;
            };
            let mut assoc = doc.association(field);
            if assoc.meta().through().is_some() {
                tracing::trace!(association = %field, "Skipping through association");
                continue;
            }

            let reference_field = assoc.reference_field().to_string();
            let foreign_field = assoc.foreign_field().to_string();
            if assoc.is_loaded() {
                let reference = assoc.reference_value();
                let foreign = assoc.foreign_value().unwrap_or(Value::Null);
                if !reference.same(&foreign) {
                    fault(MappingError::InconsistentAssociation {
                        record: meta.type_info().name().to_string(),
                        association: field.clone(),
                    });
                }
                tracing::trace!(association = %field, "Updating belongs to target");
                let (target, _) = assoc.document();
                try_outcome!(
                    self.update(cx, target, child, Filter::eq(foreign_field, foreign))
                        .await
                );
            } else {
                tracing::trace!(association = %field, "Inserting belongs to target");
                let (mut target, _) = assoc.document();
                try_outcome!(self.insert(cx, target.reborrow(), child).await);
                let key = target.value(&foreign_field).unwrap_or(Value::Null);
                mutation.add(Mutate::set(reference_field.as_str(), key.clone()));
                doc.set_value(&reference_field, key);
            }
        }
        Outcome::Ok(())
    }

    async fn save_has_one(
        &self,
        cx: &Cx,
        doc: &mut Document<'_>,
        mutation: &mut Mutation,
    ) -> Outcome<(), Error> {
        let meta = Arc::clone(doc.meta());
        for field in meta.has_one() {
            let Some(mut child) = take_one(mutation, field) else {
                continue;
            };
            let mut assoc = doc.association(field);
            if assoc.meta().through().is_some() {
                tracing::trace!(association = %field, "Skipping through association");
                continue;
            }

            let reference = assoc.reference_value();
            let foreign_field = assoc.foreign_field().to_string();
            if assoc.is_loaded() {
                let foreign = assoc.foreign_value().unwrap_or(Value::Null);
                if !foreign.same(&reference) {
                    fault(MappingError::InconsistentAssociation {
                        record: meta.type_info().name().to_string(),
                        association: field.clone(),
                    });
                }
                tracing::trace!(association = %field, "Updating has one target");
                let (target, _) = assoc.document();
                let filter = key_filter(&target).and_eq(foreign_field, reference);
                try_outcome!(self.update(cx, target, child, filter).await);
            } else {
                tracing::trace!(association = %field, "Inserting has one target");
                let (mut target, _) = assoc.document();
                child.add(Mutate::set(foreign_field.as_str(), reference.clone()));
                target.set_value(&foreign_field, reference);
                try_outcome!(self.insert(cx, target, child).await);
            }
        }
        Outcome::Ok(())
    }

    async fn save_has_many(
        &self,
        cx: &Cx,
        doc: &mut Document<'_>,
        mutation: &mut Mutation,
        insertion: bool,
    ) -> Outcome<(), Error> {
        let meta = Arc::clone(doc.meta());
        let record = meta.type_info().name();
        for field in meta.has_many() {
            let Some(AssocMutation {
                mut mutations,
                deleted_ids,
            }) = mutation.take_assoc(field)
            else {
                continue;
            };
            let mut assoc = doc.association(field);
            if assoc.meta().through().is_some() {
                tracing::trace!(association = %field, "Skipping through association");
                continue;
            }
            if !insertion && !assoc.is_present() {
                fault(MappingError::UnloadedHasMany {
                    record: record.to_string(),
                    association: field.clone(),
                });
            }

            let foreign_field = assoc.foreign_field().to_string();
            let reference = assoc.reference_value();
            let (mut col, _) = assoc.collection();
            if mutations.len() != col.len() {
                fault(MappingError::MutationMismatch {
                    association: format!("{record}.{field}"),
                    expected: col.len(),
                    actual: mutations.len(),
                });
            }
            let child_meta = Arc::clone(col.meta());
            let replace = !insertion && deleted_ids.is_none();

            if !insertion {
                let scope = Filter::eq(foreign_field.as_str(), reference.clone());
                let filter = match deleted_ids {
                    None => Some(scope),
                    Some(ids) if !ids.is_empty() => {
                        Some(scope.and(Filter::in_list(col.primary_field(), ids)))
                    }
                    Some(_) => None,
                };
                if let Some(filter) = filter {
                    let query = Query::from(child_meta.table()).filter(filter);
                    let deleted = try_outcome!(self.delete_all(cx, &child_meta, query).await);
                    tracing::debug!(association = %field, deleted, replace, "Deleted has many children");
                }
            }

            // Persisted children move to the front; the rest are inserts.
            let mut front = 0;
            if !replace {
                for i in 0..col.len() {
                    let child = col.get(i);
                    if !child.is_persisted() {
                        continue;
                    }
                    let current = child.value(&foreign_field).unwrap_or(Value::Null);
                    if !current.same(&reference) {
                        fault(MappingError::InconsistentAssociation {
                            record: record.to_string(),
                            association: field.clone(),
                        });
                    }
                    col.swap(front, i);
                    mutations.swap(front, i);
                    front += 1;
                }
            }

            let inserts = mutations.split_off(front);
            for (i, child_mutation) in mutations.into_iter().enumerate() {
                if child_mutation.is_empty() && !child_mutation.has_assoc() {
                    continue;
                }
                let child = col.get(i);
                let filter = key_filter(&child).and_eq(foreign_field.as_str(), reference.clone());
                try_outcome!(self.update(cx, child, child_mutation, filter).await);
            }

            let len = col.len();
            let mut fresh = col.slice(front, len);
            try_outcome!(
                self.insert_children(cx, &mut fresh, inserts, &foreign_field, &reference)
                    .await
            );
        }
        Outcome::Ok(())
    }

    /// Insert has-many children with the foreign key pointing at the parent.
    async fn insert_children(
        &self,
        cx: &Cx,
        col: &mut Collection<'_>,
        mut mutations: Vec<Mutation>,
        foreign_field: &str,
        reference: &Value,
    ) -> Outcome<(), Error> {
        for (i, mutation) in mutations.iter_mut().enumerate() {
            mutation.add(Mutate::set(foreign_field, reference.clone()));
            col.get(i).set_value(foreign_field, reference.clone());
        }

        if mutations.iter().any(Mutation::has_assoc) {
            for (i, mutation) in mutations.into_iter().enumerate() {
                try_outcome!(self.insert(cx, col.get(i), mutation).await);
            }
            return Outcome::Ok(());
        }
        self.insert_all(cx, col, mutations).await
    }
}

/// Apply the soft-delete default scope of `meta` unless the query opts out.
pub(crate) fn scoped(meta: &RecordMeta, query: Query) -> Query {
    if query.unscoped {
        query
    } else if meta.flag(Flags::DELETED_AT) {
        query.filter(Filter::nil("deleted_at"))
    } else if meta.flag(Flags::DELETED) {
        query.filter(Filter::eq("deleted", false))
    } else {
        query
    }
}

/// The update that soft-deletes a row of `meta`, if the type supports it.
fn soft_delete(meta: &RecordMeta) -> Option<Mutation> {
    let mutate = if meta.flag(Flags::DELETED_AT) {
        Mutate::set("deleted_at", Value::Timestamp(Timestamp::now().as_micros()))
    } else if meta.flag(Flags::DELETED) {
        Mutate::set("deleted", true)
    } else {
        return None;
    };
    let mut mutation = Mutation::new();
    mutation.add(mutate);
    Some(mutation)
}

/// Equality on every primary key field of `doc`.
pub(crate) fn key_filter(doc: &Document<'_>) -> Filter {
    Filter::eq_all(doc.primary_fields(), &doc.primary_values())
}

fn single_primary(doc: &Document<'_>) -> Option<String> {
    if !doc.meta().has_primary_key() {
        return None;
    }
    match doc.primary_fields() {
        [field] => Some(field.clone()),
        _ => None,
    }
}

fn take_one(mutation: &mut Mutation, field: &str) -> Option<Mutation> {
    mutation
        .take_assoc(field)
        .and_then(|assoc| assoc.mutations.into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use relmap_core::{
        Aggregate, Cursor, FieldMut, FieldRef, Model, Registry, RowCursor, Schema, Transaction,
    };
    use std::sync::Mutex;
    use std::task::{Context, Poll, Waker};

    #[derive(Debug, Default)]
    struct Note {
        id: i64,
        body: String,
        deleted_at: Option<Timestamp>,
    }

    impl Model for Note {
        fn schema() -> Schema {
            Schema::new().field("id").field("body").field("deleted_at")
        }

        fn field(&self, index: usize) -> FieldRef<'_> {
            match index {
                0 => FieldRef::scalar(&self.id),
                1 => FieldRef::scalar(&self.body),
                2 => FieldRef::scalar(&self.deleted_at),
                _ => FieldRef::Missing,
            }
        }

        fn field_mut(&mut self, index: usize) -> FieldMut<'_> {
            match index {
                0 => FieldMut::scalar(&mut self.id),
                1 => FieldMut::scalar(&mut self.body),
                2 => FieldMut::scalar(&mut self.deleted_at),
                _ => FieldMut::Missing,
            }
        }
    }

    #[derive(Debug, Default)]
    struct Flag {
        code: String,
        deleted: bool,
    }

    impl Model for Flag {
        fn schema() -> Schema {
            Schema::new().primary_key(&["code"]).field("code").field("deleted")
        }

        fn field(&self, index: usize) -> FieldRef<'_> {
            match index {
                0 => FieldRef::scalar(&self.code),
                1 => FieldRef::scalar(&self.deleted),
                _ => FieldRef::Missing,
            }
        }

        fn field_mut(&mut self, index: usize) -> FieldMut<'_> {
            match index {
                0 => FieldMut::scalar(&mut self.code),
                1 => FieldMut::scalar(&mut self.deleted),
                _ => FieldMut::Missing,
            }
        }
    }

    #[derive(Debug, Default)]
    struct Author {
        id: i64,
        name: String,
    }

    impl Model for Author {
        fn schema() -> Schema {
            Schema::new().field("id").field("name")
        }

        fn field(&self, index: usize) -> FieldRef<'_> {
            match index {
                0 => FieldRef::scalar(&self.id),
                1 => FieldRef::scalar(&self.name),
                _ => FieldRef::Missing,
            }
        }

        fn field_mut(&mut self, index: usize) -> FieldMut<'_> {
            match index {
                0 => FieldMut::scalar(&mut self.id),
                1 => FieldMut::scalar(&mut self.name),
                _ => FieldMut::Missing,
            }
        }
    }

    #[derive(Debug, Default)]
    struct Cover {
        id: i64,
        post_id: i64,
    }

    impl Model for Cover {
        fn schema() -> Schema {
            Schema::new().field("id").field("post_id")
        }

        fn field(&self, index: usize) -> FieldRef<'_> {
            match index {
                0 => FieldRef::scalar(&self.id),
                1 => FieldRef::scalar(&self.post_id),
                _ => FieldRef::Missing,
            }
        }

        fn field_mut(&mut self, index: usize) -> FieldMut<'_> {
            match index {
                0 => FieldMut::scalar(&mut self.id),
                1 => FieldMut::scalar(&mut self.post_id),
                _ => FieldMut::Missing,
            }
        }
    }

    #[derive(Debug, Default)]
    struct Comment {
        id: i64,
        post_id: i64,
        body: String,
    }

    impl Model for Comment {
        fn schema() -> Schema {
            Schema::new().field("id").field("post_id").field("body")
        }

        fn field(&self, index: usize) -> FieldRef<'_> {
            match index {
                0 => FieldRef::scalar(&self.id),
                1 => FieldRef::scalar(&self.post_id),
                2 => FieldRef::scalar(&self.body),
                _ => FieldRef::Missing,
            }
        }

        fn field_mut(&mut self, index: usize) -> FieldMut<'_> {
            match index {
                0 => FieldMut::scalar(&mut self.id),
                1 => FieldMut::scalar(&mut self.post_id),
                2 => FieldMut::scalar(&mut self.body),
                _ => FieldMut::Missing,
            }
        }
    }

    #[derive(Debug, Default)]
    struct Post {
        id: i64,
        author_id: i64,
        author: Option<Author>,
        cover: Option<Cover>,
        comments: Option<Vec<Comment>>,
    }

    impl Model for Post {
        fn schema() -> Schema {
            Schema::new()
                .field("id")
                .field("author_id")
                .field("author")
                .field("cover")
                .field("comments")
        }

        fn field(&self, index: usize) -> FieldRef<'_> {
            match index {
                0 => FieldRef::scalar(&self.id),
                1 => FieldRef::scalar(&self.author_id),
                2 => FieldRef::one(&self.author),
                3 => FieldRef::one(&self.cover),
                4 => FieldRef::many(&self.comments),
                _ => FieldRef::Missing,
            }
        }

        fn field_mut(&mut self, index: usize) -> FieldMut<'_> {
            match index {
                0 => FieldMut::scalar(&mut self.id),
                1 => FieldMut::scalar(&mut self.author_id),
                2 => FieldMut::one(&mut self.author),
                3 => FieldMut::one(&mut self.cover),
                4 => FieldMut::many(&mut self.comments),
                _ => FieldMut::Missing,
            }
        }
    }

    /// Records every write as one log line and hands out keys from 100.
    #[derive(Debug, Default)]
    struct Stub {
        log: Mutex<Vec<String>>,
        next_id: Mutex<i64>,
    }

    impl Stub {
        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        fn push(&self, line: String) {
            self.log.lock().unwrap().push(line);
        }

        fn next_id(&self) -> Value {
            let mut next = self.next_id.lock().unwrap();
            let id = 100 + *next;
            *next += 1;
            Value::BigInt(id)
        }
    }

    impl Adapter for Stub {
        type Tx<'a>
            = Stub
        where
            Self: 'a;

        fn query(
            &self,
            _cx: &Cx,
            query: &Query,
        ) -> impl Future<Output = Outcome<Box<dyn Cursor>, Error>> + Send {
            self.push(format!("query {}: {}", query.table, query.filter));
            let cursor: Box<dyn Cursor> = Box::new(RowCursor::from_values(Vec::new(), Vec::new()));
            std::future::ready(Outcome::Ok(cursor))
        }

        fn aggregate(
            &self,
            _cx: &Cx,
            _query: &Query,
            _aggregate: Aggregate,
            _field: &str,
        ) -> impl Future<Output = Outcome<i64, Error>> + Send {
            std::future::ready(Outcome::Ok(0))
        }

        fn insert(
            &self,
            _cx: &Cx,
            table: &str,
            _primary_field: &str,
            _mutation: &Mutation,
        ) -> impl Future<Output = Outcome<Value, Error>> + Send {
            self.push(format!("insert {table}"));
            std::future::ready(Outcome::Ok(self.next_id()))
        }

        fn insert_all(
            &self,
            _cx: &Cx,
            table: &str,
            _primary_field: &str,
            _fields: &[String],
            mutations: &[Mutation],
        ) -> impl Future<Output = Outcome<Vec<Value>, Error>> + Send {
            self.push(format!("insert_all {table} x{}", mutations.len()));
            let ids = mutations.iter().map(|_| self.next_id()).collect();
            std::future::ready(Outcome::Ok(ids))
        }

        fn update(
            &self,
            _cx: &Cx,
            query: &Query,
            _mutation: &Mutation,
        ) -> impl Future<Output = Outcome<u64, Error>> + Send {
            self.push(format!("update {}: {}", query.table, query.filter));
            std::future::ready(Outcome::Ok(1))
        }

        fn delete(&self, _cx: &Cx, query: &Query) -> impl Future<Output = Outcome<u64, Error>> + Send {
            self.push(format!("delete {}: {}", query.table, query.filter));
            std::future::ready(Outcome::Ok(1))
        }

        fn begin(&self, _cx: &Cx) -> impl Future<Output = Outcome<Self::Tx<'_>, Error>> + Send {
            std::future::ready(Outcome::Ok(Stub::default()))
        }
    }

    impl Transaction for Stub {
        fn commit(self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
            std::future::ready(Outcome::Ok(()))
        }

        fn rollback(self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
            std::future::ready(Outcome::Ok(()))
        }
    }

    /// Update `doc` by primary key through a persister over `stub`.
    ///
    /// The stub never suspends, so a single poll drives the save to the end.
    fn save(stub: &Stub, doc: Document<'_>, mutation: Mutation) -> Outcome<(), Error> {
        let config = RepositoryConfig::new().reload_after_save(false);
        let persister = Persister::new(stub, &config);
        let cx = Cx::for_testing();
        let filter = key_filter(&doc);
        let mut future = std::pin::pin!(persister.update(&cx, doc, mutation, filter));
        let mut task = Context::from_waker(Waker::noop());
        match future.as_mut().poll(&mut task) {
            Poll::Ready(outcome) => outcome,
            Poll::Pending => panic!("stub adapter never suspends"),
        }
    }

    #[test]
    fn default_scope_follows_flags() {
        let registry = Registry::new();
        let notes = registry.meta_of::<Note>();
        let flags = registry.meta_of::<Flag>();

        let query = scoped(&notes, Query::from("notes"));
        assert_eq!(query.filter, Filter::nil("deleted_at"));

        let query = scoped(&flags, Query::from("flags"));
        assert_eq!(query.filter, Filter::eq("deleted", false));

        let query = scoped(&notes, Query::from("notes").unscoped());
        assert!(query.filter.is_all());
    }

    #[test]
    fn soft_delete_mutation_per_flag() {
        let registry = Registry::new();
        let notes = soft_delete(&registry.meta_of::<Note>()).unwrap();
        assert_eq!(notes.mutates()[0].field(), "deleted_at");
        assert!(matches!(
            notes.mutates()[0].value(),
            Some(Value::Timestamp(_))
        ));

        let flags = soft_delete(&registry.meta_of::<Flag>()).unwrap();
        assert_eq!(flags.mutates(), &[Mutate::set("deleted", true)]);
    }

    #[test]
    #[should_panic(expected = "inconsistent reference and foreign key on Post.author")]
    fn loaded_belongs_to_with_other_key_panics() {
        let registry = Registry::new();
        let mut post = Post {
            id: 1,
            author_id: 4,
            author: Some(Author {
                id: 3,
                name: "ann".into(),
            }),
            ..Post::default()
        };
        let mut mutation = Mutation::new();
        mutation.set_assoc("author", vec![Mutation::new()]);

        let stub = Stub::default();
        let _ = save(&stub, Document::new(&mut post, &registry), mutation);
    }

    #[test]
    #[should_panic(expected = "inconsistent reference and foreign key on Post.cover")]
    fn loaded_has_one_with_other_key_panics() {
        let registry = Registry::new();
        let mut post = Post {
            id: 1,
            cover: Some(Cover { id: 9, post_id: 2 }),
            ..Post::default()
        };
        let mut mutation = Mutation::new();
        mutation.set_assoc("cover", vec![Mutation::new()]);

        let stub = Stub::default();
        let _ = save(&stub, Document::new(&mut post, &registry), mutation);
    }

    #[test]
    #[should_panic(expected = "inconsistent reference and foreign key on Post.comments")]
    fn persisted_child_of_another_parent_panics() {
        let registry = Registry::new();
        let mut post = Post {
            id: 1,
            comments: Some(vec![Comment {
                id: 5,
                post_id: 2,
                body: "hi".into(),
            }]),
            ..Post::default()
        };
        let mut mutation = Mutation::new();
        mutation.set_assoc("comments", vec![Mutation::new()]);
        mutation.set_deleted_ids("comments", Some(Vec::new()));

        let stub = Stub::default();
        let _ = save(&stub, Document::new(&mut post, &registry), mutation);
    }

    #[test]
    fn has_many_without_deleted_ids_replaces_every_child() {
        let registry = Registry::new();
        let mut post = Post {
            id: 1,
            comments: Some(vec![
                Comment {
                    id: 5,
                    post_id: 1,
                    body: "kept".into(),
                },
                Comment {
                    body: "new".into(),
                    ..Comment::default()
                },
            ]),
            ..Post::default()
        };
        let mut mutation = Mutation::new();
        let children = ["kept", "new"]
            .iter()
            .map(|body| {
                let mut child = Mutation::new();
                child.add(Mutate::set("body", *body));
                child
            })
            .collect();
        mutation.set_assoc("comments", children);

        let stub = Stub::default();
        let outcome = save(&stub, Document::new(&mut post, &registry), mutation);
        assert!(matches!(outcome, Outcome::Ok(())));

        assert_eq!(
            stub.log(),
            vec!["delete comments: post_id = 1", "insert_all comments x2"]
        );
        let comments = post.comments.unwrap();
        assert_eq!(
            comments.iter().map(|c| (c.id, c.post_id)).collect::<Vec<_>>(),
            vec![(100, 1), (101, 1)]
        );
    }

    #[test]
    fn consistent_belongs_to_is_updated_by_its_key() {
        let registry = Registry::new();
        let mut post = Post {
            id: 1,
            author_id: 3,
            author: Some(Author {
                id: 3,
                name: "ann".into(),
            }),
            ..Post::default()
        };
        let mut mutation = Mutation::new();
        let mut author = Mutation::new();
        author.add(Mutate::set("name", "bea"));
        mutation.set_assoc("author", vec![author]);

        let stub = Stub::default();
        let outcome = save(&stub, Document::new(&mut post, &registry), mutation);
        assert!(matches!(outcome, Outcome::Ok(())));
        assert_eq!(stub.log(), vec!["update authors: id = 3"]);
    }

    #[test]
    fn key_filter_and_single_primary() {
        let registry = Registry::new();
        let mut note = Note {
            id: 4,
            ..Note::default()
        };
        let doc = Document::new(&mut note, &registry);
        assert_eq!(key_filter(&doc), Filter::eq("id", 4_i64));
        assert_eq!(single_primary(&doc).as_deref(), Some("id"));
    }
}
