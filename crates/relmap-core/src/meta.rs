//! Record metadata and the registry that caches it.
//!
//! Metadata is derived once per type from its [`Schema`] plus a zero-valued
//! instance (used to discover which declared fields are scalars, embedded
//! structs or associations) and then shared immutably.

use crate::association::{self, AssociationKind, AssociationMeta};
use crate::error::{MappingError, fault};
use crate::record::{FieldRef, TypeInfo};
use crate::types::FieldType;
use heck::ToSnakeCase;
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

/// Special fields a record type carries.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Flags(u8);

impl Flags {
    pub const NONE: Flags = Flags(0);
    /// `created_at` or `inserted_at` timestamp
    pub const CREATED_AT: Flags = Flags(1);
    /// `updated_at` timestamp
    pub const UPDATED_AT: Flags = Flags(1 << 1);
    /// `deleted_at` timestamp, enables soft delete
    pub const DELETED_AT: Flags = Flags(1 << 2);
    /// `deleted` boolean, enables soft delete
    pub const DELETED: Flags = Flags(1 << 3);
    /// `lock_version` integer, enables optimistic locking
    pub const VERSIONING: Flags = Flags(1 << 4);

    pub const fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Flags) {
        self.0 |= other.0;
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Flag implied by a column of this name and kind.
    pub fn infer(name: &str, kind: FieldType) -> Flags {
        match (name, kind) {
            ("created_at" | "inserted_at", FieldType::Timestamp) => Flags::CREATED_AT,
            ("updated_at", FieldType::Timestamp) => Flags::UPDATED_AT,
            ("deleted_at", FieldType::Timestamp) => Flags::DELETED_AT,
            ("deleted", FieldType::Bool) => Flags::DELETED,
            ("lock_version", FieldType::Int | FieldType::UInt) => Flags::VERSIONING,
            _ => Flags::NONE,
        }
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Flags::CREATED_AT, "CREATED_AT"),
            (Flags::UPDATED_AT, "UPDATED_AT"),
            (Flags::DELETED_AT, "DELETED_AT"),
            (Flags::DELETED, "DELETED"),
            (Flags::VERSIONING, "VERSIONING"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag) && !flag.is_empty())
            .map(|(_, name)| *name)
            .collect();
        write!(f, "Flags({})", set.join(" | "))
    }
}

/// Cached metadata of one record type.
#[derive(Debug)]
pub struct RecordMeta {
    type_info: TypeInfo,
    table: String,
    fields: Vec<String>,
    types: HashMap<String, FieldType>,
    index: HashMap<String, Vec<usize>>,
    primary_fields: Vec<String>,
    primary_index: Vec<Vec<usize>>,
    belongs_to: Vec<String>,
    has_one: Vec<String>,
    has_many: Vec<String>,
    preload: Vec<String>,
    flags: Flags,
}

impl RecordMeta {
    pub fn type_info(&self) -> TypeInfo {
        self.type_info
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Scalar columns in declaration order, embedded columns inlined.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn field_type(&self, field: &str) -> Option<FieldType> {
        self.types.get(field).copied()
    }

    /// Index path of a column or association field.
    pub fn index(&self, field: &str) -> Option<&[usize]> {
        self.index.get(field).map(Vec::as_slice)
    }

    pub fn primary_fields(&self) -> &[String] {
        if self.primary_fields.is_empty() {
            fault(MappingError::NoPrimaryKey {
                record: self.type_info.name().to_string(),
            });
        }
        &self.primary_fields
    }

    pub fn primary_field(&self) -> &str {
        let fields = self.primary_fields();
        if fields.len() != 1 {
            fault(MappingError::CompositePrimaryKey {
                record: self.type_info.name().to_string(),
            });
        }
        &fields[0]
    }

    pub(crate) fn primary_index(&self) -> &[Vec<usize>] {
        self.primary_fields();
        &self.primary_index
    }

    /// Whether a primary key could be resolved at all.
    pub fn has_primary_key(&self) -> bool {
        !self.primary_fields.is_empty()
    }

    pub fn is_primary(&self, field: &str) -> bool {
        self.primary_fields.iter().any(|f| f == field)
    }

    pub fn belongs_to(&self) -> &[String] {
        &self.belongs_to
    }

    pub fn has_one(&self) -> &[String] {
        &self.has_one
    }

    pub fn has_many(&self) -> &[String] {
        &self.has_many
    }

    /// Associations declared `autoload`.
    pub fn preload(&self) -> &[String] {
        &self.preload
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn flag(&self, flag: Flags) -> bool {
        self.flags.contains(flag)
    }

    fn empty(type_info: TypeInfo, table: String) -> Self {
        Self {
            type_info,
            table,
            fields: Vec::new(),
            types: HashMap::new(),
            index: HashMap::new(),
            primary_fields: Vec::new(),
            primary_index: Vec::new(),
            belongs_to: Vec::new(),
            has_one: Vec::new(),
            has_many: Vec::new(),
            preload: Vec::new(),
            flags: Flags::NONE,
        }
    }

    fn add_index(&mut self, name: &str, path: Vec<usize>) {
        if self.index.insert(name.to_string(), path).is_some() {
            fault(MappingError::ConflictingField {
                record: self.type_info.name().to_string(),
                field: name.to_string(),
            });
        }
    }
}

/// Default table name: the pluralized snake_case type name.
pub fn table_name(type_name: &str) -> String {
    pluralizer::pluralize(&type_name.to_snake_case(), 2, false)
}

/// Column name of a Rust field.
pub(crate) fn column_name(field: &str) -> String {
    field.to_snake_case()
}

/// Process-lifetime cache of record and association metadata.
///
/// Construct one at startup and share it. Lookups are read-mostly; a miss
/// computes the entry without holding a lock, so two callers racing on the
/// same type may both compute it and the last store wins.
#[derive(Default)]
pub struct Registry {
    metas: RwLock<HashMap<TypeId, Arc<RecordMeta>>>,
    shapes: RwLock<HashMap<TypeId, Arc<RecordMeta>>>,
    associations: RwLock<HashMap<(TypeId, Vec<usize>), Arc<AssociationMeta>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full metadata of `T`.
    pub fn meta_of<T: crate::record::Model>(&self) -> Arc<RecordMeta> {
        self.meta(TypeInfo::of::<T>())
    }

    /// Full metadata, including association partitions.
    pub fn meta(&self, ty: TypeInfo) -> Arc<RecordMeta> {
        if let Some(meta) = read_cached(&self.metas, &ty.id()) {
            return meta;
        }

        let meta = Arc::new(self.build(ty, false));
        tracing::trace!(
            record = ty.name(),
            table = %meta.table,
            fields = meta.fields.len(),
            "Built record metadata"
        );
        let mut metas = self.metas.write().unwrap_or_else(|e| e.into_inner());
        metas.insert(ty.id(), Arc::clone(&meta));
        meta
    }

    /// Metadata without association partitions.
    ///
    /// Used while resolving associations so that two types pointing at each
    /// other do not recurse.
    pub fn shape(&self, ty: TypeInfo) -> Arc<RecordMeta> {
        if let Some(meta) = read_cached(&self.metas, &ty.id()) {
            return meta;
        }
        if let Some(meta) = read_cached(&self.shapes, &ty.id()) {
            return meta;
        }

        let meta = Arc::new(self.build(ty, true));
        let mut shapes = self.shapes.write().unwrap_or_else(|e| e.into_inner());
        shapes.insert(ty.id(), Arc::clone(&meta));
        meta
    }

    /// Association metadata of the field at `path` on `owner`.
    pub fn association(&self, owner: TypeInfo, path: &[usize]) -> Arc<AssociationMeta> {
        let key = (owner.id(), path.to_vec());
        if let Some(meta) = read_cached(&self.associations, &key) {
            return meta;
        }

        let meta = Arc::new(association::resolve(self, owner, path));
        tracing::trace!(
            record = owner.name(),
            association = %meta.name(),
            kind = ?meta.kind(),
            reference = %meta.reference_field(),
            foreign = %meta.foreign_field(),
            "Resolved association"
        );
        let mut associations = self.associations.write().unwrap_or_else(|e| e.into_inner());
        associations.insert(key, Arc::clone(&meta));
        meta
    }

    fn build(&self, ty: TypeInfo, skip_assoc: bool) -> RecordMeta {
        let schema = ty.schema();
        let zero = ty.zero();
        let table = schema
            .table_name()
            .map_or_else(|| table_name(ty.name()), str::to_string);
        let mut meta = RecordMeta::empty(ty, table);
        let mut tagged: Vec<(String, Vec<usize>)> = Vec::new();

        for (i, def) in schema.fields().iter().enumerate() {
            if def.skip {
                continue;
            }
            let name = def
                .column
                .clone()
                .unwrap_or_else(|| column_name(&def.name));

            match zero.field_at(i) {
                FieldRef::Scalar(slot) => {
                    let kind = slot.kind();
                    meta.add_index(&name, vec![i]);
                    meta.fields.push(name.clone());
                    meta.types.insert(name.clone(), kind);
                    meta.flags.insert(Flags::infer(&name, kind));
                    if def.primary {
                        tagged.push((name, vec![i]));
                    }
                }
                FieldRef::Embedded(inner) => {
                    let prefix = def.column.clone().unwrap_or_default();
                    let embedded = if skip_assoc {
                        self.shape(inner.type_info())
                    } else {
                        self.meta(inner.type_info())
                    };
                    merge_embedded(&mut meta, &embedded, i, &prefix, &mut tagged);
                }
                FieldRef::One(_) | FieldRef::Many(_) => {
                    meta.add_index(&name, vec![i]);
                    if skip_assoc {
                        continue;
                    }
                    let assoc = self.association(ty, &[i]);
                    match assoc.kind() {
                        AssociationKind::BelongsTo => meta.belongs_to.push(name.clone()),
                        AssociationKind::HasOne => meta.has_one.push(name.clone()),
                        AssociationKind::HasMany => meta.has_many.push(name.clone()),
                    }
                    if assoc.autoload() {
                        meta.preload.push(name);
                    }
                }
                FieldRef::Missing => fault(MappingError::MissingAccessor {
                    record: ty.name().to_string(),
                    index: i,
                }),
            }
        }

        if let Some(fields) = schema.primary_key_override() {
            for field in fields {
                let Some(path) = meta.index.get(field).cloned() else {
                    fault(MappingError::UnknownField {
                        record: ty.name().to_string(),
                        field: field.clone(),
                    });
                };
                meta.primary_fields.push(field.clone());
                meta.primary_index.push(path);
            }
        } else if !tagged.is_empty() {
            for (field, path) in tagged {
                meta.primary_fields.push(field);
                meta.primary_index.push(path);
            }
        } else if meta.types.contains_key("id") {
            if let Some(path) = meta.index.get("id").cloned() {
                meta.primary_fields.push("id".to_string());
                meta.primary_index.push(path);
            }
        }

        meta
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = |map: &RwLock<HashMap<TypeId, Arc<RecordMeta>>>| {
            map.read().map_or(0, |m| m.len())
        };
        f.debug_struct("Registry")
            .field("metas", &count(&self.metas))
            .field("shapes", &count(&self.shapes))
            .finish_non_exhaustive()
    }
}

fn read_cached<K, V>(map: &RwLock<HashMap<K, Arc<V>>>, key: &K) -> Option<Arc<V>>
where
    K: std::hash::Hash + Eq,
{
    let map = map.read().unwrap_or_else(|e| e.into_inner());
    map.get(key).cloned()
}

fn merge_embedded(
    meta: &mut RecordMeta,
    embedded: &RecordMeta,
    at: usize,
    prefix: &str,
    tagged: &mut Vec<(String, Vec<usize>)>,
) {
    let compose = |path: &[usize]| {
        let mut full = Vec::with_capacity(path.len() + 1);
        full.push(at);
        full.extend_from_slice(path);
        full
    };

    for field in &embedded.fields {
        let name = format!("{prefix}{field}");
        meta.fields.push(name.clone());
        if let Some(kind) = embedded.field_type(field) {
            meta.types.insert(name.clone(), kind);
        }
    }

    let mut names: Vec<&String> = embedded.index.keys().collect();
    names.sort();
    for field in names {
        let name = format!("{prefix}{field}");
        meta.add_index(&name, compose(&embedded.index[field]));
    }

    for (field, path) in embedded.primary_fields.iter().zip(&embedded.primary_index) {
        tagged.push((format!("{prefix}{field}"), compose(path)));
    }

    let prefixed = |list: &[String]| list.iter().map(|f| format!("{prefix}{f}")).collect::<Vec<_>>();
    meta.belongs_to.extend(prefixed(&embedded.belongs_to));
    meta.has_one.extend(prefixed(&embedded.has_one));
    meta.has_many.extend(prefixed(&embedded.has_many));
    meta.preload.extend(prefixed(&embedded.preload));
    meta.flags.insert(embedded.flags);
}
