//! Association metadata and runtime association handles.

use crate::collection::Collection;
use crate::document::{Document, embedded_at, embedded_at_mut, scalar_at};
use crate::error::{MappingError, fault};
use crate::meta::{Registry, column_name};
use crate::record::{FieldDef, FieldMut, FieldRef, ManySlot, OneSlot, Record, TypeInfo};
use crate::value::Value;
use std::sync::Arc;

/// Kind of relationship between an owner and its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssociationKind {
    /// The owner holds the key (`transactions.buyer_id -> users.id`).
    BelongsTo,
    /// The target holds the key and there is at most one target.
    HasOne,
    /// The target holds the key and there may be many targets.
    HasMany,
}

/// Resolved association of one owner field.
#[derive(Debug, Clone)]
pub struct AssociationMeta {
    name: String,
    kind: AssociationKind,
    owner: TypeInfo,
    target: TypeInfo,
    path: Vec<usize>,
    reference_field: String,
    reference_index: Vec<usize>,
    foreign_field: String,
    foreign_index: Vec<usize>,
    through: Option<String>,
    autoload: bool,
    autosave: bool,
}

impl AssociationMeta {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> AssociationKind {
        self.kind
    }

    pub fn owner(&self) -> TypeInfo {
        self.owner
    }

    pub fn target(&self) -> TypeInfo {
        self.target
    }

    /// Index path of the association field on the owner.
    pub fn path(&self) -> &[usize] {
        &self.path
    }

    pub fn reference_field(&self) -> &str {
        &self.reference_field
    }

    pub fn foreign_field(&self) -> &str {
        &self.foreign_field
    }

    pub fn through(&self) -> Option<&str> {
        self.through.as_deref()
    }

    /// Columns of the join table of a through association, as
    /// `(<owner>_id, <target>_id)`.
    pub fn join_fields(&self) -> Option<(String, String)> {
        self.through.as_ref()?;
        Some((
            format!("{}_id", column_name(self.owner.name())),
            format!("{}_id", column_name(self.target.name())),
        ))
    }

    pub fn autoload(&self) -> bool {
        self.autoload
    }

    pub fn autosave(&self) -> bool {
        self.autosave
    }
}

/// Find the declaration behind `path`, descending through embedded structs.
fn locate(owner: TypeInfo, path: &[usize]) -> (FieldDef, TypeInfo, bool) {
    let mut ty = owner;
    for (depth, &i) in path.iter().enumerate() {
        let last = depth + 1 == path.len();
        let schema = ty.schema();
        let zero = ty.zero();
        let Some(def) = schema.fields().get(i) else {
            fault(MappingError::MissingAccessor {
                record: ty.name().to_string(),
                index: i,
            });
        };

        let next = match zero.field_at(i) {
            FieldRef::Embedded(inner) if !last => inner.type_info(),
            FieldRef::One(slot) if last => return (def.clone(), slot.target(), false),
            FieldRef::Many(slot) if last => return (def.clone(), slot.target(), true),
            _ => fault(MappingError::WrongAssociationKind {
                record: ty.name().to_string(),
                association: def.name().to_string(),
            }),
        };
        ty = next;
    }
    fault(MappingError::MissingAccessor {
        record: owner.name().to_string(),
        index: path.len(),
    })
}

/// Resolve the association declared at `path` on `owner`.
///
/// Explicit reference and foreign keys are used when both are given.
/// Otherwise both are inferred: a through association joins on primary
/// keys; an owner field `<name>_id` makes it belongs-to on the target's
/// key; anything else points back at the owner via `<owner>_id`.
pub(crate) fn resolve(registry: &Registry, owner: TypeInfo, path: &[usize]) -> AssociationMeta {
    let (def, target, many) = locate(owner, path);
    let name = def
        .column
        .clone()
        .unwrap_or_else(|| column_name(&def.name));
    let owner_shape = registry.shape(owner);
    let target_shape = registry.shape(target);

    let first_key = |shape: &crate::meta::RecordMeta| {
        if shape.has_primary_key() {
            shape.primary_fields()[0].clone()
        } else {
            "id".to_string()
        }
    };

    let (reference, foreign) = match (&def.reference, &def.foreign_key) {
        (Some(reference), Some(foreign)) => (reference.clone(), foreign.clone()),
        _ => {
            let candidate = format!("{name}_id");
            if def.through.is_some() {
                (first_key(&owner_shape), first_key(&target_shape))
            } else if owner_shape.index(&candidate).is_some() {
                (candidate, first_key(&target_shape))
            } else {
                (
                    first_key(&owner_shape),
                    format!("{}_id", column_name(owner.name())),
                )
            }
        }
    };

    let Some(reference_index) = owner_shape.index(&reference).map(<[usize]>::to_vec) else {
        fault(MappingError::ReferenceNotFound {
            record: owner.name().to_string(),
            association: name,
            field: reference,
        });
    };
    let Some(foreign_index) = target_shape.index(&foreign).map(<[usize]>::to_vec) else {
        fault(MappingError::ForeignKeyNotFound {
            record: owner.name().to_string(),
            association: name,
            field: foreign,
        });
    };

    let kind = if many {
        AssociationKind::HasMany
    } else if let Some(kind) = def.kind {
        kind
    } else if reference.len() > foreign.len() {
        AssociationKind::BelongsTo
    } else {
        AssociationKind::HasOne
    };

    if def.autosave && def.through.is_some() {
        fault(MappingError::AutosaveThrough {
            record: owner.name().to_string(),
            association: name,
        });
    }

    AssociationMeta {
        name,
        kind,
        owner,
        target,
        path: path.to_vec(),
        reference_field: reference,
        reference_index,
        foreign_field: foreign,
        foreign_index,
        through: def.through.clone(),
        autoload: def.autoload,
        autosave: def.autosave,
    }
}

/// An association bound to one owner instance.
pub struct Association<'a> {
    meta: Arc<AssociationMeta>,
    owner: &'a mut dyn Record,
    registry: &'a Registry,
}

impl<'a> Association<'a> {
    pub(crate) fn new(
        meta: Arc<AssociationMeta>,
        owner: &'a mut dyn Record,
        registry: &'a Registry,
    ) -> Self {
        Self {
            meta,
            owner,
            registry,
        }
    }

    pub fn meta(&self) -> &AssociationMeta {
        &self.meta
    }

    pub fn kind(&self) -> AssociationKind {
        self.meta.kind
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn reference_field(&self) -> &str {
        &self.meta.reference_field
    }

    pub fn foreign_field(&self) -> &str {
        &self.meta.foreign_field
    }

    /// Value of the reference field on the owner.
    pub fn reference_value(&self) -> Value {
        scalar_at(&*self.owner, &self.meta.reference_index).map_or(Value::Null, |slot| slot.value())
    }

    /// Value of the foreign field on the loaded target, if any.
    ///
    /// Panics for has-many, which has one foreign value per element.
    pub fn foreign_value(&self) -> Option<Value> {
        if self.meta.kind == AssociationKind::HasMany {
            self.wrong_kind();
        }
        let target = self.one()?.get()?;
        scalar_at(target, &self.meta.foreign_index).map(|slot| slot.value())
    }

    /// Whether the slot holds a value (a record, or a collection).
    pub fn is_present(&self) -> bool {
        match self.meta.kind {
            AssociationKind::HasMany => self.many().and_then(|slot| slot.get()).is_some(),
            _ => self.one().and_then(|slot| slot.get()).is_some(),
        }
    }

    /// Whether the target is present and already persisted.
    ///
    /// For has-many this is the same as [`Association::is_present`].
    pub fn is_loaded(&self) -> bool {
        match self.meta.kind {
            AssociationKind::HasMany => self.is_present(),
            _ => self
                .one()
                .and_then(|slot| slot.get())
                .is_some_and(|target| self.target_persisted(target)),
        }
    }

    /// Whether there is nothing to save: absent, or present but all zero.
    pub fn is_zero(&self) -> bool {
        match self.meta.kind {
            AssociationKind::HasMany => self
                .many()
                .and_then(|slot| slot.get())
                .is_none_or(|list| list.count() == 0),
            _ => match self.one().and_then(|slot| slot.get()) {
                None => true,
                Some(target) => {
                    let meta = self.registry.meta(self.meta.target);
                    meta.fields().iter().all(|field| {
                        meta.index(field)
                            .and_then(|path| scalar_at(target, path))
                            .is_none_or(|slot| slot.is_zero_value())
                    })
                }
            },
        }
    }

    /// Target document, materializing a zero value when the slot is empty.
    ///
    /// The flag reports whether the target was already persisted.
    pub fn document(&mut self) -> (Document<'_>, bool) {
        let loaded = self.is_loaded();
        let meta = self.registry.meta(self.meta.target);
        let registry = self.registry;
        let slot = self.one_mut();
        (Document::from_parts(slot.materialize(), meta, registry), loaded)
    }

    /// Consuming form of [`Association::document`].
    pub fn into_document(self) -> (Document<'a>, bool) {
        let loaded = self.is_loaded();
        let meta = self.registry.meta(self.meta.target);
        let registry = self.registry;
        let slot = Self::one_slot_mut(self.owner, &self.meta);
        (Document::from_parts(slot.materialize(), meta, registry), loaded)
    }

    /// Target document only if one is present.
    pub fn into_loaded_document(self) -> Option<Document<'a>> {
        let meta = self.registry.meta(self.meta.target);
        let registry = self.registry;
        let target = Self::one_slot_mut(self.owner, &self.meta).get_mut()?;
        Some(Document::from_parts(target, meta, registry))
    }

    /// Target collection, materializing an empty one when not loaded.
    pub fn collection(&mut self) -> (Collection<'_>, bool) {
        let loaded = self.is_loaded();
        let meta = self.registry.meta(self.meta.target);
        let registry = self.registry;
        let slot = Self::many_slot_mut(&mut *self.owner, &self.meta);
        (Collection::from_parts(slot.materialize(), meta, registry), loaded)
    }

    /// Consuming form of [`Association::collection`].
    pub fn into_collection(self) -> (Collection<'a>, bool) {
        let loaded = self.is_loaded();
        let meta = self.registry.meta(self.meta.target);
        let registry = self.registry;
        let slot = Self::many_slot_mut(self.owner, &self.meta);
        (Collection::from_parts(slot.materialize(), meta, registry), loaded)
    }

    /// Target collection only if loaded.
    pub fn into_loaded_collection(self) -> Option<Collection<'a>> {
        let meta = self.registry.meta(self.meta.target);
        let registry = self.registry;
        let list = Self::many_slot_mut(self.owner, &self.meta).get_mut()?;
        Some(Collection::from_parts(list, meta, registry))
    }

    /// Reset the slot to "not loaded".
    pub fn clear(&mut self) {
        match self.meta.kind {
            AssociationKind::HasMany => Self::many_slot_mut(&mut *self.owner, &self.meta).clear(),
            _ => self.one_mut().clear(),
        }
    }

    fn target_persisted(&self, target: &dyn Record) -> bool {
        let meta = self.registry.meta(self.meta.target);
        if !meta.has_primary_key() {
            return true;
        }
        meta.primary_index().iter().all(|path| {
            scalar_at(target, path).is_some_and(|slot| !slot.is_zero_value())
        })
    }

    fn one(&self) -> Option<&dyn OneSlot> {
        let (last, parents) = self.meta.path.split_last()?;
        match embedded_at(&*self.owner, parents)?.field_at(*last) {
            FieldRef::One(slot) => Some(slot),
            _ => None,
        }
    }

    fn many(&self) -> Option<&dyn ManySlot> {
        let (last, parents) = self.meta.path.split_last()?;
        match embedded_at(&*self.owner, parents)?.field_at(*last) {
            FieldRef::Many(slot) => Some(slot),
            _ => None,
        }
    }

    fn one_mut(&mut self) -> &mut dyn OneSlot {
        Self::one_slot_mut(&mut *self.owner, &self.meta)
    }

    fn one_slot_mut<'r>(owner: &'r mut dyn Record, meta: &AssociationMeta) -> &'r mut dyn OneSlot {
        if let Some((last, parents)) = meta.path.split_last() {
            if let Some(record) = embedded_at_mut(owner, parents) {
                if let FieldMut::One(slot) = record.field_at_mut(*last) {
                    return slot;
                }
            }
        }
        fault(MappingError::WrongAssociationKind {
            record: meta.owner.name().to_string(),
            association: meta.name.clone(),
        })
    }

    fn many_slot_mut<'r>(
        owner: &'r mut dyn Record,
        meta: &AssociationMeta,
    ) -> &'r mut dyn ManySlot {
        if let Some((last, parents)) = meta.path.split_last() {
            if let Some(record) = embedded_at_mut(owner, parents) {
                if let FieldMut::Many(slot) = record.field_at_mut(*last) {
                    return slot;
                }
            }
        }
        fault(MappingError::WrongAssociationKind {
            record: meta.owner.name().to_string(),
            association: meta.name.clone(),
        })
    }

    fn wrong_kind(&self) -> ! {
        fault(MappingError::WrongAssociationKind {
            record: self.meta.owner.name().to_string(),
            association: self.meta.name.clone(),
        })
    }
}
