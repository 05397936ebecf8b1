//! Record traits and schema declarations.
//!
//! A record type implements [`Model`]: it declares its fields once in a
//! [`Schema`] and hands out typed slots for each declared index. Everything
//! above this layer works through the object-safe [`Record`] view.
//!
//! ```ignore
//! #[derive(Default)]
//! struct User {
//!     id: i64,
//!     name: String,
//!     address: Option<Address>,
//! }
//!
//! impl Model for User {
//!     fn schema() -> Schema {
//!         Schema::new().field("id").field("name").field("address")
//!     }
//!
//!     fn field(&self, index: usize) -> FieldRef<'_> {
//!         match index {
//!             0 => FieldRef::scalar(&self.id),
//!             1 => FieldRef::scalar(&self.name),
//!             2 => FieldRef::one(&self.address),
//!             _ => FieldRef::Missing,
//!         }
//!     }
//!
//!     fn field_mut(&mut self, index: usize) -> FieldMut<'_> {
//!         match index {
//!             0 => FieldMut::scalar(&mut self.id),
//!             1 => FieldMut::scalar(&mut self.name),
//!             2 => FieldMut::one(&mut self.address),
//!             _ => FieldMut::Missing,
//!         }
//!     }
//! }
//! ```

use crate::association::AssociationKind;
use crate::convert::convert;
use crate::mutator::Dirty;
use crate::types::{FieldType, FieldValue};
use crate::value::Value;
use std::any::TypeId;
use std::fmt;

/// A record type mapped to a table.
pub trait Model: Default + Send + Sync + 'static {
    /// Field declarations, in the order used by [`Model::field`].
    fn schema() -> Schema;

    fn field(&self, index: usize) -> FieldRef<'_>;

    fn field_mut(&mut self, index: usize) -> FieldMut<'_>;

    /// Change tracker embedded in the record, if any.
    fn dirty(&mut self) -> Option<&mut Dirty> {
        None
    }
}

/// Object-safe view of a [`Model`].
pub trait Record: Send + Sync + 'static {
    fn type_info(&self) -> TypeInfo;

    fn field_at(&self, index: usize) -> FieldRef<'_>;

    fn field_at_mut(&mut self, index: usize) -> FieldMut<'_>;

    fn dirty_state(&mut self) -> Option<&mut Dirty>;
}

impl<T: Model> Record for T {
    fn type_info(&self) -> TypeInfo {
        TypeInfo::of::<T>()
    }

    fn field_at(&self, index: usize) -> FieldRef<'_> {
        self.field(index)
    }

    fn field_at_mut(&mut self, index: usize) -> FieldMut<'_> {
        self.field_mut(index)
    }

    fn dirty_state(&mut self) -> Option<&mut Dirty> {
        self.dirty()
    }
}

/// Shared access to one declared field.
pub enum FieldRef<'a> {
    Scalar(&'a dyn ScalarSlot),
    /// A struct whose fields are flattened into the owner.
    Embedded(&'a dyn Record),
    One(&'a dyn OneSlot),
    Many(&'a dyn ManySlot),
    Missing,
}

impl<'a> FieldRef<'a> {
    pub fn scalar<T: FieldValue>(value: &'a T) -> Self {
        FieldRef::Scalar(value)
    }

    pub fn embedded<T: Model>(value: &'a T) -> Self {
        FieldRef::Embedded(value)
    }

    pub fn one<T: Model>(value: &'a Option<T>) -> Self {
        FieldRef::One(value)
    }

    pub fn many<T: Model>(value: &'a Option<Vec<T>>) -> Self {
        FieldRef::Many(value)
    }
}

/// Exclusive access to one declared field.
pub enum FieldMut<'a> {
    Scalar(&'a mut dyn ScalarSlot),
    Embedded(&'a mut dyn Record),
    One(&'a mut dyn OneSlot),
    Many(&'a mut dyn ManySlot),
    Missing,
}

impl<'a> FieldMut<'a> {
    pub fn scalar<T: FieldValue>(value: &'a mut T) -> Self {
        FieldMut::Scalar(value)
    }

    pub fn embedded<T: Model>(value: &'a mut T) -> Self {
        FieldMut::Embedded(value)
    }

    pub fn one<T: Model>(value: &'a mut Option<T>) -> Self {
        FieldMut::One(value)
    }

    pub fn many<T: Model>(value: &'a mut Option<Vec<T>>) -> Self {
        FieldMut::Many(value)
    }
}

/// A scalar field seen through its dynamic value.
pub trait ScalarSlot: Send + Sync + 'static {
    fn kind(&self) -> FieldType;

    fn nullable(&self) -> bool;

    fn value(&self) -> Value;

    /// Assign `value`, converting it first. Returns false when the value
    /// cannot be represented; the field is left untouched in that case.
    fn assign(&mut self, value: Value) -> bool;

    fn is_zero_value(&self) -> bool;

    fn changed_since(&self, snapshot: &Value) -> bool;
}

impl<T: FieldValue> ScalarSlot for T {
    fn kind(&self) -> FieldType {
        T::TYPE
    }

    fn nullable(&self) -> bool {
        T::NULLABLE
    }

    fn value(&self) -> Value {
        self.to_value()
    }

    fn assign(&mut self, value: Value) -> bool {
        let Some(value) = convert(value, T::TYPE) else {
            return false;
        };
        if value.is_null() && !T::NULLABLE {
            *self = T::default();
            return true;
        }
        match T::from_value(value) {
            Some(v) => {
                *self = v;
                true
            }
            None => false,
        }
    }

    fn is_zero_value(&self) -> bool {
        FieldValue::is_zero(self)
    }

    fn changed_since(&self, snapshot: &Value) -> bool {
        self.differs(snapshot)
    }
}

/// A belongs-to or has-one association slot.
pub trait OneSlot: Send + Sync + 'static {
    fn target(&self) -> TypeInfo;

    fn get(&self) -> Option<&dyn Record>;

    fn get_mut(&mut self) -> Option<&mut dyn Record>;

    /// Return the target, filling an empty slot with a zero value first.
    fn materialize(&mut self) -> &mut dyn Record;

    fn clear(&mut self);
}

impl<T: Model> OneSlot for Option<T> {
    fn target(&self) -> TypeInfo {
        TypeInfo::of::<T>()
    }

    fn get(&self) -> Option<&dyn Record> {
        self.as_ref().map(|r| r as &dyn Record)
    }

    fn get_mut(&mut self) -> Option<&mut dyn Record> {
        self.as_mut().map(|r| r as &mut dyn Record)
    }

    fn materialize(&mut self) -> &mut dyn Record {
        self.get_or_insert_with(T::default)
    }

    fn clear(&mut self) {
        *self = None;
    }
}

/// A has-many association slot. `None` means "not loaded".
pub trait ManySlot: Send + Sync + 'static {
    fn target(&self) -> TypeInfo;

    fn get(&self) -> Option<&dyn RecordList>;

    fn get_mut(&mut self) -> Option<&mut dyn RecordList>;

    fn materialize(&mut self) -> &mut dyn RecordList;

    fn clear(&mut self);
}

impl<T: Model> ManySlot for Option<Vec<T>> {
    fn target(&self) -> TypeInfo {
        TypeInfo::of::<T>()
    }

    fn get(&self) -> Option<&dyn RecordList> {
        self.as_ref().map(|r| r as &dyn RecordList)
    }

    fn get_mut(&mut self) -> Option<&mut dyn RecordList> {
        self.as_mut().map(|r| r as &mut dyn RecordList)
    }

    fn materialize(&mut self) -> &mut dyn RecordList {
        self.get_or_insert_with(Vec::new)
    }

    fn clear(&mut self) {
        *self = None;
    }
}

/// An ordered sequence of records of one type.
pub trait RecordList: Send + Sync + 'static {
    fn element(&self) -> TypeInfo;

    fn count(&self) -> usize;

    fn at(&self, index: usize) -> &dyn Record;

    fn at_mut(&mut self, index: usize) -> &mut dyn Record;

    /// Append a zero-valued record and return it.
    fn push_zero(&mut self) -> &mut dyn Record;

    fn swap_records(&mut self, a: usize, b: usize);

    fn truncate_records(&mut self, len: usize);

    /// Split into disjoint borrows of every element.
    fn records_mut(&mut self) -> Vec<&mut dyn Record>;
}

impl<T: Model> RecordList for Vec<T> {
    fn element(&self) -> TypeInfo {
        TypeInfo::of::<T>()
    }

    fn count(&self) -> usize {
        Vec::len(self)
    }

    fn at(&self, index: usize) -> &dyn Record {
        &self[index]
    }

    fn at_mut(&mut self, index: usize) -> &mut dyn Record {
        &mut self[index]
    }

    fn push_zero(&mut self) -> &mut dyn Record {
        let index = Vec::len(self);
        self.push(T::default());
        &mut self[index]
    }

    fn swap_records(&mut self, a: usize, b: usize) {
        self.as_mut_slice().swap(a, b);
    }

    fn truncate_records(&mut self, len: usize) {
        Vec::truncate(self, len);
    }

    fn records_mut(&mut self) -> Vec<&mut dyn Record> {
        self.iter_mut().map(|r| r as &mut dyn Record).collect()
    }
}

/// Runtime identity of a [`Model`] type.
#[derive(Clone, Copy)]
pub struct TypeInfo {
    id: TypeId,
    name: &'static str,
    schema: fn() -> Schema,
    zero: fn() -> Box<dyn Record>,
}

impl TypeInfo {
    pub fn of<T: Model>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: short_type_name(std::any::type_name::<T>()),
            schema: T::schema,
            zero: zero_of::<T>,
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Unqualified type name, e.g. `User`.
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn schema(&self) -> Schema {
        (self.schema)()
    }

    /// A fresh zero-valued instance.
    pub fn zero(&self) -> Box<dyn Record> {
        (self.zero)()
    }
}

impl PartialEq for TypeInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeInfo {}

impl fmt::Debug for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TypeInfo").field(&self.name).finish()
    }
}

fn zero_of<T: Model>() -> Box<dyn Record> {
    Box::new(T::default())
}

fn short_type_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Field declarations of a record type.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    table: Option<String>,
    primary_key: Option<Vec<String>>,
    fields: Vec<FieldDef>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the table name (defaults to the pluralized snake_case type name).
    pub fn table(mut self, name: impl Into<String>) -> Self {
        self.table = Some(name.into());
        self
    }

    /// Override the primary key with one or more column names.
    pub fn primary_key(mut self, fields: &[&str]) -> Self {
        self.primary_key = Some(fields.iter().map(|f| (*f).to_string()).collect());
        self
    }

    /// Declare the next field.
    pub fn field(mut self, def: impl Into<FieldDef>) -> Self {
        self.fields.push(def.into());
        self
    }

    pub fn table_name(&self) -> Option<&str> {
        self.table.as_deref()
    }

    pub fn primary_key_override(&self) -> Option<&[String]> {
        self.primary_key.as_deref()
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }
}

/// Declaration of one field: column naming plus association options.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub(crate) name: String,
    pub(crate) column: Option<String>,
    pub(crate) primary: bool,
    pub(crate) skip: bool,
    pub(crate) reference: Option<String>,
    pub(crate) foreign_key: Option<String>,
    pub(crate) through: Option<String>,
    pub(crate) autoload: bool,
    pub(crate) autosave: bool,
    pub(crate) kind: Option<AssociationKind>,
}

impl FieldDef {
    /// Declare a field by its Rust name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column: None,
            primary: false,
            skip: false,
            reference: None,
            foreign_key: None,
            through: None,
            autoload: false,
            autosave: false,
            kind: None,
        }
    }

    /// Column name; on an embedded struct, the prefix for its columns.
    pub fn column(mut self, name: impl Into<String>) -> Self {
        self.column = Some(name.into());
        self
    }

    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    /// Exclude the field from mapping.
    pub fn skip(mut self) -> Self {
        self.skip = true;
        self
    }

    /// Reference field on the owner side of an association.
    pub fn reference(mut self, field: impl Into<String>) -> Self {
        self.reference = Some(field.into());
        self
    }

    /// Foreign field on the target side of an association.
    pub fn foreign_key(mut self, field: impl Into<String>) -> Self {
        self.foreign_key = Some(field.into());
        self
    }

    /// Join table of a many-to-many association.
    pub fn through(mut self, table: impl Into<String>) -> Self {
        self.through = Some(table.into());
        self
    }

    pub fn autoload(mut self) -> Self {
        self.autoload = true;
        self
    }

    pub fn autosave(mut self) -> Self {
        self.autosave = true;
        self
    }

    /// Shorthand for `autoload().autosave()`.
    pub fn auto(self) -> Self {
        self.autoload().autosave()
    }

    /// Force a belongs-to association regardless of key names.
    pub fn belongs_to(mut self) -> Self {
        self.kind = Some(AssociationKind::BelongsTo);
        self
    }

    /// Force a has-one association regardless of key names.
    pub fn has_one(mut self) -> Self {
        self.kind = Some(AssociationKind::HasOne);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl From<&str> for FieldDef {
    fn from(name: &str) -> Self {
        FieldDef::new(name)
    }
}
