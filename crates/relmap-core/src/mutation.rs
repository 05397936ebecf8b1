//! The mutation tree produced by mutators and consumed by the persister.

use crate::document::Document;
use crate::error::{MappingError, fault};
use crate::value::Value;

/// One field-level change.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutate {
    /// `field = value`
    Set { field: String, value: Value },
    /// `field = field + by`
    Inc { field: String, by: i64 },
    /// `field = field - by`
    Dec { field: String, by: i64 },
    /// A raw SQL assignment fragment, e.g. `"score = score * ?"`.
    Fragment { raw: String, args: Vec<Value> },
}

impl Mutate {
    pub fn set(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Mutate::Set {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn inc(field: impl Into<String>) -> Self {
        Self::inc_by(field, 1)
    }

    pub fn inc_by(field: impl Into<String>, by: i64) -> Self {
        Mutate::Inc {
            field: field.into(),
            by,
        }
    }

    pub fn dec(field: impl Into<String>) -> Self {
        Self::dec_by(field, 1)
    }

    pub fn dec_by(field: impl Into<String>, by: i64) -> Self {
        Mutate::Dec {
            field: field.into(),
            by,
        }
    }

    pub fn fragment(raw: impl Into<String>, args: Vec<Value>) -> Self {
        Mutate::Fragment {
            raw: raw.into(),
            args,
        }
    }

    /// Key of this entry inside a [`Mutation`]; the raw text for fragments.
    pub fn field(&self) -> &str {
        match self {
            Mutate::Set { field, .. } | Mutate::Inc { field, .. } | Mutate::Dec { field, .. } => {
                field
            }
            Mutate::Fragment { raw, .. } => raw,
        }
    }

    /// The value of a `Set`, if this is one.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Mutate::Set { value, .. } => Some(value),
            _ => None,
        }
    }
}

impl Mutator for Mutate {
    fn apply(&self, doc: &mut Document<'_>, mutation: &mut Mutation) {
        match self {
            Mutate::Set { field, value } => {
                if !doc.set_value(field, value.clone()) {
                    fault(MappingError::InvalidAssignment {
                        record: doc.meta().type_info().name().to_string(),
                        field: field.clone(),
                        value: value.to_string(),
                    });
                }
                let stored = doc.value(field).unwrap_or(Value::Null);
                mutation.add(Mutate::set(field.clone(), stored));
                return;
            }
            Mutate::Inc { field, .. } | Mutate::Dec { field, .. } => match doc.field_type(field) {
                Some(kind) if kind.is_integer() => {}
                Some(_) => fault(MappingError::NotNumeric {
                    record: doc.meta().type_info().name().to_string(),
                    field: field.clone(),
                }),
                None => fault(MappingError::UnknownField {
                    record: doc.meta().type_info().name().to_string(),
                    field: field.clone(),
                }),
            },
            Mutate::Fragment { .. } => {}
        }
        mutation.set_reload(true);
        mutation.add(self.clone());
    }
}

/// Child mutations of one association field.
#[derive(Debug, Default, PartialEq)]
pub struct AssocMutation {
    /// One mutation per target record, in collection order.
    pub mutations: Vec<Mutation>,
    /// Primary keys of has-many children to delete.
    ///
    /// `None` replaces the whole set; `Some(vec![])` deletes nothing.
    pub deleted_ids: Option<Vec<Value>>,
}

/// A tree of changes for one save operation.
///
/// Holds at most one [`Mutate`] per field (the last write wins) plus child
/// mutations per association. Persisting a mutation consumes it.
#[derive(Debug, PartialEq)]
pub struct Mutation {
    mutates: Vec<Mutate>,
    assoc: Vec<(String, AssocMutation)>,
    reload: bool,
    cascade: bool,
    unscoped: bool,
}

impl Default for Mutation {
    fn default() -> Self {
        Self {
            mutates: Vec::new(),
            assoc: Vec::new(),
            reload: false,
            cascade: true,
            unscoped: false,
        }
    }
}

impl Mutation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `mutators` to `doc` left to right, collecting their changes.
    pub fn build(doc: &mut Document<'_>, mutators: &[&dyn Mutator]) -> Self {
        let mut mutation = Self::new();
        for mutator in mutators {
            mutator.apply(doc, &mut mutation);
        }
        mutation
    }

    pub fn add(&mut self, mutate: Mutate) {
        match self.mutates.iter_mut().find(|m| m.field() == mutate.field()) {
            Some(existing) => *existing = mutate,
            None => self.mutates.push(mutate),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Mutate> {
        self.mutates.iter().find(|m| m.field() == field)
    }

    pub fn remove(&mut self, field: &str) -> Option<Mutate> {
        let pos = self.mutates.iter().position(|m| m.field() == field)?;
        Some(self.mutates.remove(pos))
    }

    pub fn mutates(&self) -> &[Mutate] {
        &self.mutates
    }

    /// Whether there are no field-level changes. Associations are not counted.
    pub fn is_empty(&self) -> bool {
        self.mutates.is_empty()
    }

    pub fn set_assoc(&mut self, field: impl Into<String>, mutations: Vec<Mutation>) {
        self.assoc_entry(field.into()).mutations = mutations;
    }

    pub fn set_deleted_ids(&mut self, field: impl Into<String>, ids: Option<Vec<Value>>) {
        self.assoc_entry(field.into()).deleted_ids = ids;
    }

    pub fn assoc(&self, field: &str) -> Option<&AssocMutation> {
        self.assoc.iter().find(|(f, _)| f == field).map(|(_, a)| a)
    }

    /// Remove and return the child mutations of `field`.
    pub fn take_assoc(&mut self, field: &str) -> Option<AssocMutation> {
        let pos = self.assoc.iter().position(|(f, _)| f == field)?;
        Some(self.assoc.remove(pos).1)
    }

    pub fn has_assoc(&self) -> bool {
        !self.assoc.is_empty()
    }

    pub fn assoc_fields(&self) -> impl Iterator<Item = &str> {
        self.assoc.iter().map(|(f, _)| f.as_str())
    }

    pub fn reload(&self) -> bool {
        self.reload
    }

    pub fn set_reload(&mut self, reload: bool) {
        self.reload = reload;
    }

    pub fn cascade(&self) -> bool {
        self.cascade
    }

    pub fn set_cascade(&mut self, cascade: bool) {
        self.cascade = cascade;
    }

    pub fn unscoped(&self) -> bool {
        self.unscoped
    }

    pub fn set_unscoped(&mut self, unscoped: bool) {
        self.unscoped = unscoped;
    }

    fn assoc_entry(&mut self, field: String) -> &mut AssocMutation {
        let pos = match self.assoc.iter().position(|(f, _)| *f == field) {
            Some(pos) => pos,
            None => {
                self.assoc.push((field, AssocMutation::default()));
                self.assoc.len() - 1
            }
        };
        &mut self.assoc[pos].1
    }
}

/// A strategy that records changes of a document into a [`Mutation`].
pub trait Mutator: Send + Sync {
    fn apply(&self, doc: &mut Document<'_>, mutation: &mut Mutation);
}

/// Force (or suppress) re-fetching the record after it is saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reload(pub bool);

impl Mutator for Reload {
    fn apply(&self, _doc: &mut Document<'_>, mutation: &mut Mutation) {
        mutation.set_reload(self.0);
    }
}

/// Enable or disable saving associations.
///
/// Must precede the mutators whose associations it should affect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cascade(pub bool);

impl Mutator for Cascade {
    fn apply(&self, _doc: &mut Document<'_>, mutation: &mut Mutation) {
        mutation.set_cascade(self.0);
    }
}

/// Ignore the soft-delete scope when updating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unscoped(pub bool);

impl Mutator for Unscoped {
    fn apply(&self, _doc: &mut Document<'_>, mutation: &mut Mutation) {
        mutation.set_unscoped(self.0);
    }
}
