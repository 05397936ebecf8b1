use crate::association::AssociationKind;
use crate::document::Document;
use crate::error::{MappingError, fault};
use crate::mutation::{Mutate, Mutation, Mutator};
use crate::value::Value;

/// One entry of a [`Map`].
#[derive(Debug, Clone, PartialEq)]
pub enum MapEntry {
    /// A scalar field value.
    Value(Value),
    /// Fields of a belongs-to or has-one target.
    One(Map),
    /// The complete desired set of has-many children.
    Many(Vec<Map>),
}

/// An explicit, possibly nested, set of field values.
///
/// Has-many entries describe the whole collection: children carrying a
/// primary key update the loaded child with that key, children without one
/// are inserted, and loaded children not named are deleted.
///
/// ```rust,ignore
/// let changes = Map::new()
///     .set("title", "Draft")
///     .many("tags", vec![Map::new().set("id", 2), Map::new().set("name", "new")]);
/// repo.update(&cx, &mut post, &[&changes]).await;
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Map(Vec<(String, MapEntry)>);

impl Map {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entry(field.into(), MapEntry::Value(value.into()))
    }

    pub fn one(self, field: impl Into<String>, map: Map) -> Self {
        self.entry(field.into(), MapEntry::One(map))
    }

    pub fn many(self, field: impl Into<String>, maps: Vec<Map>) -> Self {
        self.entry(field.into(), MapEntry::Many(maps))
    }

    pub fn get(&self, field: &str) -> Option<&MapEntry> {
        self.0.iter().find(|(f, _)| f == field).map(|(_, e)| e)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MapEntry)> {
        self.0.iter().map(|(f, e)| (f.as_str(), e))
    }

    /// Build a map from a JSON object.
    ///
    /// Nested objects become [`MapEntry::One`] and arrays of objects become
    /// [`MapEntry::Many`]; every other array is kept as a JSON value.
    /// Returns `None` unless `json` is an object.
    pub fn from_json(json: &serde_json::Value) -> Option<Map> {
        let object = json.as_object()?;
        let entries = object
            .iter()
            .map(|(field, value)| (field.clone(), entry_from_json(value)))
            .collect();
        Some(Map(entries))
    }

    fn entry(mut self, field: String, entry: MapEntry) -> Self {
        match self.0.iter_mut().find(|(f, _)| *f == field) {
            Some(existing) => existing.1 = entry,
            None => self.0.push((field, entry)),
        }
        self
    }

    fn apply_value(doc: &mut Document<'_>, field: &str, value: &Value, mutation: &mut Mutation) {
        if doc.is_persisted() {
            let current = doc.value(field);
            let unchanged = current.as_ref().is_some_and(|c| c.same(value));
            if doc.meta().is_primary(field) && !unchanged {
                fault(MappingError::PrimaryKeyChange {
                    record: doc.meta().type_info().name().to_string(),
                });
            }
            if unchanged {
                return;
            }
        }
        Mutate::set(field, value.clone()).apply(doc, mutation);
    }

    fn apply_one(doc: &mut Document<'_>, field: &str, map: &Map, mutation: &mut Mutation) {
        let record = doc.meta().type_info().name().to_string();
        let mut assoc = doc.association(field);
        if assoc.kind() == AssociationKind::HasMany {
            wrong_kind(record, field);
        }
        let (mut target, _) = assoc.document();
        let child = Mutation::build(&mut target, &[map]);
        mutation.set_assoc(field, vec![child]);
    }

    fn apply_many(doc: &mut Document<'_>, field: &str, maps: &[Map], mutation: &mut Mutation) {
        let persisted = doc.is_persisted();
        let record = doc.meta().type_info().name().to_string();
        let mut assoc = doc.association(field);
        if assoc.kind() != AssociationKind::HasMany {
            wrong_kind(record, field);
        }
        if persisted && !assoc.is_present() {
            fault(MappingError::UnloadedHasMany {
                record,
                association: field.to_string(),
            });
        }

        let (mut col, _) = assoc.collection();
        let primary = col.primary_field().to_string();
        let mut keys = col.primary_values();
        let mut curr = 0;
        let mut children = Vec::with_capacity(maps.len());
        let mut inserts = Vec::new();

        for map in maps {
            let id = match map.get(&primary) {
                Some(MapEntry::Value(id)) if !id.is_zero() => id,
                _ => {
                    inserts.push(map);
                    continue;
                }
            };
            let Some(offset) = keys[curr..].iter().position(|key| key.same(id)) else {
                fault(MappingError::UnknownChild {
                    record,
                    association: field.to_string(),
                    key: id.to_string(),
                });
            };
            col.swap(curr, curr + offset);
            keys.swap(curr, curr + offset);
            let mut child = col.get(curr);
            children.push(Mutation::build(&mut child, &[map]));
            curr += 1;
        }

        let deleted: Vec<Value> = keys[curr..]
            .iter()
            .filter(|key| !key.is_zero())
            .cloned()
            .collect();
        col.truncate(curr);
        for map in inserts {
            let mut child = col.add();
            children.push(Mutation::build(&mut child, &[map]));
        }

        mutation.set_assoc(field, children);
        mutation.set_deleted_ids(field, Some(deleted));
    }
}

impl Mutator for Map {
    fn apply(&self, doc: &mut Document<'_>, mutation: &mut Mutation) {
        for (field, entry) in &self.0 {
            match entry {
                MapEntry::Value(value) => Self::apply_value(doc, field, value, mutation),
                MapEntry::One(map) if mutation.cascade() => {
                    Self::apply_one(doc, field, map, mutation);
                }
                MapEntry::Many(maps) if mutation.cascade() => {
                    Self::apply_many(doc, field, maps, mutation);
                }
                MapEntry::One(_) | MapEntry::Many(_) => {}
            }
        }
    }
}

fn entry_from_json(json: &serde_json::Value) -> MapEntry {
    use serde_json::Value as Json;

    match json {
        Json::Object(_) => Map::from_json(json).map_or(MapEntry::Value(Value::Null), MapEntry::One),
        Json::Array(items) if items.iter().all(Json::is_object) => {
            MapEntry::Many(items.iter().filter_map(Map::from_json).collect())
        }
        Json::Array(_) => MapEntry::Value(Value::Json(json.clone())),
        Json::Null => MapEntry::Value(Value::Null),
        Json::Bool(b) => MapEntry::Value(Value::Bool(*b)),
        Json::Number(n) => MapEntry::Value(match n.as_i64() {
            Some(i) => Value::BigInt(i),
            None => Value::Double(n.as_f64().unwrap_or_default()),
        }),
        Json::String(s) => MapEntry::Value(Value::Text(s.clone())),
    }
}

fn wrong_kind(record: String, field: &str) -> ! {
    fault(MappingError::WrongAssociationKind {
        record,
        association: field.to_string(),
    })
}
