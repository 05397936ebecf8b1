use super::{Structset, timestamp_fields};
use crate::document::Document;
use crate::meta::Flags;
use crate::mutation::{Mutate, Mutation, Mutator};
use crate::types::Timestamp;
use crate::value::{Value, ValueKey};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// Changed fields as `field -> (old, new)`.
pub type Changes = BTreeMap<String, (Value, Value)>;

/// Captured state of a record and its loaded associations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    values: Vec<(String, Value)>,
    one: HashMap<String, Snapshot>,
    many: HashMap<String, Vec<(Value, Snapshot)>>,
}

impl Snapshot {
    /// Copy every field of `doc`, recursing into persisted association targets.
    pub fn capture(doc: &mut Document<'_>) -> Self {
        let meta = Arc::clone(doc.meta());
        let mut snapshot = Snapshot {
            values: meta
                .fields()
                .iter()
                .map(|field| (field.clone(), doc.value(field).unwrap_or(Value::Null)))
                .collect(),
            ..Snapshot::default()
        };

        for field in meta.belongs_to().iter().chain(meta.has_one()) {
            let assoc = doc.association(field);
            if !assoc.is_loaded() {
                continue;
            }
            if let Some(mut target) = assoc.into_loaded_document() {
                snapshot.one.insert(field.clone(), Snapshot::capture(&mut target));
            }
        }

        for field in meta.has_many() {
            let Some(col) = doc.association(field).into_loaded_collection() else {
                continue;
            };
            let entries = col
                .into_documents()
                .into_iter()
                .filter(|child| child.is_persisted())
                .map(|mut child| (child.key(), Snapshot::capture(&mut child)))
                .collect();
            snapshot.many.insert(field.clone(), entries);
        }

        snapshot
    }

    pub(crate) fn keep_values(&mut self, previous: Snapshot) {
        self.values = previous.values;
    }

    /// Value of `field` when the snapshot was taken.
    pub fn value(&self, field: &str) -> Option<&Value> {
        self.values.iter().find(|(f, _)| f == field).map(|(_, v)| v)
    }

    /// Fields whose current value differs from the snapshot.
    pub fn changes(&self, doc: &Document<'_>) -> Changes {
        self.values
            .iter()
            .filter(|(field, old)| doc.changed_since(field, old))
            .map(|(field, old)| {
                let new = doc.value(field).unwrap_or(Value::Null);
                (field.clone(), (old.clone(), new))
            })
            .collect()
    }

    /// Record the differences between `doc` and this snapshot.
    pub(crate) fn diff(&self, doc: &mut Document<'_>, mutation: &mut Mutation) {
        let meta = Arc::clone(doc.meta());

        let changes = self.changes(doc);
        for (field, (_, new)) in &changes {
            mutation.add(Mutate::set(field.clone(), new.clone()));
        }
        if !changes.is_empty() {
            let now = Value::Timestamp(Timestamp::now().as_micros());
            for field in timestamp_fields(&meta, Flags::UPDATED_AT) {
                if doc.set_value(field, now.clone()) {
                    mutation.add(Mutate::set(field.clone(), now.clone()));
                }
            }
        }

        if !mutation.cascade() {
            return;
        }
        for field in meta.belongs_to().iter().chain(meta.has_one()) {
            self.diff_one(doc, field, mutation);
        }
        for field in meta.has_many() {
            self.diff_many(doc, field, mutation);
        }
    }

    fn diff_one(&self, doc: &mut Document<'_>, field: &str, mutation: &mut Mutation) {
        let mut assoc = doc.association(field);
        if assoc.is_zero() {
            return;
        }
        let previous = self.one.get(field).filter(|_| assoc.is_loaded());
        let (mut target, _) = assoc.document();
        let child = match previous {
            Some(snapshot) => {
                let mut child = Mutation::new();
                snapshot.diff(&mut target, &mut child);
                child
            }
            None => Mutation::build(&mut target, &[&Structset::new()]),
        };
        if !child.is_empty() || child.has_assoc() {
            mutation.set_assoc(field, vec![child]);
        }
    }

    fn diff_many(&self, doc: &mut Document<'_>, field: &str, mutation: &mut Mutation) {
        let Some(col) = doc.association(field).into_loaded_collection() else {
            return;
        };
        let Some(previous) = self.many.get(field) else {
            let children: Vec<Mutation> = col
                .into_documents()
                .into_iter()
                .map(|mut child| Mutation::build(&mut child, &[&Structset::new()]))
                .collect();
            if !children.is_empty() {
                mutation.set_assoc(field, children);
            }
            return;
        };

        let index: HashMap<ValueKey, &Snapshot> =
            previous.iter().map(|(key, s)| (key.key(), s)).collect();
        let mut seen = HashSet::new();
        let mut children = Vec::new();
        for mut child in col.into_documents() {
            let key = child.is_persisted().then(|| child.key().key());
            let baseline = key.as_ref().and_then(|key| index.get(key).copied());
            let mutation = match (baseline, key) {
                (Some(snapshot), Some(key)) => {
                    seen.insert(key);
                    let mut mutation = Mutation::new();
                    snapshot.diff(&mut child, &mut mutation);
                    mutation
                }
                _ => Mutation::build(&mut child, &[&Structset::new()]),
            };
            children.push(mutation);
        }

        let deleted: Vec<Value> = previous
            .iter()
            .filter(|(key, _)| !seen.contains(&key.key()))
            .map(|(key, _)| key.clone())
            .collect();
        let touched = children.iter().any(|m| !m.is_empty() || m.has_assoc());
        if touched || !deleted.is_empty() {
            mutation.set_assoc(field, children);
            mutation.set_deleted_ids(field, Some(deleted));
        }
    }
}

/// Diffs a record against a snapshot taken when the changeset was created.
///
/// ```rust,ignore
/// let changeset = Changeset::new(&mut Document::new(&mut user, &registry));
/// user.name = "Grace".into();
/// repo.update(&cx, &mut user, &[&changeset]).await;
/// ```
#[derive(Debug, Clone)]
pub struct Changeset {
    snapshot: Snapshot,
}

impl Changeset {
    pub fn new(doc: &mut Document<'_>) -> Self {
        Self {
            snapshot: Snapshot::capture(doc),
        }
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self { snapshot }
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn changes(&self, doc: &Document<'_>) -> Changes {
        self.snapshot.changes(doc)
    }
}

impl Mutator for Changeset {
    fn apply(&self, doc: &mut Document<'_>, mutation: &mut Mutation) {
        self.snapshot.diff(doc, mutation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::Registry;
    use crate::record::{FieldMut, FieldRef, Model, Schema};

    #[derive(Debug, Default, Clone)]
    struct Account {
        id: i64,
        email: String,
        balance: f64,
        updated_at: Option<Timestamp>,
        owner: Option<Owner>,
        owner_id: i64,
        entries: Option<Vec<Entry>>,
    }

    impl Model for Account {
        fn schema() -> Schema {
            Schema::new()
                .field("id")
                .field("email")
                .field("balance")
                .field("updated_at")
                .field("owner")
                .field("owner_id")
                .field("entries")
        }

        fn field(&self, index: usize) -> FieldRef<'_> {
            match index {
                0 => FieldRef::scalar(&self.id),
                1 => FieldRef::scalar(&self.email),
                2 => FieldRef::scalar(&self.balance),
                3 => FieldRef::scalar(&self.updated_at),
                4 => FieldRef::one(&self.owner),
                5 => FieldRef::scalar(&self.owner_id),
                6 => FieldRef::many(&self.entries),
                _ => FieldRef::Missing,
            }
        }

        fn field_mut(&mut self, index: usize) -> FieldMut<'_> {
            match index {
                0 => FieldMut::scalar(&mut self.id),
                1 => FieldMut::scalar(&mut self.email),
                2 => FieldMut::scalar(&mut self.balance),
                3 => FieldMut::scalar(&mut self.updated_at),
                4 => FieldMut::one(&mut self.owner),
                5 => FieldMut::scalar(&mut self.owner_id),
                6 => FieldMut::many(&mut self.entries),
                _ => FieldMut::Missing,
            }
        }
    }

    #[derive(Debug, Default, Clone)]
    struct Owner {
        id: i64,
        name: String,
    }

    impl Model for Owner {
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

    #[derive(Debug, Default, Clone)]
    struct Entry {
        id: i64,
        account_id: i64,
        amount: i64,
    }

    impl Model for Entry {
        fn schema() -> Schema {
            Schema::new().field("id").field("account_id").field("amount")
        }

        fn field(&self, index: usize) -> FieldRef<'_> {
            match index {
                0 => FieldRef::scalar(&self.id),
                1 => FieldRef::scalar(&self.account_id),
                2 => FieldRef::scalar(&self.amount),
                _ => FieldRef::Missing,
            }
        }

        fn field_mut(&mut self, index: usize) -> FieldMut<'_> {
            match index {
                0 => FieldMut::scalar(&mut self.id),
                1 => FieldMut::scalar(&mut self.account_id),
                2 => FieldMut::scalar(&mut self.amount),
                _ => FieldMut::Missing,
            }
        }
    }

    fn entry(id: i64, amount: i64) -> Entry {
        Entry {
            id,
            account_id: 1,
            amount,
        }
    }

    fn account() -> Account {
        Account {
            id: 1,
            email: "a@example.com".into(),
            balance: 10.5,
            owner: Some(Owner {
                id: 3,
                name: "Ann".into(),
            }),
            owner_id: 3,
            entries: Some(vec![entry(1, 10), entry(2, 20), entry(3, 30)]),
            ..Account::default()
        }
    }

    fn changeset(account: &mut Account, registry: &Registry) -> Changeset {
        Changeset::new(&mut Document::new(account, registry))
    }

    #[test]
    fn unchanged_record_yields_empty_mutation() {
        let registry = Registry::new();
        let mut account = account();
        let changeset = changeset(&mut account, &registry);
        let mutation = Mutation::build(&mut Document::new(&mut account, &registry), &[&changeset]);
        assert!(mutation.is_empty());
        assert!(!mutation.has_assoc());
    }

    #[test]
    fn diff_is_idempotent_after_settle() {
        let registry = Registry::new();
        let mut account = account();
        let first = changeset(&mut account, &registry);
        account.email = "b@example.com".into();
        let mutation = Mutation::build(&mut Document::new(&mut account, &registry), &[&first]);
        let fields: Vec<&str> = mutation.mutates().iter().map(Mutate::field).collect();
        assert_eq!(fields, vec!["email", "updated_at"]);

        let second = changeset(&mut account, &registry);
        let again = Mutation::build(&mut Document::new(&mut account, &registry), &[&second]);
        assert!(again.is_empty());
        assert!(!again.has_assoc());
    }

    #[test]
    fn changed_fields_force_updated_at() {
        let registry = Registry::new();
        let mut account = account();
        let changeset = changeset(&mut account, &registry);
        account.balance = 11.0;

        let doc = Document::new(&mut account, &registry);
        let changes = changeset.changes(&doc);
        assert_eq!(
            changes.get("balance"),
            Some(&(Value::Double(10.5), Value::Double(11.0)))
        );
        drop(doc);

        let mutation = Mutation::build(&mut Document::new(&mut account, &registry), &[&changeset]);
        let fields: Vec<&str> = mutation.mutates().iter().map(Mutate::field).collect();
        assert_eq!(fields, vec!["balance", "updated_at"]);
        assert!(account.updated_at.is_some());
    }

    #[test]
    fn nested_one_association_diff() {
        let registry = Registry::new();
        let mut account = account();
        let changeset = changeset(&mut account, &registry);
        if let Some(owner) = account.owner.as_mut() {
            owner.name = "Bea".into();
        }

        let mutation = Mutation::build(&mut Document::new(&mut account, &registry), &[&changeset]);
        assert!(mutation.is_empty());
        let owner = mutation.assoc("owner").unwrap();
        assert_eq!(
            owner.mutations[0].mutates(),
            &[Mutate::set("name", "Bea")]
        );
    }

    #[test]
    fn has_many_diff_by_primary_key() {
        let registry = Registry::new();
        let mut account = account();
        let changeset = changeset(&mut account, &registry);
        account.entries = Some(vec![entry(3, 30), entry(2, 25), entry(0, 5)]);

        let mutation = Mutation::build(&mut Document::new(&mut account, &registry), &[&changeset]);
        let entries = mutation.assoc("entries").unwrap();
        assert_eq!(entries.deleted_ids, Some(vec![Value::BigInt(1)]));
        assert_eq!(entries.mutations.len(), 3);
        assert!(entries.mutations[0].is_empty());
        assert_eq!(entries.mutations[1].mutates(), &[Mutate::set("amount", 25_i64)]);
        let fields: Vec<&str> = entries.mutations[2].mutates().iter().map(Mutate::field).collect();
        assert_eq!(fields, vec!["account_id", "amount"]);
    }

    #[test]
    fn structset_then_changeset_round_trip() {
        let registry = Registry::new();
        let mut source = account();
        let built = Mutation::build(&mut Document::new(&mut source, &registry), &[&Structset::new()]);

        let mut target = Account::default();
        let mut doc = Document::new(&mut target, &registry);
        let setters: Vec<&dyn Mutator> = built.mutates().iter().map(|m| m as &dyn Mutator).collect();
        Mutation::build(&mut doc, &setters);

        let changeset = Changeset::new(&mut doc);
        assert!(changeset.changes(&doc).is_empty());
        let diff = Mutation::build(&mut doc, &[&changeset]);
        assert!(diff.is_empty());
    }
}
