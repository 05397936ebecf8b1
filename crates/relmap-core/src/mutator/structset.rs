use super::timestamp_fields;
use crate::document::Document;
use crate::meta::Flags;
use crate::mutation::{Mutate, Mutation, Mutator};
use crate::types::Timestamp;
use crate::value::Value;
use std::sync::Arc;

/// Emits the whole record.
///
/// Every non-zero field except the primary key becomes a `Set`. Zero
/// `created_at`/`inserted_at`/`updated_at` timestamps are filled with the
/// current time first. Non-zero associations are recursed into.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Structset {
    with_zero: bool,
}

impl Structset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also emit zero-valued fields, so that an update can clear them.
    pub fn with_zero() -> Self {
        Self { with_zero: true }
    }

    fn build_one(&self, doc: &mut Document<'_>, field: &str, mutation: &mut Mutation) {
        let mut assoc = doc.association(field);
        if assoc.is_zero() {
            return;
        }
        let (mut target, _) = assoc.document();
        let child = Mutation::build(&mut target, &[self]);
        mutation.set_assoc(field, vec![child]);
    }

    fn build_many(&self, doc: &mut Document<'_>, field: &str, mutation: &mut Mutation) {
        let mut assoc = doc.association(field);
        if assoc.is_zero() {
            return;
        }
        let (col, _) = assoc.collection();
        let children = col
            .into_documents()
            .into_iter()
            .map(|mut child| Mutation::build(&mut child, &[self]))
            .collect();
        mutation.set_assoc(field, children);
    }
}

impl Mutator for Structset {
    fn apply(&self, doc: &mut Document<'_>, mutation: &mut Mutation) {
        let meta = Arc::clone(doc.meta());
        let now = Value::Timestamp(Timestamp::now().as_micros());

        let stamped = timestamp_fields(&meta, Flags::CREATED_AT)
            .chain(timestamp_fields(&meta, Flags::UPDATED_AT));
        for field in stamped {
            if doc.is_zero(field) {
                doc.set_value(field, now.clone());
            }
        }

        for field in meta.fields() {
            if meta.is_primary(field) {
                continue;
            }
            if self.with_zero || !doc.is_zero(field) {
                let value = doc.value(field).unwrap_or(Value::Null);
                mutation.add(Mutate::set(field.clone(), value));
            }
        }

        if !mutation.cascade() {
            return;
        }
        for field in meta.belongs_to().iter().chain(meta.has_one()) {
            self.build_one(doc, field, mutation);
        }
        for field in meta.has_many() {
            self.build_many(doc, field, mutation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::Registry;
    use crate::record::{FieldDef, FieldMut, FieldRef, Model, Schema};

    #[derive(Debug, Default)]
    struct Author {
        id: i64,
        name: String,
        rating: i32,
        created_at: Option<Timestamp>,
        updated_at: Option<Timestamp>,
        books: Option<Vec<Book>>,
    }

    impl Model for Author {
        fn schema() -> Schema {
            Schema::new()
                .field("id")
                .field("name")
                .field("rating")
                .field("created_at")
                .field("updated_at")
                .field("books")
        }

        fn field(&self, index: usize) -> FieldRef<'_> {
            match index {
                0 => FieldRef::scalar(&self.id),
                1 => FieldRef::scalar(&self.name),
                2 => FieldRef::scalar(&self.rating),
                3 => FieldRef::scalar(&self.created_at),
                4 => FieldRef::scalar(&self.updated_at),
                5 => FieldRef::many(&self.books),
                _ => FieldRef::Missing,
            }
        }

        fn field_mut(&mut self, index: usize) -> FieldMut<'_> {
            match index {
                0 => FieldMut::scalar(&mut self.id),
                1 => FieldMut::scalar(&mut self.name),
                2 => FieldMut::scalar(&mut self.rating),
                3 => FieldMut::scalar(&mut self.created_at),
                4 => FieldMut::scalar(&mut self.updated_at),
                5 => FieldMut::many(&mut self.books),
                _ => FieldMut::Missing,
            }
        }
    }

    #[derive(Debug, Default)]
    struct Book {
        id: i64,
        author_id: i64,
        title: String,
        publisher: Option<Publisher>,
        publisher_id: Option<i64>,
    }

    impl Model for Book {
        fn schema() -> Schema {
            Schema::new()
                .field("id")
                .field("author_id")
                .field("title")
                .field(FieldDef::new("publisher").autosave())
                .field("publisher_id")
        }

        fn field(&self, index: usize) -> FieldRef<'_> {
            match index {
                0 => FieldRef::scalar(&self.id),
                1 => FieldRef::scalar(&self.author_id),
                2 => FieldRef::scalar(&self.title),
                3 => FieldRef::one(&self.publisher),
                4 => FieldRef::scalar(&self.publisher_id),
                _ => FieldRef::Missing,
            }
        }

        fn field_mut(&mut self, index: usize) -> FieldMut<'_> {
            match index {
                0 => FieldMut::scalar(&mut self.id),
                1 => FieldMut::scalar(&mut self.author_id),
                2 => FieldMut::scalar(&mut self.title),
                3 => FieldMut::one(&mut self.publisher),
                4 => FieldMut::scalar(&mut self.publisher_id),
                _ => FieldMut::Missing,
            }
        }
    }

    #[derive(Debug, Default)]
    struct Publisher {
        id: i64,
        name: String,
    }

    impl Model for Publisher {
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

    fn fields(mutation: &Mutation) -> Vec<&str> {
        mutation.mutates().iter().map(Mutate::field).collect()
    }

    #[test]
    fn emits_non_zero_fields_and_timestamps() {
        let registry = Registry::new();
        let mut author = Author {
            id: 5,
            name: "Ursula".into(),
            ..Author::default()
        };
        let mut doc = Document::new(&mut author, &registry);
        let mutation = Mutation::build(&mut doc, &[&Structset::new()]);
        drop(doc);

        assert_eq!(fields(&mutation), vec!["name", "created_at", "updated_at"]);
        assert!(author.created_at.is_some());
        assert_eq!(author.created_at, author.updated_at);
        assert!(!mutation.has_assoc());
    }

    #[test]
    fn keeps_existing_timestamps() {
        let registry = Registry::new();
        let stamp = Timestamp::from_micros(1_000_000);
        let mut author = Author {
            created_at: Some(stamp),
            ..Author::default()
        };
        let mut doc = Document::new(&mut author, &registry);
        let mutation = Mutation::build(&mut doc, &[&Structset::new()]);
        drop(doc);

        assert_eq!(author.created_at, Some(stamp));
        assert_eq!(
            mutation.get("created_at"),
            Some(&Mutate::set("created_at", Value::Timestamp(1_000_000)))
        );
    }

    #[test]
    fn with_zero_emits_everything_but_the_key() {
        let registry = Registry::new();
        let mut author = Author::default();
        let mut doc = Document::new(&mut author, &registry);
        let mutation = Mutation::build(&mut doc, &[&Structset::with_zero()]);
        assert_eq!(
            fields(&mutation),
            vec!["name", "rating", "created_at", "updated_at"]
        );
    }

    #[test]
    fn recurses_into_associations() {
        let registry = Registry::new();
        let mut author = Author {
            name: "Ann".into(),
            books: Some(vec![
                Book {
                    title: "One".into(),
                    publisher: Some(Publisher {
                        id: 0,
                        name: "Ace".into(),
                    }),
                    ..Book::default()
                },
                Book {
                    title: "Two".into(),
                    ..Book::default()
                },
            ]),
            ..Author::default()
        };
        let mut doc = Document::new(&mut author, &registry);
        let mutation = Mutation::build(&mut doc, &[&Structset::new()]);

        let books = mutation.assoc("books").unwrap();
        assert_eq!(books.mutations.len(), 2);
        assert_eq!(books.deleted_ids, None);
        assert_eq!(fields(&books.mutations[0]), vec!["title"]);
        let publisher = books.mutations[0].assoc("publisher").unwrap();
        assert_eq!(fields(&publisher.mutations[0]), vec!["name"]);
        assert!(books.mutations[1].assoc("publisher").is_none());
    }

    #[test]
    fn cascade_off_skips_associations() {
        let registry = Registry::new();
        let mut author = Author {
            books: Some(vec![Book::default()]),
            ..Author::default()
        };
        let mut doc = Document::new(&mut author, &registry);
        let mutation = Mutation::build(
            &mut doc,
            &[&crate::mutation::Cascade(false), &Structset::new()],
        );
        assert!(!mutation.has_assoc());
    }
}
