use super::{Snapshot, Structset};
use crate::document::Document;
use crate::mutation::{Mutation, Mutator};

/// Change tracker a record can embed.
///
/// The repository initializes it whenever it loads or saves the record, so
/// that a later update only writes what changed in between. A record exposes
/// its tracker through [`Model::dirty`](crate::record::Model::dirty).
///
/// Used as a mutator directly, it diffs the document against the record's own
/// tracker when there is one, else against its own snapshot, else it emits
/// the whole record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dirty {
    snapshot: Option<Snapshot>,
}

impl Dirty {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a snapshot has been taken.
    pub fn is_tracking(&self) -> bool {
        self.snapshot.is_some()
    }

    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    pub(crate) fn set(&mut self, snapshot: Snapshot) {
        self.snapshot = Some(snapshot);
    }

    /// Forget the snapshot; the next save writes the whole record.
    pub fn reset(&mut self) {
        self.snapshot = None;
    }
}

impl Mutator for Dirty {
    fn apply(&self, doc: &mut Document<'_>, mutation: &mut Mutation) {
        let embedded = doc
            .record_mut()
            .dirty_state()
            .and_then(|dirty| dirty.snapshot.clone());
        match embedded.as_ref().or(self.snapshot.as_ref()) {
            Some(snapshot) => snapshot.diff(doc, mutation),
            None => Structset::new().apply(doc, mutation),
        }
    }
}
