//! The repository: reads, cascading writes, preloading and transactions.

use crate::config::RepositoryConfig;
use crate::iterate::RecordIterator;
use crate::persist::{Persister, key_filter, scoped};
use crate::{preload, scan};
use asupersync::{Cx, Outcome};
use relmap_core::{
    Adapter, Aggregate, Cascade, Collection, Dirty, Document, Error, Filter, Model, Mutation,
    Mutator, Query, Registry, Structset, Transaction,
};
use std::sync::Arc;

/// Hook mapping every operational error a repository returns, e.g. a unique
/// violation into a domain validation error.
pub type ErrorTranslator = Arc<dyn Fn(Error) -> Error + Send + Sync>;

/// Persistence entry point over one adapter.
///
/// Saves with nested association mutations run in a transaction the
/// repository begins itself. Inside [`Repository::transaction`] they join the
/// open transaction instead.
pub struct Repository<A> {
    adapter: A,
    registry: Arc<Registry>,
    config: RepositoryConfig,
    translator: Option<ErrorTranslator>,
    in_transaction: bool,
}

impl<A> Repository<A> {
    /// Create a repository with the default configuration.
    pub fn new(adapter: A, registry: Arc<Registry>) -> Self {
        Self {
            adapter,
            registry,
            config: RepositoryConfig::default(),
            translator: None,
            in_transaction: false,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: RepositoryConfig) -> Self {
        self.config = config;
        self
    }

    /// Install a hook applied to every returned error.
    #[must_use]
    pub fn with_error_translator<F>(mut self, translator: F) -> Self
    where
        F: Fn(Error) -> Error + Send + Sync + 'static,
    {
        self.translator = Some(Arc::new(translator));
        self
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// Whether this repository runs inside an open transaction.
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// An unfiltered query over the table of `T`.
    pub fn query<T: Model>(&self) -> Query {
        Query::from(self.registry.meta_of::<T>().table())
    }

    pub(crate) fn translate<R>(&self, outcome: Outcome<R, Error>) -> Outcome<R, Error> {
        translate_with(self.translator.as_ref(), outcome)
    }
}

impl<A: Adapter> Repository<A> {
    /// Fetch the first record matching `filter` into `record`.
    ///
    /// Applies the soft-delete scope, initializes the record's change
    /// tracker and preloads its `autoload` associations.
    pub async fn find<T: Model>(&self, cx: &Cx, record: &mut T, filter: Filter) -> Outcome<(), Error> {
        self.find_by(cx, record, self.query::<T>().filter(filter)).await
    }

    /// [`Repository::find`] with a full query, e.g. an unscoped one.
    #[tracing::instrument(level = "debug", skip(self, cx, record, query), fields(record = std::any::type_name::<T>()))]
    pub async fn find_by<T: Model>(&self, cx: &Cx, record: &mut T, query: Query) -> Outcome<(), Error> {
        let outcome = self.fetch_one(cx, record, query).await;
        self.translate(outcome)
    }

    /// Replace `records` with every record matching `filter`.
    pub async fn find_all<T: Model>(
        &self,
        cx: &Cx,
        records: &mut Vec<T>,
        filter: Filter,
    ) -> Outcome<(), Error> {
        self.find_all_by(cx, records, self.query::<T>().filter(filter)).await
    }

    /// [`Repository::find_all`] with a full query.
    #[tracing::instrument(level = "debug", skip(self, cx, records, query), fields(record = std::any::type_name::<T>()))]
    pub async fn find_all_by<T: Model>(
        &self,
        cx: &Cx,
        records: &mut Vec<T>,
        query: Query,
    ) -> Outcome<(), Error> {
        let outcome = self.fetch_all(cx, records, query).await;
        self.translate(outcome)
    }

    /// Replace `records` with the page selected by `query` and return how
    /// many rows match it in total, ignoring its limit and offset.
    #[tracing::instrument(level = "debug", skip(self, cx, records, query), fields(record = std::any::type_name::<T>()))]
    pub async fn find_and_count_all<T: Model>(
        &self,
        cx: &Cx,
        records: &mut Vec<T>,
        query: Query,
    ) -> Outcome<u64, Error> {
        let outcome = self.fetch_all(cx, records, query.clone()).await;
        try_outcome!(self.translate(outcome));
        self.count_by::<T>(cx, query).await
    }

    /// Number of `T` rows matching `filter`.
    pub async fn count<T: Model>(&self, cx: &Cx, filter: Filter) -> Outcome<u64, Error> {
        self.count_by::<T>(cx, self.query::<T>().filter(filter)).await
    }

    /// [`Repository::count`] with a full query. Paging is ignored.
    pub async fn count_by<T: Model>(&self, cx: &Cx, query: Query) -> Outcome<u64, Error> {
        let count = try_outcome!(self.aggregate::<T>(cx, query, Aggregate::Count, "*").await);
        Outcome::Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Compute `aggregate` over `field` of the `T` rows matching `query`.
    ///
    /// The soft-delete scope applies; ordering, limit and offset do not.
    #[tracing::instrument(level = "debug", skip(self, cx, query), fields(record = std::any::type_name::<T>(), aggregate = aggregate.as_str()))]
    pub async fn aggregate<T: Model>(
        &self,
        cx: &Cx,
        query: Query,
        aggregate: Aggregate,
        field: &str,
    ) -> Outcome<i64, Error> {
        let meta = self.registry.meta_of::<T>();
        let query = scoped(&meta, query).unpaged();
        tracing::debug!(table = %query.table, filter = %query.filter, field, "Aggregating records");
        let outcome = self.adapter.aggregate(cx, &query, aggregate, field).await;
        self.translate(outcome)
    }

    /// Walk every `T` matching `query` in primary key order, one batch of
    /// rows at a time.
    pub fn iterate<T: Model>(&self, query: Query) -> RecordIterator<'_, A, T> {
        RecordIterator::new(self, query)
    }

    /// Insert `record` and its associations.
    ///
    /// With no mutators the whole record is written (`Structset`).
    #[tracing::instrument(level = "debug", skip(self, cx, record, mutators), fields(record = std::any::type_name::<T>()))]
    pub async fn insert<T: Model>(
        &self,
        cx: &Cx,
        record: &mut T,
        mutators: &[&dyn Mutator],
    ) -> Outcome<(), Error> {
        let mut doc = Document::new(record, &self.registry);
        let mutation = if mutators.is_empty() {
            Mutation::build(&mut doc, &[&Structset::new()])
        } else {
            Mutation::build(&mut doc, mutators)
        };

        let outcome = self.save(cx, doc.reborrow(), mutation, None).await;
        if matches!(outcome, Outcome::Ok(())) {
            doc.track_changes();
        }
        self.translate(outcome)
    }

    /// Insert every record of `records` in one statement.
    ///
    /// Associations are not cascaded. Generated keys are written back.
    #[tracing::instrument(level = "debug", skip(self, cx, records), fields(record = std::any::type_name::<T>(), count = records.len()))]
    pub async fn insert_all<T: Model>(&self, cx: &Cx, records: &mut Vec<T>) -> Outcome<(), Error> {
        if records.is_empty() {
            return Outcome::Ok(());
        }

        let mut col = Collection::new(&mut *records, &self.registry);
        let mutations: Vec<Mutation> = (0..col.len())
            .map(|i| Mutation::build(&mut col.get(i), &[&Cascade(false), &Structset::new()]))
            .collect();
        let outcome = Persister::new(&self.adapter, &self.config)
            .insert_all(cx, &mut col, mutations)
            .await;

        if matches!(outcome, Outcome::Ok(())) {
            for record in records.iter_mut() {
                Document::new(record, &self.registry).track_changes();
            }
        }
        self.translate(outcome)
    }

    /// Update `record` by primary key and cascade into its associations.
    ///
    /// With no mutators, a record whose change tracker is initialized writes
    /// only what changed (`Dirty`); otherwise every field is written,
    /// including zero values.
    #[tracing::instrument(level = "debug", skip(self, cx, record, mutators), fields(record = std::any::type_name::<T>()))]
    pub async fn update<T: Model>(
        &self,
        cx: &Cx,
        record: &mut T,
        mutators: &[&dyn Mutator],
    ) -> Outcome<(), Error> {
        let mut doc = Document::new(record, &self.registry);
        let tracking = doc
            .record_mut()
            .dirty_state()
            .is_some_and(|dirty| dirty.is_tracking());
        let mutation = if !mutators.is_empty() {
            Mutation::build(&mut doc, mutators)
        } else if tracking {
            Mutation::build(&mut doc, &[&Dirty::new()])
        } else {
            Mutation::build(&mut doc, &[&Structset::with_zero()])
        };
        let filter = key_filter(&doc);

        let outcome = self.save(cx, doc.reborrow(), mutation, Some(filter)).await;
        if matches!(outcome, Outcome::Ok(())) {
            doc.track_changes();
        }
        self.translate(outcome)
    }

    /// Delete `record` by primary key; softly when its type is flagged.
    #[tracing::instrument(level = "debug", skip(self, cx, record), fields(record = std::any::type_name::<T>()))]
    pub async fn delete<T: Model>(&self, cx: &Cx, record: &mut T) -> Outcome<(), Error> {
        let mut doc = Document::new(record, &self.registry);
        let outcome = Persister::new(&self.adapter, &self.config)
            .delete_one(cx, &mut doc)
            .await;
        self.translate(outcome)
    }

    /// Delete every `T` matching `query`. Returns the rows affected.
    #[tracing::instrument(level = "debug", skip(self, cx, query), fields(record = std::any::type_name::<T>(), filter = %query.filter))]
    pub async fn delete_all<T: Model>(&self, cx: &Cx, query: Query) -> Outcome<u64, Error> {
        let meta = self.registry.meta_of::<T>();
        let outcome = Persister::new(&self.adapter, &self.config)
            .delete_all(cx, &meta, query)
            .await;
        self.translate(outcome)
    }

    /// Load the association at the dotted `path` into `record`.
    #[tracing::instrument(level = "debug", skip(self, cx, record), fields(record = std::any::type_name::<T>()))]
    pub async fn preload<T: Model>(&self, cx: &Cx, record: &mut T, path: &str) -> Outcome<(), Error> {
        self.preload_by(cx, record, path, Filter::All).await
    }

    /// [`Repository::preload`] keeping only targets that match `filter`.
    #[tracing::instrument(level = "debug", skip(self, cx, record), fields(record = std::any::type_name::<T>(), filter = %filter))]
    pub async fn preload_by<T: Model>(
        &self,
        cx: &Cx,
        record: &mut T,
        path: &str,
        filter: Filter,
    ) -> Outcome<(), Error> {
        let outcome = self.load_one(cx, record, path, &filter).await;
        self.translate(outcome)
    }

    /// Load the association at the dotted `path` into every record, with one
    /// query for the whole batch.
    #[tracing::instrument(level = "debug", skip(self, cx, records), fields(record = std::any::type_name::<T>(), count = records.len()))]
    pub async fn preload_all<T: Model>(
        &self,
        cx: &Cx,
        records: &mut Vec<T>,
        path: &str,
    ) -> Outcome<(), Error> {
        self.preload_all_by(cx, records, path, Filter::All).await
    }

    /// [`Repository::preload_all`] keeping only targets that match `filter`.
    #[tracing::instrument(level = "debug", skip(self, cx, records), fields(record = std::any::type_name::<T>(), count = records.len(), filter = %filter))]
    pub async fn preload_all_by<T: Model>(
        &self,
        cx: &Cx,
        records: &mut Vec<T>,
        path: &str,
        filter: Filter,
    ) -> Outcome<(), Error> {
        let outcome = self.load_many(cx, records, path, &filter).await;
        self.translate(outcome)
    }

    /// Begin a transaction and return a repository bound to it.
    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn transaction(&self, cx: &Cx) -> Outcome<Repository<A::Tx<'_>>, Error> {
        let tx = try_outcome!(self.translate(self.adapter.begin(cx).await));
        tracing::debug!("Transaction started");
        Outcome::Ok(Repository {
            adapter: tx,
            registry: Arc::clone(&self.registry),
            config: self.config.clone(),
            translator: self.translator.clone(),
            in_transaction: true,
        })
    }

    async fn save(
        &self,
        cx: &Cx,
        doc: Document<'_>,
        mutation: Mutation,
        filter: Option<Filter>,
    ) -> Outcome<(), Error> {
        if !mutation.has_assoc() || self.in_transaction {
            return persist(&Persister::new(&self.adapter, &self.config), cx, doc, mutation, filter)
                .await;
        }

        let tx = try_outcome!(self.adapter.begin(cx).await);
        tracing::debug!("Began transaction for cascading save");
        let outcome = persist(&Persister::new(&tx, &self.config), cx, doc, mutation, filter).await;
        settle(tx, cx, outcome).await
    }

    async fn fetch_one<T: Model>(&self, cx: &Cx, record: &mut T, query: Query) -> Outcome<(), Error> {
        let meta = self.registry.meta_of::<T>();
        let query = scoped(&meta, query).limit(1);
        tracing::debug!(table = %query.table, filter = %query.filter, "Finding record");

        let mut cursor = try_outcome!(self.adapter.query(cx, &query).await);
        let mut doc = Document::new(&mut *record, &self.registry);
        match scan::scan_one(cursor.as_mut(), &mut doc) {
            Ok(true) => {}
            Ok(false) => return Outcome::Err(Error::not_found(meta.table())),
            Err(e) => return Outcome::Err(e),
        }
        doc.track_changes();

        if self.config.autoload {
            for path in meta.preload() {
                try_outcome!(self.load_one(cx, record, path, &Filter::All).await);
            }
        }
        Outcome::Ok(())
    }

    async fn fetch_all<T: Model>(
        &self,
        cx: &Cx,
        records: &mut Vec<T>,
        query: Query,
    ) -> Outcome<(), Error> {
        let meta = self.registry.meta_of::<T>();
        let query = scoped(&meta, query);
        tracing::debug!(table = %query.table, filter = %query.filter, "Finding records");

        let mut cursor = try_outcome!(self.adapter.query(cx, &query).await);
        let mut col = Collection::new(&mut *records, &self.registry);
        col.reset();
        let count = try_result!(scan::scan_all(cursor.as_mut(), &mut col));
        tracing::debug!(count, "Records found");

        for record in records.iter_mut() {
            Document::new(record, &self.registry).track_changes();
        }
        if self.config.autoload && !records.is_empty() {
            for path in meta.preload() {
                try_outcome!(self.load_many(cx, records, path, &Filter::All).await);
            }
        }
        Outcome::Ok(())
    }

    async fn load_one<T: Model>(
        &self,
        cx: &Cx,
        record: &mut T,
        path: &str,
        filter: &Filter,
    ) -> Outcome<(), Error> {
        let roots = vec![Document::new(&mut *record, &self.registry)];
        try_outcome!(
            preload::preload(&self.adapter, cx, &self.registry, roots, path, filter).await
        );
        Document::new(record, &self.registry).track_associations();
        Outcome::Ok(())
    }

    async fn load_many<T: Model>(
        &self,
        cx: &Cx,
        records: &mut Vec<T>,
        path: &str,
        filter: &Filter,
    ) -> Outcome<(), Error> {
        let roots = Collection::new(&mut *records, &self.registry).into_documents();
        try_outcome!(
            preload::preload(&self.adapter, cx, &self.registry, roots, path, filter).await
        );
        for record in records.iter_mut() {
            Document::new(record, &self.registry).track_associations();
        }
        Outcome::Ok(())
    }
}

impl<A: Transaction> Repository<A> {
    /// Commit the transaction this repository is bound to.
    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn commit(self, cx: &Cx) -> Outcome<(), Error> {
        let translator = self.translator.clone();
        let outcome = self.adapter.commit(cx).await;
        translate_with(translator.as_ref(), outcome)
    }

    /// Roll back the transaction this repository is bound to.
    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn rollback(self, cx: &Cx) -> Outcome<(), Error> {
        let translator = self.translator.clone();
        let outcome = self.adapter.rollback(cx).await;
        translate_with(translator.as_ref(), outcome)
    }
}

impl<A> std::fmt::Debug for Repository<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .field("translator", &self.translator.is_some())
            .field("in_transaction", &self.in_transaction)
            .finish_non_exhaustive()
    }
}

async fn persist<A: Adapter>(
    persister: &Persister<'_, A>,
    cx: &Cx,
    doc: Document<'_>,
    mutation: Mutation,
    filter: Option<Filter>,
) -> Outcome<(), Error> {
    match filter {
        None => persister.insert(cx, doc, mutation).await,
        Some(filter) => persister.update(cx, doc, mutation, filter).await,
    }
}

/// Commit on `Ok`; roll back on every other outcome and return it unchanged.
async fn settle<T: Transaction>(tx: T, cx: &Cx, outcome: Outcome<(), Error>) -> Outcome<(), Error> {
    match outcome {
        Outcome::Ok(()) => {
            let committed = tx.commit(cx).await;
            if matches!(committed, Outcome::Ok(())) {
                tracing::debug!("Committed cascading save");
            }
            committed
        }
        other => {
            if let Outcome::Err(e) = tx.rollback(cx).await {
                tracing::warn!(error = %e, "Rollback after failed save also failed");
            }
            tracing::debug!("Rolled back cascading save");
            other
        }
    }
}

fn translate_with<R>(
    translator: Option<&ErrorTranslator>,
    outcome: Outcome<R, Error>,
) -> Outcome<R, Error> {
    match (outcome, translator) {
        (Outcome::Err(e), Some(translator)) => Outcome::Err(translator(e)),
        (outcome, _) => outcome,
    }
}
