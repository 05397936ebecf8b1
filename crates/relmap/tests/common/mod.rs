//! In-memory adapter and record types shared by the integration tests.

#![allow(dead_code)]

use asupersync::runtime::RuntimeBuilder;
use relmap::prelude::*;
use relmap::{QueryError, QueryErrorKind};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex};

pub type Row = BTreeMap<String, Value>;

#[derive(Debug, Default, Clone)]
struct Tables(HashMap<String, Vec<Row>>);

#[derive(Debug, Default)]
struct State {
    tables: Tables,
    log: Vec<String>,
    fail_on: Option<String>,
}

/// A storage adapter over in-memory tables.
///
/// Every call is appended to a log as a short line such as
/// `insert users` or `query users: id IN (10, 20)`. A transaction snapshots
/// all tables on begin and restores them on rollback.
#[derive(Debug, Clone, Default)]
pub struct MemoryAdapter {
    state: Arc<Mutex<State>>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a row without logging.
    pub fn seed(&self, table: &str, row: &[(&str, Value)]) {
        let mut state = self.state.lock().expect("lock poisoned");
        let row = row
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect();
        state.tables.0.entry(table.to_string()).or_default().push(row);
    }

    /// Overwrite one column of the row with primary key `id`, without logging.
    pub fn seed_update(&self, table: &str, id: i64, field: &str, value: Value) {
        let mut state = self.state.lock().expect("lock poisoned");
        let rows = state.tables.0.entry(table.to_string()).or_default();
        for row in rows.iter_mut() {
            if row.get("id").and_then(Value::as_i64) == Some(id) {
                row.insert(field.to_string(), value.clone());
            }
        }
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        let state = self.state.lock().expect("lock poisoned");
        state.tables.0.get(table).cloned().unwrap_or_default()
    }

    pub fn log(&self) -> Vec<String> {
        self.state.lock().expect("lock poisoned").log.clone()
    }

    pub fn clear_log(&self) {
        self.state.lock().expect("lock poisoned").log.clear();
    }

    /// Fail every call whose log line starts with `prefix` with a unique
    /// violation.
    pub fn fail_on(&self, prefix: &str) {
        self.state.lock().expect("lock poisoned").fail_on = Some(prefix.to_string());
    }

    fn record(&self, state: &mut State, line: String, table: &str) -> Result<()> {
        let failed = state
            .fail_on
            .as_deref()
            .is_some_and(|prefix| line.starts_with(prefix));
        state.log.push(line);
        if failed {
            return Err(Error::Query(QueryError {
                kind: QueryErrorKind::Constraint,
                table: Some(table.to_string()),
                sqlstate: Some("23505".to_string()),
                message: "duplicate key value violates unique constraint".to_string(),
                source: None,
            }));
        }
        Ok(())
    }

    fn run_query(&self, query: &Query) -> Result<Box<dyn Cursor>> {
        let mut state = self.state.lock().expect("lock poisoned");
        let line = format!("query {}: {}{}", query.table, query.filter, paging(query));
        self.record(&mut state, line, &query.table)?;

        let mut matched = state.tables.matching(query);
        matched.sort_by(|a, b| {
            for sort in &query.sort {
                let left = a.get(&sort.field).unwrap_or(&Value::Null);
                let right = b.get(&sort.field).unwrap_or(&Value::Null);
                let order = left.compare(right).unwrap_or(Ordering::Equal);
                let order = if sort.descending { order.reverse() } else { order };
                if order != Ordering::Equal {
                    return order;
                }
            }
            Ordering::Equal
        });
        let matched: Vec<Row> = matched
            .into_iter()
            .skip(query.offset.unwrap_or(0))
            .take(query.limit.unwrap_or(usize::MAX))
            .collect();

        let columns: BTreeSet<String> = matched.iter().flat_map(|row| row.keys().cloned()).collect();
        let columns: Vec<String> = columns.into_iter().collect();
        let values = matched
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        Ok(Box::new(RowCursor::from_values(columns, values)))
    }

    fn run_aggregate(&self, query: &Query, aggregate: Aggregate, field: &str) -> Result<i64> {
        let mut state = self.state.lock().expect("lock poisoned");
        let line = format!("{}({field}) {}: {}", aggregate.as_str(), query.table, query.filter);
        self.record(&mut state, line, &query.table)?;

        let matched = state.tables.matching(query);
        if aggregate == Aggregate::Count {
            let count = if field == "*" {
                matched.len()
            } else {
                matched
                    .iter()
                    .filter(|row| row.get(field).is_some_and(|v| !v.is_null()))
                    .count()
            };
            return Ok(i64::try_from(count).unwrap_or(i64::MAX));
        }

        let values: Vec<i64> = matched
            .iter()
            .filter_map(|row| row.get(field).and_then(Value::as_i64))
            .collect();
        if values.is_empty() {
            return Ok(0);
        }
        Ok(match aggregate {
            Aggregate::Sum => values.iter().sum(),
            Aggregate::Avg => values.iter().sum::<i64>() / values.len() as i64,
            Aggregate::Max => values.iter().copied().max().unwrap_or(0),
            Aggregate::Min => values.iter().copied().min().unwrap_or(0),
            Aggregate::Count => unreachable!(),
        })
    }

    fn insert_row(rows: &mut Vec<Row>, primary_field: &str, mutation: &Mutation) -> Value {
        let mut row = Row::new();
        apply(&mut row, mutation);
        if primary_field.is_empty() {
            rows.push(row);
            return Value::Null;
        }

        let id = match row.get(primary_field) {
            Some(v) if !v.is_zero() => v.clone(),
            _ => {
                let next = rows
                    .iter()
                    .filter_map(|r| r.get(primary_field).and_then(Value::as_i64))
                    .max()
                    .unwrap_or(0)
                    + 1;
                Value::BigInt(next)
            }
        };
        row.insert(primary_field.to_string(), id.clone());
        rows.push(row);
        id
    }

    fn run_insert(&self, table: &str, primary_field: &str, mutation: &Mutation) -> Result<Value> {
        let mut state = self.state.lock().expect("lock poisoned");
        self.record(&mut state, format!("insert {table}"), table)?;
        let rows = state.tables.0.entry(table.to_string()).or_default();
        Ok(Self::insert_row(rows, primary_field, mutation))
    }

    fn run_insert_all(
        &self,
        table: &str,
        primary_field: &str,
        mutations: &[Mutation],
    ) -> Result<Vec<Value>> {
        let mut state = self.state.lock().expect("lock poisoned");
        let line = format!("insert_all {table} x{}", mutations.len());
        self.record(&mut state, line, table)?;
        let rows = state.tables.0.entry(table.to_string()).or_default();
        Ok(mutations
            .iter()
            .map(|mutation| Self::insert_row(rows, primary_field, mutation))
            .collect())
    }

    fn run_update(&self, query: &Query, mutation: &Mutation) -> Result<u64> {
        let mut state = self.state.lock().expect("lock poisoned");
        let line = format!("update {}: {}", query.table, query.filter);
        self.record(&mut state, line, &query.table)?;
        let mut count = 0;
        if let Some(rows) = state.tables.0.get_mut(&query.table) {
            for row in rows.iter_mut() {
                if query.filter.matches(&|f: &str| row.get(f).cloned()) {
                    apply(row, mutation);
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    fn run_delete(&self, query: &Query) -> Result<u64> {
        let mut state = self.state.lock().expect("lock poisoned");
        let line = format!("delete {}: {}", query.table, query.filter);
        self.record(&mut state, line, &query.table)?;
        let Some(rows) = state.tables.0.get_mut(&query.table) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|row| !query.filter.matches(&|f: &str| row.get(f).cloned()));
        Ok((before - rows.len()) as u64)
    }

    fn run_begin(&self) -> Result<MemoryTx> {
        let mut state = self.state.lock().expect("lock poisoned");
        self.record(&mut state, "begin".to_string(), "")?;
        Ok(MemoryTx {
            inner: self.clone(),
            snapshot: state.tables.clone(),
        })
    }
}

impl Tables {
    fn matching(&self, query: &Query) -> Vec<Row> {
        self.0
            .get(&query.table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| query.filter.matches(&|f: &str| row.get(f).cloned()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// ` ORDER BY .. LIMIT .. OFFSET ..` for paged queries, empty otherwise.
fn paging(query: &Query) -> String {
    let mut out = String::new();
    if query.sort.is_empty() && query.offset.is_none() {
        return out;
    }
    if !query.sort.is_empty() {
        let sort: Vec<String> = query.sort.iter().map(ToString::to_string).collect();
        out.push_str(&format!(" ORDER BY {}", sort.join(", ")));
    }
    if let Some(limit) = query.limit {
        out.push_str(&format!(" LIMIT {limit}"));
    }
    if let Some(offset) = query.offset {
        out.push_str(&format!(" OFFSET {offset}"));
    }
    out
}

fn apply(row: &mut Row, mutation: &Mutation) {
    for mutate in mutation.mutates() {
        match mutate {
            Mutate::Set { field, value } => {
                row.insert(field.clone(), value.clone());
            }
            Mutate::Inc { field, by } => {
                let current = row.get(field).and_then(Value::as_i64).unwrap_or(0);
                row.insert(field.clone(), Value::BigInt(current + by));
            }
            Mutate::Dec { field, by } => {
                let current = row.get(field).and_then(Value::as_i64).unwrap_or(0);
                row.insert(field.clone(), Value::BigInt(current - by));
            }
            Mutate::Fragment { .. } => {}
        }
    }
}

fn ready<T>(result: Result<T>) -> impl Future<Output = Outcome<T, Error>> + Send
where
    T: Send,
{
    let outcome = match result {
        Ok(value) => Outcome::Ok(value),
        Err(e) => Outcome::Err(e),
    };
    async move { outcome }
}

impl Adapter for MemoryAdapter {
    type Tx<'a>
        = MemoryTx
    where
        Self: 'a;

    fn query(
        &self,
        _cx: &Cx,
        query: &Query,
    ) -> impl Future<Output = Outcome<Box<dyn Cursor>, Error>> + Send {
        ready(self.run_query(query))
    }

    fn aggregate(
        &self,
        _cx: &Cx,
        query: &Query,
        aggregate: Aggregate,
        field: &str,
    ) -> impl Future<Output = Outcome<i64, Error>> + Send {
        ready(self.run_aggregate(query, aggregate, field))
    }

    fn insert(
        &self,
        _cx: &Cx,
        table: &str,
        primary_field: &str,
        mutation: &Mutation,
    ) -> impl Future<Output = Outcome<Value, Error>> + Send {
        ready(self.run_insert(table, primary_field, mutation))
    }

    fn insert_all(
        &self,
        _cx: &Cx,
        table: &str,
        primary_field: &str,
        _fields: &[String],
        mutations: &[Mutation],
    ) -> impl Future<Output = Outcome<Vec<Value>, Error>> + Send {
        ready(self.run_insert_all(table, primary_field, mutations))
    }

    fn update(
        &self,
        _cx: &Cx,
        query: &Query,
        mutation: &Mutation,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        ready(self.run_update(query, mutation))
    }

    fn delete(&self, _cx: &Cx, query: &Query) -> impl Future<Output = Outcome<u64, Error>> + Send {
        ready(self.run_delete(query))
    }

    fn begin(&self, _cx: &Cx) -> impl Future<Output = Outcome<Self::Tx<'_>, Error>> + Send {
        ready(self.run_begin())
    }
}

/// Transaction over a [`MemoryAdapter`].
#[derive(Debug)]
pub struct MemoryTx {
    inner: MemoryAdapter,
    snapshot: Tables,
}

impl Adapter for MemoryTx {
    type Tx<'a>
        = MemoryTx
    where
        Self: 'a;

    fn query(
        &self,
        _cx: &Cx,
        query: &Query,
    ) -> impl Future<Output = Outcome<Box<dyn Cursor>, Error>> + Send {
        ready(self.inner.run_query(query))
    }

    fn aggregate(
        &self,
        _cx: &Cx,
        query: &Query,
        aggregate: Aggregate,
        field: &str,
    ) -> impl Future<Output = Outcome<i64, Error>> + Send {
        ready(self.inner.run_aggregate(query, aggregate, field))
    }

    fn insert(
        &self,
        _cx: &Cx,
        table: &str,
        primary_field: &str,
        mutation: &Mutation,
    ) -> impl Future<Output = Outcome<Value, Error>> + Send {
        ready(self.inner.run_insert(table, primary_field, mutation))
    }

    fn insert_all(
        &self,
        _cx: &Cx,
        table: &str,
        primary_field: &str,
        _fields: &[String],
        mutations: &[Mutation],
    ) -> impl Future<Output = Outcome<Vec<Value>, Error>> + Send {
        ready(self.inner.run_insert_all(table, primary_field, mutations))
    }

    fn update(
        &self,
        _cx: &Cx,
        query: &Query,
        mutation: &Mutation,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        ready(self.inner.run_update(query, mutation))
    }

    fn delete(&self, _cx: &Cx, query: &Query) -> impl Future<Output = Outcome<u64, Error>> + Send {
        ready(self.inner.run_delete(query))
    }

    fn begin(&self, _cx: &Cx) -> impl Future<Output = Outcome<Self::Tx<'_>, Error>> + Send {
        ready(self.inner.run_begin())
    }
}

impl Transaction for MemoryTx {
    fn commit(self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        let mut state = self.inner.state.lock().expect("lock poisoned");
        state.log.push("commit".to_string());
        async { Outcome::Ok(()) }
    }

    fn rollback(self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        let mut state = self.inner.state.lock().expect("lock poisoned");
        state.log.push("rollback".to_string());
        state.tables = self.snapshot;
        async { Outcome::Ok(()) }
    }
}

pub fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

pub fn expect_err<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> Error {
    match outcome {
        Outcome::Err(e) => e,
        other => panic!("expected an error, got {other:?}"),
    }
}

/// Run `f` on a current-thread runtime.
pub fn run<F, Fut>(f: F)
where
    F: FnOnce(Cx) -> Fut,
    Fut: Future<Output = ()>,
{
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    rt.block_on(f(cx));
}

/// A repository over `adapter` that does not reload after saves.
pub fn repository(adapter: &MemoryAdapter) -> Repository<MemoryAdapter> {
    Repository::new(adapter.clone(), Arc::new(Registry::new()))
        .with_config(RepositoryConfig::new().reload_after_save(false))
}

// ============================================================================
// Records
// ============================================================================

#[derive(Debug, Default, Clone, PartialEq, Model)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub address: Option<Address>,
    #[relmap(reference = "id", foreign_key = "buyer_id")]
    pub orders: Option<Vec<Order>>,
}

#[derive(Debug, Default, Clone, PartialEq, Model)]
pub struct Address {
    pub id: i64,
    pub user_id: i64,
    pub city: String,
}

#[derive(Debug, Default, Clone, PartialEq, Model)]
pub struct Order {
    pub id: i64,
    pub buyer_id: i64,
    pub status: String,
    pub buyer: Option<User>,
    pub items: Option<Vec<Item>>,
    #[relmap(through = "order_tags")]
    pub tags: Option<Vec<Tag>>,
    pub tracker: Dirty,
}

#[derive(Debug, Default, Clone, PartialEq, Model)]
pub struct Item {
    pub id: i64,
    pub order_id: i64,
    pub sku: String,
    pub qty: i64,
}

#[derive(Debug, Default, Clone, PartialEq, Model)]
pub struct Tag {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Default, Clone, PartialEq, Model)]
pub struct Note {
    pub id: i64,
    pub body: String,
    pub deleted_at: Option<Timestamp>,
}

#[derive(Debug, Default, Clone, PartialEq, Model)]
pub struct Account {
    pub id: i64,
    pub owner: String,
    pub balance: i64,
    pub lock_version: i64,
}
