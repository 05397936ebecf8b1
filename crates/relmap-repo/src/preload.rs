//! Batched association loading.
//!
//! Every record reached through the path contributes its reference value;
//! one query fetches all targets, and each row fans out to every record that
//! shares its key. Records sharing a key cost nothing extra. An extra filter
//! narrows the target query; slots whose rows are all filtered out end up
//! empty.

use crate::persist::scoped;
use crate::scan;
use asupersync::{Cx, Outcome};
use relmap_core::{
    Adapter, Association, AssociationKind, AssociationMeta, Document, Error, Filter, MappingError,
    Query, Registry, Result, Value, ValueKey, fault,
};
use std::collections::{HashMap, HashSet};

/// Slots awaiting rows, grouped by reference value.
struct Targets<'a> {
    meta: Option<AssociationMeta>,
    keys: Vec<Value>,
    slots: HashMap<ValueKey, Vec<Association<'a>>>,
}

impl Targets<'_> {
    fn slot_count(&self) -> usize {
        self.slots.values().map(Vec::len).sum()
    }

    fn fill(&mut self, key: &Value, fields: &[String], row: &[Value]) -> Result<()> {
        let Some(slots) = self.slots.get_mut(&key.key()) else {
            return Ok(());
        };
        for slot in slots {
            fill(slot, fields, row)?;
        }
        Ok(())
    }
}

/// Load the association at `path` for every root, keeping only targets that
/// also match `filter`. Returns the rows fetched.
pub(crate) async fn preload<A: Adapter>(
    adapter: &A,
    cx: &Cx,
    registry: &Registry,
    roots: Vec<Document<'_>>,
    path: &str,
    filter: &Filter,
) -> Outcome<usize, Error> {
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|segment| segment.is_empty()) {
        fault(MappingError::InvalidPreloadPath {
            path: path.to_string(),
        });
    }

    let mut targets = collect(roots, &segments);
    let Some(meta) = targets.meta.take() else {
        tracing::trace!(path, "Nothing reachable to preload");
        return Outcome::Ok(0);
    };
    if targets.keys.is_empty() {
        return Outcome::Ok(0);
    }

    tracing::info!(
        path,
        keys = targets.keys.len(),
        slots = targets.slot_count(),
        "Batch preloading association"
    );

    let loaded = match meta.through() {
        None => {
            try_outcome!(load_direct(adapter, cx, registry, &meta, filter, &mut targets).await)
        }
        Some(join) => try_outcome!(
            load_through(adapter, cx, registry, &meta, join, filter, &mut targets).await
        ),
    };

    tracing::debug!(path, rows = loaded, "Preload complete");
    Outcome::Ok(loaded)
}

/// Walk `path` from every root and register the terminal slots.
///
/// Unloaded intermediate associations are pruned. Terminal slots are reset
/// before anything is registered so that keys without rows end up empty.
fn collect<'a>(roots: Vec<Document<'a>>, path: &[&str]) -> Targets<'a> {
    let last = path.len() - 1;
    let mut targets = Targets {
        meta: None,
        keys: Vec::new(),
        slots: HashMap::new(),
    };
    let mut stack: Vec<(usize, Document<'a>)> =
        roots.into_iter().rev().map(|doc| (0, doc)).collect();

    while let Some((depth, doc)) = stack.pop() {
        let mut assoc = doc.into_association(path[depth]);

        if depth < last {
            if assoc.kind() == AssociationKind::HasMany {
                if let Some(col) = assoc.into_loaded_collection() {
                    let children = col.into_documents();
                    stack.extend(children.into_iter().rev().map(|child| (depth + 1, child)));
                }
            } else if assoc.is_loaded() {
                if let Some(child) = assoc.into_loaded_document() {
                    stack.push((depth + 1, child));
                }
            }
            continue;
        }

        let reference = assoc.reference_value();
        if reference.is_null() {
            continue;
        }
        if assoc.kind() == AssociationKind::HasMany {
            assoc.collection().0.reset();
        } else {
            assoc.clear();
        }
        if targets.meta.is_none() {
            targets.meta = Some(assoc.meta().clone());
        }

        let entry = targets.slots.entry(reference.key()).or_default();
        if entry.is_empty() {
            targets.keys.push(reference);
        }
        entry.push(assoc);
    }
    targets
}

/// `SELECT * FROM <target> WHERE <foreign> IN (<keys>) AND <filter>`
async fn load_direct<A: Adapter>(
    adapter: &A,
    cx: &Cx,
    registry: &Registry,
    meta: &AssociationMeta,
    filter: &Filter,
    targets: &mut Targets<'_>,
) -> Outcome<usize, Error> {
    let target = registry.meta(meta.target());
    let query = scoped(
        &target,
        Query::from(target.table())
            .filter(Filter::in_list(meta.foreign_field(), targets.keys.clone()))
            .filter(filter.clone()),
    );
    tracing::trace!(table = %query.table, filter = %query.filter, "Preload query");

    let (fields, rows) = try_outcome!(fetch(adapter, cx, &query).await);
    if rows.is_empty() {
        return Outcome::Ok(0);
    }
    let column = try_result!(position(&fields, meta.foreign_field(), &query.table));
    for row in &rows {
        try_result!(targets.fill(&row[column], &fields, row));
    }
    Outcome::Ok(rows.len())
}

/// Many-to-many: read the join table, then the targets it points at.
async fn load_through<A: Adapter>(
    adapter: &A,
    cx: &Cx,
    registry: &Registry,
    meta: &AssociationMeta,
    join: &str,
    filter: &Filter,
    targets: &mut Targets<'_>,
) -> Outcome<usize, Error> {
    let Some((owner_column, target_column)) = meta.join_fields() else {
        return Outcome::Ok(0);
    };

    let link_query =
        Query::from(join).filter(Filter::in_list(owner_column.as_str(), targets.keys.clone()));
    tracing::trace!(table = %join, filter = %link_query.filter, "Preload link query");
    let (link_fields, links) = try_outcome!(fetch(adapter, cx, &link_query).await);
    if links.is_empty() {
        return Outcome::Ok(0);
    }
    let owner_at = try_result!(position(&link_fields, &owner_column, join));
    let target_at = try_result!(position(&link_fields, &target_column, join));

    let mut target_keys: Vec<Value> = Vec::new();
    let mut seen = HashSet::new();
    for link in &links {
        let key = &link[target_at];
        if !key.is_null() && seen.insert(key.key()) {
            target_keys.push(key.clone());
        }
    }
    if target_keys.is_empty() {
        return Outcome::Ok(0);
    }

    let target = registry.meta(meta.target());
    let query = scoped(
        &target,
        Query::from(target.table())
            .filter(Filter::in_list(meta.foreign_field(), target_keys))
            .filter(filter.clone()),
    );
    tracing::trace!(table = %query.table, filter = %query.filter, "Preload query");
    let (fields, rows) = try_outcome!(fetch(adapter, cx, &query).await);
    if rows.is_empty() {
        return Outcome::Ok(0);
    }
    let column = try_result!(position(&fields, meta.foreign_field(), &query.table));

    let by_key: HashMap<ValueKey, usize> = rows
        .iter()
        .enumerate()
        .map(|(i, row)| (row[column].key(), i))
        .collect();
    for link in &links {
        if let Some(&i) = by_key.get(&link[target_at].key()) {
            try_result!(targets.fill(&link[owner_at], &fields, &rows[i]));
        }
    }
    Outcome::Ok(rows.len())
}

async fn fetch<A: Adapter>(
    adapter: &A,
    cx: &Cx,
    query: &Query,
) -> Outcome<(Vec<String>, Vec<Vec<Value>>), Error> {
    let mut cursor = try_outcome!(adapter.query(cx, query).await);
    match scan::capture_rows(cursor.as_mut()) {
        Ok(rows) => Outcome::Ok(rows),
        Err(e) => Outcome::Err(e),
    }
}

fn position(fields: &[String], field: &str, table: &str) -> Result<usize> {
    fields
        .iter()
        .position(|name| name == field)
        .ok_or_else(|| Error::Custom(format!("preload of {table} returned no {field} column")))
}

fn fill(slot: &mut Association<'_>, fields: &[String], row: &[Value]) -> Result<()> {
    if slot.kind() == AssociationKind::HasMany {
        let (mut col, _) = slot.collection();
        let mut doc = col.add();
        scan::assign_row(&mut doc, fields, row)
    } else {
        let (mut doc, _) = slot.document();
        scan::assign_row(&mut doc, fields, row)
    }
}
