//! Traversal driver (C6) and result assembly (C7).
//!
//! Walks a query shape level by level: fetch the current table's rows for a
//! batch of ids, then for each join element in the shape, fetch the *next*
//! level once for the whole batch (never per row) and fold the results back
//! onto their parents. Recursive (`...`/depth-N) joins are expanded the same
//! way, one level per round, guarded by cycle detection and a hard ceiling.

use crate::analyzer;
use crate::client::GenericClient;
use crate::emitter::{self, LINK_SOURCE_ALIAS};
use crate::error::{EngineError, EngineResult};
use crate::filter::FilterClause;
use crate::query_shape::{PropName, Query, QueryElement, Recursion, SubQuery, with_recursion_step};
use crate::schema::{Arity, JoinDescriptor, Schema};
use crate::sql::Sql;
use crate::value::{SqlValue, decode_row};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;

/// One resolved value in an assembled row.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Scalar(SqlValue),
    ToOne(Option<Box<Record>>),
    ToMany(Vec<Record>),
}

/// A fully assembled query result row: graph property name → value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    pub fields: std::collections::BTreeMap<String, FieldValue>,
}

/// Which column in a fetched row identifies the parent it belongs to.
enum GroupKey {
    /// Read `<table>/<column>` (forward/root: the table's own PK; reverse:
    /// the FK column pointing back at the parent).
    Column(String),
    /// Read a literal column alias rather than a `table/column` pair (the
    /// many-to-many link table's source-id column).
    LiteralAlias(&'static str),
}

/// Run a query shape against a root set of ids (§4.6).
///
/// `table` is the root table (already resolved by the analyzer, §4.3);
/// `root_ids` are that table's primary keys. Results are returned in
/// `root_ids` order; ids with no matching row are omitted.
#[tracing::instrument(skip(conn, schema, query, filters, root_ids), fields(table, root_ids = root_ids.len()))]
pub async fn run_query<C: GenericClient + Sync>(
    conn: &C,
    schema: &Schema,
    table: &str,
    query: &Query,
    root_ids: &[i64],
    filters: &HashMap<String, Vec<FilterClause>>,
) -> EngineResult<Vec<Record>> {
    tracing::debug!(table, root_ids = root_ids.len(), "running query");
    let mut visited: HashSet<(PropName, i64)> = HashSet::new();
    let pk = schema.pk(table);
    let sql = emitter::select_where_in(schema, table, query, &pk, root_ids, filters, 1)?;
    let grouped = fetch_level(
        conn,
        schema,
        table,
        query,
        sql,
        GroupKey::Column(pk),
        filters,
        1,
        &mut visited,
    )
    .await?;

    Ok(root_ids
        .iter()
        .filter_map(|id| grouped.get(id).and_then(|v| v.first().cloned()))
        .collect())
}

/// Execute `sql`, decode its rows, build the base (scalar-only) record for
/// each, resolve every join element in `query` against the whole batch, then
/// group the finished records by `group_key_column`.
async fn fetch_level<C: GenericClient + Sync>(
    conn: &C,
    schema: &Schema,
    table: &str,
    query: &Query,
    sql: Sql,
    group_key_column: GroupKey,
    filters: &HashMap<String, Vec<FilterClause>>,
    depth: usize,
    visited: &mut HashSet<(PropName, i64)>,
) -> EngineResult<HashMap<i64, Vec<Record>>> {
    let rows = sql.fetch_all(conn).await?;
    tracing::debug!(table, depth, rows = rows.len(), "fetched level");
    let mut raw_rows = Vec::with_capacity(rows.len());
    for row in &rows {
        raw_rows.push(decode_row(row)?.into_iter().collect::<HashMap<_, _>>());
    }

    let pk_col = schema.pk(table);
    let mut entries: Vec<(i64, i64, Record)> = Vec::with_capacity(raw_rows.len());
    for raw in &raw_rows {
        let own_pk = read_id(raw, &format!("{table}/{pk_col}"))?;
        let group_key = match &group_key_column {
            GroupKey::Column(c) => read_id(raw, &format!("{table}/{c}"))?,
            GroupKey::LiteralAlias(a) => read_id(raw, a)?,
        };
        entries.push((own_pk, group_key, base_record(schema, query, own_pk, raw)));
    }

    resolve_joins(conn, schema, table, query, &raw_rows, &mut entries, filters, depth, visited)
        .await?;

    if schema.stable_child_order() {
        entries.sort_by_key(|(own_pk, _, _)| *own_pk);
    }

    let mut grouped: HashMap<i64, Vec<Record>> = HashMap::new();
    for (_, group_key, record) in entries {
        grouped.entry(group_key).or_default().push(record);
    }
    Ok(grouped)
}

/// Build a record's scalar fields from a decoded row. Join fields are filled
/// in afterward by [`resolve_joins`]. The row is keyed by SQL-form column
/// aliases (`schema.graph_to_sql(prop)`), but the assembled record's fields
/// keep the caller's original graph-form property names.
fn base_record(schema: &Schema, query: &Query, own_pk: i64, raw: &HashMap<String, SqlValue>) -> Record {
    let mut record = Record::default();
    for el in query {
        let QueryElement::Leaf(prop) = el else { continue };
        if prop.is_id_sentinel() {
            record
                .fields
                .insert("db/id".to_string(), FieldValue::Scalar(SqlValue::BigInt(own_pk)));
            continue;
        }
        let sql_prop = schema.graph_to_sql(prop);
        if let Some(value) = raw.get(&sql_prop.to_string()) {
            record
                .fields
                .insert(prop.to_string(), FieldValue::Scalar(value.clone()));
        }
    }
    record
}

/// Resolve every join element of `query` against the whole row batch
/// (`entries`), one fetch per join, never one fetch per row.
fn resolve_joins<'a, C: GenericClient + Sync>(
    conn: &'a C,
    schema: &'a Schema,
    table: &'a str,
    query: &'a Query,
    raw_rows: &'a [HashMap<String, SqlValue>],
    entries: &'a mut Vec<(i64, i64, Record)>,
    filters: &'a HashMap<String, Vec<FilterClause>>,
    depth: usize,
    visited: &'a mut HashSet<(PropName, i64)>,
) -> Pin<Box<dyn Future<Output = EngineResult<()>> + Send + 'a>> {
    Box::pin(async move {
        for el in query {
            let QueryElement::Join { prop, sub } = el else { continue };
            let join_sql_prop = schema.graph_to_sql(prop);
            let descriptor = schema
                .join(&join_sql_prop)
                .ok_or_else(|| {
                    EngineError::SchemaInvalid(format!("no join descriptor for {prop}"))
                })?
                .clone();

            let next_depth = depth + 1;
            let next_query = match resolve_next_query(schema, query, prop, sub, next_depth)? {
                Some(q) => q,
                None => {
                    fill_bottomed_out(entries, prop, &descriptor);
                    continue;
                }
            };

            if descriptor.is_many_to_many() {
                resolve_many_to_many(
                    conn, schema, table, prop, sub, &descriptor, &next_query, entries, filters,
                    next_depth, visited,
                )
                .await?;
            } else if analyzer::is_forward(&descriptor, table) {
                resolve_forward(
                    conn, schema, table, prop, sub, &descriptor, &next_query, raw_rows, entries,
                    filters, next_depth, visited,
                )
                .await?;
            } else {
                resolve_reverse(
                    conn, schema, table, prop, sub, &descriptor, &next_query, entries, filters,
                    next_depth, visited,
                )
                .await?;
            }
        }
        Ok(())
    })
}

/// Decide the query shape for a join's next level, applying the recursion
/// ceiling (§4.6 step 4, §7.6). `None` means "stop, don't recurse further".
fn resolve_next_query(
    schema: &Schema,
    enclosing_query: &Query,
    join_prop: &PropName,
    sub: &SubQuery,
    next_depth: usize,
) -> EngineResult<Option<Query>> {
    match sub {
        SubQuery::Query(q) => Ok(Some(q.clone())),
        SubQuery::Recursive(marker) => match marker.step() {
            None => Ok(None),
            Some(next_marker) => {
                if next_depth > schema.max_recursion_depth() {
                    return Err(EngineError::RecursionCeilingExceeded {
                        join_prop: join_prop.clone(),
                        ceiling: schema.max_recursion_depth(),
                    });
                }
                Ok(Some(with_recursion_step(enclosing_query, join_prop, next_marker)))
            }
        },
    }
}

fn fill_bottomed_out(entries: &mut [(i64, i64, Record)], prop: &PropName, descriptor: &JoinDescriptor) {
    let empty = if descriptor.is_many_to_many() {
        FieldValue::ToMany(Vec::new())
    } else {
        match descriptor.arity {
            Arity::ToOne => FieldValue::ToOne(None),
            Arity::ToMany => FieldValue::ToMany(Vec::new()),
        }
    };
    for (_, _, record) in entries.iter_mut() {
        record.fields.insert(prop.to_string(), empty.clone());
    }
}

/// Only sentinel (`...`) recursion needs cycle protection: a depth-N marker
/// is already bounded by its countdown. Returns `false` when `parent_pk` has
/// already been expanded for this join (a cycle) and should be skipped.
fn sentinel_guard(sub: &SubQuery, prop: &PropName, parent_pk: i64, visited: &mut HashSet<(PropName, i64)>) -> bool {
    if matches!(sub, SubQuery::Recursive(Recursion::Sentinel)) {
        return visited.insert((prop.clone(), parent_pk));
    }
    true
}

#[allow(clippy::too_many_arguments)]
async fn resolve_forward<C: GenericClient + Sync>(
    conn: &C,
    schema: &Schema,
    table: &str,
    prop: &PropName,
    sub: &SubQuery,
    descriptor: &JoinDescriptor,
    next_query: &Query,
    raw_rows: &[HashMap<String, SqlValue>],
    entries: &mut [(i64, i64, Record)],
    filters: &HashMap<String, Vec<FilterClause>>,
    next_depth: usize,
    visited: &mut HashSet<(PropName, i64)>,
) -> EngineResult<()> {
    let fk_prop = descriptor.path[0].clone();
    let target_table = descriptor.path[1].space.clone().ok_or_else(|| {
        EngineError::SchemaInvalid(format!("join {prop} target column has no table"))
    })?;

    let mut fk_per_row: Vec<Option<i64>> = Vec::with_capacity(entries.len());
    let mut ids_to_fetch: Vec<i64> = Vec::new();
    for (i, (own_pk, _, _)) in entries.iter().enumerate() {
        let child_id = read_optional_fk(&raw_rows[i], &fk_prop.to_string())?;
        let allowed = child_id.is_some() && sentinel_guard(sub, prop, *own_pk, visited);
        let child_id = if allowed { child_id } else { None };
        if let Some(cid) = child_id {
            if !ids_to_fetch.contains(&cid) {
                ids_to_fetch.push(cid);
            }
        }
        fk_per_row.push(child_id);
    }

    let target_pk = schema.pk(&target_table);
    let sql = emitter::select_where_in(schema, &target_table, next_query, &target_pk, &ids_to_fetch, filters, next_depth)?;
    let grouped = fetch_level(
        conn,
        schema,
        &target_table,
        next_query,
        sql,
        GroupKey::Column(target_pk),
        filters,
        next_depth,
        visited,
    )
    .await?;

    for (i, (_, _, record)) in entries.iter_mut().enumerate() {
        let child = fk_per_row[i]
            .and_then(|cid| grouped.get(&cid))
            .and_then(|v| v.first())
            .cloned();
        record.fields.insert(prop.to_string(), FieldValue::ToOne(child.map(Box::new)));
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn resolve_reverse<C: GenericClient + Sync>(
    conn: &C,
    schema: &Schema,
    _table: &str,
    prop: &PropName,
    sub: &SubQuery,
    descriptor: &JoinDescriptor,
    next_query: &Query,
    entries: &mut [(i64, i64, Record)],
    filters: &HashMap<String, Vec<FilterClause>>,
    next_depth: usize,
    visited: &mut HashSet<(PropName, i64)>,
) -> EngineResult<()> {
    let fk_col = descriptor.path[0].clone();
    let target_table = fk_col.space.clone().ok_or_else(|| {
        EngineError::SchemaInvalid(format!("join {prop} target column has no table"))
    })?;

    let mut parent_ids: Vec<i64> = Vec::new();
    for (own_pk, _, _) in entries.iter() {
        if sentinel_guard(sub, prop, *own_pk, visited) && !parent_ids.contains(own_pk) {
            parent_ids.push(*own_pk);
        }
    }

    let sql = emitter::select_where_in(schema, &target_table, next_query, &fk_col.leaf, &parent_ids, filters, next_depth)?;
    let grouped = fetch_level(
        conn,
        schema,
        &target_table,
        next_query,
        sql,
        GroupKey::Column(fk_col.leaf.clone()),
        filters,
        next_depth,
        visited,
    )
    .await?;

    for (own_pk, _, record) in entries.iter_mut() {
        let children = grouped.get(own_pk).cloned().unwrap_or_default();
        let value = match descriptor.arity {
            Arity::ToOne => FieldValue::ToOne(children.into_iter().next().map(Box::new)),
            Arity::ToMany => FieldValue::ToMany(children),
        };
        record.fields.insert(prop.to_string(), value);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn resolve_many_to_many<C: GenericClient + Sync>(
    conn: &C,
    schema: &Schema,
    _table: &str,
    prop: &PropName,
    sub: &SubQuery,
    descriptor: &JoinDescriptor,
    next_query: &Query,
    entries: &mut [(i64, i64, Record)],
    filters: &HashMap<String, Vec<FilterClause>>,
    next_depth: usize,
    visited: &mut HashSet<(PropName, i64)>,
) -> EngineResult<()> {
    let target_table = descriptor.path[3].space.clone().ok_or_else(|| {
        EngineError::SchemaInvalid(format!("join {prop} target column has no table"))
    })?;

    let mut source_ids: Vec<i64> = Vec::new();
    for (own_pk, _, _) in entries.iter() {
        if sentinel_guard(sub, prop, *own_pk, visited) && !source_ids.contains(own_pk) {
            source_ids.push(*own_pk);
        }
    }

    let sql = emitter::select_many_to_many(schema, next_query, descriptor, &source_ids, filters, next_depth)?;
    let grouped = fetch_level(
        conn,
        schema,
        &target_table,
        next_query,
        sql,
        GroupKey::LiteralAlias(LINK_SOURCE_ALIAS),
        filters,
        next_depth,
        visited,
    )
    .await?;

    for (own_pk, _, record) in entries.iter_mut() {
        let children = grouped.get(own_pk).cloned().unwrap_or_default();
        record.fields.insert(prop.to_string(), FieldValue::ToMany(children));
    }
    Ok(())
}

fn read_id(raw: &HashMap<String, SqlValue>, key: &str) -> EngineResult<i64> {
    match raw.get(key) {
        Some(value) => value.as_id(),
        None => Err(EngineError::Decode {
            column: key.to_string(),
            message: "column missing from row".to_string(),
        }),
    }
}

fn read_optional_fk(raw: &HashMap<String, SqlValue>, key: &str) -> EngineResult<Option<i64>> {
    match raw.get(key) {
        None | Some(SqlValue::Null) => Ok(None),
        Some(value) => value.as_id().map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_shape::leaf;

    #[test]
    fn base_record_reads_id_sentinel_and_leaves() {
        let schema = Schema::new(
            HashMap::new(),
            HashMap::new(),
            HashMap::new(),
            crate::dialect::Driver::Postgres,
        )
        .unwrap();
        let query = vec![leaf("db/id"), leaf("account/name")];
        let mut raw = HashMap::new();
        raw.insert("account/name".to_string(), SqlValue::Text("acme".into()));

        let record = base_record(&schema, &query, 7, &raw);
        assert_eq!(
            record.fields.get("db/id"),
            Some(&FieldValue::Scalar(SqlValue::BigInt(7)))
        );
        assert_eq!(
            record.fields.get("account/name"),
            Some(&FieldValue::Scalar(SqlValue::Text("acme".into())))
        );
    }

    #[test]
    fn sentinel_guard_blocks_repeat_visits_only_for_sentinel() {
        let mut visited = HashSet::new();
        let prop = PropName::parse("todo-list-item/subitems");
        let sentinel = SubQuery::Recursive(Recursion::Sentinel);
        let depth_bound = SubQuery::Recursive(Recursion::Depth(3));

        assert!(sentinel_guard(&sentinel, &prop, 1, &mut visited));
        assert!(!sentinel_guard(&sentinel, &prop, 1, &mut visited));
        // Depth-bound recursion is never blocked by the visited set.
        assert!(sentinel_guard(&depth_bound, &prop, 1, &mut visited));
        assert!(sentinel_guard(&depth_bound, &prop, 1, &mut visited));
    }

    #[test]
    fn read_optional_fk_treats_null_as_absent() {
        let mut raw = HashMap::new();
        raw.insert("member/account_id".to_string(), SqlValue::Null);
        assert_eq!(read_optional_fk(&raw, "member/account_id").unwrap(), None);

        raw.insert("member/account_id".to_string(), SqlValue::BigInt(9));
        assert_eq!(read_optional_fk(&raw, "member/account_id").unwrap(), Some(9));

        assert_eq!(read_optional_fk(&raw, "member/missing").unwrap(), None);
    }

    #[test]
    fn resolve_next_query_floors_depth_recursion_to_none() {
        let schema = Schema::new(
            HashMap::new(),
            HashMap::new(),
            HashMap::new(),
            crate::dialect::Driver::Postgres,
        )
        .unwrap();
        let prop = PropName::parse("todo-list-item/subitems");
        let query = vec![leaf("db/id")];
        let sub = SubQuery::Recursive(Recursion::Depth(0));
        let next = resolve_next_query(&schema, &query, &prop, &sub, 2).unwrap();
        assert!(next.is_none());
    }

    #[test]
    fn resolve_next_query_errors_past_ceiling() {
        let schema = Schema::new(
            HashMap::new(),
            HashMap::new(),
            HashMap::new(),
            crate::dialect::Driver::Postgres,
        )
        .unwrap()
        .with_max_recursion_depth(2);
        let prop = PropName::parse("todo-list-item/subitems");
        let query = vec![leaf("db/id")];
        let sub = SubQuery::Recursive(Recursion::Sentinel);
        let err = resolve_next_query(&schema, &query, &prop, &sub, 3).unwrap_err();
        assert!(matches!(err, EngineError::RecursionCeilingExceeded { .. }));
    }
}
