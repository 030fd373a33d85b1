//! Query analyzer (C3): derives the table a query shape targets and the
//! minimum column set a level's SELECT must carry.

use crate::error::{EngineError, EngineResult};
use crate::query_shape::{PropName, Query, QueryElement};
use crate::schema::{JoinDescriptor, Schema};
use std::collections::BTreeSet;

/// Derive the single SQL table a query shape belongs to (§4.3).
///
/// Every leaf and join element must agree on the same `space` part once
/// remapped through the schema; `id`/`db/id` sentinels are skipped since they
/// carry no table information of their own.
pub fn table_for(schema: &Schema, query: &Query) -> EngineResult<String> {
    let mut spaces: BTreeSet<String> = BTreeSet::new();

    for el in query {
        let prop = match el {
            QueryElement::Leaf(p) => schema.graph_to_sql(p),
            QueryElement::Join { prop, .. } => schema.graph_to_sql(prop),
        };
        if prop.is_id_sentinel() {
            continue;
        }
        if let Some(space) = prop.space {
            spaces.insert(space);
        }
    }

    match spaces.len() {
        1 => Ok(spaces.into_iter().next().unwrap()),
        _ => Err(EngineError::UnresolvableTable(describe_query(query))),
    }
}

/// Whether `descriptor`'s path starts on `source_table` (the FK lives on the
/// current level's table, pointing at the target's PK).
pub fn is_forward(descriptor: &JoinDescriptor, source_table: &str) -> bool {
    descriptor
        .path
        .first()
        .and_then(|p| p.space.as_deref())
        .is_some_and(|space| space == source_table)
}

/// Whether `descriptor` is a reverse join from `source_table` (the FK lives
/// on the target, pointing back at the source's PK).
pub fn is_reverse(descriptor: &JoinDescriptor, source_table: &str) -> bool {
    !is_forward(descriptor, source_table)
}

/// The SQL property on `source_table` that resolves a join (§4.3).
///
/// Forward joins resolve via the descriptor's first element (the FK column
/// on this table); reverse joins resolve via the source table's own PK,
/// since the FK lives on the target and is only fetched at the next level.
pub fn sqlprop_for_join(
    schema: &Schema,
    source_table: &str,
    descriptor: &JoinDescriptor,
) -> PropName {
    if is_forward(descriptor, source_table) {
        descriptor.path[0].clone()
    } else {
        schema.id_prop(source_table)
    }
}

/// The minimum SELECT-list column set for a query level (§4.3).
///
/// Always includes the table's PK; each leaf contributes its remapped SQL
/// property; each forward join contributes its FK column (so the traversal
/// driver can build the child root set); reverse joins contribute nothing at
/// this level.
pub fn columns_for(schema: &Schema, table: &str, query: &Query) -> EngineResult<Vec<PropName>> {
    let mut columns: Vec<PropName> = vec![schema.id_prop(table)];

    for el in query {
        match el {
            QueryElement::Leaf(p) => {
                let sql_prop = schema.graph_to_sql(p);
                if sql_prop.is_id_sentinel() {
                    continue;
                }
                if !columns.contains(&sql_prop) {
                    columns.push(sql_prop);
                }
            }
            QueryElement::Join { prop, .. } => {
                let join_prop = schema.graph_to_sql(prop);
                let Some(descriptor) = schema.join(&join_prop) else {
                    continue;
                };
                if descriptor.is_many_to_many() {
                    continue;
                }
                if is_forward(descriptor, table) {
                    let fk = sqlprop_for_join(schema, table, descriptor);
                    if !columns.contains(&fk) {
                        columns.push(fk);
                    }
                }
            }
        }
    }

    Ok(columns)
}

fn describe_query(query: &Query) -> String {
    let mut parts = Vec::with_capacity(query.len());
    for el in query {
        match el {
            QueryElement::Leaf(p) => parts.push(p.to_string()),
            QueryElement::Join { prop, .. } => parts.push(format!("{{{prop} ...}}")),
        }
    }
    format!("[{}]", parts.join(" "))
}
