//! SQL emitter (C4): turns a query shape plus a resolved id set into a single
//! `SELECT` statement.
//!
//! Two shapes cover every join kind the traversal driver walks (§4.4):
//! a direct `WHERE <column> IN (...)` select (root level, forward joins keyed
//! by the target's PK, reverse joins keyed by the child table's FK), and a
//! many-to-many select that joins through the schema's link table.

use crate::analyzer;
use crate::dialect;
use crate::error::{EngineError, EngineResult};
use crate::filter::{self, FilterClause};
use crate::query_shape::Query;
use crate::schema::{JoinDescriptor, Schema};
use crate::sql::Sql;
use std::collections::HashMap;

/// The link-table-source-id alias emitted alongside a many-to-many select's
/// target columns, so the traversal driver can group children back onto the
/// source row that fetched them.
pub const LINK_SOURCE_ALIAS: &str = "__link_source_id";

/// Build `SELECT <columns> FROM <table> WHERE <table>.<filter_column> IN
/// (...) [AND <filters>]`.
///
/// Used for the root level (`filter_column` is the table's own PK) and for
/// forward/reverse single-FK joins (`filter_column` is whichever side of the
/// join descriptor lives on `table`).
pub fn select_where_in(
    schema: &Schema,
    table: &str,
    query: &Query,
    filter_column: &str,
    ids: &[i64],
    filters: &HashMap<String, Vec<FilterClause>>,
    depth: usize,
) -> EngineResult<Sql> {
    let columns = analyzer::columns_for(schema, table, query)?;
    let mut select_list: Vec<String> = columns
        .iter()
        .map(|c| dialect::column_spec(schema.driver(), table, &c.leaf))
        .collect();
    let filter_spec = dialect::column_spec(schema.driver(), table, filter_column);
    if !select_list.contains(&filter_spec) {
        select_list.push(filter_spec);
    }
    select_list.sort();

    let mut sql = Sql::new(format!(
        "SELECT {} FROM {table} WHERE {table}.{filter_column} IN ({})",
        select_list.join(", "),
        literal_id_list(ids)
    ));

    append_filters(&mut sql, filters, table, depth);
    Ok(sql)
}

/// Render an id set as a comma-joined, ascending literal list (§4.4) — no
/// bind parameters, since the ids are never caller-supplied text.
fn literal_id_list(ids: &[i64]) -> String {
    let mut sorted = ids.to_vec();
    sorted.sort_unstable();
    sorted.iter().map(i64::to_string).collect::<Vec<_>>().join(",")
}

/// Build the many-to-many select: `SELECT <target columns>, <link source id>
/// FROM <link> INNER JOIN <target> ON ... WHERE <link>.<left> IN (...) [AND
/// <filters>]`.
///
/// Returns the built statement; the link-source-id column is always aliased
/// as [`LINK_SOURCE_ALIAS`] so the caller doesn't need to know the link
/// table's column name to read it back off each row.
pub fn select_many_to_many(
    schema: &Schema,
    query: &Query,
    descriptor: &JoinDescriptor,
    source_ids: &[i64],
    filters: &HashMap<String, Vec<FilterClause>>,
    depth: usize,
) -> EngineResult<Sql> {
    if descriptor.path.len() != 4 {
        return Err(EngineError::SchemaInvalid(
            "select_many_to_many requires a 4-element join descriptor".to_string(),
        ));
    }
    let link_left = &descriptor.path[1];
    let link_right = &descriptor.path[2];
    let target_col = &descriptor.path[3];

    let link_table = link_left.space.as_deref().ok_or_else(|| {
        EngineError::SchemaInvalid("many-to-many link column has no table".to_string())
    })?;
    let target_table = target_col.space.as_deref().ok_or_else(|| {
        EngineError::SchemaInvalid("many-to-many target column has no table".to_string())
    })?;

    let columns = analyzer::columns_for(schema, target_table, query)?;
    let mut select_list: Vec<String> = columns
        .iter()
        .map(|c| dialect::column_spec(schema.driver(), target_table, &c.leaf))
        .collect();
    select_list.sort();
    select_list.push(format!(
        "{link_table}.{} AS \"{LINK_SOURCE_ALIAS}\"",
        link_left.leaf
    ));

    let mut sql = Sql::new(format!(
        "SELECT {} FROM {link_table} INNER JOIN {target_table} ON {link_table}.{} = {target_table}.{} WHERE {link_table}.{} IN ({})",
        select_list.join(", "),
        link_right.leaf,
        target_col.leaf,
        link_left.leaf,
        literal_id_list(source_ids),
    ));

    append_filters(&mut sql, filters, target_table, depth);
    Ok(sql)
}

fn append_filters(
    sql: &mut Sql,
    filters: &HashMap<String, Vec<FilterClause>>,
    table: &str,
    depth: usize,
) {
    let conditions = filter::row_filter(filters, table, depth);
    if !conditions.is_empty() {
        sql.push(" AND ");
        sql.push_conditions_and(&conditions);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Driver;
    use crate::query_shape::{PropName, leaf};
    use crate::schema::Arity;

    #[test]
    fn select_where_in_builds_in_list() {
        let schema = Schema::new(
            HashMap::new(),
            HashMap::new(),
            HashMap::new(),
            Driver::Postgres,
        )
        .unwrap();
        let q = vec![leaf("db/id"), leaf("account/name")];
        let sql = select_where_in(&schema, "account", &q, "id", &[3, 1, 2], &HashMap::new(), 1)
            .unwrap();
        assert!(sql.to_sql().contains("account.id IN (1,2,3)"));
        assert!(sql.to_sql().contains("account.name AS \"account/name\""));
    }

    #[test]
    fn select_many_to_many_joins_through_link_table() {
        let schema = Schema::new(
            HashMap::new(),
            HashMap::new(),
            HashMap::new(),
            Driver::Postgres,
        )
        .unwrap();
        let descriptor = JoinDescriptor::many_to_many(
            PropName::parse("account/id"),
            PropName::parse("account_tag/account_id"),
            PropName::parse("account_tag/tag_id"),
            PropName::parse("tag/id"),
        );
        let q = vec![leaf("db/id"), leaf("tag/label")];
        let sql =
            select_many_to_many(&schema, &q, &descriptor, &[7], &HashMap::new(), 1).unwrap();
        let rendered = sql.to_sql();
        assert!(rendered.contains("FROM account_tag INNER JOIN tag"));
        assert!(rendered.contains("account_tag.account_id IN (7)"));
        assert!(rendered.contains(&format!("AS \"{LINK_SOURCE_ALIAS}\"")));
    }

    #[test]
    fn rejects_non_many_to_many_descriptor() {
        let schema = Schema::new(
            HashMap::new(),
            HashMap::new(),
            HashMap::new(),
            Driver::Postgres,
        )
        .unwrap();
        let descriptor = JoinDescriptor::direct(
            PropName::parse("member/account_id"),
            PropName::parse("account/id"),
            Arity::ToMany,
        );
        let q = vec![leaf("db/id")];
        let err =
            select_many_to_many(&schema, &q, &descriptor, &[1], &HashMap::new(), 1).unwrap_err();
        assert!(matches!(err, EngineError::SchemaInvalid(_)));
    }
}
