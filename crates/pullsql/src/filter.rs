//! Filter engine (C5): turns caller-supplied filter parameters into
//! per-table, per-depth [`Condition`] clauses the traversal driver folds into
//! each level's `WHERE`.
//!
//! The declarative vocabulary is deliberately narrow (§4.5): a filter names a
//! graph property, a comparator drawn from `{eq, gt, lt, gte, lte, ne, null}`,
//! a value, and an optional depth window. Anything outside that vocabulary is
//! a caller error (§7.3), not something the engine tries to interpret.

use crate::condition::{Condition, Op};
use crate::error::{EngineError, EngineResult, UnknownFilterRule};
use crate::query_shape::PropName;
use crate::schema::Schema;
use crate::value::SqlValue;
use std::collections::HashMap;

/// Depth window defaults: a filter with no explicit window applies at every
/// level from the root query's direct rows down to effectively unbounded
/// recursion depth.
pub const DEFAULT_MIN_DEPTH: usize = 1;
pub const DEFAULT_MAX_DEPTH: usize = 1000;

/// A single caller-supplied filter, before resolution against the schema.
#[derive(Debug, Clone)]
pub struct FilterParam {
    /// The graph-form property the filter targets, e.g. `account/name`.
    pub property: PropName,
    /// One of `eq`, `gt`, `lt`, `gte`, `lte`, `ne`, `null`.
    pub comparator: String,
    pub value: SqlValue,
    pub min_depth: usize,
    pub max_depth: usize,
}

impl FilterParam {
    /// A filter with the default (unbounded) depth window.
    pub fn new(property: PropName, comparator: impl Into<String>, value: SqlValue) -> Self {
        FilterParam {
            property,
            comparator: comparator.into(),
            value,
            min_depth: DEFAULT_MIN_DEPTH,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_depth_window(mut self, min_depth: usize, max_depth: usize) -> Self {
        self.min_depth = min_depth;
        self.max_depth = max_depth;
        self
    }
}

/// A filter resolved against a schema: table, a ready-to-append condition,
/// and the depth window it applies in.
#[derive(Debug, Clone)]
pub struct FilterClause {
    pub table: String,
    condition: Condition,
    pub min_depth: usize,
    pub max_depth: usize,
}

/// Resolve a flat list of filter params into per-table clauses (§4.5).
///
/// Each param's property is remapped through the schema to find its SQL
/// table and column; its comparator is resolved to an [`Op`]. A comparator
/// outside the fixed vocabulary produces [`EngineError::UnknownFilterOp`]
/// carrying the offending rule.
pub fn filter_params_to_filters(
    schema: &Schema,
    params: &[FilterParam],
) -> EngineResult<HashMap<String, Vec<FilterClause>>> {
    let mut by_table: HashMap<String, Vec<FilterClause>> = HashMap::new();

    for param in params {
        let sql_prop = schema.graph_to_sql(&param.property);
        let table = sql_prop.space.clone().ok_or_else(|| {
            EngineError::SchemaInvalid(format!(
                "filter property {} does not resolve to a table",
                param.property
            ))
        })?;

        let condition = build_condition(&sql_prop.leaf, &param.comparator, &param.value)?;

        by_table.entry(table.clone()).or_default().push(FilterClause {
            table,
            condition,
            min_depth: param.min_depth,
            max_depth: param.max_depth,
        });
    }

    Ok(by_table)
}

fn build_condition(column: &str, comparator: &str, value: &SqlValue) -> EngineResult<Condition> {
    let unknown = || {
        EngineError::UnknownFilterOp(UnknownFilterRule {
            property: column.to_string(),
            comparator: comparator.to_string(),
        })
    };

    match comparator {
        "eq" => Condition::new(column, Op::eq(value.clone())),
        "ne" => Condition::new(column, Op::ne(value.clone())),
        "gt" => Condition::new(column, Op::gt(value.clone())),
        "gte" => Condition::new(column, Op::gte(value.clone())),
        "lt" => Condition::new(column, Op::lt(value.clone())),
        "lte" => Condition::new(column, Op::lte(value.clone())),
        "null" => match value {
            SqlValue::Bool(true) => Condition::is_null(column),
            SqlValue::Bool(false) => Condition::is_not_null(column),
            _ => Err(unknown()),
        },
        _ => Err(unknown()),
    }
}

/// The conditions active for `table` at `depth` (§4.5).
///
/// Only clauses whose table matches and whose depth window contains `depth`
/// are returned; the traversal driver ANDs these into that level's `WHERE`.
pub fn row_filter(
    filters: &HashMap<String, Vec<FilterClause>>,
    table: &str,
    depth: usize,
) -> Vec<Condition> {
    filters
        .get(table)
        .into_iter()
        .flatten()
        .filter(|c| depth >= c.min_depth && depth <= c.max_depth)
        .map(|c| c.condition.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Driver;
    use std::collections::HashMap as Map;

    fn schema() -> Schema {
        Schema::new(Map::new(), Map::new(), Map::new(), Driver::Postgres).unwrap()
    }

    #[test]
    fn resolves_eq_filter_to_table() {
        let schema = schema();
        let params = vec![FilterParam::new(
            PropName::parse("account/name"),
            "eq",
            SqlValue::Text("acme".into()),
        )];
        let filters = filter_params_to_filters(&schema, &params).unwrap();
        assert_eq!(filters["account"].len(), 1);
    }

    #[test]
    fn unknown_comparator_is_rejected() {
        let schema = schema();
        let params = vec![FilterParam::new(
            PropName::parse("account/name"),
            "like",
            SqlValue::Text("acme".into()),
        )];
        let err = filter_params_to_filters(&schema, &params).unwrap_err();
        assert!(matches!(err, EngineError::UnknownFilterOp(_)));
    }

    #[test]
    fn null_comparator_dispatches_on_bool_value() {
        let schema = schema();
        let params = vec![FilterParam::new(
            PropName::parse("account/deleted_at"),
            "null",
            SqlValue::Bool(true),
        )];
        let filters = filter_params_to_filters(&schema, &params).unwrap();
        assert_eq!(filters["account"].len(), 1);
    }

    #[test]
    fn depth_window_excludes_out_of_range_levels() {
        let schema = schema();
        let params = vec![
            FilterParam::new(PropName::parse("account/name"), "eq", SqlValue::Text("x".into()))
                .with_depth_window(2, 2),
        ];
        let filters = filter_params_to_filters(&schema, &params).unwrap();
        assert!(row_filter(&filters, "account", 1).is_empty());
        assert_eq!(row_filter(&filters, "account", 2).len(), 1);
        assert!(row_filter(&filters, "account", 3).is_empty());
    }

    #[test]
    fn row_filter_empty_for_unknown_table() {
        let filters = HashMap::new();
        assert!(row_filter(&filters, "account", 1).is_empty());
    }
}
