//! Query condition primitives for the filter engine (C5).
//!
//! Deliberately narrow: the engine's declarative filter vocabulary is fixed
//! to `{eq, gt, lt, gte, lte, ne, null}` (§4.5), so `Op`/`Condition` only ever
//! need to express a single-column comparison against a single bound value,
//! or an `IS [NOT] NULL` check.

use crate::Ident;
use crate::error::EngineResult;
use crate::ident::IntoIdent;
use crate::sql::Sql;
use std::sync::Arc;
use tokio_postgres::types::ToSql;

/// Query operator for building conditions.
#[derive(Debug, Clone)]
pub enum Op<T> {
    Eq(T),
    Ne(T),
    Gt(T),
    Gte(T),
    Lt(T),
    Lte(T),
    IsNull,
    IsNotNull,
}

impl<T> Op<T> {
    pub fn eq(val: T) -> Self {
        Op::Eq(val)
    }

    pub fn ne(val: T) -> Self {
        Op::Ne(val)
    }

    pub fn gt(val: T) -> Self {
        Op::Gt(val)
    }

    pub fn gte(val: T) -> Self {
        Op::Gte(val)
    }

    pub fn lt(val: T) -> Self {
        Op::Lt(val)
    }

    pub fn lte(val: T) -> Self {
        Op::Lte(val)
    }

    pub fn is_null() -> Self {
        Op::IsNull
    }

    pub fn is_not_null() -> Self {
        Op::IsNotNull
    }
}

/// Internal enum to hold boxed values for conditions.
#[derive(Debug, Clone)]
enum ConditionValue {
    Single(Arc<dyn ToSql + Send + Sync>),
    None,
}

/// Internal representation of a [`Condition`].
#[derive(Debug, Clone)]
enum ConditionInner {
    /// Raw SQL condition (escape hatch).
    ///
    /// # Safety
    /// Be careful with SQL injection when using raw conditions.
    Raw(String),
    /// A structured condition over a validated identifier.
    Expr {
        column: Ident,
        operator: &'static str,
        value: ConditionValue,
    },
}

/// A query condition primitive used by the filter engine and by hand-built
/// `Sql` fragments.
#[derive(Debug, Clone)]
pub struct Condition(ConditionInner);

impl Condition {
    /// Create a new structured condition from a column identifier and operator.
    pub fn new<I, T>(column: I, op: Op<T>) -> EngineResult<Self>
    where
        I: IntoIdent,
        T: ToSql + Send + Sync + 'static,
    {
        let column = column.into_ident()?;
        let (operator, value) = match op {
            Op::Eq(v) => ("=", ConditionValue::Single(Arc::new(v))),
            Op::Ne(v) => ("!=", ConditionValue::Single(Arc::new(v))),
            Op::Gt(v) => (">", ConditionValue::Single(Arc::new(v))),
            Op::Gte(v) => (">=", ConditionValue::Single(Arc::new(v))),
            Op::Lt(v) => ("<", ConditionValue::Single(Arc::new(v))),
            Op::Lte(v) => ("<=", ConditionValue::Single(Arc::new(v))),
            Op::IsNull => ("IS NULL", ConditionValue::None),
            Op::IsNotNull => ("IS NOT NULL", ConditionValue::None),
        };

        Ok(Condition(ConditionInner::Expr {
            column,
            operator,
            value,
        }))
    }

    /// Create a raw SQL condition.
    ///
    /// # Safety
    /// Be careful with SQL injection when using raw conditions.
    pub fn raw(sql: impl Into<String>) -> Self {
        Condition(ConditionInner::Raw(sql.into()))
    }

    // ==================== Convenience constructors ====================

    pub fn eq<I, T>(column: I, value: T) -> EngineResult<Self>
    where
        I: IntoIdent,
        T: ToSql + Send + Sync + 'static,
    {
        Self::new(column, Op::Eq(value))
    }

    pub fn ne<I, T>(column: I, value: T) -> EngineResult<Self>
    where
        I: IntoIdent,
        T: ToSql + Send + Sync + 'static,
    {
        Self::new(column, Op::Ne(value))
    }

    pub fn gt<I, T>(column: I, value: T) -> EngineResult<Self>
    where
        I: IntoIdent,
        T: ToSql + Send + Sync + 'static,
    {
        Self::new(column, Op::Gt(value))
    }

    pub fn gte<I, T>(column: I, value: T) -> EngineResult<Self>
    where
        I: IntoIdent,
        T: ToSql + Send + Sync + 'static,
    {
        Self::new(column, Op::Gte(value))
    }

    pub fn lt<I, T>(column: I, value: T) -> EngineResult<Self>
    where
        I: IntoIdent,
        T: ToSql + Send + Sync + 'static,
    {
        Self::new(column, Op::Lt(value))
    }

    pub fn lte<I, T>(column: I, value: T) -> EngineResult<Self>
    where
        I: IntoIdent,
        T: ToSql + Send + Sync + 'static,
    {
        Self::new(column, Op::Lte(value))
    }

    pub fn is_null<I>(column: I) -> EngineResult<Self>
    where
        I: IntoIdent,
    {
        Ok(Condition(ConditionInner::Expr {
            column: column.into_ident()?,
            operator: "IS NULL",
            value: ConditionValue::None,
        }))
    }

    pub fn is_not_null<I>(column: I) -> EngineResult<Self>
    where
        I: IntoIdent,
    {
        Ok(Condition(ConditionInner::Expr {
            column: column.into_ident()?,
            operator: "IS NOT NULL",
            value: ConditionValue::None,
        }))
    }

    /// Build the SQL fragment and return parameter references.
    pub fn build(&self, param_idx: &mut usize) -> (String, Vec<&(dyn ToSql + Sync)>) {
        match &self.0 {
            ConditionInner::Raw(s) => (s.clone(), Vec::new()),
            ConditionInner::Expr {
                column,
                operator,
                value,
            } => {
                let col = column.to_sql();
                match value {
                    ConditionValue::Single(v) => {
                        *param_idx += 1;
                        let sql = format!("{} {} ${}", col, operator, *param_idx);
                        (sql, vec![&**v as &(dyn ToSql + Sync)])
                    }
                    ConditionValue::None => {
                        let sql = format!("{col} {operator}");
                        (sql, Vec::new())
                    }
                }
            }
        }
    }

    /// Append this condition into a [`Sql`] builder.
    ///
    /// This lets you reuse the same `Condition` primitives with the SQL-first [`Sql`] builder:
    /// placeholders are generated by `Sql`, and values are carried over safely.
    pub fn append_to_sql(&self, sql: &mut Sql) {
        match &self.0 {
            ConditionInner::Raw(s) => {
                sql.push(s);
            }
            ConditionInner::Expr {
                column,
                operator,
                value,
            } => {
                sql.push(&column.to_sql());
                sql.push(" ");
                sql.push(operator);
                match value {
                    ConditionValue::Single(v) => {
                        sql.push(" ");
                        sql.push_bind_value(v.clone());
                    }
                    ConditionValue::None => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_condition_sql(cond: &Condition, expected_sql: &str, expected_params: usize) {
        let mut idx = 0;
        let (sql, params) = cond.build(&mut idx);
        assert_eq!(sql, expected_sql);
        assert_eq!(params.len(), expected_params);
        assert_eq!(idx, expected_params);

        let mut b = Sql::empty();
        cond.append_to_sql(&mut b);
        assert_eq!(b.to_sql(), expected_sql);
        assert_eq!(b.params_ref().len(), expected_params);
    }

    #[test]
    fn condition_eq() {
        let cond = Condition::eq("name", "gadget").unwrap();
        assert_condition_sql(&cond, "name = $1", 1);
    }

    #[test]
    fn condition_comparators() {
        assert_condition_sql(&Condition::gt("age", 10_i32).unwrap(), "age > $1", 1);
        assert_condition_sql(&Condition::gte("age", 10_i32).unwrap(), "age >= $1", 1);
        assert_condition_sql(&Condition::lt("age", 10_i32).unwrap(), "age < $1", 1);
        assert_condition_sql(&Condition::lte("age", 10_i32).unwrap(), "age <= $1", 1);
        assert_condition_sql(&Condition::ne("age", 10_i32).unwrap(), "age != $1", 1);
    }

    #[test]
    fn condition_null_checks() {
        assert_condition_sql(&Condition::is_null("deleted_at").unwrap(), "deleted_at IS NULL", 0);
        assert_condition_sql(
            &Condition::is_not_null("deleted_at").unwrap(),
            "deleted_at IS NOT NULL",
            0,
        );
    }

    #[test]
    fn condition_build_respects_param_idx() {
        let c1 = Condition::eq("a", 1_i32).unwrap();
        let c2 = Condition::eq("b", 2_i32).unwrap();

        let mut idx = 0;
        let (sql1, p1) = c1.build(&mut idx);
        assert_eq!(sql1, "a = $1");
        assert_eq!(p1.len(), 1);

        let (sql2, p2) = c2.build(&mut idx);
        assert_eq!(sql2, "b = $2");
        assert_eq!(p2.len(), 1);
        assert_eq!(idx, 2);
    }
}
