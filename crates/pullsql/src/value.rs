//! Dynamic value representation for rows, filter literals, and seed values.
//!
//! The graph-to-SQL engine never knows column types at compile time: a schema
//! is data, not a set of Rust structs, so every scalar that crosses the
//! boundary (a row's column value, a filter's bound literal, a seed row's
//! column) has to be representable without a generic parameter. `SqlValue` is
//! that representation.

use crate::error::{EngineError, EngineResult};
use std::fmt;
use tokio_postgres::Row;
use tokio_postgres::types::{IsNull, ToSql, Type, to_sql_checked};

/// A dynamically typed scalar.
///
/// Covers the scalar types the engine actually needs to move in and out of
/// Postgres: integers (both `int4`/`int8`), floats, text, bool, UUID,
/// timestamps, and JSON. Anything else decodes as [`SqlValue::Text`] via the
/// column's text representation, which is sufficient for values that are only
/// ever round-tripped (never compared numerically) by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i32),
    BigInt(i64),
    Float(f64),
    Text(String),
    Uuid(uuid::Uuid),
    Timestamp(chrono::NaiveDateTime),
    Json(serde_json::Value),
}

impl SqlValue {
    /// A placeholder-free identity check used by the seed helper: is this
    /// value a symbolic placeholder keyword rather than a resolved scalar?
    pub fn as_placeholder(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) if s.starts_with(':') => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Coerce to `i64`, the type the traversal driver needs for primary keys
    /// and foreign keys.
    pub fn as_id(&self) -> EngineResult<i64> {
        match self {
            SqlValue::Int(v) => Ok(*v as i64),
            SqlValue::BigInt(v) => Ok(*v),
            other => Err(EngineError::Decode {
                column: "<id>".into(),
                message: format!("expected an integer id, got {other:?}"),
            }),
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Bool(b) => write!(f, "{b}"),
            SqlValue::Int(v) => write!(f, "{v}"),
            SqlValue::BigInt(v) => write!(f, "{v}"),
            SqlValue::Float(v) => write!(f, "{v}"),
            SqlValue::Text(s) => write!(f, "{s}"),
            SqlValue::Uuid(u) => write!(f, "{u}"),
            SqlValue::Timestamp(t) => write!(f, "{t}"),
            SqlValue::Json(v) => write!(f, "{v}"),
        }
    }
}

impl ToSql for SqlValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut bytes::BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            SqlValue::Null => Ok(IsNull::Yes),
            SqlValue::Bool(v) => v.to_sql(ty, out),
            SqlValue::Int(v) => v.to_sql(ty, out),
            SqlValue::BigInt(v) => v.to_sql(ty, out),
            SqlValue::Float(v) => v.to_sql(ty, out),
            SqlValue::Text(v) => v.to_sql(ty, out),
            SqlValue::Uuid(v) => v.to_sql(ty, out),
            SqlValue::Timestamp(v) => v.to_sql(ty, out),
            SqlValue::Json(v) => v.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// Decode a single row into a SQL-property → value mapping, where the
/// property name is taken from the column's `AS "table/col"` alias emitted by
/// [`crate::emitter::column_spec`].
pub fn decode_row(row: &Row) -> EngineResult<Vec<(String, SqlValue)>> {
    let mut out = Vec::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let name = column.name().to_string();
        let value = decode_column(row, idx, column.type_())
            .map_err(|e| EngineError::decode(name.clone(), e.to_string()))?;
        out.push((name, value));
    }
    Ok(out)
}

fn decode_column(
    row: &Row,
    idx: usize,
    ty: &Type,
) -> Result<SqlValue, Box<dyn std::error::Error + Sync + Send>> {
    use tokio_postgres::types::Type as T;

    let value = match *ty {
        T::BOOL => row
            .try_get::<_, Option<bool>>(idx)?
            .map(SqlValue::Bool)
            .unwrap_or(SqlValue::Null),
        T::INT2 => row
            .try_get::<_, Option<i16>>(idx)?
            .map(|v| SqlValue::Int(v as i32))
            .unwrap_or(SqlValue::Null),
        T::INT4 => row
            .try_get::<_, Option<i32>>(idx)?
            .map(SqlValue::Int)
            .unwrap_or(SqlValue::Null),
        T::INT8 => row
            .try_get::<_, Option<i64>>(idx)?
            .map(SqlValue::BigInt)
            .unwrap_or(SqlValue::Null),
        T::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)?
            .map(|v| SqlValue::Float(v as f64))
            .unwrap_or(SqlValue::Null),
        T::FLOAT8 => row
            .try_get::<_, Option<f64>>(idx)?
            .map(SqlValue::Float)
            .unwrap_or(SqlValue::Null),
        T::UUID => row
            .try_get::<_, Option<uuid::Uuid>>(idx)?
            .map(SqlValue::Uuid)
            .unwrap_or(SqlValue::Null),
        T::TIMESTAMP => row
            .try_get::<_, Option<chrono::NaiveDateTime>>(idx)?
            .map(SqlValue::Timestamp)
            .unwrap_or(SqlValue::Null),
        T::JSON | T::JSONB => row
            .try_get::<_, Option<serde_json::Value>>(idx)?
            .map(SqlValue::Json)
            .unwrap_or(SqlValue::Null),
        _ => row
            .try_get::<_, Option<String>>(idx)?
            .map(SqlValue::Text)
            .unwrap_or(SqlValue::Null),
    };
    Ok(value)
}
