//! Convenient imports for typical `pullsql` usage.
//!
//! ```ignore
//! use pullsql::prelude::*;
//! ```

// ── Query shapes ─────────────────────────────────────────────────────────────
pub use crate::query_shape::{
    PropName, Query, QueryElement, Recursion, SubQuery, join, join_recursive, leaf,
    with_recursion_step,
};

// ── Schema ───────────────────────────────────────────────────────────────────
pub use crate::dialect::Driver;
pub use crate::schema::{Arity, JoinDescriptor, Schema};

// ── Filter engine ────────────────────────────────────────────────────────────
pub use crate::filter::{FilterClause, FilterParam, filter_params_to_filters, row_filter};

// ── Traversal & results ──────────────────────────────────────────────────────
pub use crate::traversal::{FieldValue, Record, run_query};

// ── Seed helper ──────────────────────────────────────────────────────────────
pub use crate::seed::{SeedInstruction, seed};

// ── SQL building & conditions ────────────────────────────────────────────────
pub use crate::condition::{Condition, Op};
pub use crate::ident::{Ident, IntoIdent};
pub use crate::sql::{Sql, sql};

// ── Dynamic values ───────────────────────────────────────────────────────────
pub use crate::value::SqlValue;

// ── Client ───────────────────────────────────────────────────────────────────
pub use crate::client::GenericClient;

// ── Errors ───────────────────────────────────────────────────────────────────
pub use crate::error::{EngineError, EngineResult};

// ── Connection pooling (feature: pool) ──────────────────────────────────────
#[cfg(feature = "pool")]
pub use crate::client::PoolClient;
#[cfg(feature = "pool")]
pub use crate::pool::{create_pool, create_pool_with_config};

// ── Migrations (feature: migrate) ───────────────────────────────────────────
#[cfg(feature = "migrate")]
pub use crate::migrate;
