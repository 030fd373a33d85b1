//! # pullsql
//!
//! A graph-shaped query engine that translates nested, dotted-property query
//! trees into SQL against a declarative [`Schema`], in the EQL/Om-Next style:
//! callers describe *what shape of data they want* (leaves, joins, bounded or
//! unbounded recursion) and the engine works out the SQL to fetch it.
//!
//! ## Pipeline
//!
//! - [`query_shape`] (C1/C3 data model): the caller-facing `Query` tree and
//!   the [`analyzer`] that resolves it to a table and column set.
//! - [`schema`] (C2): the graph→SQL mapping, primary keys, and join
//!   descriptors every other component consults.
//! - [`filter`] (C5): the `{eq,gt,lt,gte,lte,ne,null}` filter vocabulary.
//! - [`emitter`] (C4): builds the `SELECT` for one query level.
//! - [`traversal`] (C6/C7): walks the shape level by level and assembles
//!   [`traversal::Record`] trees.
//! - [`seed`] (C8): applies insert/update fixtures with placeholder
//!   cross-references.

pub mod analyzer;
pub mod client;
pub mod condition;
pub mod dialect;
pub mod emitter;
pub mod error;
pub mod filter;
pub mod ident;
pub mod prelude;
pub mod query_shape;
pub mod schema;
pub mod seed;
pub mod sql;
pub mod traversal;
pub mod value;

pub use client::GenericClient;
pub use condition::{Condition, Op};
pub use dialect::Driver;
pub use error::{EngineError, EngineResult};
pub use ident::{Ident, IntoIdent};
pub use query_shape::{PropName, Query, QueryElement, Recursion, SubQuery};
pub use schema::{Arity, JoinDescriptor, Schema};
pub use sql::{Sql, sql};
pub use traversal::{FieldValue, Record, run_query};
pub use value::SqlValue;

#[cfg(feature = "pool")]
pub mod pool;

#[cfg(feature = "pool")]
pub use client::PoolClient;

#[cfg(feature = "pool")]
pub use pool::{create_pool, create_pool_with_config};

#[cfg(feature = "migrate")]
pub mod migrate;
