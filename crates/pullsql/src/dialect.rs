//! Dialect-dispatched strategy functions.
//!
//! Most of the engine is dialect-agnostic; the handful of behaviors that
//! genuinely differ per backend (identifier normalization, column aliasing,
//! next-id lookup) are dispatched here off a tagged [`Driver`] rather than
//! expressed as subtype polymorphism.

use crate::client::GenericClient;
use crate::error::EngineResult;
use serde::{Deserialize, Serialize};

/// Dialect flavor tag carried on [`crate::schema::Schema`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Driver {
    #[default]
    Default,
    Postgres,
    Mysql,
    H2,
}

/// Replace dashes with underscores. Dialect-overridable in principle; every
/// supported driver uses the same rule today.
pub fn sqlize(_driver: Driver, part: &str) -> String {
    part.replace('-', "_")
}

/// Render a `table.col AS "table/col"` SELECT-list fragment.
pub fn column_spec(_driver: Driver, table: &str, column: &str) -> String {
    format!("{table}.{column} AS \"{table}/{column}\"")
}

/// Allocate the next primary-key value for `table` (pk column `pk`).
///
/// - Postgres/default: `SELECT nextval('<table>_<pk>_seq')`.
/// - MySQL/H2: no native sequence object; emulate monotonic allocation with a
///   max-plus-one probe against the table itself (single-writer test fixtures
///   only — this is a test-seeding helper, not a production ID generator).
///
/// When `dev` is `true`, burns a random `[0, 20)` extra allocations first so
/// that fixtures seeded into different tables don't end up sharing small IDs,
/// which would mask cross-table bugs in traversal tests.
pub async fn next_id(
    conn: &impl GenericClient,
    driver: Driver,
    table: &str,
    pk: &str,
    dev: bool,
) -> EngineResult<i64> {
    if dev {
        let jitter = dev_jitter();
        for _ in 0..jitter {
            let _ = allocate_one(conn, driver, table, pk).await?;
        }
    }
    allocate_one(conn, driver, table, pk).await
}

async fn allocate_one(
    conn: &impl GenericClient,
    driver: Driver,
    table: &str,
    pk: &str,
) -> EngineResult<i64> {
    match driver {
        Driver::Mysql | Driver::H2 => {
            let sql = format!("SELECT COALESCE(MAX({pk}), 0) + 1 FROM {table}");
            let row = conn.query_one(&sql, &[]).await?;
            Ok(row.try_get::<_, i64>(0).unwrap_or(1))
        }
        Driver::Postgres | Driver::Default => {
            let seq = format!("{table}_{pk}_seq");
            let sql = "SELECT nextval($1)";
            let row = conn.query_one(sql, &[&seq]).await?;
            Ok(row.get::<_, i64>(0))
        }
    }
}

/// `[0, 20)` uniformly distributed, without pulling in a `rand` dependency
/// for a single call site: xorshift seeded from the process clock.
fn dev_jitter() -> u32 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(1);
    let mut x = nanos.max(1);
    x ^= x << 13;
    x ^= x >> 17;
    x ^= x << 5;
    x % 20
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlize_replaces_dashes() {
        assert_eq!(sqlize(Driver::Postgres, "todo-list"), "todo_list");
        assert_eq!(sqlize(Driver::Default, "name"), "name");
    }

    #[test]
    fn column_spec_aliases_with_slash() {
        assert_eq!(
            column_spec(Driver::Postgres, "account", "name"),
            "account.name AS \"account/name\""
        );
    }

    #[test]
    fn dev_jitter_in_range() {
        for _ in 0..50 {
            assert!(dev_jitter() < 20);
        }
    }
}
